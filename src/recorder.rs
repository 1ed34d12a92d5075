//! Records authentication events and flags unusual logins
//!
//! For each successful login the recorder resolves a location (unless the
//! caller already supplied one), classifies it against the user's existing
//! history, appends exactly one [`LoginActivity`], and, if the login is
//! unusual, enqueues an alert. The write happens before the alert is queued,
//! and the alert is fire-and-forget.
//!
//! No lock is held across calls. Two concurrent logins for the same user can
//! read the same history and classify independently; each still produces its
//! own immutable row.

use std::sync::Arc;

use crate::alerting::{AlertQueue, UnusualLoginAlert};
use crate::detection::BaselineClassifier;
use crate::geolocation::{GeoResolver, ResolvedLocation};
use crate::models::{LoginActivity, LoginEvent, NewLoginActivity};
use crate::persistence::{LoginActivityStore, PersistenceError};

pub struct LoginEventRecorder {
    store: Arc<dyn LoginActivityStore>,
    resolver: Arc<dyn GeoResolver>,
    classifier: BaselineClassifier,
    alerts: Option<AlertQueue>,
}

impl LoginEventRecorder {
    /// Create a recorder that does not emit alerts
    pub fn new(store: Arc<dyn LoginActivityStore>, resolver: Arc<dyn GeoResolver>) -> Self {
        LoginEventRecorder {
            store,
            resolver,
            classifier: BaselineClassifier::new(),
            alerts: None,
        }
    }

    pub fn with_classifier(mut self, classifier: BaselineClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Emit an alert on `queue` for every unusual login
    pub fn with_alerts(mut self, queue: AlertQueue) -> Self {
        self.alerts = Some(queue);
        self
    }

    /// Record one successful login
    ///
    /// Returns the persisted activity. Geolocation and alert failures never
    /// surface here; the only error is a failed write to the store.
    pub fn record_login(&self, event: &LoginEvent) -> Result<LoginActivity, PersistenceError> {
        let location = self.locate(event);
        let unusual = self.classify(event, location.country.as_deref());

        let activity = self.store.insert_login_activity(&NewLoginActivity {
            user_id: event.user_id,
            ip_address: event.ip_address.clone(),
            user_agent: event.user_agent.clone(),
            country: location.country,
            city: location.city,
            unusual,
        })?;

        log::debug!(
            "Recorded login {} for user {} from {} ({})",
            activity.id,
            activity.user_id,
            activity.ip_address,
            activity.display_location()
        );

        if activity.unusual {
            log::info!(
                "Unusual login {} for user {} from {} ({})",
                activity.id,
                activity.user_id,
                activity.ip_address,
                activity.display_location()
            );
            if let Some(ref queue) = self.alerts {
                queue.queue_alert(UnusualLoginAlert {
                    login_activity_id: activity.id,
                });
            }
        }

        Ok(activity)
    }

    /// Caller-supplied fields win; the resolver only fills in what is missing
    fn locate(&self, event: &LoginEvent) -> ResolvedLocation {
        let supplied = ResolvedLocation::new(event.country.clone(), event.city.clone());
        if supplied.country.is_some() && supplied.city.is_some() {
            return supplied;
        }

        let resolved = self.resolver.resolve(&event.ip_address);
        ResolvedLocation {
            country: supplied.country.or(resolved.country),
            city: supplied.city.or(resolved.city),
        }
    }

    fn classify(&self, event: &LoginEvent, country: Option<&str>) -> bool {
        if country.is_none() {
            return false;
        }

        let history = self
            .store
            .count_for_user(event.user_id)
            .and_then(|count| {
                let window = self
                    .store
                    .earliest_countries(event.user_id, self.classifier.baseline_count())?;
                Ok((count, window))
            });

        match history {
            Ok((count, window)) => self.classifier.is_unusual(count, &window, country),
            Err(e) => {
                log::warn!(
                    "Failed to read login history for user {}: {}",
                    event.user_id,
                    e
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geolocation::GeoError;
    use crate::models::Account;
    use crate::persistence::{AccountDirectory, SqliteLoginStore};
    use std::net::IpAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use uuid::Uuid;

    /// Resolver returning a scripted sequence of results
    struct ScriptedResolver {
        results: Mutex<Vec<Result<ResolvedLocation, GeoError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedResolver {
        fn new(results: Vec<Result<ResolvedLocation, GeoError>>) -> Self {
            ScriptedResolver {
                results: Mutex::new(results),
                calls: AtomicUsize::new(0),
            }
        }

        fn always(country: &str, city: &str) -> Self {
            let location = ResolvedLocation::new(Some(country.to_string()), Some(city.to_string()));
            Self::new((0..16).map(|_| Ok(location.clone())).collect())
        }
    }

    impl GeoResolver for ScriptedResolver {
        fn lookup(&self, _ip: IpAddr) -> Result<ResolvedLocation, GeoError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut results = self.results.lock().unwrap();
            if results.is_empty() {
                Err(GeoError::NotFound)
            } else {
                results.remove(0)
            }
        }
    }

    fn setup(resolver: ScriptedResolver) -> (Arc<SqliteLoginStore>, Arc<ScriptedResolver>, Uuid) {
        let store = Arc::new(SqliteLoginStore::in_memory().unwrap());
        let account = Account::new("alice@example.com").with_name("Alice", "Smith");
        store.upsert_account(&account).unwrap();
        (store, Arc::new(resolver), account.id)
    }

    fn event(user_id: Uuid, ip: &str, country: Option<&str>) -> LoginEvent {
        LoginEvent::new(user_id, ip, "Mozilla/5.0").with_location(country, None)
    }

    #[test]
    fn test_loopback_skips_geolocation() {
        let (store, resolver, user_id) = setup(ScriptedResolver::always("US", "Denver"));
        let recorder = LoginEventRecorder::new(store, resolver.clone());

        let activity = recorder.record_login(&event(user_id, "127.0.0.1", None)).unwrap();

        assert_eq!(resolver.calls.load(Ordering::SeqCst), 0);
        assert_eq!(activity.country, None);
        assert_eq!(activity.city, None);
        assert!(!activity.unusual);
    }

    #[test]
    fn test_supplied_location_takes_precedence() {
        let (store, resolver, user_id) = setup(ScriptedResolver::always("US", "Denver"));
        let recorder = LoginEventRecorder::new(store, resolver.clone());

        let login = LoginEvent::new(user_id, "203.0.113.1", "Mozilla/5.0")
            .with_location(Some("CA"), Some("Toronto"));
        let activity = recorder.record_login(&login).unwrap();

        assert_eq!(resolver.calls.load(Ordering::SeqCst), 0);
        assert_eq!(activity.country.as_deref(), Some("CA"));
        assert_eq!(activity.city.as_deref(), Some("Toronto"));
    }

    #[test]
    fn test_resolver_fills_missing_fields_only() {
        let (store, resolver, user_id) = setup(ScriptedResolver::always("US", "Denver"));
        let recorder = LoginEventRecorder::new(store, resolver.clone());

        let activity = recorder
            .record_login(&event(user_id, "203.0.113.1", Some("CA")))
            .unwrap();

        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
        assert_eq!(activity.country.as_deref(), Some("CA"));
        assert_eq!(activity.city.as_deref(), Some("Denver"));
    }

    #[test]
    fn test_resolver_failure_records_unknown_location() {
        let (store, resolver, user_id) = setup(ScriptedResolver::new(vec![Err(
            GeoError::LookupFailed("timeout".to_string()),
        )]));
        let recorder = LoginEventRecorder::new(store.clone(), resolver);

        for _ in 0..3 {
            recorder.record_login(&event(user_id, "198.51.100.7", Some("US"))).unwrap();
        }
        let activity = recorder.record_login(&event(user_id, "203.0.113.1", None)).unwrap();

        assert_eq!(activity.country, None);
        assert!(!activity.unusual);
        assert_eq!(store.count_for_user(user_id).unwrap(), 4);
    }

    #[test]
    fn test_unusual_login_enqueues_one_alert() {
        let (store, resolver, user_id) = setup(ScriptedResolver::always("CA", "Toronto"));
        let (queue, mut rx) = AlertQueue::channel(10);
        let recorder = LoginEventRecorder::new(store.clone(), resolver).with_alerts(queue);

        for _ in 0..3 {
            let activity = recorder.record_login(&event(user_id, "198.51.100.7", Some("US"))).unwrap();
            assert!(!activity.unusual);
        }
        assert!(rx.try_recv().is_err());

        let activity = recorder.record_login(&event(user_id, "203.0.113.1", None)).unwrap();
        assert_eq!(activity.country.as_deref(), Some("CA"));
        assert!(activity.unusual);

        assert_eq!(
            rx.try_recv().unwrap(),
            UnusualLoginAlert {
                login_activity_id: activity.id
            }
        );
        assert!(rx.try_recv().is_err());

        let stored = store.get_login_activity(activity.id).unwrap().unwrap();
        assert!(stored.unusual);
    }

    #[test]
    fn test_closed_alert_queue_does_not_affect_recording() {
        let (store, resolver, user_id) = setup(ScriptedResolver::always("CA", "Toronto"));
        let (queue, rx) = AlertQueue::channel(1);
        drop(rx);
        let recorder = LoginEventRecorder::new(store.clone(), resolver).with_alerts(queue);

        for _ in 0..3 {
            recorder.record_login(&event(user_id, "198.51.100.7", Some("US"))).unwrap();
        }
        let activity = recorder.record_login(&event(user_id, "203.0.113.1", None)).unwrap();

        assert!(activity.unusual);
        assert!(store.get_login_activity(activity.id).unwrap().unwrap().unusual);
    }

    #[test]
    fn test_baseline_forms_before_flagging() {
        let (store, resolver, user_id) = setup(ScriptedResolver::new(vec![]));
        let recorder = LoginEventRecorder::new(store, resolver);

        // First logins from anywhere are never unusual
        for country in ["US", "CA", "JP"] {
            let activity = recorder.record_login(&event(user_id, "203.0.113.1", Some(country))).unwrap();
            assert!(!activity.unusual);
        }

        // Three-way tie resolves to the earliest country
        assert!(!recorder.record_login(&event(user_id, "203.0.113.1", Some("US"))).unwrap().unusual);
        assert!(recorder.record_login(&event(user_id, "203.0.113.1", Some("JP"))).unwrap().unusual);
    }

    #[test]
    fn test_custom_baseline_count() {
        let (store, resolver, user_id) = setup(ScriptedResolver::new(vec![]));
        let recorder = LoginEventRecorder::new(store, resolver)
            .with_classifier(BaselineClassifier::with_baseline_count(1));

        recorder.record_login(&event(user_id, "203.0.113.1", Some("US"))).unwrap();
        assert!(recorder.record_login(&event(user_id, "203.0.113.1", Some("CA"))).unwrap().unusual);
    }

    #[test]
    fn test_identical_logins_are_not_deduplicated() {
        let (store, resolver, user_id) = setup(ScriptedResolver::new(vec![]));
        let recorder = LoginEventRecorder::new(store.clone(), resolver);
        let login = event(user_id, "127.0.0.1", None);

        let first = recorder.record_login(&login).unwrap();
        let second = recorder.record_login(&login).unwrap();

        assert_ne!(first.id, second.id);
        assert_eq!(store.count_for_user(user_id).unwrap(), 2);
    }

    #[test]
    fn test_storage_failure_propagates() {
        let (store, resolver, _) = setup(ScriptedResolver::new(vec![]));
        let (queue, mut rx) = AlertQueue::channel(10);
        let recorder = LoginEventRecorder::new(store, resolver).with_alerts(queue);

        // Unknown account violates the foreign key
        let result = recorder.record_login(&event(Uuid::new_v4(), "127.0.0.1", Some("US")));

        assert!(matches!(result, Err(PersistenceError::Database(_))));
        assert!(rx.try_recv().is_err());
    }
}
