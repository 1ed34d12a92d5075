use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use loginwatch::alerting::{AlertDispatcher, AlertQueue, ChannelNotifier};
use loginwatch::config::Config;
use loginwatch::detection::BaselineClassifier;
use loginwatch::geolocation::build_resolver;
use loginwatch::input::FileTailer;
use loginwatch::persistence::SqliteLoginStore;
use loginwatch::recorder::LoginEventRecorder;

/// How long shutdown waits for queued alerts to be delivered
const ALERT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Records logins from the events feed and dispatches unusual-login alerts
fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("Starting loginwatch daemon...");

    let config_path = env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = if config_path.exists() {
        Config::from_file(&config_path)?
    } else {
        log::warn!("Config file {:?} not found, using defaults", config_path);
        Config::default()
    };

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal, gracefully stopping...");
        r.store(false, Ordering::SeqCst);
    })?;

    let store = Arc::new(SqliteLoginStore::new(&config.database.path)?);
    log::info!("Login activity database: {:?}", config.database.path);

    let resolver = build_resolver(&config.geolocation)?;
    log::info!("Geolocation provider: {:?}", config.geolocation.provider);

    // Alerts are delivered on the runtime; recording stays on this thread,
    // where blocking geolocation lookups are allowed
    let runtime = tokio::runtime::Runtime::new()?;
    let (queue, rx) = AlertQueue::channel(config.alerting.queue_capacity);
    let notifier = ChannelNotifier::new(&config.alerting);
    if config.alerting.enabled && !notifier.has_channels() {
        log::warn!("Alerting is enabled but no delivery channel is configured");
    }
    let dispatcher = AlertDispatcher::new(
        config.alerting.clone(),
        store.clone(),
        store.clone(),
        notifier,
    );
    let dispatcher_handle = runtime.spawn(dispatcher.run(rx));

    let recorder = LoginEventRecorder::new(store, resolver)
        .with_classifier(BaselineClassifier::with_baseline_count(
            config.detection.baseline_count,
        ))
        .with_alerts(queue);

    let mut tailer = FileTailer::new(config.input.events_path.clone());
    let poll_interval = Duration::from_millis(config.input.poll_interval_ms);
    let mut waiting_for_feed = false;

    log::info!("Watching login events in {:?}", config.input.events_path);
    log::info!("Daemon running. Press Ctrl+C to stop.");

    while running.load(Ordering::SeqCst) {
        if !tailer.is_valid() {
            if !waiting_for_feed {
                log::warn!("Events file {:?} not found, waiting", config.input.events_path);
                waiting_for_feed = true;
            }
            std::thread::sleep(poll_interval);
            continue;
        }
        waiting_for_feed = false;

        match tailer.read_events() {
            Ok(events) => {
                for event in events {
                    if let Err(e) = recorder.record_login(&event) {
                        log::error!("Failed to record login for user {}: {}", event.user_id, e);
                    }
                }
            }
            Err(e) => log::error!("Error reading events file: {}", e),
        }

        std::thread::sleep(poll_interval);
    }

    log::info!(
        "Stopped reading {:?} at byte {}",
        config.input.events_path,
        tailer.position()
    );

    // Dropping the recorder closes the alert queue, letting the dispatcher
    // finish what is already queued and exit
    drop(recorder);
    runtime.block_on(async {
        match tokio::time::timeout(ALERT_DRAIN_TIMEOUT, dispatcher_handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::error!("Alert dispatcher failed: {}", e),
            Err(_) => log::warn!("Timed out waiting for pending alerts"),
        }
    });

    log::info!("Loginwatch daemon stopped");
    Ok(())
}
