pub mod alerting;
pub mod config;
pub mod detection;
pub mod geolocation;
pub mod input;
pub mod models;
pub mod output;
pub mod persistence;
pub mod recorder;

// Re-export commonly used types
pub use alerting::{AlertDispatcher, AlertQueue, ChannelNotifier, Notifier, UnusualLoginAlert};
pub use config::Config;
pub use detection::BaselineClassifier;
pub use geolocation::{build_resolver, GeoResolver, ResolvedLocation};
pub use models::{Account, LoginActivity, LoginEvent, NewLoginActivity};
pub use persistence::{AccountDirectory, LoginActivityStore, PersistenceError, SqliteLoginStore};
pub use recorder::LoginEventRecorder;
