pub mod account;
pub mod event;
pub mod login_activity;

pub use account::Account;
pub use event::LoginEvent;
pub use login_activity::{LoginActivity, NewLoginActivity};
