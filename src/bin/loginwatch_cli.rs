use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use structopt::StructOpt;
use uuid::Uuid;

use loginwatch::alerting::{AlertDispatcher, AlertQueue, ChannelNotifier};
use loginwatch::config::Config;
use loginwatch::detection::BaselineClassifier;
use loginwatch::geolocation::build_resolver;
use loginwatch::models::{Account, LoginEvent};
use loginwatch::output::{OutputFormat, OutputHandler};
use loginwatch::persistence::{AccountDirectory, LoginActivityStore, SqliteLoginStore};
use loginwatch::recorder::LoginEventRecorder;

/// Loginwatch command line interface
#[derive(StructOpt, Debug)]
#[structopt(name = "loginwatch", about = "Unusual login detection CLI")]
struct Cli {
    /// Path to configuration file
    #[structopt(short, long, default_value = "config.toml")]
    config: PathBuf,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(StructOpt, Debug)]
enum Command {
    /// Generate a default configuration file
    Config {
        /// Output path for the configuration file
        #[structopt(short, long, default_value = "config.toml")]
        output: PathBuf,
    },
    /// Create or update an account
    AddAccount {
        #[structopt(long)]
        email: String,
        #[structopt(long)]
        first_name: Option<String>,
        #[structopt(long)]
        last_name: Option<String>,
        /// Account id; a new one is generated if omitted
        #[structopt(long)]
        id: Option<Uuid>,
    },
    /// Record one successful login
    Record {
        #[structopt(long)]
        user: Uuid,
        #[structopt(long)]
        ip: String,
        #[structopt(long, default_value = "")]
        user_agent: String,
        /// Trusted upstream country code, skips geolocation of the country
        #[structopt(long)]
        country: Option<String>,
        #[structopt(long)]
        city: Option<String>,
    },
    /// Show a user's most recent logins
    Recent {
        #[structopt(long)]
        user: Uuid,
        #[structopt(short, long, default_value = "5")]
        limit: usize,
        #[structopt(short, long, default_value = "console")]
        format: OutputFormat,
    },
    /// Show all logins flagged unusual for a user
    Unusual {
        #[structopt(long)]
        user: Uuid,
        #[structopt(short, long, default_value = "console")]
        format: OutputFormat,
    },
}

fn load_config(path: &Path) -> Result<Config, Box<dyn std::error::Error>> {
    if path.exists() {
        Ok(Config::from_file(path)?)
    } else {
        log::warn!("Config file {:?} not found, using defaults", path);
        Ok(Config::default())
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::from_args();

    match cli.command {
        Command::Config { output } => {
            Config::default().to_file(&output)?;
            println!("Default configuration written to: {:?}", output);
        }
        Command::AddAccount {
            email,
            first_name,
            last_name,
            id,
        } => {
            let config = load_config(&cli.config)?;
            let store = SqliteLoginStore::new(&config.database.path)?;
            let account = Account {
                id: id.unwrap_or_else(Uuid::new_v4),
                email,
                first_name,
                last_name,
            };
            store.upsert_account(&account)?;
            println!("{}", account.id);
        }
        Command::Record {
            user,
            ip,
            user_agent,
            country,
            city,
        } => {
            let config = load_config(&cli.config)?;
            record(&config, LoginEvent {
                user_id: user,
                ip_address: ip,
                user_agent,
                country,
                city,
            })?;
        }
        Command::Recent {
            user,
            limit,
            format,
        } => {
            let config = load_config(&cli.config)?;
            let store = SqliteLoginStore::new(&config.database.path)?;
            let activities = store.recent_for_user(user, limit)?;
            OutputHandler::new(format, None)?.write_activities(&activities)?;
        }
        Command::Unusual { user, format } => {
            let config = load_config(&cli.config)?;
            let store = SqliteLoginStore::new(&config.database.path)?;
            let activities = store.unusual_for_user(user)?;
            OutputHandler::new(format, None)?.write_activities(&activities)?;
        }
    }

    Ok(())
}

/// Record a login and wait briefly for its alert, if any, to go out
fn record(config: &Config, event: LoginEvent) -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(SqliteLoginStore::new(&config.database.path)?);
    let resolver = build_resolver(&config.geolocation)?;

    let runtime = tokio::runtime::Runtime::new()?;
    let (queue, rx) = AlertQueue::channel(config.alerting.queue_capacity);
    let dispatcher = AlertDispatcher::new(
        config.alerting.clone(),
        store.clone(),
        store.clone(),
        ChannelNotifier::new(&config.alerting),
    );
    let handle = runtime.spawn(dispatcher.run(rx));

    let recorder = LoginEventRecorder::new(store, resolver)
        .with_classifier(BaselineClassifier::with_baseline_count(
            config.detection.baseline_count,
        ))
        .with_alerts(queue);

    let activity = recorder.record_login(&event)?;
    drop(recorder);

    OutputHandler::new(OutputFormat::Console, None)?.write_activities(&[activity])?;

    runtime.block_on(async {
        if tokio::time::timeout(Duration::from_secs(30), handle).await.is_err() {
            log::warn!("Timed out waiting for alert delivery");
        }
    });
    Ok(())
}
