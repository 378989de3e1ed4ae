//! morse-tracker - location and zone alerts as dot-dash text messages
//!
//! `run` (the default) starts the foreground tracker, resumes the periodic
//! sharing job and runs until Ctrl+C. The other subcommands read or edit the
//! stored preferences and exit.

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use morse_tracker::domain::Encoder;
use morse_tracker::infra::{
    Config, FilePreferenceStore, GatewayMode, LocationSource, Metrics, PreferenceStore,
};
use morse_tracker::io::{
    DispatchGateway, GpsdLocationProvider, HttpSmsChannel, LocationProvider, LogNotifier,
    MessagingChannel, ModemSmsChannel, Notifier, OutboxChannel, ReplayLocationProvider,
    SoftGeofence,
};
use morse_tracker::services::{
    periodic_spec, ForegroundTracker, PeriodicLocationJob, Pipeline, TokioScheduler, TrackerCore,
    TrackerSettings,
};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Shares location and HOME/COLLEGE zone alerts as dot-dash text messages
#[derive(Parser, Debug)]
#[command(name = "morse-tracker", version, about)]
struct Args {
    /// Path to TOML configuration file (default: $CONFIG_FILE, then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the tracker until Ctrl+C
    Run,
    /// Print the dot-dash encoding of a text
    Encode {
        #[arg(required = true)]
        text: Vec<String>,
    },
    /// Print the stored preferences
    Show,
    /// Set the contact phone number
    Contact { number: String },
    /// Set the home zone center
    Home {
        #[arg(allow_negative_numbers = true)]
        latitude: String,
        #[arg(allow_negative_numbers = true)]
        longitude: String,
    },
    /// Set the college zone center
    College {
        #[arg(allow_negative_numbers = true)]
        latitude: String,
        #[arg(allow_negative_numbers = true)]
        longitude: String,
    },
    /// Persist the periodic sharing flag (a running daemon applies it on its next start)
    Sharing {
        #[arg(value_enum)]
        state: Toggle,
    },
    /// Reset all preferences to defaults
    Clear,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Toggle {
    On,
    Off,
}

/// Long-lived components shared by the subcommands
struct App {
    core: TrackerCore,
    metrics: Arc<Metrics>,
    scheduler: Arc<TokioScheduler>,
}

fn init_tracing(json: bool) {
    // Default: INFO, use RUST_LOG=debug for per-fix visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn encoder(config: &Config) -> Encoder {
    if config.encode_minus_sign() {
        Encoder::with_minus_sign()
    } else {
        Encoder::standard()
    }
}

fn build_channel(config: &Config) -> anyhow::Result<Arc<dyn MessagingChannel>> {
    let channel: Arc<dyn MessagingChannel> = match config.gateway_mode() {
        GatewayMode::Outbox => Arc::new(OutboxChannel::new(config.outbox_file())),
        GatewayMode::Http => Arc::new(
            HttpSmsChannel::new(config.gateway_http_url(), config.gateway_timeout())
                .context("Failed to set up HTTP SMS gateway")?,
        ),
        GatewayMode::Modem => Arc::new(ModemSmsChannel::new(
            config.modem_device(),
            config.modem_baud(),
            config.gateway_timeout(),
        )),
    };
    Ok(channel)
}

fn build_location(config: &Config) -> anyhow::Result<Arc<dyn LocationProvider>> {
    let provider: Arc<dyn LocationProvider> = match config.location_source() {
        LocationSource::Gpsd => Arc::new(GpsdLocationProvider::new(config.gpsd_addr())),
        LocationSource::Replay => {
            Arc::new(ReplayLocationProvider::from_file(config.replay_file())?)
        }
    };
    Ok(provider)
}

fn build_app(config: &Config) -> anyhow::Result<App> {
    let metrics = Arc::new(Metrics::new());
    let prefs: Arc<dyn PreferenceStore> =
        Arc::new(FilePreferenceStore::new(config.preferences_file()));
    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);

    let location = build_location(config)?;
    let geofence = Arc::new(SoftGeofence::new(location.clone(), config.geofence_interval()));
    let gateway = DispatchGateway::new(build_channel(config)?, metrics.clone());
    let pipeline = Pipeline::new(encoder(config), gateway);

    let tracker = ForegroundTracker::new(
        prefs.clone(),
        location.clone(),
        geofence,
        pipeline.clone(),
        notifier.clone(),
        TrackerSettings::from_config(config),
    );
    let job = PeriodicLocationJob::new(prefs.clone(), location, pipeline, notifier.clone())
        .with_last_fix_timeout(config.last_fix_timeout())
        .with_max_attempts(config.periodic_max_attempts());

    let scheduler = Arc::new(TokioScheduler::new());
    let core = TrackerCore::new(
        prefs,
        tracker,
        scheduler.clone(),
        Arc::new(job),
        periodic_spec(config),
        notifier,
    );

    Ok(App { core, metrics, scheduler })
}

async fn run(app: App, config: &Config) -> anyhow::Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Start Prometheus metrics HTTP server (if port > 0)
    let prometheus_port = config.prometheus_port();
    if prometheus_port > 0 {
        let prom_metrics = app.metrics.clone();
        let device = config.device_name().to_string();
        let prom_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = morse_tracker::io::prometheus::start_metrics_server(
                prometheus_port,
                prom_metrics,
                device,
                prom_shutdown,
            )
            .await
            {
                error!(error = %e, "prometheus_metrics_server_error");
            }
        });
    }

    // Periodic metrics summary in the log
    let metrics = app.metrics.clone();
    let metrics_interval = config.metrics_interval_secs().max(1);
    let mut metrics_shutdown = shutdown_rx;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(metrics_interval));
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => metrics.report().log(),
                _ = metrics_shutdown.changed() => break,
            }
        }
    });

    app.core.resume().await;
    app.core.start().await;

    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl+C")?;
    info!("shutdown_signal_received");
    let _ = shutdown_tx.send(true);

    app.core.stop().await;
    app.scheduler.shutdown();
    app.metrics.report().log();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    let config_path = Config::resolve_config_path(args.config.as_deref());
    let config = Config::load_from_path(&config_path);

    let command = args.command.unwrap_or(Command::Run);
    if let Command::Encode { text } = &command {
        println!("{}", encoder(&config).encode(&text.join(" ")));
        return Ok(());
    }

    let app = build_app(&config)?;

    match command {
        Command::Run => {
            info!(
                version = env!("CARGO_PKG_VERSION"),
                git_hash = env!("GIT_HASH"),
                config_file = %config.config_file(),
                device = %config.device_name(),
                gateway_mode = %config.gateway_mode().as_str(),
                location_source = ?config.location_source(),
                preferences_file = %config.preferences_file(),
                prometheus_port = %config.prometheus_port(),
                "morse_tracker_starting"
            );
            run(app, &config).await?;
            info!("morse-tracker shutdown complete");
        }
        Command::Show => {
            let prefs = app.core.preferences().await;
            println!("{}", serde_json::to_string_pretty(&prefs)?);
        }
        Command::Contact { number } => app.core.update_contact_number(&number).await,
        Command::Home { latitude, longitude } => {
            app.core.update_home_zone(&latitude, &longitude).await?;
        }
        Command::College { latitude, longitude } => {
            app.core.update_college_zone(&latitude, &longitude).await?;
        }
        Command::Sharing { state } => {
            app.core.enable(matches!(state, Toggle::On)).await;
            app.scheduler.shutdown();
        }
        Command::Clear => app.core.clear_preferences().await,
        Command::Encode { .. } => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_sharing_help_says_flag_is_only_persisted() {
        let cmd = Args::command();
        let sharing = cmd.find_subcommand("sharing").unwrap();
        let about = sharing.get_about().unwrap().to_string();
        assert!(about.starts_with("Persist the periodic sharing flag"));
        assert!(about.contains("next start"));
    }

    #[test]
    fn test_home_accepts_negative_coordinates() {
        let args = Args::try_parse_from(["morse-tracker", "home", "-33.86", "-151.2"]).unwrap();
        let Some(Command::Home { latitude, longitude }) = args.command else {
            panic!("expected the home subcommand");
        };
        assert_eq!((latitude.as_str(), longitude.as_str()), ("-33.86", "-151.2"));
    }
}
