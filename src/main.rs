use clap::{Parser, Subcommand};
use db_activity_monitor::alerting::evaluation_service::ActivityMonitor;
use db_activity_monitor::alerting::health_check::{HealthCheck, InactivityCheck, ProcedureStatusCheck};
use db_activity_monitor::db::probe::PgProbe;
use db_activity_monitor::notifications::models::AlertMessage;
use db_activity_monitor::notifications::service::{DispatchOutcome, NotificationService};
use db_activity_monitor::server::config::MonitorConfig;
use db_activity_monitor::web::create_axum_router;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the periodic check and the HTTP endpoints (default)
    Serve,
    /// Run a single check, print the JSON result and exit
    Check,
    /// Send a test alert through the configured notification channels
    TestNotification,
}

fn init_logging(log_dir: &str) {
    // Log to a file: JSON format, daily rotation
    let file_appender = rolling::daily(log_dir, "monitor.log");
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .json();

    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx::query=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();
}

fn create_pool(config: &MonitorConfig) -> Result<PgPool, BoxError> {
    let options = PgConnectOptions::from_str(&config.database_url)?
        .options([("statement_timeout", format!("{}s", config.db_query_timeout_seconds))]);

    Ok(PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(Duration::from_secs(config.db_query_timeout_seconds))
        .connect_lazy_with(options))
}

fn build_monitor(
    config: &MonitorConfig,
    pool: PgPool,
    notification_service: Arc<NotificationService>,
) -> Result<ActivityMonitor, BoxError> {
    let probe = Arc::new(PgProbe::new(pool, config.timestamp.clone(), config.procedure.as_ref()));

    let health_check: Box<dyn HealthCheck> = match (&config.timestamp, &config.procedure) {
        (Some(target), _) => {
            info!(table = %target.table, column = %target.column, "Using timestamp freshness check.");
            Box::new(InactivityCheck::new(probe, target.clone(), config.inactivity_threshold()))
        }
        (None, Some(target)) => {
            info!(procedures = target.procedures.len(), "Using stored procedure status check.");
            Box::new(ProcedureStatusCheck::new(probe, target.clone()))
        }
        (None, None) => return Err("no health check configured".into()),
    };

    Ok(ActivityMonitor::new(
        health_check,
        notification_service,
        config.alert_cooldown(),
    ))
}

async fn send_test_notification(config: &MonitorConfig, notification_service: &NotificationService) {
    let message = AlertMessage::new(
        format!("Test Alert - {}", config.app_name),
        "This is a test alert to verify the notification configuration.\n\n\
         If you receive this, alerts are properly configured.",
    )
    .with_fact("Status", "Test");

    match notification_service.dispatch(&message).await {
        DispatchOutcome::Delivered { channel } => info!(channel = %channel, "Test notification delivered."),
        DispatchOutcome::Failed { attempted } => error!(?attempted, "Test notification failed on every channel."),
        DispatchOutcome::NoChannels => warn!("No notification channel is enabled."),
    }
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let args = Args::parse();

    let config = match MonitorConfig::load(args.config.as_deref()) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            eprintln!("Failed to load monitor configuration: {e}");
            return Err(e.into());
        }
    };

    init_logging(&config.log_dir);
    info!(app = %config.app_name, mode = ?config.check_mode, "Starting database activity monitor.");

    let notification_service = Arc::new(NotificationService::from_config(&config)?);
    info!(channels = ?notification_service.channel_names(), "Notification channels configured.");

    if let Some(Command::TestNotification) = args.command {
        send_test_notification(&config, &notification_service).await;
        return Ok(());
    }

    let pool = create_pool(&config)?;
    let monitor = Arc::new(build_monitor(&config, pool, notification_service)?);

    if let Some(Command::Check) = args.command {
        let result = monitor.check_and_alert().await;
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    let evaluation_task = tokio::spawn({
        let monitor = monitor.clone();
        let period = config.check_interval_seconds;
        async move {
            monitor.start_periodic_evaluation(period).await;
        }
    });

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(address = %config.listen_addr, "HTTP server listening.");

    axum::serve(listener, create_axum_router(monitor))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal.");
            }
            info!("Shutdown signal received.");
        })
        .await?;

    evaluation_task.abort();
    Ok(())
}
