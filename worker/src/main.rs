use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, EnvFilter};

use storegen::config::{config_from_env, load_config};
use storegen::db::default_database_path;
use storegen::{build_collaborators, Config, Database, DeliveryOutcome, PipelineService};

const CONFIG_ENV: &str = "STOREGEN_CONFIG";
const LOG_FORMAT_ENV: &str = "STOREGEN_LOG_FORMAT";

fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    tracing_log::LogTracer::init()?;

    let json = std::env::var(LOG_FORMAT_ENV).is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let subscriber = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer().with_target(true)));
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn load() -> Result<Config, storegen::ConfigError> {
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var(CONFIG_ENV).ok());
    match path {
        Some(path) => {
            info!("Loading configuration from {}", path);
            load_config(path)
        }
        None => {
            info!("No config file given, using defaults and environment");
            config_from_env()
        }
    }
}

fn log_outcome(outcome: &DeliveryOutcome) {
    match outcome {
        DeliveryOutcome::Completed {
            job_id,
            product_id,
            attempt,
        } => info!(
            "Job {} done on attempt {}: product {}",
            job_id, attempt, product_id
        ),
        DeliveryOutcome::Retrying {
            job_id,
            attempt,
            delay,
            error,
        } => warn!(
            "Job {} attempt {} failed, retry in {:?}: {}",
            job_id, attempt, delay, error
        ),
        DeliveryOutcome::Discarded { job_id, reason } => {
            info!("Job {} dropped: {}", job_id, reason)
        }
        DeliveryOutcome::LeaseLost { job_id, attempt } => warn!(
            "Job {} attempt {} lost its lease to another worker",
            job_id, attempt
        ),
        DeliveryOutcome::Failed(e) => error!("{}", e),
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = load()?;

    let db_path: PathBuf = config
        .database_path
        .clone()
        .or_else(default_database_path)
        .ok_or("could not determine a database path; set STOREGEN_DATABASE_PATH")?;
    let db = Database::open(&db_path)?;

    let collaborators = build_collaborators(&config, &db)?;
    let service = PipelineService::new(db, collaborators, &config);

    let pruned = service.queue().prune()?;
    let stats = service.queue().stats()?;
    info!(
        "Queue: {} waiting, {} active, {} completed, {} failed ({} pruned)",
        stats.waiting, stats.active, stats.completed, stats.failed, pruned
    );

    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = Arc::clone(&stop);
    ctrlc::set_handler(move || stop_flag.store(true, Ordering::Relaxed))?;

    let pool = service.start_workers()?;
    info!(
        "storegen-worker v{} running with {} workers",
        env!("CARGO_PKG_VERSION"),
        config.worker_count
    );

    while !stop.load(Ordering::Relaxed) {
        if let Some(outcome) = pool.recv_result_timeout(Duration::from_millis(500)) {
            log_outcome(&outcome);
        }
    }

    info!("Shutdown requested, draining in-flight jobs");
    pool.shutdown();
    for outcome in pool.wait() {
        log_outcome(&outcome);
    }
    Ok(())
}

fn main() -> ExitCode {
    if let Err(e) = init_logging() {
        eprintln!("Failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("storegen-worker failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
