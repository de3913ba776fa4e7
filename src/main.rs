// src/main.rs

use clap::{Parser, Subcommand};
use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod api;
mod api_client;
mod config;
mod db;
mod error;
mod job_worker;
mod models;
mod queue;
#[cfg(test)]
mod testing;

use api_client::{AdvertisingClient, ReportsApi};
use config::Config;
use error::{ConfigError, PipelineResult};
use job_worker::{ReportDownloader, ReportRequester, StatusPoller};
use queue::{JobQueues, RedisQueue};

/// Loads advertising reports into PostgreSQL through Redis-backed job queues.
#[derive(Parser, Debug)]
#[command(name = "adv-report-loader", version, about)]
struct Args {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Request reports for the last PERIOD days and queue them.
    Request {
        #[arg(short, long, default_value_t = 1)]
        period: u32,
        /// Report types to request; all configured types when omitted.
        #[arg(short, long = "record-type")]
        record_types: Vec<String>,
    },
    /// Check the status of requested reports.
    Poll {
        #[arg(long, default_value_t = 1)]
        passes: u32,
        #[arg(long, default_value_t = 30)]
        delay_secs: u64,
    },
    /// Download ready reports into the database.
    Download {
        /// Block up to this many seconds for new work before exiting.
        #[arg(long)]
        wait_secs: Option<u64>,
    },
    /// Serve the queue inspection API.
    Serve,
}

#[tokio::main]
async fn main() -> PipelineResult<()> {
    // 1. Setup Logging
    tracing_subscriber::registry()
        .with(log_filter(|| {
            dotenvy::dotenv().ok();
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    // 2. Configuration problems stop the process here, never per job.
    let config = Config::from_file(&args.config).map_err(|e| {
        tracing::error!("Invalid configuration: {}", e);
        e
    })?;

    // 3. Queue store is shared by every command
    let redis_pool = queue::init_redis_pool(&config.queues.redis_url)?;
    let queues = JobQueues::new(Arc::new(RedisQueue::new(redis_pool)), &config.queues.prefix);

    match args.command {
        Command::Request {
            period,
            record_types,
        } => {
            let requester = ReportRequester::new(reports_api(&config)?, queues, config.reports.clone());
            let jobs = requester.run(period, &record_types).await?;
            tracing::info!("Requested {} report(s)", jobs.len());
        }
        Command::Poll { passes, delay_secs } => {
            let poller = StatusPoller::new(reports_api(&config)?, queues);
            let stats = poller.run(passes, Duration::from_secs(delay_secs)).await?;
            tracing::info!(
                "Checked {} report(s): {} ready, {} pending, {} failed, {} errors",
                stats.processed(),
                stats.ready,
                stats.pending,
                stats.failed,
                stats.errors
            );
        }
        Command::Download { wait_secs } => {
            if config.sink.database_url.is_empty() {
                return Err(ConfigError::Invalid("DATABASE_URL must be set".into()).into());
            }
            let db_pool = db::init_db_pool(&config.sink.database_url, config.sink.max_connections).await?;
            let downloader = ReportDownloader::new(
                reports_api(&config)?,
                queues,
                Arc::new(db::PgSink::new(db_pool)),
                config.tables(),
            )
            .with_idle_wait(wait_secs.map(Duration::from_secs));
            let stats = downloader.run().await?;
            tracing::info!(
                "Loaded {} report(s), {} row(s); {} requeued, {} unroutable",
                stats.loaded,
                stats.rows,
                stats.requeued,
                stats.unroutable
            );
        }
        Command::Serve => {
            let addr: SocketAddr = config.server.listen_addr.parse().map_err(|e| {
                ConfigError::Invalid(format!("bad listen address {}: {e}", config.server.listen_addr))
            })?;
            let app = api::router(Arc::new(api::AppState { queues }));
            let listener = tokio::net::TcpListener::bind(addr).await?;
            tracing::info!("Server running on {}", addr);
            axum::serve(listener, app).await?;
        }
    }

    Ok(())
}

/// Runs `load_env` first: `.env` may carry RUST_LOG.
fn log_filter(load_env: impl FnOnce()) -> EnvFilter {
    load_env();
    EnvFilter::try_from_default_env().unwrap_or_else(|_| "adv_report_loader=info".into())
}

fn reports_api(config: &Config) -> PipelineResult<Arc<dyn ReportsApi>> {
    Ok(Arc::new(AdvertisingClient::from_config(config)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_filter_sees_rust_log_from_env_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "RUST_LOG=adv_report_loader=debug\n").unwrap();

        let filter = log_filter(|| {
            dotenvy::from_path_override(&path).unwrap();
        });

        assert_eq!(filter.to_string(), "adv_report_loader=debug");
    }
}
