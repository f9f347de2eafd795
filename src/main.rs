use clap::Parser;
use futures::stream::{self, StreamExt};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sevdesk_pacer::client::{HttpStatusError, RetryPipeline};
use sevdesk_pacer::config::{LogFormat, LoggingConfig, PacerConfig};
use sevdesk_pacer::ratelimit::{RateLimiter, RateLimiterStatus};

/// Drive admissions through a SevDesk rate limiter and report the pacing.
#[derive(Parser, Debug)]
#[command(name = "sevdesk-pacer", version, about)]
struct Args {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of requests to admit
    #[arg(short = 'n', long, default_value_t = 10)]
    requests: u32,

    /// Number of requests in flight at once
    #[arg(long, default_value_t = 1)]
    concurrency: usize,

    /// Simulated 429 responses before each request succeeds
    #[arg(long, default_value_t = 0)]
    fail_first: u32,

    /// Log format, overriding the configuration file
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,

    /// Print the final limiter status as JSON on stdout
    #[arg(long)]
    status_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = PacerConfig::load(args.config.as_deref())?;
    if let Some(format) = args.log_format {
        config.logging.format = format;
    }

    init_tracing(&config.logging);

    info!("Starting sevdesk-pacer");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        max_requests = config.limiter.max_requests,
        window_ms = config.limiter.window_ms,
        min_delay_ms = config.limiter.min_delay_ms,
        max_retries = config.limiter.max_retries,
        "Configuration loaded"
    );

    let pipeline = RetryPipeline::new(Arc::new(RateLimiter::new(config.limiter)));

    tokio::select! {
        _ = run(&pipeline, &args) => {}
        _ = shutdown_signal() => {}
    }

    let status = pipeline.gate().status();
    if args.status_json {
        println!("{}", serde_json::to_string_pretty(&status_report(&status))?);
    } else {
        info!(
            requests_in_window = status.requests_in_window,
            retries_in_window = status.retries_in_window,
            max_requests = status.max_requests,
            wait_ms = status.wait_time().as_millis() as u64,
            "Final limiter status"
        );
    }

    info!("sevdesk-pacer stopped");
    Ok(())
}

/// Issue `args.requests` simulated requests through the pipeline.
async fn run(pipeline: &RetryPipeline<RateLimiter>, args: &Args) {
    let start = Instant::now();
    let fail_first = args.fail_first;

    let failures = stream::iter(0..args.requests)
        .map(move |request| async move {
            let result = pipeline
                .execute(move |retry_count| async move {
                    if retry_count < fail_first {
                        Err(HttpStatusError::new(429, None))
                    } else {
                        Ok(start.elapsed())
                    }
                })
                .await;

            match result {
                Ok(offset) => {
                    info!(
                        request = request,
                        offset_ms = offset.as_millis() as u64,
                        "Request admitted"
                    );
                    false
                }
                Err(e) => {
                    warn!(request = request, error = %e, "Request failed");
                    true
                }
            }
        })
        .buffer_unordered(args.concurrency.max(1))
        .filter(|failed| futures::future::ready(*failed))
        .count()
        .await;

    info!(
        requests = args.requests,
        failures = failures,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Run complete"
    );
}

fn status_report(status: &RateLimiterStatus) -> serde_json::Value {
    serde_json::json!({
        "requests_in_window": status.requests_in_window,
        "retries_in_window": status.retries_in_window,
        "max_requests": status.max_requests,
        "window_ms": status.window.as_millis() as u64,
        "next_available_in_ms": status.wait_time().as_millis() as u64,
    })
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));

    match logging.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init(),
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping run");
        }
        _ = terminate => {
            info!("Received SIGTERM, stopping run");
        }
    }
}
