mod args;
mod config;
mod duration;

use std::process;
use std::sync::Arc;

use args::Args;
use clap::CommandFactory;
use config::{Config, RunPlan};
use qgun_core::engine::PgEngine;
use qgun_core::Dispatcher;
use tracing::{debug, info};

#[tokio::main]
async fn main() {
    let args = Args::parse_or_exit();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(args.default_log_filter())),
        )
        .with_writer(std::io::stderr)
        .init();

    let plan = match Config::from_args(&args) {
        Ok(plan) => plan,
        Err(e) => {
            eprintln!("qgun: error: {:#}", e);
            eprintln!("{}", Args::command().render_usage());
            process::exit(1);
        }
    };

    if !run(plan).await {
        process::exit(1);
    }
}

/// Run the plan. Returns false if any source failed.
async fn run(plan: RunPlan) -> bool {
    let RunPlan {
        sources,
        query,
        options,
        format,
    } = plan;

    debug!(
        "Config: sources={} format={} limit={} timeout={:?} schedule={:?} params={}",
        sources.len(),
        format,
        options.limit.0,
        options.timeout,
        options.schedule,
        query.args().len()
    );

    let writer = format.writer(Box::new(std::io::stdout()));
    let dispatcher = Dispatcher::new(Arc::new(PgEngine::new()), sources, query, options);
    let report = dispatcher.run(writer).await;

    if report.write.write_errors > 0 {
        info!("{} rows could not be written", report.write.write_errors);
    }
    let failed = report.failures().count();
    if failed > 0 {
        info!("{} of {} sources failed", failed, report.outcomes.len());
    } else {
        debug!("{} rows from {} sources", report.write.rows_written, report.outcomes.len());
    }
    report.is_success()
}
