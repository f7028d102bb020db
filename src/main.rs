use std::{process::ExitCode, sync::Arc, time::Duration};

use clap::Parser;
use log::{error, info, LevelFilter};

use routerunner::{
    config::{self, Opt},
    core::spawn_service,
    logging::Logger,
    orchestration::{run_until_shutdown, CommandConsole, LifecycleManager, ShutdownSignal},
};

fn main() -> ExitCode {
    // Read command-line arguments
    let opt = Opt::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Can't build async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let code = runtime.block_on(run(opt));

    // The console may still be parked on a stdin read
    runtime.shutdown_timeout(Duration::from_millis(500));
    code
}

async fn run(opt: Opt) -> ExitCode {
    // The file logger gets its own flag so it outlives everything else
    let log_shutdown = ShutdownSignal::new();
    let log_sync = match &opt.log_file {
        Some(path) => {
            let logger = Logger::new(config::Log { path: path.clone() });
            logger.init_env_logger();
            Some(spawn_service(logger, log_shutdown.watch()))
        }
        None => {
            env_logger::Builder::new()
                .filter_level(LevelFilter::Info)
                .parse_default_env()
                .init();
            None
        }
    };

    let manager = Arc::new(LifecycleManager::with_defaults(
        opt.context_uri.clone(),
        opt.routes_path.clone(),
    ));

    let code = match manager.start().await {
        Ok(summary) => {
            info!(
                "Started with routes [{}]; type 'help' for console commands",
                summary.routes.join(", ")
            );

            let shutdown = ShutdownSignal::new();
            let console = CommandConsole::stdio(manager.clone(), shutdown.clone());
            run_until_shutdown(manager.clone(), console, shutdown).await;
            info!("Exiting, runtime state {}", manager.state());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Can't start routing engine: {e}");
            ExitCode::FAILURE
        }
    };

    // Every other task has finished logging by now
    if let Some(log_sync) = log_sync {
        log_shutdown.trigger();
        let _ = log_sync.await;
    }

    code
}
