use actix_web::web;
use clap::Parser;

use code_runner::config::{CliArgs, Config};
use code_runner::runner::Runner;
use code_runner::web_server::build_server;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let cli = CliArgs::parse();
    let config = cli.to_config()?;
    log::debug!("Loaded configuration: {config:?}");

    let runner = web::Data::new(Runner::from_config(&config)?);
    let sandbox = runner.sandbox().clone();
    log::info!(
        "Serving {} languages with up to {} executions in flight",
        runner.registry().languages().count(),
        runner.gate().max_outstanding()
    );
    let Config {
        server: server_config,
        ..
    } = config;

    // ======= PREPARATION END, EXECUTION START =======

    // A sandbox that cannot start leaves the service degraded, not dead;
    // every execution retries the start.
    if let Err(e) = sandbox.lock().await.restart().await {
        log::error!("Initial sandbox start failed, continuing degraded: {e}");
    }

    let server = build_server(server_config, runner)?;

    let server_handle = server.handle();
    let server_task = actix_web::rt::spawn(server);

    // ===== EXECUTION END, WAITING FOR SHUTDOWN ======

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("Ctrl-c received, shutting down...");
        }
        res_server = server_task => {
            log::error!("Server terminated unexpectedly: {:?}", res_server);
        }
    }

    // 1. Shutdown actix-web server gracefully
    server_handle.stop(true).await;

    // 2. Cancel pending restarts and tear the sandbox down
    sandbox.shutdown().await;

    log::info!("Shutdown complete");
    Ok(())
}
