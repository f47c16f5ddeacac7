use anyhow::Context;
use tokio::io::BufReader;
use tokio::signal;
use tracing::{error, info};

use qwatch_server::{load_config, run, telemetry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    telemetry::init_tracing().context("Failed to initialize tracing")?;

    let config = load_config();
    info!(
        subscription_buffer = config.manager.subscription_buffer,
        adhoc_buffer = config.manager.adhoc_buffer,
        mutation_buffer = config.mutation_buffer,
        push_buffer = config.push_buffer,
        "Starting qwatch-server"
    );

    let stdin = BufReader::new(tokio::io::stdin());
    run(config, stdin, tokio::io::stdout(), shutdown_signal()).await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Signal received, starting graceful shutdown");
}
