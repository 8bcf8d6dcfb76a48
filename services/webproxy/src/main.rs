use anyhow::Result;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use hubward_webproxy::{proxy, Config};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!(
        listen = %config.listen,
        forward_timeout_ms = config.forward_timeout.as_millis() as u64,
        "starting webproxy"
    );

    let state = proxy::ProxyState::new(&config)?;
    let app = proxy::routes(state);

    let listener = match tokio::net::TcpListener::bind(config.listen).await {
        Ok(listener) => listener,
        Err(error) => {
            error!(%error, addr = %config.listen, "failed to bind listen socket");
            return Err(error.into());
        }
    };
    info!(addr = %config.listen, "listening for connections");

    let server_handle = tokio::spawn(async move { axum::serve(listener, app).await });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received, stopping webproxy");
        }
        result = server_handle => {
            match result {
                Ok(Ok(())) => info!("server exited"),
                Ok(Err(error)) => error!(%error, "server error"),
                Err(error) => error!(%error, "server task panicked"),
            }
        }
    }

    Ok(())
}
