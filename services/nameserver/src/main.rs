use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use hubward_nameserver::{Config, Nameserver};

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
        override_fqdn = %config.override_fqdn,
        upstream = %config.upstream,
        "starting nameserver"
    );

    let server = match Nameserver::bind(&config).await {
        Ok(server) => Arc::new(server),
        Err(error) => {
            error!(%error, addr = %config.listen, "failed to bind listen socket");
            return Err(error.into());
        }
    };

    let run_handle = tokio::spawn(server.run());

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, stopping nameserver");
    run_handle.abort();

    Ok(())
}
