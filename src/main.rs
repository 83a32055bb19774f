use anyhow::Result;
use naiad::driver::BridgeDriver;
use naiad::logging::init_logging;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config = naiad::Config::load()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    init_logging(&config.logging).map_err(|e| anyhow::anyhow!("Failed to init logging: {}", e))?;

    info!("Naiad water softener bridge {} starting up", env!("APP_VERSION"));

    let mut driver = BridgeDriver::new(config)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create driver: {}", e))?;

    match driver.run().await {
        Ok(()) => {
            info!("Driver shutdown complete");
            Ok(())
        }
        Err(e) => {
            error!("Driver failed with error: {}", e);
            Err(anyhow::anyhow!("Driver error: {}", e))
        }
    }
}
