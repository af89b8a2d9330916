use std::sync::Arc;

use anyhow::Context;
use mog_boom::{Boom, Gateway};
use mog_discord::{Discord, RestClient};
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;

/// Connect, start the boom store and run until `cancel` fires.
///
/// Shutdown order: the store stops its loops and flushes its snapshot, then
/// the gateway connection is closed. Both run even if the other failed.
pub async fn run(config: AppConfig, cancel: CancellationToken) -> anyhow::Result<()> {
    let discord = Arc::new(Discord::new(RestClient::new(config.token)));
    discord.connect().await.context("connect discord gateway")?;

    let gateway: Arc<dyn Gateway> = discord.clone();
    let boom = match Boom::start(config.boom_message, gateway).await {
        Ok(boom) => boom,
        Err(e) => {
            discord.close().await;
            return Err(e).context("start boom store");
        }
    };

    tracing::info!("running");
    let result = boom.run(cancel).await;
    discord.close().await;
    result.context("boom store")
}
