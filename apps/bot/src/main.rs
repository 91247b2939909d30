use std::sync::Arc;

use anyhow::{Context, Result};
use flp::PriceClient;
use flp_nickname::{Data, config::Config, roster::DiscordRoster, updater::NicknameUpdater};
use poise::{Framework, FrameworkOptions};
use serenity::all::{ClientBuilder, GatewayIntents};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;
    let price_client = Arc::new(PriceClient::from_env().context("init price client failed")?);

    info!(
        version = %config.version,
        symbol = price_client.symbol(),
        interval_secs = config.update_interval.as_secs(),
        time_zone = config.time_zone.name(),
        "starting nickname updater"
    );

    let intents = GatewayIntents::non_privileged();

    let framework = Framework::builder()
        .options(FrameworkOptions::<Data, flp_nickname::Error> {
            commands: vec![],
            ..Default::default()
        })
        .setup({
            let price_client = Arc::clone(&price_client);
            let config = config.clone();

            move |ctx, ready, _framework| {
                Box::pin(async move {
                    info!(
                        "{} [{}] connected successfully!",
                        ready.user.name, ready.user.id
                    );

                    let roster = Arc::new(DiscordRoster::new(ctx.clone()));
                    let updater = NicknameUpdater::new(price_client, roster, config.time_zone);

                    let period = config.update_interval;
                    tokio::spawn(async move { updater.run(period).await });

                    Ok(Data)
                })
            }
        })
        .build();

    let mut client = ClientBuilder::new(&config.discord_token, intents)
        .framework(framework)
        .await
        .context("Err creating client")?;

    tokio::select! {
        res = client.start() => {
            if let Err(why) = res {
                error!("Client error: {why:?}");
                return Err(why.into());
            }
        }
        _ = shutdown_signal() => {}
    }

    info!("Shutdown complete.");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::{
            select,
            signal::unix::{SignalKind, signal},
        };
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
        select! {
            _ = sigterm.recv() => {},
            _ = sigint.recv()  => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
