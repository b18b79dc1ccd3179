use crate::channels::{self, Channel, DiscordChannel, GuildApi, MessageHandler};
use crate::config::{BotMode, Config};
use crate::keys::KeySession;
use crate::nickname::NicknameSession;
use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub async fn run(config: Config, mode: BotMode) -> Result<()> {
    let discord = Arc::new(DiscordChannel::new(
        config.discord.bot_token.clone(),
        config.discord.guild_id.clone(),
    ));
    if !discord.health_check().await {
        tracing::warn!("Discord token check failed; the gateway may refuse to connect");
    }

    let handler = build_handler(&config, mode, discord.clone())?;
    let shutdown = CancellationToken::new();

    let mut bot = {
        let channel: Arc<dyn Channel> = discord;
        let runtime = config.runtime.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { channels::run_bot(channel, handler, &runtime, shutdown).await })
    };

    tracing::info!(mode = mode.as_str(), "nickshift started");
    println!("   Ctrl+C to stop");

    tokio::select! {
        () = shutdown_signal() => {
            tracing::info!("Shutdown requested");
            shutdown.cancel();
        }
        result = &mut bot => {
            // Only a fatal listener error ends the loop before shutdown.
            result??;
            anyhow::bail!("Message loop stopped unexpectedly");
        }
    }

    bot.await??;
    Ok(())
}

/// Build the message handler for `mode` over `api`.
pub fn build_handler(
    config: &Config,
    mode: BotMode,
    api: Arc<dyn GuildApi>,
) -> Result<Arc<dyn MessageHandler>> {
    let handler: Arc<dyn MessageHandler> = match mode {
        BotMode::Nickname => {
            let session = NicknameSession::new(&config.nickname, api);
            tracing::info!(
                procedural = session.selector().is_procedural(),
                selection = ?session.selector().mode(),
                gated = config.nickname.activation.required,
                "Nickname rotator ready"
            );
            Arc::new(session)
        }
        BotMode::Keys => {
            let session = KeySession::new(&config.keys, api)?;
            tracing::info!(pool = session.registry().pool_len(), "Key desk ready");
            Arc::new(session)
        }
    };
    Ok(handler)
}

/// Resolve on Ctrl+C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
