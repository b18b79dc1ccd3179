pub mod discord;
pub mod permissions;
pub mod traits;

pub use discord::DiscordChannel;
pub use permissions::{GuildRole, GuildSnapshot, NicknameAccess, Permissions};
pub use traits::{
    Channel, ChannelMessage, EditError, FatalChannelError, GuildApi, MessageHandler,
};

use crate::config::RuntimeConfig;
use crate::util::truncate_with_ellipsis;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Capacity of the queue between the listener and the dispatch loop.
const CHANNEL_MESSAGE_QUEUE: usize = 100;

/// Run `handler` over every message `channel` produces until `shutdown` fires.
///
/// The listener is restarted with exponential backoff whenever it fails or
/// returns. Messages are handled concurrently, at most
/// `runtime.max_in_flight_messages` at a time. On shutdown the listener is
/// dropped and already-dispatched messages are allowed to finish.
///
/// Returns the listener's [`FatalChannelError`] if it gave up for good.
pub async fn run_bot(
    channel: Arc<dyn Channel>,
    handler: Arc<dyn MessageHandler>,
    runtime: &RuntimeConfig,
    shutdown: CancellationToken,
) -> Result<()> {
    let (tx, rx) = tokio::sync::mpsc::channel::<ChannelMessage>(CHANNEL_MESSAGE_QUEUE);

    tracing::info!(
        channel = channel.name(),
        handler = handler.name(),
        max_in_flight = runtime.max_in_flight_messages,
        "Starting message loop"
    );

    // The supervisor owns the only sender, so `rx` closes once it stops.
    let listener = spawn_supervised_listener(
        channel,
        tx,
        runtime.channel_initial_backoff_secs,
        runtime.channel_max_backoff_secs,
        shutdown,
    );

    run_message_dispatch_loop(rx, handler, runtime.max_in_flight_messages).await;

    match listener.await {
        Ok(result) => result,
        Err(e) => {
            tracing::error!("Channel supervisor crashed: {e}");
            Ok(())
        }
    }
}

fn spawn_supervised_listener(
    ch: Arc<dyn Channel>,
    tx: tokio::sync::mpsc::Sender<ChannelMessage>,
    initial_backoff_secs: u64,
    max_backoff_secs: u64,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<Result<()>> {
    spawn_supervised_listener_with_backoff(
        ch,
        tx,
        Duration::from_secs(initial_backoff_secs.max(1)),
        Duration::from_secs(max_backoff_secs),
        shutdown,
    )
}

fn spawn_supervised_listener_with_backoff(
    ch: Arc<dyn Channel>,
    tx: tokio::sync::mpsc::Sender<ChannelMessage>,
    initial_backoff: Duration,
    max_backoff: Duration,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<Result<()>> {
    tokio::spawn(async move {
        let max_backoff = max_backoff.max(initial_backoff);
        let mut backoff = initial_backoff;

        loop {
            let result = tokio::select! {
                () = shutdown.cancelled() => break,
                result = ch.listen(tx.clone()) => result,
            };

            if tx.is_closed() {
                break;
            }

            match result {
                Ok(()) => {
                    tracing::warn!("Channel {} exited unexpectedly; restarting", ch.name());
                    // Clean exit: the listener ran, so start over from the initial backoff
                    backoff = initial_backoff;
                }
                Err(e) if e.downcast_ref::<FatalChannelError>().is_some() => {
                    tracing::error!("Channel {} cannot recover: {e:#}", ch.name());
                    return Err(e);
                }
                Err(e) => {
                    tracing::error!("Channel {} error: {e:#}; restarting", ch.name());
                }
            }

            tokio::select! {
                () = shutdown.cancelled() => break,
                () = tokio::time::sleep(backoff) => {}
            }
            // Double backoff AFTER sleeping so first error uses initial_backoff
            backoff = backoff.saturating_mul(2).min(max_backoff);
        }

        tracing::info!("Channel {} listener stopped", ch.name());
        Ok(())
    })
}

fn log_worker_join_result(result: Result<(), tokio::task::JoinError>) {
    if let Err(error) = result {
        tracing::error!("Channel message worker crashed: {error}");
    }
}

async fn run_message_dispatch_loop(
    mut rx: tokio::sync::mpsc::Receiver<ChannelMessage>,
    handler: Arc<dyn MessageHandler>,
    max_in_flight_messages: usize,
) {
    let semaphore = Arc::new(tokio::sync::Semaphore::new(max_in_flight_messages.max(1)));
    let mut workers = tokio::task::JoinSet::new();

    while let Some(msg) = rx.recv().await {
        let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
            break;
        };

        tracing::debug!(
            channel = %msg.channel_id,
            user = %msg.author_id,
            "Dispatching message: {}",
            truncate_with_ellipsis(&msg.content, 80)
        );

        let handler = Arc::clone(&handler);
        workers.spawn(async move {
            let _permit = permit;
            handler.handle(msg).await;
        });

        while let Some(result) = workers.try_join_next() {
            log_worker_join_result(result);
        }
    }

    while let Some(result) = workers.join_next().await {
        log_worker_join_result(result);
    }
}
