use super::activation::{ActivationGate, CommandOutcome};
use super::inflight::InFlightSet;
use super::selector::{NameSelector, RandomSource, ThreadRandom};
use crate::channels::traits::{ChannelMessage, EditError, GuildApi, MessageHandler};
use crate::config::NicknameConfig;
use crate::util::truncate_with_ellipsis;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// What happened to one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Wrong channel, bot author, direct message, non-target member, or gate closed.
    Ignored,
    /// An activation command was processed and answered.
    Command(CommandOutcome),
    /// The author already has an edit in flight.
    Dropped,
    /// The bot may not rename this member.
    Skipped,
    Renamed { nickname: String },
    /// Every attempt failed; nothing is reported to the member.
    Abandoned { nickname: String, error: EditError },
}

/// Rotator state for one bot instance.
pub struct NicknameSession {
    api: Arc<dyn GuildApi>,
    selector: NameSelector,
    gate: ActivationGate,
    in_flight: InFlightSet,
    channel_id: String,
    target_user_id: Option<String>,
    audit_reason: String,
    max_attempts: u32,
    retry_delay: Duration,
}

impl NicknameSession {
    pub fn new(config: &NicknameConfig, api: Arc<dyn GuildApi>) -> Self {
        Self::with_random_source(config, api, Box::new(ThreadRandom))
    }

    pub fn with_random_source(
        config: &NicknameConfig,
        api: Arc<dyn GuildApi>,
        rng: Box<dyn RandomSource>,
    ) -> Self {
        Self {
            api,
            selector: NameSelector::with_random_source(
                config.names.clone(),
                config.mode,
                config.max_length,
                rng,
            ),
            gate: ActivationGate::new(&config.activation),
            in_flight: InFlightSet::new(),
            channel_id: config.channel_id.trim().to_string(),
            target_user_id: config.target_user().map(str::to_string),
            audit_reason: config.audit_reason.clone(),
            max_attempts: config.max_attempts.max(1),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        }
    }

    pub fn selector(&self) -> &NameSelector {
        &self.selector
    }

    pub fn in_flight(&self) -> &InFlightSet {
        &self.in_flight
    }

    pub fn is_active(&self) -> bool {
        self.gate.is_active()
    }

    /// Run one message through filters, gate, lock and edit.
    pub async fn handle_message(&self, msg: &ChannelMessage) -> MessageOutcome {
        if msg.author_is_bot || msg.channel_id != self.channel_id {
            return MessageOutcome::Ignored;
        }
        let Some(guild_id) = msg.guild_id.as_deref() else {
            return MessageOutcome::Ignored;
        };

        if let Some(command) = self.gate.parse_command(&msg.content) {
            let authorized = match self
                .api
                .member_permissions(guild_id, &msg.author_id, &msg.author_roles)
                .await
            {
                Ok(perms) => perms.can_toggle_bot(),
                Err(e) => {
                    tracing::warn!(user = %msg.author_id, "Permission lookup failed: {e:#}");
                    false
                }
            };
            let outcome = self.gate.apply(command, authorized);
            tracing::info!(user = %msg.author_id, ?command, ?outcome, "Activation command");
            if let Err(e) = self
                .api
                .reply(&msg.channel_id, &msg.id, outcome.reply_text())
                .await
            {
                tracing::warn!("Failed to answer activation command: {e:#}");
            }
            return MessageOutcome::Command(outcome);
        }

        if self
            .target_user_id
            .as_deref()
            .is_some_and(|target| target != msg.author_id)
        {
            return MessageOutcome::Ignored;
        }
        if !self.gate.is_active() {
            return MessageOutcome::Ignored;
        }

        let Some(_permit) = self.in_flight.try_acquire(&msg.author_id) else {
            tracing::debug!(user = %msg.author_id, "Edit already in flight; dropping message");
            return MessageOutcome::Dropped;
        };

        match self
            .api
            .nickname_access(guild_id, &msg.author_id, &msg.author_roles)
            .await
        {
            Ok(access) if access.is_allowed() => {}
            Ok(access) => {
                tracing::debug!(user = %msg.author_id, ?access, "Cannot rename member; skipping");
                return MessageOutcome::Skipped;
            }
            Err(e) => {
                tracing::warn!(user = %msg.author_id, "Access check failed, skipping: {e:#}");
                return MessageOutcome::Skipped;
            }
        }

        let nickname = self.selector.select(&msg.author_id);
        match self.edit_with_retry(guild_id, &msg.author_id, &nickname).await {
            Ok(()) => {
                tracing::info!(user = %msg.author_id, nickname = %nickname, "Nickname changed");
                MessageOutcome::Renamed { nickname }
            }
            Err(error) => {
                match &error {
                    EditError::RateLimited => {
                        tracing::warn!(user = %msg.author_id, "Rate limited; edit abandoned");
                    }
                    _ => tracing::debug!(user = %msg.author_id, "Edit abandoned: {error}"),
                }
                MessageOutcome::Abandoned { nickname, error }
            }
        }
    }

    async fn edit_with_retry(
        &self,
        guild_id: &str,
        member_id: &str,
        nickname: &str,
    ) -> Result<(), EditError> {
        let mut attempt = 1;
        loop {
            match self
                .api
                .edit_nickname(guild_id, member_id, nickname, &self.audit_reason)
                .await
            {
                Ok(()) => return Ok(()),
                Err(e) if !e.is_retryable() || attempt >= self.max_attempts => return Err(e),
                Err(e) => {
                    tracing::debug!(attempt, "Nickname edit failed, retrying: {e}");
                    attempt += 1;
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }
    }
}

#[async_trait]
impl MessageHandler for NicknameSession {
    fn name(&self) -> &str {
        "nickname"
    }

    async fn handle(&self, message: ChannelMessage) {
        let outcome = self.handle_message(&message).await;
        tracing::trace!(
            user = %message.author_id,
            content = %truncate_with_ellipsis(&message.content, 80),
            ?outcome,
            "Message handled"
        );
    }
}
