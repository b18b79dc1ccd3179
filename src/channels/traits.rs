use super::permissions::{NicknameAccess, Permissions};
use async_trait::async_trait;

/// A guild message received from a channel
#[derive(Debug, Clone, Default)]
pub struct ChannelMessage {
    pub id: String,
    /// `None` for direct messages.
    pub guild_id: Option<String>,
    pub channel_id: String,
    pub author_id: String,
    pub author_is_bot: bool,
    /// Role ids of the author in `guild_id`.
    pub author_roles: Vec<String>,
    pub content: String,
}

/// Outcome classes of a failed nickname edit.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EditError {
    /// Permission or role-hierarchy refusal. Never retried.
    #[error("nickname edit forbidden")]
    Forbidden,
    /// Rate limit signal. Never retried.
    #[error("nickname edit rate limited")]
    RateLimited,
    /// Anything else, including transport failures.
    #[error("nickname edit failed: {0}")]
    Other(String),
}

impl EditError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Other(_))
    }
}

/// A listener failure that reconnecting cannot fix (bad token, disallowed
/// intents). The supervisor stops instead of restarting.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{channel} refused the connection permanently ({code}): {reason}")]
pub struct FatalChannelError {
    pub channel: String,
    pub code: u16,
    pub reason: String,
}

/// Core channel trait: the inbound event source
#[async_trait]
pub trait Channel: Send + Sync {
    /// Human-readable channel name
    fn name(&self) -> &str;

    /// Start listening for incoming messages (long-running)
    async fn listen(&self, tx: tokio::sync::mpsc::Sender<ChannelMessage>) -> anyhow::Result<()>;

    /// Check if channel is healthy
    async fn health_check(&self) -> bool {
        true
    }
}

/// Guild operations the bots depend on.
#[async_trait]
pub trait GuildApi: Send + Sync {
    /// Guild-level permissions of a member holding `roles`.
    async fn member_permissions(
        &self,
        guild_id: &str,
        user_id: &str,
        roles: &[String],
    ) -> anyhow::Result<Permissions>;

    /// Whether the bot may rename `member_id`, who holds `member_roles`.
    async fn nickname_access(
        &self,
        guild_id: &str,
        member_id: &str,
        member_roles: &[String],
    ) -> anyhow::Result<NicknameAccess>;

    async fn role_exists(&self, guild_id: &str, role_id: &str) -> anyhow::Result<bool>;

    /// Set a member's nickname, recording `reason` in the audit log.
    async fn edit_nickname(
        &self,
        guild_id: &str,
        member_id: &str,
        nickname: &str,
        reason: &str,
    ) -> Result<(), EditError>;

    /// Reply to a message in place.
    async fn reply(&self, channel_id: &str, message_id: &str, text: &str) -> anyhow::Result<()>;
}

/// Consumer of inbound messages. One call per message, possibly concurrent.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    fn name(&self) -> &str;

    async fn handle(&self, message: ChannelMessage);
}
