use super::registry::{KeyIssue, KeyRegistry};
use crate::channels::permissions::Permissions;
use crate::channels::traits::{ChannelMessage, GuildApi, MessageHandler};
use crate::config::KeysConfig;
use crate::nickname::RandomSource;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

pub const MISSING_ROLE_REPLY: &str = "You need the required role to use this command.";
pub const ROLE_NOT_CONFIGURED_REPLY: &str =
    "Configuration error: The required role could not be found on this server.";
pub const RESET_REPLY: &str = "Your key has been reset.";
pub const NO_KEY_REPLY: &str = "Could not find a key linked to your account.";
pub const NOT_AUTHORIZED_REPLY: &str =
    "You don't have the required permissions to run this command.";

/// What the key desk did with one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyOutcome {
    Ignored,
    MissingRole,
    RoleNotConfigured,
    Issued(KeyIssue),
    Reset { existed: bool },
    /// An administrator linked a key to `member_id`.
    Granted { member_id: String, issue: KeyIssue },
    /// The grant command came from a non-administrator.
    NotAuthorized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyCommand<'a> {
    Issue,
    Reset,
    Grant { member_id: &'a str },
}

/// Accept `<@id>`, `<@!id>` or a bare snowflake.
fn parse_member_mention(raw: &str) -> Option<&str> {
    let id = raw
        .strip_prefix("<@")
        .and_then(|rest| rest.strip_suffix('>'))
        .map_or(raw, |inner| inner.strip_prefix('!').unwrap_or(inner));
    (!id.is_empty() && id.bytes().all(|b| b.is_ascii_digit())).then_some(id)
}

/// Role-gated key issue/reset over a [`KeyRegistry`].
pub struct KeySession {
    api: Arc<dyn GuildApi>,
    registry: KeyRegistry,
    channel_id: String,
    required_role_id: String,
    issue_command: String,
    reset_command: String,
    grant_command: String,
    reply_template: String,
}

impl KeySession {
    pub fn new(config: &KeysConfig, api: Arc<dyn GuildApi>) -> Result<Self> {
        Ok(Self::from_registry(config, api, KeyRegistry::new(config.pool.clone())?))
    }

    pub fn with_random_source(
        config: &KeysConfig,
        api: Arc<dyn GuildApi>,
        rng: Box<dyn RandomSource>,
    ) -> Result<Self> {
        let registry = KeyRegistry::with_random_source(config.pool.clone(), rng)?;
        Ok(Self::from_registry(config, api, registry))
    }

    fn from_registry(config: &KeysConfig, api: Arc<dyn GuildApi>, registry: KeyRegistry) -> Self {
        Self {
            api,
            registry,
            channel_id: config.channel_id.trim().to_string(),
            required_role_id: config.required_role_id.trim().to_string(),
            issue_command: config.issue_command.trim().to_string(),
            reset_command: config.reset_command.trim().to_string(),
            grant_command: config.grant_command.trim().to_string(),
            reply_template: config.reply_template.clone(),
        }
    }

    pub fn registry(&self) -> &KeyRegistry {
        &self.registry
    }

    fn parse_command<'a>(&self, content: &'a str) -> Option<KeyCommand<'a>> {
        let content = content.trim();
        if content == self.issue_command {
            return Some(KeyCommand::Issue);
        }
        if content == self.reset_command {
            return Some(KeyCommand::Reset);
        }
        let target = content
            .strip_prefix(self.grant_command.as_str())?
            .strip_prefix(char::is_whitespace)?;
        parse_member_mention(target.trim()).map(|member_id| KeyCommand::Grant { member_id })
    }

    fn render(&self, key: &str) -> String {
        self.reply_template.replace("{key}", key)
    }

    /// Reply text for an outcome; `None` when nothing is posted.
    pub fn reply_for(&self, outcome: &KeyOutcome) -> Option<String> {
        let text = match outcome {
            KeyOutcome::Ignored => return None,
            KeyOutcome::MissingRole => MISSING_ROLE_REPLY.to_string(),
            KeyOutcome::RoleNotConfigured => ROLE_NOT_CONFIGURED_REPLY.to_string(),
            KeyOutcome::Issued(KeyIssue::New(key)) => {
                format!("Your key has been generated!\n{}", self.render(key))
            }
            KeyOutcome::Issued(KeyIssue::Existing(key)) => {
                format!("You already have a key.\n{}", self.render(key))
            }
            KeyOutcome::Reset { existed: true } => RESET_REPLY.to_string(),
            KeyOutcome::Reset { existed: false } => NO_KEY_REPLY.to_string(),
            KeyOutcome::Granted {
                member_id,
                issue: KeyIssue::New(key),
            } => format!("Key linked to <@{member_id}>.\n{}", self.render(key)),
            KeyOutcome::Granted {
                member_id,
                issue: KeyIssue::Existing(key),
            } => format!("<@{member_id}> already has a key.\n{}", self.render(key)),
            KeyOutcome::NotAuthorized => NOT_AUTHORIZED_REPLY.to_string(),
        };
        Some(text)
    }

    async fn role_gate(&self, guild_id: &str, msg: &ChannelMessage) -> Option<KeyOutcome> {
        if msg.author_roles.iter().any(|r| *r == self.required_role_id) {
            return None;
        }
        match self.api.role_exists(guild_id, &self.required_role_id).await {
            Ok(true) => Some(KeyOutcome::MissingRole),
            Ok(false) => {
                tracing::error!(
                    guild = guild_id,
                    role = %self.required_role_id,
                    "Required role not found in guild"
                );
                Some(KeyOutcome::RoleNotConfigured)
            }
            Err(e) => {
                tracing::warn!("Role lookup failed: {e:#}");
                Some(KeyOutcome::MissingRole)
            }
        }
    }

    /// Grants skip the role gate but need `ADMINISTRATOR`.
    async fn grant(&self, guild_id: &str, msg: &ChannelMessage, member_id: &str) -> KeyOutcome {
        let authorized = match self
            .api
            .member_permissions(guild_id, &msg.author_id, &msg.author_roles)
            .await
        {
            Ok(perms) => perms.contains(Permissions::ADMINISTRATOR),
            Err(e) => {
                tracing::warn!(user = %msg.author_id, "Permission lookup failed: {e:#}");
                false
            }
        };
        if !authorized {
            return KeyOutcome::NotAuthorized;
        }
        KeyOutcome::Granted {
            member_id: member_id.to_string(),
            issue: self.registry.issue(member_id),
        }
    }

    pub async fn handle_message(&self, msg: &ChannelMessage) -> KeyOutcome {
        if msg.author_is_bot || msg.channel_id != self.channel_id {
            return KeyOutcome::Ignored;
        }
        let Some(guild_id) = msg.guild_id.as_deref() else {
            return KeyOutcome::Ignored;
        };
        let Some(command) = self.parse_command(&msg.content) else {
            return KeyOutcome::Ignored;
        };

        let outcome = if let KeyCommand::Grant { member_id } = command {
            self.grant(guild_id, msg, member_id).await
        } else {
            match self.role_gate(guild_id, msg).await {
                Some(denied) => denied,
                None if command == KeyCommand::Issue => {
                    KeyOutcome::Issued(self.registry.issue(&msg.author_id))
                }
                None => KeyOutcome::Reset {
                    existed: self.registry.reset(&msg.author_id),
                },
            }
        };
        tracing::info!(user = %msg.author_id, ?command, "Key desk request handled");

        if let Some(text) = self.reply_for(&outcome) {
            if let Err(e) = self.api.reply(&msg.channel_id, &msg.id, &text).await {
                tracing::warn!(user = %msg.author_id, "Failed to send key desk reply: {e:#}");
            }
        }
        outcome
    }
}

#[async_trait]
impl MessageHandler for KeySession {
    fn name(&self) -> &str {
        "keys"
    }

    async fn handle(&self, message: ChannelMessage) {
        let outcome = self.handle_message(&message).await;
        tracing::trace!(user = %message.author_id, ?outcome, "Message handled");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoApi;

    #[async_trait]
    impl GuildApi for NoApi {
        async fn member_permissions(
            &self,
            _: &str,
            _: &str,
            _: &[String],
        ) -> Result<crate::channels::permissions::Permissions> {
            anyhow::bail!("unused")
        }

        async fn nickname_access(
            &self,
            _: &str,
            _: &str,
            _: &[String],
        ) -> Result<crate::channels::permissions::NicknameAccess> {
            anyhow::bail!("unused")
        }

        async fn role_exists(&self, _: &str, _: &str) -> Result<bool> {
            Ok(true)
        }

        async fn edit_nickname(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: &str,
        ) -> Result<(), crate::channels::traits::EditError> {
            Ok(())
        }

        async fn reply(&self, _: &str, _: &str, _: &str) -> Result<()> {
            Ok(())
        }
    }

    fn session() -> KeySession {
        let config = KeysConfig {
            channel_id: "desk".into(),
            required_role_id: "buyer".into(),
            pool: vec!["K1".into()],
            ..KeysConfig::default()
        };
        KeySession::new(&config, Arc::new(NoApi)).unwrap()
    }

    #[test]
    fn replies_render_the_template() {
        let s = session();
        assert_eq!(
            s.reply_for(&KeyOutcome::Issued(KeyIssue::New("K1".into()))),
            Some("Your key has been generated!\n```K1```".into())
        );
        assert_eq!(
            s.reply_for(&KeyOutcome::Issued(KeyIssue::Existing("K1".into()))),
            Some("You already have a key.\n```K1```".into())
        );
        assert_eq!(s.reply_for(&KeyOutcome::Ignored), None);
    }

    #[test]
    fn commands_are_matched_exactly_after_trim() {
        let s = session();
        assert_eq!(s.parse_command(" !getkey "), Some(KeyCommand::Issue));
        assert_eq!(s.parse_command("!resetkey"), Some(KeyCommand::Reset));
        assert_eq!(s.parse_command("!getkey now"), None);
    }

    #[test]
    fn grant_accepts_mentions_and_bare_ids() {
        let s = session();
        for content in ["!givekey <@123>", "!givekey <@!123>", "  !givekey   123 "] {
            assert_eq!(
                s.parse_command(content),
                Some(KeyCommand::Grant { member_id: "123" }),
                "{content}"
            );
        }
        for content in ["!givekey", "!givekey @someone", "!givekey<@123>", "!givekey <@>"] {
            assert_eq!(s.parse_command(content), None, "{content}");
        }
    }

    #[test]
    fn grant_replies_mention_the_member() {
        let s = session();
        assert_eq!(
            s.reply_for(&KeyOutcome::Granted {
                member_id: "123".into(),
                issue: KeyIssue::New("K1".into()),
            }),
            Some("Key linked to <@123>.\n```K1```".into())
        );
        assert_eq!(
            s.reply_for(&KeyOutcome::NotAuthorized).as_deref(),
            Some(NOT_AUTHORIZED_REPLY)
        );
    }

    #[tokio::test]
    async fn member_without_role_is_refused() {
        let s = session();
        let msg = ChannelMessage {
            id: "m".into(),
            guild_id: Some("g".into()),
            channel_id: "desk".into(),
            author_id: "u".into(),
            content: "!getkey".into(),
            ..ChannelMessage::default()
        };
        assert_eq!(s.handle_message(&msg).await, KeyOutcome::MissingRole);
        assert!(s.registry().is_empty());
    }
}
