//! Key desk behavior: role gate, idempotent issue, reset, admin grants,
//! reply rendering.

use async_trait::async_trait;
use nickshift::channels::{ChannelMessage, EditError, GuildApi, NicknameAccess, Permissions};
use nickshift::config::KeysConfig;
use nickshift::keys::{KeyIssue, KeyOutcome, KeySession};
use std::sync::{Arc, Mutex};

struct DeskGuild {
    roles: Vec<String>,
    admins: Vec<String>,
    lookup_fails: bool,
    replies: Mutex<Vec<(String, String)>>,
}

impl DeskGuild {
    fn with_roles(roles: &[&str]) -> Self {
        Self {
            roles: roles.iter().map(|r| (*r).to_string()).collect(),
            admins: vec!["admin".into()],
            lookup_fails: false,
            replies: Mutex::new(Vec::new()),
        }
    }

    fn last_reply(&self) -> Option<String> {
        self.replies.lock().unwrap().last().map(|(_, text)| text.clone())
    }
}

#[async_trait]
impl GuildApi for DeskGuild {
    async fn member_permissions(
        &self,
        _guild_id: &str,
        user_id: &str,
        _roles: &[String],
    ) -> anyhow::Result<Permissions> {
        if self.admins.iter().any(|a| a == user_id) {
            Ok(Permissions::ALL)
        } else {
            Ok(Permissions::MANAGE_GUILD)
        }
    }

    async fn nickname_access(
        &self,
        _guild_id: &str,
        _member_id: &str,
        _member_roles: &[String],
    ) -> anyhow::Result<NicknameAccess> {
        Ok(NicknameAccess::MissingPermission)
    }

    async fn role_exists(&self, _guild_id: &str, role_id: &str) -> anyhow::Result<bool> {
        if self.lookup_fails {
            anyhow::bail!("guild lookup failed");
        }
        Ok(self.roles.iter().any(|r| r == role_id))
    }

    async fn edit_nickname(
        &self,
        _guild_id: &str,
        _member_id: &str,
        _nickname: &str,
        _reason: &str,
    ) -> Result<(), EditError> {
        Err(EditError::Other("not used by the key desk".into()))
    }

    async fn reply(&self, _channel_id: &str, message_id: &str, text: &str) -> anyhow::Result<()> {
        self.replies
            .lock()
            .unwrap()
            .push((message_id.to_string(), text.to_string()));
        Ok(())
    }
}

fn config(pool: &[&str]) -> KeysConfig {
    KeysConfig {
        channel_id: "desk".into(),
        required_role_id: "buyer".into(),
        pool: pool.iter().map(|k| (*k).to_string()).collect(),
        ..KeysConfig::default()
    }
}

fn request(author: &str, roles: &[&str], content: &str) -> ChannelMessage {
    ChannelMessage {
        id: format!("{author}:{content}"),
        guild_id: Some("guild".into()),
        channel_id: "desk".into(),
        author_id: author.into(),
        author_roles: roles.iter().map(|r| (*r).to_string()).collect(),
        content: content.into(),
        ..ChannelMessage::default()
    }
}

#[tokio::test]
async fn issue_twice_returns_the_same_key() {
    let guild = Arc::new(DeskGuild::with_roles(&["buyer"]));
    let desk = KeySession::new(&config(&["AAA", "BBB", "CCC"]), guild.clone()).unwrap();

    let first = desk.handle_message(&request("u", &["buyer"], "!getkey")).await;
    let KeyOutcome::Issued(KeyIssue::New(key)) = &first else {
        panic!("expected a new key, got {first:?}");
    };
    assert!(["AAA", "BBB", "CCC"].contains(&key.as_str()));
    assert_eq!(
        guild.last_reply(),
        Some(format!("Your key has been generated!\n```{key}```"))
    );

    let second = desk.handle_message(&request("u", &["buyer"], "!getkey")).await;
    assert_eq!(second, KeyOutcome::Issued(KeyIssue::Existing(key.clone())));
    assert_eq!(
        guild.last_reply(),
        Some(format!("You already have a key.\n```{key}```"))
    );
}

#[tokio::test]
async fn reset_then_issue_draws_again() {
    let guild = Arc::new(DeskGuild::with_roles(&["buyer"]));
    let desk = KeySession::new(&config(&["ONLY"]), guild.clone()).unwrap();

    assert_eq!(
        desk.handle_message(&request("u", &["buyer"], "!resetkey")).await,
        KeyOutcome::Reset { existed: false }
    );
    assert_eq!(
        guild.last_reply().as_deref(),
        Some("Could not find a key linked to your account.")
    );

    desk.handle_message(&request("u", &["buyer"], "!getkey")).await;
    assert_eq!(
        desk.handle_message(&request("u", &["buyer"], "!resetkey")).await,
        KeyOutcome::Reset { existed: true }
    );
    assert_eq!(guild.last_reply().as_deref(), Some("Your key has been reset."));
    assert!(desk.registry().assigned("u").is_none());

    assert_eq!(
        desk.handle_message(&request("u", &["buyer"], "!getkey")).await,
        KeyOutcome::Issued(KeyIssue::New("ONLY".into()))
    );
}

#[tokio::test]
async fn members_share_keys_from_a_single_entry_pool() {
    let guild = Arc::new(DeskGuild::with_roles(&["buyer"]));
    let desk = KeySession::new(&config(&["SHARED"]), guild.clone()).unwrap();

    for member in ["a", "b", "c"] {
        assert_eq!(
            desk.handle_message(&request(member, &["buyer"], "!getkey")).await,
            KeyOutcome::Issued(KeyIssue::New("SHARED".into()))
        );
    }
    assert_eq!(desk.registry().len(), 3);
}

#[tokio::test]
async fn member_without_role_is_refused() {
    let guild = Arc::new(DeskGuild::with_roles(&["buyer"]));
    let desk = KeySession::new(&config(&["K"]), guild.clone()).unwrap();

    assert_eq!(
        desk.handle_message(&request("u", &["someone-else"], "!getkey")).await,
        KeyOutcome::MissingRole
    );
    assert_eq!(
        guild.last_reply().as_deref(),
        Some("You need the required role to use this command.")
    );
    assert!(desk.registry().is_empty());
}

#[tokio::test]
async fn missing_guild_role_is_a_configuration_error() {
    let guild = Arc::new(DeskGuild::with_roles(&[]));
    let desk = KeySession::new(&config(&["K"]), guild.clone()).unwrap();

    assert_eq!(
        desk.handle_message(&request("u", &[], "!resetkey")).await,
        KeyOutcome::RoleNotConfigured
    );
    assert!(guild
        .last_reply()
        .is_some_and(|r| r.starts_with("Configuration error")));
}

#[tokio::test]
async fn failed_role_lookup_refuses_without_issuing() {
    let guild = Arc::new(DeskGuild {
        lookup_fails: true,
        ..DeskGuild::with_roles(&["buyer"])
    });
    let desk = KeySession::new(&config(&["K"]), guild.clone()).unwrap();

    assert_eq!(
        desk.handle_message(&request("u", &[], "!getkey")).await,
        KeyOutcome::MissingRole
    );
    assert!(desk.registry().is_empty());
}

#[tokio::test]
async fn unrelated_traffic_is_ignored_silently() {
    let guild = Arc::new(DeskGuild::with_roles(&["buyer"]));
    let desk = KeySession::new(&config(&["K"]), guild.clone()).unwrap();

    let mut elsewhere = request("u", &["buyer"], "!getkey");
    elsewhere.channel_id = "general".into();
    let mut from_bot = request("u", &["buyer"], "!getkey");
    from_bot.author_is_bot = true;
    let mut dm = request("u", &["buyer"], "!getkey");
    dm.guild_id = None;

    for msg in [
        request("u", &["buyer"], "hello"),
        request("u", &["buyer"], "!getkey please"),
        elsewhere,
        from_bot,
        dm,
    ] {
        assert_eq!(desk.handle_message(&msg).await, KeyOutcome::Ignored);
    }
    assert!(guild.replies.lock().unwrap().is_empty());
    assert!(desk.registry().is_empty());
}

#[tokio::test]
async fn custom_template_and_commands() {
    let guild = Arc::new(DeskGuild::with_roles(&["buyer"]));
    let mut cfg = config(&["XYZ"]);
    cfg.issue_command = "!key".into();
    cfg.reply_template = "Key: {key} (keep it secret)".into();
    let desk = KeySession::new(&cfg, guild.clone()).unwrap();

    desk.handle_message(&request("u", &["buyer"], "!key")).await;
    assert_eq!(
        guild.last_reply().as_deref(),
        Some("Your key has been generated!\nKey: XYZ (keep it secret)")
    );
}

#[tokio::test]
async fn admin_grant_links_a_key_the_member_then_sees() {
    let guild = Arc::new(DeskGuild::with_roles(&["buyer"]));
    let desk = KeySession::new(&config(&["LINKED"]), guild.clone()).unwrap();

    assert_eq!(
        desk.handle_message(&request("admin", &[], "!givekey <@!777>")).await,
        KeyOutcome::Granted {
            member_id: "777".into(),
            issue: KeyIssue::New("LINKED".into()),
        }
    );
    assert_eq!(
        guild.last_reply().as_deref(),
        Some("Key linked to <@777>.\n```LINKED```")
    );

    assert_eq!(
        desk.handle_message(&request("777", &["buyer"], "!getkey")).await,
        KeyOutcome::Issued(KeyIssue::Existing("LINKED".into()))
    );
    assert_eq!(
        desk.handle_message(&request("admin", &[], "!givekey 777")).await,
        KeyOutcome::Granted {
            member_id: "777".into(),
            issue: KeyIssue::Existing("LINKED".into()),
        }
    );
}

#[tokio::test]
async fn grant_needs_administrator_not_just_the_role() {
    let guild = Arc::new(DeskGuild::with_roles(&["buyer"]));
    let desk = KeySession::new(&config(&["K"]), guild.clone()).unwrap();

    assert_eq!(
        desk.handle_message(&request("u", &["buyer"], "!givekey <@777>")).await,
        KeyOutcome::NotAuthorized
    );
    assert_eq!(
        guild.last_reply().as_deref(),
        Some("You don't have the required permissions to run this command.")
    );
    assert!(desk.registry().is_empty());

    assert_eq!(
        desk.handle_message(&request("admin", &[], "!givekey someone")).await,
        KeyOutcome::Ignored
    );
}

#[test]
fn empty_pool_cannot_build_a_desk() {
    let guild = Arc::new(DeskGuild::with_roles(&["buyer"]));
    assert!(KeySession::new(&config(&[]), guild).is_err());
}
