use super::permissions::{GuildRole, GuildSnapshot, NicknameAccess, Permissions};
use super::traits::{Channel, ChannelMessage, EditError, FatalChannelError, GuildApi};
use anyhow::Context;
use async_trait::async_trait;
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::{DecodePaddingMode, Engine};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

pub const DISCORD_API_BASE: &str = "https://discord.com/api/v10";

/// GUILDS | GUILD_MESSAGES | MESSAGE_CONTENT
const GATEWAY_INTENTS: u64 = 33281;

/// JSON error code Discord returns alongside 403 for permission refusals.
const MISSING_PERMISSIONS_CODE: u64 = 50013;

/// Gateway close codes that no reconnect can fix: authentication failed,
/// invalid shard, sharding required, invalid API version, invalid or
/// disallowed intents.
const FATAL_CLOSE_CODES: [u16; 6] = [4004, 4010, 4011, 4012, 4013, 4014];

/// How long guild roles and the bot's own roles are reused before a refetch.
pub const GUILD_CACHE_TTL: Duration = Duration::from_secs(60);

/// Token ids are unpadded base64, but accept padded input too.
const TOKEN_ID_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Per-guild lookup results, fresh for `ttl` after each fetch.
struct GuildCache<T> {
    ttl: Duration,
    entries: RwLock<HashMap<String, (Instant, T)>>,
}

impl<T: Clone> GuildCache<T> {
    fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn fresh(&self, guild_id: &str) -> Option<T> {
        self.entries
            .read()
            .get(guild_id)
            .filter(|(fetched_at, _)| fetched_at.elapsed() < self.ttl)
            .map(|(_, value)| value.clone())
    }

    /// Last known value regardless of age.
    fn last(&self, guild_id: &str) -> Option<T> {
        self.entries.read().get(guild_id).map(|(_, value)| value.clone())
    }

    fn store(&self, guild_id: &str, value: T) {
        self.entries
            .write()
            .insert(guild_id.to_string(), (Instant::now(), value));
    }

    fn forget(&self, guild_id: &str) {
        self.entries.write().remove(guild_id);
    }

    /// Serve a fresh entry, else fetch; a failed refetch falls back to the last value.
    async fn get_or_fetch<F>(&self, guild_id: &str, fetch: F) -> anyhow::Result<T>
    where
        F: std::future::Future<Output = anyhow::Result<T>>,
    {
        if let Some(hit) = self.fresh(guild_id) {
            return Ok(hit);
        }
        match fetch.await {
            Ok(value) => {
                self.store(guild_id, value.clone());
                Ok(value)
            }
            Err(e) => match self.last(guild_id) {
                Some(stale) => {
                    tracing::warn!(guild = guild_id, "Guild refresh failed, using cached copy: {e:#}");
                    Ok(stale)
                }
                None => Err(e),
            },
        }
    }
}

/// Discord channel: gateway WebSocket for inbound messages, REST for guild operations
pub struct DiscordChannel {
    bot_token: String,
    guild_id: Option<String>,
    api_base: String,
    client: reqwest::Client,
    guilds: GuildCache<GuildSnapshot>,
    bot_roles: GuildCache<Vec<String>>,
}

impl DiscordChannel {
    pub fn new(bot_token: String, guild_id: Option<String>) -> Self {
        Self {
            bot_token,
            guild_id: guild_id.filter(|g| !g.trim().is_empty()),
            api_base: DISCORD_API_BASE.to_string(),
            client: reqwest::Client::new(),
            guilds: GuildCache::new(GUILD_CACHE_TTL),
            bot_roles: GuildCache::new(GUILD_CACHE_TTL),
        }
    }

    /// Override how long guild lookups are reused.
    #[must_use]
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.guilds = GuildCache::new(ttl);
        self.bot_roles = GuildCache::new(ttl);
        self
    }

    /// Point REST calls at another host (used against mock servers).
    #[must_use]
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn bot_user_id_from_token(token: &str) -> Option<String> {
        // Discord bot tokens are base64(bot_user_id).timestamp.hmac
        let part = token.split('.').next()?;
        let bytes = TOKEN_ID_ENGINE.decode(part).ok()?;
        String::from_utf8(bytes).ok().filter(|id| !id.is_empty())
    }

    fn auth_header(&self) -> String {
        format!("Bot {}", self.bot_token)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> anyhow::Result<T> {
        let url = format!("{}{path}", self.api_base);
        let resp = self
            .client
            .get(&url)
            .header("Authorization", self.auth_header())
            .send()
            .await
            .with_context(|| format!("GET {path}"))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let err = resp
                .text()
                .await
                .unwrap_or_else(|e| format!("<failed to read response body: {e}>"));
            anyhow::bail!("Discord GET {path} failed ({status}): {err}");
        }
        Ok(resp.json().await?)
    }

    pub async fn fetch_guild(&self, guild_id: &str) -> anyhow::Result<GuildSnapshot> {
        let payload: GuildPayload = self.get_json(&format!("/guilds/{guild_id}")).await?;
        Ok(payload.into_snapshot())
    }

    pub async fn fetch_member_roles(
        &self,
        guild_id: &str,
        user_id: &str,
    ) -> anyhow::Result<Vec<String>> {
        let member: MemberPayload = self
            .get_json(&format!("/guilds/{guild_id}/members/{user_id}"))
            .await?;
        Ok(member.roles)
    }

    async fn guild(&self, guild_id: &str) -> anyhow::Result<GuildSnapshot> {
        self.guilds
            .get_or_fetch(guild_id, self.fetch_guild(guild_id))
            .await
    }

    async fn own_roles(&self, guild_id: &str, bot_id: &str) -> anyhow::Result<Vec<String>> {
        self.bot_roles
            .get_or_fetch(guild_id, self.fetch_member_roles(guild_id, bot_id))
            .await
    }

    /// Drop cached lookups for `guild_id`, e.g. after Discord refused an edit
    /// the cached roles said was allowed.
    pub fn invalidate_guild(&self, guild_id: &str) {
        self.guilds.forget(guild_id);
        self.bot_roles.forget(guild_id);
    }

    fn passes_guild_filter(&self, guild_id: Option<&str>) -> bool {
        match (&self.guild_id, guild_id) {
            (Some(filter), Some(g)) => filter == g,
            _ => true,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GuildPayload {
    id: String,
    owner_id: String,
    #[serde(default)]
    roles: Vec<RolePayload>,
}

#[derive(Debug, Deserialize)]
struct RolePayload {
    id: String,
    #[serde(default)]
    position: i64,
    #[serde(default)]
    permissions: String,
}

impl GuildPayload {
    fn into_snapshot(self) -> GuildSnapshot {
        GuildSnapshot {
            id: self.id,
            owner_id: self.owner_id,
            roles: self
                .roles
                .into_iter()
                .map(|r| GuildRole {
                    id: r.id,
                    position: r.position,
                    permissions: Permissions::parse(&r.permissions),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct MemberPayload {
    #[serde(default)]
    roles: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AuthorPayload {
    id: String,
    #[serde(default)]
    bot: bool,
}

#[derive(Debug, Deserialize)]
struct MessageCreate {
    id: String,
    channel_id: String,
    #[serde(default)]
    guild_id: Option<String>,
    author: AuthorPayload,
    #[serde(default)]
    member: Option<MemberPayload>,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: u64,
}

/// Map a failed nickname PATCH onto [`EditError`].
pub fn classify_edit_failure(status: u16, body: &str) -> EditError {
    let code = serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.code)
        .unwrap_or_default();
    if status == 403 || code == MISSING_PERMISSIONS_CODE {
        EditError::Forbidden
    } else if status == 429 {
        EditError::RateLimited
    } else {
        EditError::Other(format!("{status}: {body}"))
    }
}

/// Build a [`ChannelMessage`] from a `MESSAGE_CREATE` payload.
fn parse_message_create(d: &serde_json::Value) -> Option<ChannelMessage> {
    let event = MessageCreate::deserialize(d).ok()?;
    Some(ChannelMessage {
        id: event.id,
        guild_id: event.guild_id,
        channel_id: event.channel_id,
        author_id: event.author.id,
        author_is_bot: event.author.bot,
        author_roles: event.member.unwrap_or_default().roles,
        content: event.content,
    })
}

/// Turn a gateway close into a listener error. Fatal codes stop the supervisor.
fn close_error(frame: Option<CloseFrame>) -> anyhow::Error {
    let Some(frame) = frame else {
        return anyhow::anyhow!("Discord gateway closed without a close frame");
    };
    let code = u16::from(frame.code);
    let reason = frame.reason.to_string();
    if FATAL_CLOSE_CODES.contains(&code) {
        FatalChannelError {
            channel: "discord".into(),
            code,
            reason,
        }
        .into()
    } else {
        anyhow::anyhow!("Discord gateway closed ({code}): {reason}")
    }
}

fn heartbeat_payload(sequence: i64) -> String {
    let d = if sequence >= 0 { json!(sequence) } else { json!(null) };
    json!({"op": 1, "d": d}).to_string()
}

#[async_trait]
impl Channel for DiscordChannel {
    fn name(&self) -> &str {
        "discord"
    }

    async fn listen(&self, tx: tokio::sync::mpsc::Sender<ChannelMessage>) -> anyhow::Result<()> {
        let bot_user_id = Self::bot_user_id_from_token(&self.bot_token).unwrap_or_default();

        // Get Gateway URL
        let gw_resp: serde_json::Value = self.get_json("/gateway/bot").await?;
        let gw_url = gw_resp
            .get("url")
            .and_then(|u| u.as_str())
            .unwrap_or("wss://gateway.discord.gg");

        let ws_url = format!("{gw_url}/?v=10&encoding=json");
        tracing::info!("Discord: connecting to gateway...");

        let (ws_stream, _) = tokio_tungstenite::connect_async(&ws_url).await?;
        let (mut write, mut read) = ws_stream.split();

        // Read Hello (opcode 10)
        let hello = read.next().await.ok_or(anyhow::anyhow!("No hello"))??;
        let hello_data: serde_json::Value = serde_json::from_str(&hello.to_string())?;
        let heartbeat_interval = hello_data
            .get("d")
            .and_then(|d| d.get("heartbeat_interval"))
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(41250);

        // Send Identify (opcode 2)
        let identify = json!({
            "op": 2,
            "d": {
                "token": self.bot_token,
                "intents": GATEWAY_INTENTS,
                "properties": {
                    "os": "linux",
                    "browser": "nickshift",
                    "device": "nickshift"
                }
            }
        });
        write.send(Message::Text(identify.to_string().into())).await?;

        tracing::info!("Discord: connected and identified");

        // Last sequence number seen; only touched inside the select! loop.
        let mut sequence: i64 = -1;

        // The timer only ticks; the heartbeat itself is built where `sequence` lives.
        let (hb_tx, mut hb_rx) = tokio::sync::mpsc::channel::<()>(1);
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_millis(heartbeat_interval));
            loop {
                interval.tick().await;
                if hb_tx.send(()).await.is_err() {
                    break;
                }
            }
        });

        loop {
            tokio::select! {
                _ = hb_rx.recv() => {
                    write
                        .send(Message::Text(heartbeat_payload(sequence).into()))
                        .await
                        .context("Discord heartbeat send failed")?;
                }
                msg = read.next() => {
                    let msg = match msg {
                        Some(Ok(Message::Text(t))) => t,
                        Some(Ok(Message::Close(frame))) => return Err(close_error(frame)),
                        None => anyhow::bail!("Discord gateway stream ended"),
                        Some(Err(e)) => return Err(e.into()),
                        _ => continue,
                    };

                    let Ok(event) = serde_json::from_str::<serde_json::Value>(&msg) else {
                        continue;
                    };

                    if let Some(s) = event.get("s").and_then(serde_json::Value::as_i64) {
                        sequence = s;
                    }

                    match event.get("op").and_then(serde_json::Value::as_u64).unwrap_or(0) {
                        // Op 1: Server requests an immediate heartbeat
                        1 => {
                            write
                                .send(Message::Text(heartbeat_payload(sequence).into()))
                                .await
                                .context("Discord heartbeat send failed")?;
                            continue;
                        }
                        7 => {
                            tracing::warn!("Discord: received Reconnect (op 7), closing for restart");
                            break;
                        }
                        9 => {
                            tracing::warn!("Discord: received Invalid Session (op 9), closing for restart");
                            break;
                        }
                        _ => {}
                    }

                    if event.get("t").and_then(|t| t.as_str()) != Some("MESSAGE_CREATE") {
                        continue;
                    }
                    let Some(channel_msg) = event.get("d").and_then(parse_message_create) else {
                        continue;
                    };

                    if channel_msg.author_id == bot_user_id {
                        continue;
                    }
                    if !self.passes_guild_filter(channel_msg.guild_id.as_deref()) {
                        continue;
                    }

                    if tx.send(channel_msg).await.is_err() {
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    async fn health_check(&self) -> bool {
        self.client
            .get(format!("{}/users/@me", self.api_base))
            .header("Authorization", self.auth_header())
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

#[async_trait]
impl GuildApi for DiscordChannel {
    async fn member_permissions(
        &self,
        guild_id: &str,
        user_id: &str,
        roles: &[String],
    ) -> anyhow::Result<Permissions> {
        let guild = self.guild(guild_id).await?;
        Ok(guild.member_permissions(user_id, roles))
    }

    async fn nickname_access(
        &self,
        guild_id: &str,
        member_id: &str,
        member_roles: &[String],
    ) -> anyhow::Result<NicknameAccess> {
        let bot_id = Self::bot_user_id_from_token(&self.bot_token)
            .context("bot user id could not be decoded from the token")?;
        let guild = self.guild(guild_id).await?;
        let bot_roles = self.own_roles(guild_id, &bot_id).await?;
        Ok(guild.nickname_access(&bot_id, &bot_roles, member_id, member_roles))
    }

    async fn role_exists(&self, guild_id: &str, role_id: &str) -> anyhow::Result<bool> {
        Ok(self.guild(guild_id).await?.role_exists(role_id))
    }

    async fn edit_nickname(
        &self,
        guild_id: &str,
        member_id: &str,
        nickname: &str,
        reason: &str,
    ) -> Result<(), EditError> {
        let url = format!("{}/guilds/{guild_id}/members/{member_id}", self.api_base);
        let resp = self
            .client
            .patch(&url)
            .header("Authorization", self.auth_header())
            .header("X-Audit-Log-Reason", urlencoding::encode(reason).into_owned())
            .json(&json!({ "nick": nickname }))
            .send()
            .await
            .map_err(|e| EditError::Other(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        let error = classify_edit_failure(status.as_u16(), &body);
        if error == EditError::Forbidden {
            self.invalidate_guild(guild_id);
        }
        Err(error)
    }

    async fn reply(&self, channel_id: &str, message_id: &str, text: &str) -> anyhow::Result<()> {
        let url = format!("{}/channels/{channel_id}/messages", self.api_base);
        let body = json!({
            "content": text,
            "message_reference": { "message_id": message_id, "fail_if_not_exists": false },
            "allowed_mentions": { "parse": [] }
        });

        let resp = self
            .client
            .post(&url)
            .header("Authorization", self.auth_header())
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let err = resp
                .text()
                .await
                .unwrap_or_else(|e| format!("<failed to read response body: {e}>"));
            anyhow::bail!("Discord send message failed ({status}): {err}");
        }

        Ok(())
    }
}
