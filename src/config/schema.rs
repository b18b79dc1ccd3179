use anyhow::{Context, Result};
use directories::UserDirs;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Discord caps member nicknames at 32 characters.
pub const DISCORD_NICKNAME_MAX_CHARS: usize = 32;

const DEFAULT_AUDIT_REASON: &str = "Auto per-message nickname change";

// ── Top-level config ──────────────────────────────────────────────

/// Top-level nickshift configuration, loaded from `config.toml`.
///
/// Every field has a default so an absent file is valid; the two required
/// values (bot token and channel id) normally arrive through the environment.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct Config {
    /// Path the config was loaded from. Computed at runtime, never serialized.
    #[serde(skip)]
    pub config_path: Option<PathBuf>,

    /// Discord connection settings (`[discord]`).
    #[serde(default)]
    pub discord: DiscordConfig,

    /// Per-message nickname rotation (`[nickname]`).
    #[serde(default)]
    pub nickname: NicknameConfig,

    /// Role-gated key issuance (`[keys]`).
    #[serde(default)]
    pub keys: KeysConfig,

    /// Listener supervision and dispatch limits (`[runtime]`).
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

/// Which bot the process runs. Validation differs per mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotMode {
    Nickname,
    Keys,
}

impl BotMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Nickname => "nickname",
            Self::Keys => "keys",
        }
    }
}

// ── Discord ──────────────────────────────────────────────────────

/// Discord bot connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct DiscordConfig {
    /// Discord bot token (from Discord Developer Portal). Env: `DISCORD_TOKEN`.
    #[serde(default)]
    pub bot_token: String,
    /// Optional guild (server) ID to restrict the bot to a single guild. Env: `GUILD_ID`.
    #[serde(default)]
    pub guild_id: Option<String>,
}

// ── Nickname rotation ────────────────────────────────────────────

/// How candidates are taken from a non-empty name pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SelectionMode {
    /// Uniform draw, avoiding the member's previous name when possible.
    #[default]
    Random,
    /// Cycle through the pool in order with one cursor shared by everyone.
    Sequential,
}

/// Per-message nickname rotation configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct NicknameConfig {
    /// Channel whose messages trigger a rename. Env: `CHANNEL_ID`.
    #[serde(default)]
    pub channel_id: String,
    /// Candidate nicknames. Empty = generate names procedurally.
    #[serde(default)]
    pub names: Vec<String>,
    /// Selection strategy for `names`. Ignored for procedural names.
    #[serde(default)]
    pub mode: SelectionMode,
    /// Only rename this member when set. Empty string is treated as unset.
    #[serde(default)]
    pub target_user_id: Option<String>,
    /// Names are clipped to this many characters (at most 32).
    #[serde(default = "default_max_length")]
    pub max_length: usize,
    /// Reason recorded in the guild audit log for each rename.
    #[serde(default = "default_audit_reason")]
    pub audit_reason: String,
    /// Total edit attempts per message, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Fixed delay before a retry, in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Activation toggle (`[nickname.activation]`).
    #[serde(default)]
    pub activation: ActivationConfig,
}

fn default_max_length() -> usize {
    DISCORD_NICKNAME_MAX_CHARS
}

fn default_audit_reason() -> String {
    DEFAULT_AUDIT_REASON.into()
}

fn default_max_attempts() -> u32 {
    2
}

fn default_retry_delay_ms() -> u64 {
    200
}

impl Default for NicknameConfig {
    fn default() -> Self {
        Self {
            channel_id: String::new(),
            names: Vec::new(),
            mode: SelectionMode::default(),
            target_user_id: None,
            max_length: default_max_length(),
            audit_reason: default_audit_reason(),
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            activation: ActivationConfig::default(),
        }
    }
}

impl NicknameConfig {
    /// Target filter with blank values collapsed to `None`.
    pub fn target_user(&self) -> Option<&str> {
        self.target_user_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }
}

/// Enable/disable commands gating the rotator.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ActivationConfig {
    /// When false the rotator starts active and ignores both commands.
    #[serde(default = "default_true")]
    pub required: bool,
    /// Message that switches the rotator on.
    #[serde(default = "default_enable_command")]
    pub enable_command: String,
    /// Message that switches the rotator off.
    #[serde(default = "default_disable_command")]
    pub disable_command: String,
}

fn default_true() -> bool {
    true
}

fn default_enable_command() -> String {
    "!nick on".into()
}

fn default_disable_command() -> String {
    "!nick off".into()
}

impl Default for ActivationConfig {
    fn default() -> Self {
        Self {
            required: true,
            enable_command: default_enable_command(),
            disable_command: default_disable_command(),
        }
    }
}

// ── Key issuance ─────────────────────────────────────────────────

/// Role-gated key issuance configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct KeysConfig {
    /// Channel accepting key commands. Env: `CHANNEL_ID`.
    #[serde(default)]
    pub channel_id: String,
    /// Role a member must carry to request or reset a key. Env: `KEY_ROLE_ID`.
    #[serde(default)]
    pub required_role_id: String,
    /// Keys handed out. Entries may be given to more than one member.
    #[serde(default)]
    pub pool: Vec<String>,
    #[serde(default = "default_issue_command")]
    pub issue_command: String,
    #[serde(default = "default_reset_command")]
    pub reset_command: String,
    /// Administrator command linking a key to another member: `!givekey <@id>`.
    #[serde(default = "default_grant_command")]
    pub grant_command: String,
    /// Reply body; `{key}` is replaced with the member's key.
    #[serde(default = "default_reply_template")]
    pub reply_template: String,
}

fn default_issue_command() -> String {
    "!getkey".into()
}

fn default_reset_command() -> String {
    "!resetkey".into()
}

fn default_grant_command() -> String {
    "!givekey".into()
}

fn default_reply_template() -> String {
    "```{key}```".into()
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            channel_id: String::new(),
            required_role_id: String::new(),
            pool: Vec::new(),
            issue_command: default_issue_command(),
            reset_command: default_reset_command(),
            grant_command: default_grant_command(),
            reply_template: default_reply_template(),
        }
    }
}

// ── Runtime ──────────────────────────────────────────────────────

/// Listener supervision and dispatch limits.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RuntimeConfig {
    /// First restart delay after the gateway listener fails, in seconds.
    #[serde(default = "default_initial_backoff")]
    pub channel_initial_backoff_secs: u64,
    /// Upper bound for the doubling restart delay, in seconds.
    #[serde(default = "default_max_backoff")]
    pub channel_max_backoff_secs: u64,
    /// Inbound messages processed concurrently.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight_messages: usize,
}

fn default_initial_backoff() -> u64 {
    2
}

fn default_max_backoff() -> u64 {
    60
}

fn default_max_in_flight() -> usize {
    16
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            channel_initial_backoff_secs: default_initial_backoff(),
            channel_max_backoff_secs: default_max_backoff(),
            max_in_flight_messages: default_max_in_flight(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl Config {
    /// Resolve and load the config file, or fall back to defaults.
    ///
    /// Precedence: explicit path, `NICKSHIFT_CONFIG`, `~/.nickshift/config.toml`.
    /// An explicit path that does not exist is an error; the implicit
    /// locations are optional.
    pub async fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load_from(path).await;
        }

        if let Ok(path) = std::env::var("NICKSHIFT_CONFIG") {
            if !path.trim().is_empty() {
                return Self::load_from(Path::new(&path)).await;
            }
        }

        if let Some(path) = default_config_path() {
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                return Self::load_from(&path).await;
            }
        }

        Ok(Self::default())
    }

    /// Load a specific TOML file.
    pub async fn load_from(path: &Path) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.config_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup (env-like). Blank values are ignored.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(token) = get("DISCORD_TOKEN") {
            self.discord.bot_token = token.trim().to_string();
        }
        if let Some(guild) = get("GUILD_ID") {
            self.discord.guild_id = Some(guild.trim().to_string());
        }
        // Both bots listen in "the" channel; one variable serves either mode.
        if let Some(channel) = get("CHANNEL_ID") {
            let channel = channel.trim().to_string();
            self.nickname.channel_id.clone_from(&channel);
            self.keys.channel_id = channel;
        }
        if let Some(role) = get("KEY_ROLE_ID") {
            self.keys.required_role_id = role.trim().to_string();
        }
    }

    /// Validate the settings a given mode needs. Failures are fatal at startup.
    pub fn validate(&self, mode: BotMode) -> Result<()> {
        if self.discord.bot_token.trim().is_empty() {
            anyhow::bail!("Missing DISCORD_TOKEN environment variable (or discord.bot_token)");
        }
        if self.runtime.max_in_flight_messages == 0 {
            anyhow::bail!("runtime.max_in_flight_messages must be greater than 0");
        }

        match mode {
            BotMode::Nickname => self.validate_nickname(),
            BotMode::Keys => self.validate_keys(),
        }
    }

    fn validate_nickname(&self) -> Result<()> {
        let nick = &self.nickname;
        if nick.channel_id.trim().is_empty() {
            anyhow::bail!("Missing CHANNEL_ID environment variable (or nickname.channel_id)");
        }
        if nick.max_length == 0 || nick.max_length > DISCORD_NICKNAME_MAX_CHARS {
            anyhow::bail!(
                "nickname.max_length must be between 1 and {DISCORD_NICKNAME_MAX_CHARS}"
            );
        }
        if nick.max_attempts == 0 {
            anyhow::bail!("nickname.max_attempts must be greater than 0");
        }
        if let Some(i) = nick.names.iter().position(|n| n.trim().is_empty()) {
            anyhow::bail!("nickname.names[{i}] is empty");
        }
        if nick.audit_reason.trim().is_empty() {
            anyhow::bail!("nickname.audit_reason must not be empty");
        }

        let activation = &nick.activation;
        if activation.required {
            let enable = activation.enable_command.trim();
            let disable = activation.disable_command.trim();
            if enable.is_empty() || disable.is_empty() {
                anyhow::bail!("nickname.activation commands must not be empty");
            }
            if enable == disable {
                anyhow::bail!(
                    "nickname.activation.enable_command and disable_command must differ"
                );
            }
        }
        Ok(())
    }

    fn validate_keys(&self) -> Result<()> {
        let keys = &self.keys;
        if keys.channel_id.trim().is_empty() {
            anyhow::bail!("Missing CHANNEL_ID environment variable (or keys.channel_id)");
        }
        if keys.required_role_id.trim().is_empty() {
            anyhow::bail!("Missing KEY_ROLE_ID environment variable (or keys.required_role_id)");
        }
        if keys.pool.is_empty() {
            anyhow::bail!("keys.pool must contain at least one key");
        }
        if let Some(i) = keys.pool.iter().position(|k| k.trim().is_empty()) {
            anyhow::bail!("keys.pool[{i}] is empty");
        }
        let issue = keys.issue_command.trim();
        let reset = keys.reset_command.trim();
        let grant = keys.grant_command.trim();
        if issue.is_empty() || reset.is_empty() || grant.is_empty() {
            anyhow::bail!("keys.issue_command, reset_command and grant_command must not be empty");
        }
        if issue == reset || issue == grant || reset == grant {
            anyhow::bail!("keys.issue_command, reset_command and grant_command must differ");
        }
        if !keys.reply_template.contains("{key}") {
            anyhow::bail!("keys.reply_template must contain a {{key}} placeholder");
        }
        Ok(())
    }
}

fn default_config_path() -> Option<PathBuf> {
    UserDirs::new().map(|dirs| dirs.home_dir().join(".nickshift").join("config.toml"))
}
