pub mod schema;

#[allow(unused_imports)]
pub use schema::{
    ActivationConfig, BotMode, Config, DiscordConfig, KeysConfig, NicknameConfig, RuntimeConfig,
    SelectionMode, DISCORD_NICKNAME_MAX_CHARS,
};

/// JSON Schema for `config.toml`, pretty-printed.
pub fn schema_json() -> anyhow::Result<String> {
    let schema = schemars::schema_for!(Config);
    Ok(serde_json::to_string_pretty(&schema)?)
}
