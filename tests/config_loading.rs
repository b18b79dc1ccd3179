//! Config file loading, defaults, env-style overrides, and validation.

use nickshift::config::{schema_json, BotMode, Config, SelectionMode};
use std::collections::HashMap;
use std::fs;

fn write_config(body: &str) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, body).unwrap();
    (dir, path)
}

fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    move |key: &str| map.get(key).cloned()
}

// ─────────────────────────────────────────────────────────────────────────────
// File loading
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn full_file_round_trips_into_typed_config() {
    let (_dir, path) = write_config(
        r#"
[discord]
bot_token = "token-from-file"
guild_id = "100"

[nickname]
channel_id = "200"
names = ["Alpha", "Beta"]
mode = "sequential"
target_user_id = "300"
retry_delay_ms = 50

[nickname.activation]
required = false

[keys]
channel_id = "400"
required_role_id = "500"
pool = ["K1", "K2"]
reply_template = "Key: {key}"

[runtime]
max_in_flight_messages = 4
"#,
    );

    let config = Config::load(Some(&path)).await.unwrap();
    assert_eq!(config.config_path.as_deref(), Some(path.as_path()));
    assert_eq!(config.discord.bot_token, "token-from-file");
    assert_eq!(config.discord.guild_id.as_deref(), Some("100"));
    assert_eq!(config.nickname.names, vec!["Alpha", "Beta"]);
    assert_eq!(config.nickname.mode, SelectionMode::Sequential);
    assert_eq!(config.nickname.target_user(), Some("300"));
    assert_eq!(config.nickname.retry_delay_ms, 50);
    assert!(!config.nickname.activation.required);
    assert_eq!(config.keys.pool, vec!["K1", "K2"]);
    assert_eq!(config.keys.reply_template, "Key: {key}");
    assert_eq!(config.runtime.max_in_flight_messages, 4);

    assert!(config.validate(BotMode::Nickname).is_ok());
    assert!(config.validate(BotMode::Keys).is_ok());
}

#[tokio::test]
async fn sparse_file_falls_back_to_defaults() {
    let (_dir, path) = write_config("[nickname]\nchannel_id = \"1\"\n");

    let config = Config::load_from(&path).await.unwrap();
    assert!(config.nickname.names.is_empty());
    assert_eq!(config.nickname.mode, SelectionMode::Random);
    assert_eq!(config.nickname.max_length, 32);
    assert_eq!(config.nickname.max_attempts, 2);
    assert_eq!(config.nickname.retry_delay_ms, 200);
    assert_eq!(config.nickname.audit_reason, "Auto per-message nickname change");
    assert!(config.nickname.activation.required);
    assert_eq!(config.nickname.activation.enable_command, "!nick on");
    assert_eq!(config.keys.issue_command, "!getkey");
    assert_eq!(config.keys.reset_command, "!resetkey");
    assert_eq!(config.keys.grant_command, "!givekey");
    assert_eq!(config.keys.reply_template, "```{key}```");
}

#[tokio::test]
async fn missing_explicit_path_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.toml");
    let err = Config::load(Some(&missing)).await.unwrap_err();
    assert!(format!("{err:#}").contains("nope.toml"));
}

#[tokio::test]
async fn malformed_toml_reports_path() {
    let (_dir, path) = write_config("[nickname\nchannel_id = ");
    let err = Config::load_from(&path).await.unwrap_err();
    assert!(err.to_string().contains("config.toml"));
}

#[tokio::test]
async fn unknown_selection_mode_is_rejected() {
    let (_dir, path) = write_config("[nickname]\nmode = \"shuffle\"\n");
    assert!(Config::load_from(&path).await.is_err());
}

// ─────────────────────────────────────────────────────────────────────────────
// Overrides and validation
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn env_overrides_beat_file_values() {
    let (_dir, path) = write_config(
        "[discord]\nbot_token = \"file\"\n[nickname]\nchannel_id = \"file-chan\"\n",
    );
    let mut config = Config::load_from(&path).await.unwrap();
    config.apply_overrides_from(lookup(&[
        ("DISCORD_TOKEN", "env-token"),
        ("CHANNEL_ID", "env-chan"),
        ("KEY_ROLE_ID", "env-role"),
        ("GUILD_ID", "env-guild"),
    ]));

    assert_eq!(config.discord.bot_token, "env-token");
    assert_eq!(config.discord.guild_id.as_deref(), Some("env-guild"));
    assert_eq!(config.nickname.channel_id, "env-chan");
    assert_eq!(config.keys.channel_id, "env-chan");
    assert_eq!(config.keys.required_role_id, "env-role");
}

#[test]
fn blank_env_values_do_not_clobber() {
    let mut config = Config::default();
    config.discord.bot_token = "keep".into();
    config.apply_overrides_from(lookup(&[("DISCORD_TOKEN", "   ")]));
    assert_eq!(config.discord.bot_token, "keep");
}

#[test]
fn startup_validation_names_missing_variables() {
    let config = Config::default();
    let err = config.validate(BotMode::Nickname).unwrap_err();
    assert!(err.to_string().contains("DISCORD_TOKEN"));

    let mut config = Config::default();
    config.apply_overrides_from(lookup(&[("DISCORD_TOKEN", "t")]));
    let err = config.validate(BotMode::Nickname).unwrap_err();
    assert!(err.to_string().contains("CHANNEL_ID"));

    config.apply_overrides_from(lookup(&[("CHANNEL_ID", "c")]));
    config.keys.pool = vec!["K".into()];
    let err = config.validate(BotMode::Keys).unwrap_err();
    assert!(err.to_string().contains("KEY_ROLE_ID"));
}

#[test]
fn schema_export_describes_sections() {
    let schema = schema_json().unwrap();
    let value: serde_json::Value = serde_json::from_str(&schema).unwrap();
    let properties = value["properties"].as_object().unwrap();
    for section in ["discord", "nickname", "keys", "runtime"] {
        assert!(properties.contains_key(section), "missing {section}");
    }
}
