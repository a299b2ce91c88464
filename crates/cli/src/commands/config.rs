use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use haggler_core::config::{AppConfig, LoadOptions};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let source = |key_path: &str, env_key: &str| {
        field_source(key_path, env_key, config_file_doc.as_ref(), config_file_path.as_deref())
    };

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];

    lines.push(render_line(
        "database.url",
        &config.database.url,
        source("database.url", "HAGGLER_DATABASE_URL"),
    ));
    lines.push(render_line(
        "database.max_connections",
        &config.database.max_connections.to_string(),
        source("database.max_connections", "HAGGLER_DATABASE_MAX_CONNECTIONS"),
    ));
    lines.push(render_line(
        "database.timeout_secs",
        &config.database.timeout_secs.to_string(),
        source("database.timeout_secs", "HAGGLER_DATABASE_TIMEOUT_SECS"),
    ));

    lines.push(render_line(
        "llm.provider",
        &format!("{:?}", config.llm.provider),
        source("llm.provider", "HAGGLER_LLM_PROVIDER"),
    ));
    lines.push(render_line(
        "llm.model",
        &config.llm.model,
        source("llm.model", "HAGGLER_LLM_MODEL"),
    ));
    lines.push(render_line(
        "llm.base_url",
        config.llm.base_url.as_deref().unwrap_or("<unset>"),
        source("llm.base_url", "HAGGLER_LLM_BASE_URL"),
    ));
    let llm_api_key = if config.llm.api_key.is_some() { "<redacted>" } else { "<unset>" };
    lines.push(render_line(
        "llm.api_key",
        llm_api_key,
        source("llm.api_key", "HAGGLER_LLM_API_KEY"),
    ));

    lines.push(render_line(
        "mail.outbound",
        &format!("{:?}", config.mail.outbound),
        source("mail.outbound", "HAGGLER_MAIL_OUTBOUND"),
    ));
    lines.push(render_line(
        "mail.relay_url",
        config.mail.relay_url.as_deref().unwrap_or("<unset>"),
        source("mail.relay_url", "HAGGLER_MAIL_RELAY_URL"),
    ));
    let relay_token = if config.mail.relay_token.is_some() { "<redacted>" } else { "<unset>" };
    lines.push(render_line(
        "mail.relay_token",
        relay_token,
        source("mail.relay_token", "HAGGLER_MAIL_RELAY_TOKEN"),
    ));
    lines.push(render_line(
        "mail.from_address",
        &config.mail.from_address,
        source("mail.from_address", "HAGGLER_MAIL_FROM_ADDRESS"),
    ));

    lines.push(render_line(
        "engine.reply_retry_backoff_ms",
        &config.engine.reply_retry_backoff_ms.to_string(),
        source("engine.reply_retry_backoff_ms", "HAGGLER_ENGINE_REPLY_RETRY_BACKOFF_MS"),
    ));
    lines.push(render_line(
        "engine.advice_enabled",
        &config.engine.advice_enabled.to_string(),
        source("engine.advice_enabled", "HAGGLER_ENGINE_ADVICE_ENABLED"),
    ));

    lines.push(render_line(
        "server.bind_address",
        &config.server.bind_address,
        source("server.bind_address", "HAGGLER_SERVER_BIND_ADDRESS"),
    ));
    lines.push(render_line(
        "server.port",
        &config.server.port.to_string(),
        source("server.port", "HAGGLER_SERVER_PORT"),
    ));

    lines.push(render_line(
        "logging.level",
        &config.logging.level,
        source("logging.level", "HAGGLER_LOGGING_LEVEL"),
    ));
    lines.push(render_line(
        "logging.format",
        &format!("{:?}", config.logging.format),
        source("logging.format", "HAGGLER_LOGGING_FORMAT"),
    ));

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("haggler.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/haggler.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if env::var_os(env_key).is_some() {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}
