use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub mail: MailConfig,
    pub engine: EngineConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Clone, Debug)]
pub struct MailConfig {
    pub outbound: MailOutbound,
    pub relay_url: Option<String>,
    pub relay_token: Option<SecretString>,
    pub from_address: String,
    pub send_timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub reply_retry_backoff_ms: u64,
    pub advice_enabled: bool,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    /// Any OpenAI-compatible chat-completions endpoint (self-hosted or
    /// gateway-fronted).
    OpenAiCompatible,
    /// Deterministic canned responses; no credentials, used for dev/smoke.
    Static,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MailOutbound {
    Noop,
    HttpRelay,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub llm_api_key: Option<String>,
    pub mail_outbound: Option<MailOutbound>,
    pub mail_relay_url: Option<String>,
    pub mail_from_address: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://haggler.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            llm: LlmConfig {
                provider: LlmProvider::Static,
                api_key: None,
                base_url: None,
                model: "gpt-oss-120b".to_string(),
                max_tokens: 1024,
                temperature: 0.7,
                timeout_secs: 30,
                max_retries: 2,
            },
            mail: MailConfig {
                outbound: MailOutbound::Noop,
                relay_url: None,
                relay_token: None,
                from_address: "procurement@haggler.local".to_string(),
                send_timeout_secs: 10,
            },
            engine: EngineConfig { reply_retry_backoff_ms: 500, advice_enabled: true },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8000,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai_compatible" => Ok(Self::OpenAiCompatible),
            "static" => Ok(Self::Static),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai_compatible|static)"
            ))),
        }
    }
}

impl std::str::FromStr for MailOutbound {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "noop" => Ok(Self::Noop),
            "http_relay" => Ok(Self::HttpRelay),
            other => Err(ConfigError::Validation(format!(
                "unsupported mail outbound mode `{other}` (expected noop|http_relay)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("haggler.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(max_tokens) = llm.max_tokens {
                self.llm.max_tokens = max_tokens;
            }
            if let Some(temperature) = llm.temperature {
                self.llm.temperature = temperature;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = llm.max_retries {
                self.llm.max_retries = max_retries;
            }
        }

        if let Some(mail) = patch.mail {
            if let Some(outbound) = mail.outbound {
                self.mail.outbound = outbound;
            }
            if let Some(relay_url) = mail.relay_url {
                self.mail.relay_url = Some(relay_url);
            }
            if let Some(relay_token_value) = mail.relay_token {
                self.mail.relay_token = Some(secret_value(relay_token_value));
            }
            if let Some(from_address) = mail.from_address {
                self.mail.from_address = from_address;
            }
            if let Some(send_timeout_secs) = mail.send_timeout_secs {
                self.mail.send_timeout_secs = send_timeout_secs;
            }
        }

        if let Some(engine) = patch.engine {
            if let Some(reply_retry_backoff_ms) = engine.reply_retry_backoff_ms {
                self.engine.reply_retry_backoff_ms = reply_retry_backoff_ms;
            }
            if let Some(advice_enabled) = engine.advice_enabled {
                self.engine.advice_enabled = advice_enabled;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("HAGGLER_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("HAGGLER_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("HAGGLER_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("HAGGLER_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("HAGGLER_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("HAGGLER_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("HAGGLER_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("HAGGLER_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("HAGGLER_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("HAGGLER_LLM_MAX_TOKENS") {
            self.llm.max_tokens = parse_u32("HAGGLER_LLM_MAX_TOKENS", &value)?;
        }
        if let Some(value) = read_env("HAGGLER_LLM_TEMPERATURE") {
            self.llm.temperature = parse_f32("HAGGLER_LLM_TEMPERATURE", &value)?;
        }
        if let Some(value) = read_env("HAGGLER_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("HAGGLER_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("HAGGLER_LLM_MAX_RETRIES") {
            self.llm.max_retries = parse_u32("HAGGLER_LLM_MAX_RETRIES", &value)?;
        }

        if let Some(value) = read_env("HAGGLER_MAIL_OUTBOUND") {
            self.mail.outbound = value.parse()?;
        }
        if let Some(value) = read_env("HAGGLER_MAIL_RELAY_URL") {
            self.mail.relay_url = Some(value);
        }
        if let Some(value) = read_env("HAGGLER_MAIL_RELAY_TOKEN") {
            self.mail.relay_token = Some(secret_value(value));
        }
        if let Some(value) = read_env("HAGGLER_MAIL_FROM_ADDRESS") {
            self.mail.from_address = value;
        }
        if let Some(value) = read_env("HAGGLER_MAIL_SEND_TIMEOUT_SECS") {
            self.mail.send_timeout_secs = parse_u64("HAGGLER_MAIL_SEND_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("HAGGLER_ENGINE_REPLY_RETRY_BACKOFF_MS") {
            self.engine.reply_retry_backoff_ms =
                parse_u64("HAGGLER_ENGINE_REPLY_RETRY_BACKOFF_MS", &value)?;
        }
        if let Some(value) = read_env("HAGGLER_ENGINE_ADVICE_ENABLED") {
            self.engine.advice_enabled = parse_bool("HAGGLER_ENGINE_ADVICE_ENABLED", &value)?;
        }

        if let Some(value) = read_env("HAGGLER_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("HAGGLER_SERVER_PORT") {
            self.server.port = parse_u16("HAGGLER_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("HAGGLER_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("HAGGLER_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level =
            read_env("HAGGLER_LOGGING_LEVEL").or_else(|| read_env("HAGGLER_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("HAGGLER_LOGGING_FORMAT").or_else(|| read_env("HAGGLER_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(llm_api_key) = overrides.llm_api_key {
            self.llm.api_key = Some(secret_value(llm_api_key));
        }
        if let Some(mail_outbound) = overrides.mail_outbound {
            self.mail.outbound = mail_outbound;
        }
        if let Some(mail_relay_url) = overrides.mail_relay_url {
            self.mail.relay_url = Some(mail_relay_url);
        }
        if let Some(mail_from_address) = overrides.mail_from_address {
            self.mail.from_address = mail_from_address;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_llm(&self.llm)?;
        validate_mail(&self.mail)?;
        validate_engine(&self.engine)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("haggler.toml"), PathBuf::from("config/haggler.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if llm.max_tokens == 0 {
        return Err(ConfigError::Validation(
            "llm.max_tokens must be greater than zero".to_string(),
        ));
    }

    if !(0.0..=2.0).contains(&llm.temperature) {
        return Err(ConfigError::Validation(
            "llm.temperature must be in range 0.0..=2.0".to_string(),
        ));
    }

    match llm.provider {
        LlmProvider::OpenAiCompatible => {
            let missing =
                llm.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.base_url is required for the openai_compatible provider".to_string(),
                ));
            }
        }
        LlmProvider::Static => {}
    }

    Ok(())
}

fn validate_mail(mail: &MailConfig) -> Result<(), ConfigError> {
    if !mail.from_address.contains('@') {
        return Err(ConfigError::Validation(
            "mail.from_address must be an email address".to_string(),
        ));
    }

    if mail.send_timeout_secs == 0 || mail.send_timeout_secs > 120 {
        return Err(ConfigError::Validation(
            "mail.send_timeout_secs must be in range 1..=120".to_string(),
        ));
    }

    if mail.outbound == MailOutbound::HttpRelay {
        let relay_url = mail.relay_url.as_deref().unwrap_or("").trim().to_string();
        if relay_url.is_empty() {
            return Err(ConfigError::Validation(
                "mail.relay_url is required when mail.outbound is http_relay".to_string(),
            ));
        }
        if !relay_url.starts_with("http://") && !relay_url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "mail.relay_url must start with http:// or https://".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_engine(engine: &EngineConfig) -> Result<(), ConfigError> {
    if engine.reply_retry_backoff_ms == 0 || engine.reply_retry_backoff_ms > 60_000 {
        return Err(ConfigError::Validation(
            "engine.reply_retry_backoff_ms must be in range 1..=60000".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_f32(key: &str, value: &str) -> Result<f32, ConfigError> {
    value.parse::<f32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    llm: Option<LlmPatch>,
    mail: Option<MailPatch>,
    engine: Option<EnginePatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct MailPatch {
    outbound: Option<MailOutbound>,
    relay_url: Option<String>,
    relay_token: Option<String>,
    from_address: Option<String>,
    send_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct EnginePatch {
    reply_retry_backoff_ms: Option<u64>,
    advice_enabled: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat, MailOutbound};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_pass_validation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;

        ensure(config.llm.max_tokens == 1024, "default max_tokens should be 1024")?;
        ensure(
            (config.llm.temperature - 0.7).abs() < f32::EPSILON,
            "default temperature should be 0.7",
        )?;
        ensure(config.server.port == 8000, "default server port should be 8000")
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_RELAY_TOKEN", "relay-secret-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("haggler.toml");
            fs::write(
                &path,
                r#"
[mail]
outbound = "http_relay"
relay_url = "https://relay.example/send"
relay_token = "${TEST_RELAY_TOKEN}"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            let token = config
                .mail
                .relay_token
                .as_ref()
                .map(|token| token.expose_secret().to_string())
                .unwrap_or_default();
            ensure(
                token == "relay-secret-from-env",
                "relay token should be loaded from environment",
            )?;
            ensure(
                config.mail.outbound == MailOutbound::HttpRelay,
                "outbound mode should come from the file",
            )?;
            Ok(())
        })();

        clear_vars(&["TEST_RELAY_TOKEN"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("HAGGLER_LOG_LEVEL", "warn");
        env::set_var("HAGGLER_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["HAGGLER_LOG_LEVEL", "HAGGLER_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("HAGGLER_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("HAGGLER_MAIL_FROM_ADDRESS", "env@haggler.example");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("haggler.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[mail]
from_address = "file@haggler.example"

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(
                config.mail.from_address == "env@haggler.example",
                "env from_address should win over file and defaults",
            )?;
            Ok(())
        })();

        clear_vars(&["HAGGLER_DATABASE_URL", "HAGGLER_MAIL_FROM_ADDRESS"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("HAGGLER_MAIL_OUTBOUND", "http_relay");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("mail.relay_url")
            );
            ensure(has_message, "validation failure should mention mail.relay_url")
        })();

        clear_vars(&["HAGGLER_MAIL_OUTBOUND"]);
        result
    }

    #[test]
    fn openai_compatible_provider_requires_base_url() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("HAGGLER_LLM_PROVIDER", "openai_compatible");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("llm.base_url")
            );
            ensure(has_message, "validation failure should mention llm.base_url")
        })();

        clear_vars(&["HAGGLER_LLM_PROVIDER"]);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("HAGGLER_LLM_API_KEY", "sk-secret-value");
        env::set_var("HAGGLER_MAIL_RELAY_TOKEN", "relay-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(!debug.contains("sk-secret-value"), "debug output should not contain api key")?;
            ensure(
                !debug.contains("relay-secret-value"),
                "debug output should not contain relay token",
            )?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )?;
            Ok(())
        })();

        clear_vars(&["HAGGLER_LLM_API_KEY", "HAGGLER_MAIL_RELAY_TOKEN"]);
        result
    }
}
