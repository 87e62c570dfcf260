use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    domain::{BotToken, ChatId},
    errors::Error,
    middleware::ChainConfig,
    Result,
};

const MAX_RATE_LIMIT_MS: u64 = 60 * 60 * 1000;
const MAX_RATE_BURST: u32 = 10_000;

/// Typed configuration for the bot process.
#[derive(Clone, Debug)]
pub struct Config {
    // Credentials
    pub telegram_bot_token: BotToken,
    pub telegram_api_url: String,
    pub session_path: PathBuf,

    // Persistence
    pub sqlite_path: PathBuf,

    // Outbound pacing
    pub rate_limit: Duration,
    pub rate_burst: u32,
    pub flood_max_retries: u32,

    // Backup
    pub backup_chat: ChatId,
    pub backup_interval: Duration,
    pub backup_file_name: String,
    pub backup_mime: String,

    // Updates
    pub poll_timeout: Duration,

    // Admin
    pub admin_password: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).and_then(non_empty);

        // Required
        let telegram_bot_token = get("TELEGRAM_BOT_TOKEN").ok_or_else(|| {
            Error::Config("TELEGRAM_BOT_TOKEN environment variable is required".to_string())
        })?;
        let backup_chat = get("BACKUP_CHAT_ID").ok_or_else(|| {
            Error::Config("BACKUP_CHAT_ID environment variable is required".to_string())
        })?;
        let backup_chat = backup_chat
            .trim()
            .parse::<i64>()
            .map_err(|_| Error::Config(format!("BACKUP_CHAT_ID is not a chat id: {backup_chat}")))?;

        let telegram_api_url =
            get("TELEGRAM_API_URL").unwrap_or("https://api.telegram.org".to_string());

        let sqlite_path = PathBuf::from(get("SQLITE_PATH").unwrap_or("siahe.sqlite3".to_string()));
        let session_path = PathBuf::from(get("SESSION_PATH").unwrap_or("session.json".to_string()));

        // Pacing: one request per RATE_LIMIT_MS, RATE_BURST back-to-back.
        let rate_limit_ms = parse_or(&get, "RATE_LIMIT_MS", 100u64)?;
        if rate_limit_ms > MAX_RATE_LIMIT_MS {
            return Err(Error::Config(format!(
                "RATE_LIMIT_MS must be at most {MAX_RATE_LIMIT_MS}"
            )));
        }
        let rate_limit = Duration::from_millis(rate_limit_ms);
        let rate_burst = parse_or(&get, "RATE_BURST", 3u32)?;
        if rate_burst == 0 || rate_burst > MAX_RATE_BURST {
            return Err(Error::Config(format!(
                "RATE_BURST must be between 1 and {MAX_RATE_BURST}"
            )));
        }
        let flood_max_retries = parse_or(&get, "FLOOD_MAX_RETRIES", 5u32)?;

        let backup_interval =
            Duration::from_secs(parse_or(&get, "BACKUP_INTERVAL_SECS", 24 * 60 * 60u64)?);
        if backup_interval.is_zero() {
            return Err(Error::Config(
                "BACKUP_INTERVAL_SECS must be greater than zero".to_string(),
            ));
        }
        let backup_file_name = get("BACKUP_FILE_NAME").unwrap_or("database.sqlite3".to_string());
        let backup_mime = get("BACKUP_MIME").unwrap_or("application/x-sqlite3".to_string());

        let poll_timeout = Duration::from_secs(parse_or(&get, "POLL_TIMEOUT_SECS", 10u64)?);

        let admin_password = get("ADMIN_PASSWORD");

        Ok(Self {
            telegram_bot_token: BotToken::new(telegram_bot_token.trim()),
            telegram_api_url,
            session_path,
            sqlite_path,
            rate_limit,
            rate_burst,
            flood_max_retries,
            backup_chat: ChatId(backup_chat),
            backup_interval,
            backup_file_name,
            backup_mime,
            poll_timeout,
            admin_password,
        })
    }

    pub fn chain(&self) -> ChainConfig {
        ChainConfig {
            rate_interval: self.rate_limit,
            rate_burst: self.rate_burst,
            flood_max_retries: self.flood_max_retries,
        }
    }
}

fn parse_or<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T> {
    match get(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| Error::Config(format!("{key} has an invalid value: {raw}"))),
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
