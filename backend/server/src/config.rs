use std::{env, fmt::Display, fs::read_to_string, str::FromStr};

use anyhow::{Context, Result, anyhow};
use tracing::{info, warn};

use crate::avatar::MAX_AVATAR_BYTES;

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub admin_token: String,
    pub cron_secret: Option<String>,
    pub avatar_base_url: String,
    pub max_upload_bytes: usize,
    pub avatar_limit: usize,
}

impl Config {
    pub fn load() -> Result<Self> {
        Ok(Self {
            port: try_load("RUST_PORT", "1111")?,
            admin_token: read_secret("ADMIN_TOKEN")?
                .ok_or_else(|| anyhow!("ADMIN_TOKEN secret is required"))?,
            cron_secret: read_secret("CRON_SECRET")?,
            avatar_base_url: try_load("AVATAR_BASE_URL", "http://localhost:1111/avatars")?,
            max_upload_bytes: try_load("MAX_UPLOAD_BYTES", "10485760")?,
            avatar_limit: try_load("AVATAR_MAX_BYTES", &MAX_AVATAR_BYTES.to_string())?,
        })
    }

    pub fn with_admin_token(admin_token: impl Into<String>) -> Self {
        Self {
            port: 1111,
            admin_token: admin_token.into(),
            cron_secret: None,
            avatar_base_url: "http://localhost:1111/avatars".to_string(),
            max_upload_bytes: 10 * 1024 * 1024,
            avatar_limit: MAX_AVATAR_BYTES,
        }
    }
}

fn var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn try_load<T: FromStr>(key: &str, default: &str) -> Result<T>
where
    T::Err: Display,
{
    var(key)
        .unwrap_or_else(|| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .parse()
        .map_err(|e| anyhow!("Invalid {key} value: {e}"))
}

/// Docker secret file first, then an environment variable of the same name.
fn read_secret(secret_name: &str) -> Result<Option<String>> {
    let path = format!("/run/secrets/{secret_name}");

    match read_to_string(&path) {
        Ok(secret) => Ok(Some(secret.trim().to_string())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            if var(secret_name).is_none() {
                warn!("Secret {secret_name} not found in {path} or environment");
            }
            Ok(var(secret_name))
        }
        Err(e) => Err(e).with_context(|| format!("Failed to read {secret_name} from {path}")),
    }
}
