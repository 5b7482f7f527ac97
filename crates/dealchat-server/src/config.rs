use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, bail};

use dealchat_backbone::BackboneConfig;

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
    "changeme",
    "secret",
];

const DEFAULT_DB_PATH: &str = "dealchat.db";
const DEFAULT_BRIDGE_ADDR: &str = "127.0.0.1:3100";

/// Settings of the primary app (`dealchat`).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub jwt_secret: String,
    pub token_ttl: chrono::Duration,
    pub db_path: PathBuf,
    pub listen_addr: SocketAddr,
    pub bridge_addr: String,
}

/// Settings of the backbone-side process (`dealchat-bridge`).
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub db_path: PathBuf,
    pub listen_addr: String,
    pub backbone: Option<BackboneConfig>,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let jwt_secret = get("DEALCHAT_JWT_SECRET").unwrap_or_default();
        if jwt_secret.trim().is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("DEALCHAT_JWT_SECRET is unset or still a placeholder; set it in your .env file");
        }

        let ttl_hours: i64 = get("DEALCHAT_TOKEN_TTL_HOURS")
            .map(|v| v.parse::<i64>())
            .transpose()
            .context("DEALCHAT_TOKEN_TTL_HOURS must be a whole number of hours")?
            .unwrap_or(720);
        if ttl_hours <= 0 {
            bail!("DEALCHAT_TOKEN_TTL_HOURS must be positive");
        }

        let host = get("DEALCHAT_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = get("DEALCHAT_PORT")
            .unwrap_or_else(|| "3000".into())
            .parse()
            .context("DEALCHAT_PORT must be a port number")?;
        let listen_addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", host, port))?;

        Ok(Self {
            jwt_secret,
            token_ttl: chrono::Duration::hours(ttl_hours),
            db_path: get("DEALCHAT_DB_PATH").unwrap_or_else(|| DEFAULT_DB_PATH.into()).into(),
            listen_addr,
            bridge_addr: get("DEALCHAT_BRIDGE_ADDR").unwrap_or_else(|| DEFAULT_BRIDGE_ADDR.into()),
        })
    }
}

impl BridgeConfig {
    pub fn from_env() -> Self {
        Self {
            db_path: std::env::var("DEALCHAT_DB_PATH")
                .unwrap_or_else(|_| DEFAULT_DB_PATH.into())
                .into(),
            listen_addr: std::env::var("DEALCHAT_BRIDGE_ADDR").unwrap_or_else(|_| DEFAULT_BRIDGE_ADDR.into()),
            backbone: BackboneConfig::from_env(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn placeholder_secret_is_rejected() {
        assert!(ServerConfig::from_lookup(lookup(&[])).is_err());
        assert!(ServerConfig::from_lookup(lookup(&[("DEALCHAT_JWT_SECRET", "dev-secret-change-me")])).is_err());
    }

    #[test]
    fn defaults_apply() {
        let cfg = ServerConfig::from_lookup(lookup(&[("DEALCHAT_JWT_SECRET", "a-real-secret-of-some-length")])).unwrap();
        assert_eq!(cfg.listen_addr, "0.0.0.0:3000".parse::<SocketAddr>().unwrap());
        assert_eq!(cfg.token_ttl, chrono::Duration::hours(720));
        assert_eq!(cfg.db_path, PathBuf::from("dealchat.db"));
        assert_eq!(cfg.bridge_addr, "127.0.0.1:3100");
    }

    #[test]
    fn bad_numbers_are_errors() {
        let secret = ("DEALCHAT_JWT_SECRET", "a-real-secret-of-some-length");
        assert!(ServerConfig::from_lookup(lookup(&[secret, ("DEALCHAT_PORT", "http")])).is_err());
        assert!(ServerConfig::from_lookup(lookup(&[secret, ("DEALCHAT_TOKEN_TTL_HOURS", "0")])).is_err());
    }
}
