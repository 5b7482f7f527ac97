use tracing::warn;

/// Connection settings for the backbone service account.
#[derive(Debug, Clone)]
pub struct BackboneConfig {
    pub base_url: String,
    pub server_name: String,
    pub service_user: String,
    pub service_password: String,
}

impl BackboneConfig {
    /// Reads `DEALCHAT_BACKBONE_*`. Returns `None` (backbone disabled) when any
    /// setting is missing; this is never a startup error.
    pub fn from_env() -> Option<Self> {
        let get = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());

        match (
            get("DEALCHAT_BACKBONE_URL"),
            get("DEALCHAT_BACKBONE_SERVER_NAME"),
            get("DEALCHAT_BACKBONE_USER"),
            get("DEALCHAT_BACKBONE_PASSWORD"),
        ) {
            (Some(base_url), Some(server_name), Some(service_user), Some(service_password)) => Some(Self {
                base_url: base_url.trim_end_matches('/').to_string(),
                server_name,
                service_user,
                service_password,
            }),
            (None, None, None, None) => None,
            _ => {
                warn!("Backbone settings are incomplete; chat bridge disabled");
                None
            }
        }
    }

    /// Fully qualified backbone user id for a login handle.
    pub fn user_id_for(&self, login: &str) -> String {
        if login.starts_with('@') {
            login.to_string()
        } else {
            format!("@{}:{}", login, self.server_name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualifies_bare_logins_only() {
        let cfg = BackboneConfig {
            base_url: "http://hs".into(),
            server_name: "chat.example.com".into(),
            service_user: "svc".into(),
            service_password: "pw".into(),
        };
        assert_eq!(cfg.user_id_for("abc123"), "@abc123:chat.example.com");
        assert_eq!(cfg.user_id_for("@x:elsewhere"), "@x:elsewhere");
    }
}
