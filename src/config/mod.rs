pub mod schema;

pub use schema::{
    builtin_collections, AuthConfig, ChatConfig, Config, CredentialSource, GatewayConfig,
    StorageConfig,
};

use anyhow::{Context, Result};
use std::path::PathBuf;

/// Default config location: `<config dir>/formdesk/config.toml`.
pub fn default_config_path() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("", "", "formdesk")
        .context("Could not determine a config directory for this platform")?;
    Ok(dirs.config_dir().join("config.toml"))
}

/// Load, override from the environment, and validate.
pub fn load(path: Option<PathBuf>) -> Result<Config> {
    let path = match path {
        Some(p) => p,
        None => default_config_path()?,
    };
    let mut config = Config::load_from(&path)?;
    config.apply_env_overrides();
    config.validate()?;
    tracing::info!(path = %path.display(), "Configuration loaded");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::FieldKind;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.auth.jwt_secret = Some("0123456789abcdef0123456789abcdef".into());
        config.auth.admin_username = Some("admin".into());
        config.auth.admin_password_hash = Some("$argon2id$v=19$m=19456,t=2,p=1$c2FsdA$aGFzaA".into());
        config
    }

    #[test]
    fn missing_secret_fails_validation() {
        let mut config = valid_config();
        config.auth.jwt_secret = None;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("signing secret"));

        config.auth.jwt_secret = Some("   ".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn valid_config_passes() {
        valid_config().validate().unwrap();
    }

    #[test]
    fn config_source_requires_admin_pair() {
        let mut config = valid_config();
        config.auth.admin_password_hash = None;
        assert!(config.validate().is_err());

        config.auth.credential_source = CredentialSource::Database;
        config.validate().unwrap();
    }

    #[test]
    fn zero_ttl_is_rejected() {
        let mut config = valid_config();
        config.auth.token_ttl_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_overrides_replace_file_values() {
        let mut config = Config::default();
        let env: HashMap<&str, &str> = [
            ("FORMDESK_JWT_SECRET", "from-env"),
            ("FORMDESK_PORT", "8088"),
            ("FORMDESK_HOST", "0.0.0.0"),
            ("FORMDESK_ADMIN_USERNAME", " root "),
        ]
        .into_iter()
        .collect();

        config.apply_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.auth.jwt_secret.as_deref(), Some("from-env"));
        assert_eq!(config.gateway.port, 8088);
        assert_eq!(config.gateway.host, "0.0.0.0");
        assert_eq!(config.auth.admin_username.as_deref(), Some("root"));
    }

    #[test]
    fn invalid_port_override_is_ignored() {
        let mut config = Config::default();
        config.apply_overrides(|k| (k == "FORMDESK_PORT").then(|| "not-a-port".to_string()));
        assert_eq!(config.gateway.port, 5000);
    }

    #[test]
    fn toml_file_is_parsed_and_db_path_resolved() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[gateway]
port = 7000
trust_forwarded_headers = true

[auth]
credential_source = "database"
jwt_secret = "file-secret"
token_ttl_secs = 28800

[storage]
db_path = "data/records.db"

[[collections]]
name = "messages"
path = "/messages"
list_requires_auth = false
max_records = 2

[[collections.fields]]
name = "body"
max_len = 500

[[collections.fields]]
name = "reply_to"
required = false
max_len = 254
kind = "email"
"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.gateway.port, 7000);
        assert!(config.gateway.trust_forwarded_headers);
        assert_eq!(config.auth.credential_source, CredentialSource::Database);
        assert_eq!(config.auth.token_ttl_secs, 28_800);
        assert_eq!(config.storage.db_path, tmp.path().join("data/records.db"));

        let collections = config.effective_collections();
        assert_eq!(collections.len(), 1);
        assert_eq!(collections[0].max_records, Some(2));
        assert!(collections[0].fields[0].required);
        assert_eq!(collections[0].fields[1].kind, FieldKind::Email);
        config.validate().unwrap();
    }

    #[test]
    fn missing_file_yields_defaults() {
        let tmp = TempDir::new().unwrap();
        let config = Config::load_from(&tmp.path().join("absent.toml")).unwrap();
        assert_eq!(config.effective_collections().len(), 3);
        assert_eq!(config.auth.cookie_name, "adminToken");
        assert!(!config.gateway.trust_forwarded_headers);
    }

    #[test]
    fn reserved_and_duplicate_paths_are_rejected() {
        let mut config = valid_config();
        let mut clash = builtin_collections().remove(0);
        clash.path = "/admin/contacts".into();
        config.collections = vec![clash];
        assert!(config.validate().is_err());

        let mut config = valid_config();
        let first = builtin_collections().remove(0);
        let mut second = first.clone();
        second.name = "other".into();
        config.collections = vec![first, second];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Duplicate collection path"));
    }
}
