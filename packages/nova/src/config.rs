use anyhow::{Context, Result};
use nova_chat::ChatConfig;
use std::path::{Path, PathBuf};
use tracing::debug;

// =============================================================================
// Chat config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
// Three equivalent ways to configure:
//
//   config.toml:     company_id = "acme"
//                    [timing]
//                    reconnect_delay_ms = 1000
//
//   env var:         NOVA_TIMING__RECONNECT_DELAY_MS=1000   (double underscore = nesting)
//
//   (single underscore stays within field names: NOVA_COMPANY_ID)

/// Build a figment that layers: defaults → config.toml → NOVA_* env vars.
pub fn load_config(data_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(ChatConfig::default()))
        .merge(Toml::file(data_dir.join("config.toml")))
        .merge(Env::prefixed("NOVA_").split("__"))
}

/// Where the client keeps its files.
#[derive(Clone, Debug)]
pub struct NovaConfig {
    pub data_dir: PathBuf,
    pub sessions_dir: PathBuf,
}

impl NovaConfig {
    pub fn new(custom_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = match custom_dir {
            Some(dir) => dir,
            None => dirs::home_dir()
                .context("Could not find home directory")?
                .join(".nova"),
        };

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

        let sessions_dir = data_dir.join("sessions");
        std::fs::create_dir_all(&sessions_dir)
            .with_context(|| format!("Failed to create sessions directory: {:?}", sessions_dir))?;

        debug!("Data directory: {}", data_dir.display());

        Ok(Self {
            data_dir,
            sessions_dir,
        })
    }

    pub fn config_toml_path(&self) -> PathBuf {
        self.data_dir.join("config.toml")
    }

    /// The layered chat config. Fails on malformed files or env values; a
    /// missing company id is reported later, by the command that needs it.
    pub fn chat_config(&self) -> Result<ChatConfig> {
        load_config(&self.data_dir)
            .extract()
            .with_context(|| format!("Invalid configuration in {:?}", self.config_toml_path()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn creates_directory_layout() {
        let tmp = tempfile::tempdir().unwrap();
        let config = NovaConfig::new(Some(tmp.path().join("nova"))).unwrap();

        assert_eq!(config.data_dir, tmp.path().join("nova"));
        assert_eq!(config.sessions_dir, tmp.path().join("nova/sessions"));
        assert!(config.sessions_dir.is_dir());
        assert_eq!(config.config_toml_path(), tmp.path().join("nova/config.toml"));
    }

    #[test]
    fn defaults_without_file() {
        let tmp = tempfile::tempdir().unwrap();
        let chat: ChatConfig = load_config(tmp.path()).extract().unwrap();
        assert_eq!(chat.user_id, 1234);
        assert_eq!(chat.timing.reconnect_delay_ms, 3000);
        assert!(chat.company_id.is_empty());
    }

    #[test]
    fn toml_sets_values() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("config.toml"),
            "company_id = \"acme\"\nws_base = \"ws://localhost:9000/?userId=\"\n\n[timing]\nexpiry_poll_secs = 5\n\n[additional_info]\nplan = \"pro\"\n",
        )
        .unwrap();
        let chat: ChatConfig = load_config(tmp.path()).extract().unwrap();
        assert_eq!(chat.company_id, "acme");
        assert_eq!(chat.ws_url(), "ws://localhost:9000/?userId=1234");
        assert_eq!(chat.timing.expiry_poll_secs, 5);
        assert_eq!(chat.timing.session_ttl_secs, 82_800);
        assert_eq!(
            chat.additional_info.unwrap().get("plan").and_then(|v| v.as_str()),
            Some("pro")
        );
    }

    #[test]
    fn env_overrides_toml() {
        Jail::expect_with(|jail| {
            jail.create_file("config.toml", "company_id = \"from-file\"\nuser_id = 5\n")?;
            jail.set_env("NOVA_COMPANY_ID", "from-env");
            jail.set_env("NOVA_TIMING__RECONNECT_DELAY_MS", "250");

            let chat: ChatConfig = load_config(jail.directory()).extract()?;
            assert_eq!(chat.company_id, "from-env");
            assert_eq!(chat.user_id, 5);
            assert_eq!(chat.timing.reconnect_delay_ms, 250);
            Ok(())
        });
    }

    #[test]
    fn malformed_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let config = NovaConfig::new(Some(tmp.path().to_path_buf())).unwrap();
        std::fs::write(config.config_toml_path(), "user_id = \"not a number\"\n").unwrap();
        let err = config.chat_config().unwrap_err();
        assert!(format!("{err:#}").contains("Invalid configuration"));
    }
}
