use std::path::{Path, PathBuf};

use clap::{ArgAction, Args};
use serde::{Deserialize, Serialize};
use tokensign_logger::{debug, log_init, log_init_with_filter};
use tokensign_token::{
    DEFAULT_MAX_CERTIFICATES_PER_SLOT, ModuleCatalog, ModuleEntry, builtin_entries,
};

use crate::{SResult, SignerError};

pub const TOKENSIGN_CONF_ENV: &str = "TOKENSIGN_CONF";

const DEFAULT_LOG_FILTER: &str = "info";

const fn default_builtin_catalog() -> bool {
    true
}

const fn default_max_certificates_per_slot() -> usize {
    DEFAULT_MAX_CERTIFICATES_PER_SLOT
}

const fn default_platform_store_fallback() -> bool {
    cfg!(windows)
}

#[derive(Debug, Args, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct SignerConfig {
    /// Additional ATR to module entries, consulted before the built-in table
    #[clap(skip)]
    pub modules: Vec<ModuleEntry>,

    /// Include the built-in table of known ID cards
    #[clap(
        long,
        env = "TOKENSIGN_BUILTIN_CATALOG",
        default_value_t = default_builtin_catalog(),
        action = ArgAction::Set
    )]
    pub builtin_catalog: bool,

    /// The number of certificates read from each token
    #[clap(
        long,
        env = "TOKENSIGN_MAX_CERTIFICATES_PER_SLOT",
        default_value_t = default_max_certificates_per_slot()
    )]
    pub max_certificates_per_slot: usize,

    /// Use the operating system certificate store when no PKCS#11 module handles the cards
    #[clap(
        long,
        env = "TOKENSIGN_PLATFORM_STORE_FALLBACK",
        default_value_t = default_platform_store_fallback(),
        action = ArgAction::Set
    )]
    pub platform_store_fallback: bool,

    /// An alternative to setting the `RUST_LOG` environment variable.
    /// Setting this variable will override the `RUST_LOG` environment variable
    #[clap(long, env("TOKENSIGN_RUST_LOG"), verbatim_doc_comment)]
    pub rust_log: Option<String>,
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self {
            modules: Vec::new(),
            builtin_catalog: default_builtin_catalog(),
            max_certificates_per_slot: default_max_certificates_per_slot(),
            platform_store_fallback: default_platform_store_fallback(),
            rust_log: None,
        }
    }
}

impl SignerConfig {
    /// Load the configuration from `conf_path`, or from the file named by `TOKENSIGN_CONF`.
    /// Without either, the defaults are used.
    ///
    /// # Errors
    /// Return an error if the file cannot be read or is not a valid configuration.
    pub fn load(conf_path: Option<&Path>) -> SResult<Self> {
        let conf_path = match conf_path {
            Some(path) => Some(path.to_path_buf()),
            None => std::env::var_os(TOKENSIGN_CONF_ENV).map(PathBuf::from),
        };
        let Some(conf_path) = conf_path else {
            debug!("no configuration file, using the defaults");
            return Ok(Self::default());
        };
        debug!("Loading configuration from: {}", conf_path.display());
        let content = std::fs::read_to_string(&conf_path).map_err(|e| {
            SignerError::Configuration(format!(
                "unable to read {}: {e}",
                conf_path.display()
            ))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> SResult<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> SResult<()> {
        if self.max_certificates_per_slot == 0 {
            return Err(SignerError::Configuration(
                "max_certificates_per_slot must be at least 1".to_owned(),
            ));
        }
        for entry in &self.modules {
            if entry.atr_patterns.is_empty() || entry.candidate_paths.is_empty() {
                return Err(SignerError::Configuration(format!(
                    "module entry {} needs ATR patterns and candidate paths",
                    entry.label
                )));
            }
        }
        Ok(())
    }

    /// The configured entries first, then the built-in table
    #[must_use]
    pub fn catalog_entries(&self) -> Vec<ModuleEntry> {
        let mut entries = self.modules.clone();
        if self.builtin_catalog {
            entries.extend(builtin_entries());
        }
        entries
    }

    #[must_use]
    pub fn catalog(&self) -> ModuleCatalog {
        ModuleCatalog::new(self.catalog_entries())
    }

    /// Install the tracing subscriber
    pub fn init_logging(&self) {
        match &self.rust_log {
            Some(filter) => log_init_with_filter(filter),
            None => log_init(DEFAULT_LOG_FILTER),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::SignerConfig;

    #[test]
    fn test_defaults() {
        let config = SignerConfig::from_toml("").unwrap();
        assert_eq!(config, SignerConfig::default());
        assert!(config.builtin_catalog);
        assert_eq!(config.max_certificates_per_slot, 2);
        assert_eq!(config.platform_store_fallback, cfg!(windows));
        assert_eq!(config.catalog_entries().last().unwrap().label, "OpenSC fallback");
    }

    #[test]
    fn test_user_entries_come_first() {
        let config = SignerConfig::from_toml(
            r#"
            max_certificates_per_slot = 4

            [[modules]]
            label = "Vendor token"
            atr_patterns = ["3BDD18008131FE45"]
            candidate_paths = ["/opt/vendor/lib/vendor-pkcs11.so"]
            "#,
        )
        .unwrap();
        assert_eq!(config.max_certificates_per_slot, 4);
        let entries = config.catalog_entries();
        assert_eq!(entries[0].label, "Vendor token");
        assert!(entries.len() > 1);

        let config = SignerConfig {
            builtin_catalog: false,
            ..config
        };
        assert_eq!(config.catalog_entries().len(), 1);
    }

    #[test]
    fn test_invalid_configurations() {
        assert!(SignerConfig::from_toml("max_certificates_per_slot = 0").is_err());
        assert!(SignerConfig::from_toml("builtin_catalog = \"yes\"").is_err());
        assert!(
            SignerConfig::from_toml(
                r#"
                [[modules]]
                label = "empty"
                atr_patterns = []
                candidate_paths = ["empty.so"]
                "#
            )
            .is_err()
        );
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "platform_store_fallback = true").unwrap();
        writeln!(file, "rust_log = \"debug\"").unwrap();
        let config = SignerConfig::load(Some(file.path())).unwrap();
        assert!(config.platform_store_fallback);
        assert_eq!(config.rust_log.as_deref(), Some("debug"));

        assert!(SignerConfig::load(Some(std::path::Path::new("/nonexistent/tokensign.toml"))).is_err());
    }
}
