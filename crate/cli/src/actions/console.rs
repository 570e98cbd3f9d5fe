use serde::Serialize;

use crate::error::CliError;

pub const TOKENSIGN_CLI_FORMAT: &str = "TOKENSIGN_CLI_FORMAT";
pub const CLI_DEFAULT_FORMAT: &str = "text";
pub const CLI_JSON_FORMAT: &str = "json";

/// A module path resolved for a card
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ResolvedModule {
    pub atr: String,
    pub modules: Vec<String>,
}

/// A certificate read from a token
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct CertificateRow {
    pub slot: u64,
    pub token: String,
    /// `CKA_ID`, hex encoded
    pub id: String,
    pub common_name: Option<String>,
    pub issuer: Option<String>,
    pub not_after: i64,
    pub authentication: bool,
    pub signing: bool,
}

/// The PIN state of a token
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct TokenRow {
    pub slot: u64,
    pub token: String,
    pub retries: u8,
    pub pinpad: bool,
    pub pin_min: usize,
    pub pin_max: usize,
}

#[derive(Serialize, Debug, Default)]
pub struct Stdout {
    pub(crate) stdout: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) resolved: Option<Vec<ResolvedModule>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) certificates: Option<Vec<CertificateRow>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) tokens: Option<Vec<TokenRow>>,
}

impl Stdout {
    #[must_use]
    pub fn new(stdout: &str) -> Self {
        Self {
            stdout: stdout.to_owned(),
            ..Default::default()
        }
    }

    pub fn set_resolved(&mut self, resolved: Vec<ResolvedModule>) {
        self.resolved = Some(resolved);
    }

    pub fn set_certificates(&mut self, certificates: Vec<CertificateRow>) {
        self.certificates = Some(certificates);
    }

    pub fn set_tokens(&mut self, tokens: Vec<TokenRow>) {
        self.tokens = Some(tokens);
    }

    /// Writes the output to the console.
    ///
    /// # Errors
    ///
    /// Returns an error if there is an issue with the JSON serialization.
    pub fn write(&self) -> Result<(), CliError> {
        let json_format_from_env = std::env::var(TOKENSIGN_CLI_FORMAT)
            .unwrap_or_else(|_| CLI_DEFAULT_FORMAT.to_owned())
            .to_lowercase()
            == CLI_JSON_FORMAT;

        if json_format_from_env {
            let console_stdout = serde_json::to_string_pretty(&self)?;
            println!("{console_stdout}");
            return Ok(());
        }

        if !self.stdout.is_empty() {
            println!("{}", self.stdout);
        }
        if let Some(resolved) = &self.resolved {
            for r in resolved {
                if r.modules.is_empty() {
                    println!("\t  {}: no module", r.atr);
                }
                for module in &r.modules {
                    println!("\t  {}: {module}", r.atr);
                }
            }
        }
        if let Some(certificates) = &self.certificates {
            for c in certificates {
                let mut purposes = Vec::new();
                if c.authentication {
                    purposes.push("authentication");
                }
                if c.signing {
                    purposes.push("signing");
                }
                println!(
                    "\t  slot {} ({}) id {}: {} issued by {}, expires {}, usable for: {}",
                    c.slot,
                    c.token,
                    c.id,
                    c.common_name.as_deref().unwrap_or("<no common name>"),
                    c.issuer.as_deref().unwrap_or("<unknown issuer>"),
                    c.not_after,
                    if purposes.is_empty() {
                        "nothing".to_owned()
                    } else {
                        purposes.join(", ")
                    }
                );
            }
        }
        if let Some(tokens) = &self.tokens {
            for t in tokens {
                println!(
                    "\t  slot {} ({}): {} PIN retries left, PIN length {}..{}{}",
                    t.slot,
                    t.token,
                    t.retries,
                    t.pin_min,
                    t.pin_max,
                    if t.pinpad { ", pinpad reader" } else { "" }
                );
            }
        }

        Ok(())
    }
}
