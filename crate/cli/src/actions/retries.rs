use clap::Parser;
use tokensign_signer::SignerConfig;
use tokensign_token::{LoadedModule, ModuleLoader, retry_count};

use super::console::{Stdout, TokenRow};
use crate::{
    cli_bail,
    error::result::{CliResult, CliResultHelper},
};

/// Show the PIN retry counters of the tokens of a PKCS#11 module.
///
/// The counter is derived from the token flags: 3 when no
/// failure is reported, 2 when the count is low, 1 before the final try
/// and 0 when the PIN is locked.
#[derive(Parser, Debug)]
#[clap(verbatim_doc_comment)]
pub struct RetriesAction {
    /// The module file name or absolute path
    #[clap(long, short = 'm', required = true)]
    module: String,
}

impl RetriesAction {
    /// # Errors
    ///
    /// Returns an error if the module does not load or holds no token.
    pub fn process(&self, config: &SignerConfig, loader: &dyn ModuleLoader) -> CliResult<()> {
        self.run(config, loader)?.write()
    }

    pub(crate) fn run(&self, config: &SignerConfig, loader: &dyn ModuleLoader) -> CliResult<Stdout> {
        let module = LoadedModule::load(&self.module, loader, config.max_certificates_per_slot)
            .with_context(|| format!("failed loading {}", self.module))?;
        let slots = module.slots()?;
        if slots.is_empty() {
            cli_bail!("no token found through {}", self.module);
        }
        let tokens = slots
            .into_iter()
            .map(|slot| -> CliResult<TokenRow> {
                let token = module.token(slot)?;
                Ok(TokenRow {
                    slot: u64::from(slot),
                    retries: retry_count(token.flags),
                    pinpad: token.has_pinpad(),
                    pin_min: token.pin_min,
                    pin_max: token.pin_max,
                    token: token.label,
                })
            })
            .collect::<CliResult<Vec<_>>>()?;

        let mut stdout = Stdout::new(&format!("{} tokens:", tokens.len()));
        stdout.set_tokens(tokens);
        Ok(stdout)
    }
}
