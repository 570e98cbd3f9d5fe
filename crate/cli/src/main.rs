use std::{path::PathBuf, process};

use clap::{Parser, Subcommand};
use tokensign_cli::{
    actions::{catalog::CatalogAction, certificates::CertificatesAction, retries::RetriesAction},
    error::CliError,
};
use tokensign_signer::{SignerConfig, TOKENSIGN_CONF_ENV};
use tokensign_token::NativeLoader;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// The signer configuration file
    #[arg(short, long, env = TOKENSIGN_CONF_ENV)]
    conf: Option<PathBuf>,

    #[command(subcommand)]
    command: CliCommands,
}

#[derive(Subcommand)]
enum CliCommands {
    Catalog(CatalogAction),
    Certificates(CertificatesAction),
    Retries(RetriesAction),
}

fn main() {
    if let Some(err) = main_().err() {
        eprintln!("ERROR: {err}");
        process::exit(1);
    }
}

fn main_() -> Result<(), CliError> {
    let opts = Cli::parse();
    let conf = SignerConfig::load(opts.conf.as_deref())?;
    conf.init_logging();

    match opts.command {
        CliCommands::Catalog(action) => action.process(&conf.catalog())?,
        CliCommands::Certificates(action) => action.process(&conf, &NativeLoader)?,
        CliCommands::Retries(action) => action.process(&conf, &NativeLoader)?,
    };

    Ok(())
}
