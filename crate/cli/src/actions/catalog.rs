use clap::Parser;
use tokensign_token::ModuleCatalog;

use super::console::{ResolvedModule, Stdout};
use crate::error::result::{CliResult, CliResultHelper};

/// The answer to reset of a card
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Atr(pub Vec<u8>);

/// Parse an ATR given as hex, with optional spaces or colons between the bytes
pub(crate) fn parse_atr(s: &str) -> CliResult<Atr> {
    let compact: String = s
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect();
    hex::decode(&compact)
        .map(Atr)
        .with_context(|| format!("invalid ATR {s}"))
}

/// Resolve the PKCS#11 modules able to drive cards with the given ATRs.
///
/// The configured entries are consulted before the built-in table.
/// Only the modules found on this machine are listed.
#[derive(Parser, Debug)]
#[clap(verbatim_doc_comment)]
pub struct CatalogAction {
    /// The ATR of a card, in hex. Repeat for several cards.
    #[clap(long = "atr", short = 'a', required = true, value_parser = parse_atr)]
    atrs: Vec<Atr>,
}

impl CatalogAction {
    /// Resolve every ATR on its own, so that the output tells which card needs which module.
    ///
    /// # Errors
    ///
    /// Returns an error if there is an issue writing to the console.
    pub fn process(&self, catalog: &ModuleCatalog) -> CliResult<()> {
        self.run(catalog).write()
    }

    pub(crate) fn run(&self, catalog: &ModuleCatalog) -> Stdout {
        let resolved: Vec<ResolvedModule> = self
            .atrs
            .iter()
            .map(|atr| ResolvedModule {
                atr: hex::encode_upper(&atr.0),
                modules: catalog.resolve(std::slice::from_ref(&atr.0)),
            })
            .collect();
        let found = resolved.iter().filter(|r| !r.modules.is_empty()).count();
        let mut stdout = Stdout::new(&format!(
            "{found} of {} cards have a PKCS#11 module:",
            resolved.len()
        ));
        stdout.set_resolved(resolved);
        stdout
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use clap::Parser;
    use tokensign_token::{LibraryProbe, ModuleCatalog, ModuleEntry};

    use super::{Atr, CatalogAction, parse_atr};

    struct Installed(&'static [&'static str]);

    impl LibraryProbe for Installed {
        fn exists(&self, path: &str) -> bool {
            self.0.contains(&path)
        }

        fn can_load(&self, path: &str) -> bool {
            self.0.contains(&path)
        }
    }

    #[test]
    fn test_parse_atr() {
        let atr = Atr(vec![0x3B, 0xFE, 0x18, 0x00]);
        assert_eq!(parse_atr("3BFE1800").unwrap(), atr);
        assert_eq!(parse_atr("3b:fe 18:00").unwrap(), atr);
        assert!(parse_atr("3BF").is_err());
        assert!(parse_atr("XY").is_err());
    }

    #[test]
    fn test_resolve_each_card() {
        let catalog = ModuleCatalog::with_probe(
            vec![
                ModuleEntry::new(
                    "Vendor token",
                    ["3BDD18008131FE45"],
                    ["/opt/missing/vendor.so", "/opt/vendor/vendor-pkcs11.so"],
                ),
                ModuleEntry::new("Other", ["3B8F8001"], ["/opt/other/other.so"]),
            ],
            Arc::new(Installed(&["/opt/vendor/vendor-pkcs11.so"])),
        );
        let action =
            CatalogAction::try_parse_from(["catalog", "--atr", "3bdd18008131fe45", "-a", "3B8F8001"])
                .unwrap();
        let stdout = action.run(&catalog);
        assert_eq!(stdout.stdout, "1 of 2 cards have a PKCS#11 module:");
        let resolved = stdout.resolved.unwrap();
        assert_eq!(resolved[0].atr, "3BDD18008131FE45");
        assert_eq!(resolved[0].modules, vec!["/opt/vendor/vendor-pkcs11.so"]);
        assert_eq!(resolved[1].atr, "3B8F8001");
        assert!(resolved[1].modules.is_empty());
    }

    #[test]
    fn test_atr_is_required() {
        assert!(CatalogAction::try_parse_from(["catalog"]).is_err());
        assert!(CatalogAction::try_parse_from(["catalog", "--atr", "zz"]).is_err());
    }
}
