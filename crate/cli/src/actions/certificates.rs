use clap::{Parser, ValueEnum};
use tokensign_interfaces::Purpose;
use tokensign_logger::warn;
use tokensign_signer::SignerConfig;
use tokensign_token::{
    CertificateRegistry, LoadedModule, ModuleLoader, certificate_info, is_usable,
};

use super::console::{CertificateRow, Stdout};
use crate::error::result::{CliResult, CliResultHelper};

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurposeArg {
    Authentication,
    Signing,
}

impl From<PurposeArg> for Purpose {
    fn from(purpose: PurposeArg) -> Self {
        match purpose {
            PurposeArg::Authentication => Self::Authentication,
            PurposeArg::Signing => Self::Signing,
        }
    }
}

/// Load a PKCS#11 module and list the certificates of its tokens.
///
/// Each certificate is shown with the purposes it is usable for.
/// No PIN is asked: only the public objects are read.
#[derive(Parser, Debug)]
#[clap(verbatim_doc_comment)]
pub struct CertificatesAction {
    /// The module file name or absolute path
    #[clap(long, short = 'm', required = true)]
    module: String,

    /// Only list the certificates usable for this purpose
    #[clap(long, short = 'p', value_enum)]
    purpose: Option<PurposeArg>,
}

impl CertificatesAction {
    /// # Errors
    ///
    /// Returns an error if the module does not load or its slots cannot be listed.
    pub fn process(&self, config: &SignerConfig, loader: &dyn ModuleLoader) -> CliResult<()> {
        self.run(config, loader)?.write()
    }

    pub(crate) fn run(&self, config: &SignerConfig, loader: &dyn ModuleLoader) -> CliResult<Stdout> {
        let module = LoadedModule::load(&self.module, loader, config.max_certificates_per_slot)
            .with_context(|| format!("failed loading {}", self.module))?;
        let registry = CertificateRegistry::new();
        let tokens = module.refresh(&registry)?;

        let mut rows = Vec::new();
        for entry in registry.certificates_of(module.path())? {
            let info = match certificate_info(&entry.der) {
                Ok(info) => info,
                Err(e) => {
                    warn!("slot {}: {e}", entry.token.slot_id);
                    continue;
                }
            };
            let row = CertificateRow {
                slot: u64::from(entry.token.slot_id),
                token: entry.token.label.clone(),
                id: hex::encode(&entry.object_id),
                common_name: info.common_name,
                issuer: info.issuer_common_name,
                not_after: info.not_after,
                authentication: is_usable(&entry.der, Purpose::Authentication),
                signing: is_usable(&entry.der, Purpose::Signing),
            };
            let wanted = match self.purpose.map(Purpose::from) {
                None => true,
                Some(Purpose::Authentication) => row.authentication,
                Some(Purpose::Signing) => row.signing,
            };
            if wanted {
                rows.push(row);
            }
        }
        rows.sort_by(|a, b| (a.slot, &a.id).cmp(&(b.slot, &b.id)));

        let mut stdout = Stdout::new(&format!(
            "{} certificates on {tokens} tokens of {}:",
            rows.len(),
            self.module
        ));
        stdout.set_certificates(rows);
        Ok(stdout)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use clap::Parser;
    use pkcs11_sys::CKK_RSA;
    use tokensign_signer::SignerConfig;
    use tokensign_token::test_helpers::{
        CertificateProfile, FakeCryptoki, FakeLoader, FakeToken, test_certificate,
    };

    use super::CertificatesAction;

    const MODULE: &str = "/opt/vendor/vendor-pkcs11.so";

    fn loader() -> FakeLoader {
        let fake = Arc::new(FakeCryptoki::new());
        fake.insert_token(0, FakeToken::id_card("JOEORG,JAAK-KRISTJAN,38001085718"));
        fake.insert_token(
            3,
            FakeToken::new("CA token").with_certificate(
                vec![0x0A],
                test_certificate("Root", CertificateProfile::CertificateAuthority),
                CKK_RSA,
            ),
        );
        FakeLoader::new().with_module(MODULE, fake)
    }

    #[test]
    fn test_list_all_certificates() {
        let action = CertificatesAction::try_parse_from(["certificates", "-m", MODULE]).unwrap();
        let stdout = action.run(&SignerConfig::default(), &loader()).unwrap();
        assert_eq!(stdout.stdout, format!("3 certificates on 2 tokens of {MODULE}:"));
        let rows = stdout.certificates.unwrap();
        assert_eq!(rows.len(), 3);

        assert_eq!((rows[0].slot, rows[0].id.as_str()), (0, "01"));
        assert_eq!(rows[0].token, "PIN1");
        assert!(rows[0].authentication && !rows[0].signing);
        assert_eq!(
            rows[0].common_name.as_deref(),
            Some("JOEORG,JAAK-KRISTJAN,38001085718")
        );
        assert_eq!(rows[0].issuer.as_deref(), Some("TEST of ESTEID-SK 2015"));

        assert_eq!((rows[1].slot, rows[1].id.as_str()), (0, "02"));
        assert!(!rows[1].authentication && rows[1].signing);

        assert_eq!((rows[2].slot, rows[2].id.as_str()), (3, "0a"));
        assert!(!rows[2].authentication && !rows[2].signing);
    }

    #[test]
    fn test_filter_by_purpose() {
        let action = CertificatesAction::try_parse_from([
            "certificates",
            "--module",
            MODULE,
            "--purpose",
            "signing",
        ])
        .unwrap();
        let rows = action
            .run(&SignerConfig::default(), &loader())
            .unwrap()
            .certificates
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "02");
    }

    #[test]
    fn test_unknown_module() {
        let action =
            CertificatesAction::try_parse_from(["certificates", "-m", "/nowhere/none.so"]).unwrap();
        let err = action
            .run(&SignerConfig::default(), &loader())
            .unwrap_err()
            .to_string();
        assert!(err.starts_with("failed loading /nowhere/none.so"), "{err}");
    }
}
