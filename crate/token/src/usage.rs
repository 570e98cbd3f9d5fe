//! Certificate purpose checks and summaries

use tokensign_interfaces::{CertificateInfo, Purpose};
use tokensign_logger::{debug, trace};
use x509_parser::{
    certificate::X509Certificate, prelude::FromDer, x509::X509Name,
};

use crate::{PResult, Pkcs11Error};

/// Organizational unit of the signing certificates of some ID cards whose key usage extension
/// is not read reliably. Matching it is a heuristic and may misclassify a certificate.
const DIGITAL_SIGNATURE_OU: &str = "digital signature";

fn parse(der: &[u8]) -> PResult<X509Certificate<'_>> {
    let (_, certificate) = X509Certificate::from_der(der)
        .map_err(|e| Pkcs11Error::Certificate(format!("failed to parse certificate: {e}")))?;
    Ok(certificate)
}

fn first_common_name(name: &X509Name<'_>) -> Option<String> {
    name.iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(ToOwned::to_owned)
}

/// Whether the certificate may be used for `purpose`.
///
/// CA certificates are never usable, nor are certificates without basic constraints.
/// Authentication requires the TLS client authentication extended key usage; signing requires
/// the non repudiation key usage. Certificates that do not parse are not usable.
#[must_use]
pub fn is_usable(der: &[u8], purpose: Purpose) -> bool {
    let certificate = match parse(der) {
        Ok(certificate) => certificate,
        Err(e) => {
            debug!("{e}");
            return false;
        }
    };
    // only an explicit `ca=false` basic constraints extension makes an end entity certificate
    let is_ca = !matches!(certificate.basic_constraints(), Ok(Some(bc)) if !bc.value.ca);
    let is_tls_client = matches!(
        certificate.extended_key_usage(),
        Ok(Some(eku)) if eku.value.client_auth
    );
    let is_non_repudiation = match certificate.key_usage() {
        Ok(Some(ku)) => {
            ku.value.non_repudiation()
                || certificate
                    .subject()
                    .iter_organizational_unit()
                    .next()
                    .and_then(|ou| ou.as_str().ok())
                    == Some(DIGITAL_SIGNATURE_OU)
        }
        _ => false,
    };
    trace!(
        "certificate flags: ca={is_ca} auth={is_tls_client} non_repudiation={is_non_repudiation}"
    );
    !is_ca
        && match purpose {
            Purpose::Authentication => is_tls_client,
            Purpose::Signing => is_non_repudiation,
        }
}

/// What the certificate selection dialog shows
pub fn certificate_info(der: &[u8]) -> PResult<CertificateInfo> {
    let certificate = parse(der)?;
    let subject = certificate.subject();
    Ok(CertificateInfo {
        common_name: first_common_name(subject),
        organization: subject
            .iter_organization()
            .next()
            .and_then(|o| o.as_str().ok())
            .map(ToOwned::to_owned),
        organizational_unit: subject
            .iter_organizational_unit()
            .next()
            .and_then(|ou| ou.as_str().ok())
            .map(ToOwned::to_owned),
        issuer_common_name: first_common_name(certificate.issuer()),
        not_after: certificate.validity().not_after.timestamp(),
        der: der.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use tokensign_interfaces::Purpose;

    use super::{certificate_info, is_usable};
    use crate::test_helpers::{CertificateProfile, test_certificate};

    #[test]
    fn test_authentication_certificate() {
        let der = test_certificate("MÄNNIK,MARI-LIIS,47101010033", CertificateProfile::Authentication);
        assert!(is_usable(&der, Purpose::Authentication));
        assert!(!is_usable(&der, Purpose::Signing));
    }

    #[test]
    fn test_signing_certificate() {
        let der = test_certificate("MÄNNIK,MARI-LIIS,47101010033", CertificateProfile::Signing);
        assert!(is_usable(&der, Purpose::Signing));
        assert!(!is_usable(&der, Purpose::Authentication));
    }

    #[test]
    fn test_ca_is_never_usable() {
        let der = test_certificate("Test CA", CertificateProfile::CertificateAuthority);
        assert!(!is_usable(&der, Purpose::Authentication));
        assert!(!is_usable(&der, Purpose::Signing));
    }

    #[test]
    fn test_missing_basic_constraints_is_not_usable() {
        let der = test_certificate("MÄNNIK,MARI-LIIS,47101010033", CertificateProfile::NoBasicConstraints);
        assert!(!is_usable(&der, Purpose::Authentication));
        assert!(!is_usable(&der, Purpose::Signing));
    }

    /// Heuristic: a digital signature key usage and the `digital signature` organizational unit
    /// are taken for non repudiation. This may misclassify certificates.
    #[test]
    fn test_organizational_unit_heuristic() {
        let der = test_certificate("JÕEORG,JAAK-KRISTJAN", CertificateProfile::DigitalSignatureOu);
        assert!(is_usable(&der, Purpose::Signing));
        assert!(!is_usable(&der, Purpose::Authentication));
    }

    #[test]
    fn test_garbage_is_not_usable() {
        assert!(!is_usable(b"not a certificate", Purpose::Authentication));
        assert!(certificate_info(b"not a certificate").is_err());
    }

    #[test]
    fn test_certificate_info() {
        let der = test_certificate("MÄNNIK,MARI-LIIS,47101010033", CertificateProfile::Authentication);
        let info = certificate_info(&der).unwrap();
        assert_eq!(
            info.common_name.as_deref(),
            Some("MÄNNIK,MARI-LIIS,47101010033")
        );
        assert_eq!(info.organization.as_deref(), Some("ESTEID"));
        assert_eq!(info.organizational_unit.as_deref(), Some("authentication"));
        assert_eq!(info.issuer_common_name.as_deref(), Some("TEST of ESTEID-SK 2015"));
        assert!(info.not_after > 0);
        assert_eq!(info.der, der);
    }
}
