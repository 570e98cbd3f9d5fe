//! Mapping from smart card ATRs to the PKCS#11 modules able to drive the card.

use std::{path::Path, sync::Arc};

use libloading::Library;
use serde::{Deserialize, Serialize};
use tokensign_logger::{debug, info};

/// An ATR pattern matching any card
pub const ANY_ATR: &str = "*";

/// A named group of cards and the modules handling them, in priority order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleEntry {
    pub label: String,
    /// Upper case hex ATRs, or `*`
    pub atr_patterns: Vec<String>,
    /// Module file names or absolute paths
    pub candidate_paths: Vec<String>,
}

impl ModuleEntry {
    pub fn new<L, A, P>(label: L, atr_patterns: A, candidate_paths: P) -> Self
    where
        L: Into<String>,
        A: IntoIterator,
        A::Item: Into<String>,
        P: IntoIterator,
        P::Item: Into<String>,
    {
        Self {
            label: label.into(),
            atr_patterns: atr_patterns.into_iter().map(Into::into).collect(),
            candidate_paths: candidate_paths.into_iter().map(Into::into).collect(),
        }
    }

    fn matches(&self, atr: &str) -> bool {
        self.atr_patterns
            .iter()
            .any(|pattern| pattern == ANY_ATR || pattern.eq_ignore_ascii_case(atr))
    }
}

/// Checks whether a candidate module path is usable
pub trait LibraryProbe: Send + Sync {
    fn exists(&self, path: &str) -> bool;

    /// Whether the library loads. The handle must not be kept.
    fn can_load(&self, path: &str) -> bool;
}

/// Probes the file system and the dynamic loader
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeProbe;

impl LibraryProbe for NativeProbe {
    fn exists(&self, path: &str) -> bool {
        Path::new(path).exists()
    }

    fn can_load(&self, path: &str) -> bool {
        match unsafe { Library::new(path) } {
            Ok(library) => {
                drop(library);
                true
            }
            Err(e) => {
                debug!("{path} did not load: {e}");
                false
            }
        }
    }
}

/// The ATR to module table.
///
/// Entries are scanned in order: user supplied entries should come first
/// and wildcard entries last.
#[derive(Clone)]
pub struct ModuleCatalog {
    entries: Vec<ModuleEntry>,
    probe: Arc<dyn LibraryProbe>,
}

impl ModuleCatalog {
    #[must_use]
    pub fn new(entries: Vec<ModuleEntry>) -> Self {
        Self::with_probe(entries, Arc::new(NativeProbe))
    }

    #[must_use]
    pub fn with_probe(mut entries: Vec<ModuleEntry>, probe: Arc<dyn LibraryProbe>) -> Self {
        for entry in &mut entries {
            for pattern in &mut entry.atr_patterns {
                pattern.make_ascii_uppercase();
            }
            info!(
                "{} is handled by {}",
                entry.label,
                entry.candidate_paths.join(" ")
            );
        }
        Self { entries, probe }
    }

    /// The built-in table, probed natively
    #[must_use]
    pub fn builtin() -> Self {
        Self::new(builtin_entries())
    }

    #[must_use]
    pub fn entries(&self) -> &[ModuleEntry] {
        &self.entries
    }

    /// Resolve the ATRs of the connected cards to the module paths to try.
    ///
    /// For each ATR, every matching entry contributes its first usable path.
    /// The result may hold duplicates when several cards share a module.
    #[must_use]
    pub fn resolve(&self, atrs: &[Vec<u8>]) -> Vec<String> {
        let mut paths = Vec::new();
        for atr in atrs {
            let key = hex::encode_upper(atr);
            debug!("Looking for {key}");
            for entry in self.entries.iter().filter(|entry| entry.matches(&key)) {
                debug!("ATR {key} matches {}", entry.label);
                if let Some(path) = entry
                    .candidate_paths
                    .iter()
                    .find(|path| self.is_usable(path))
                {
                    info!("{key} found usable as {} via {path}", entry.label);
                    paths.push(path.clone());
                }
            }
        }
        if paths.is_empty() {
            info!("no suitable module found for a total of {} cards", atrs.len());
        }
        paths
    }

    fn is_usable(&self, path: &str) -> bool {
        if path.contains(['/', '\\']) && !self.probe.exists(path) {
            debug!("ignoring missing PKCS#11 module {path}");
            return false;
        }
        if !self.probe.can_load(path) {
            debug!("ignoring PKCS#11 module that did not load: {path}");
            return false;
        }
        true
    }
}

impl Default for ModuleCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

/// The known national ID cards and tokens, followed by the OpenSC fallback
#[must_use]
pub fn builtin_entries() -> Vec<ModuleEntry> {
    vec![
        ModuleEntry::new(
            "e-token",
            ["3BD518008131FE7D8073C82110F4"],
            ["/Library/Frameworks/eToken.framework/Versions/Current/libeToken.dylib"],
        ),
        ModuleEntry::new(
            "Estonian ID-card",
            [
                "3BFE9400FF80B1FA451F034573744549442076657220312E3043",
                "3BDE18FFC080B1FE451F034573744549442076657220312E302B",
                "3B5E11FF4573744549442076657220312E30",
                "3B6E00004573744549442076657220312E30",
                "3BFE1800008031FE454573744549442076657220312E30A8",
                "3BFE1800008031FE45803180664090A4561B168301900086",
                "3BFE1800008031FE45803180664090A4162A0083019000E1",
                "3BFE1800008031FE45803180664090A4162A00830F9000EF",
                "3BF9180000C00A31FE4553462D3443432D303181",
                "3BF81300008131FE454A434F5076323431B7",
                "3BFA1800008031FE45FE654944202F20504B4903",
            ],
            [
                "/Library/EstonianIDCard/lib/esteid-pkcs11.so",
                "/Library/OpenSC/lib/opensc-pkcs11.so",
                "opensc-pkcs11.so",
            ],
        ),
        ModuleEntry::new(
            "Latvian ID-card",
            ["3BDD18008131FE45904C41545649412D65494490008C"],
            ["/Library/latvia-eid/lib/otlv-pkcs11.so", "otlv-pkcs11.so"],
        ),
        ModuleEntry::new(
            "Finnish ID-card",
            ["3B7B940000806212515646696E454944"],
            [
                "/Library/mPolluxDigiSign/libcryptoki.dylib",
                "opensc-pkcs11.so",
            ],
        ),
        ModuleEntry::new(
            "Lithuanian ID-card",
            [
                "3BF81300008131FE45536D617274417070F8",
                "3B7D94000080318065B08311C0A983009000",
            ],
            [
                "/System/Library/Security/tokend/CCSuite.tokend/Contents/Frameworks/libccpkip11.dylib",
                "/usr/lib/ccs/libccpkip11.so",
            ],
        ),
        ModuleEntry::new(
            "OpenSC fallback",
            [ANY_ATR],
            ["/Library/OpenSC/lib/opensc-pkcs11.so", "opensc-pkcs11.so"],
        ),
    ]
}
