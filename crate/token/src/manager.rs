use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard},
};

use tokensign_logger::{info, warn};

use crate::{
    PResult, Pkcs11Error,
    catalog::ModuleCatalog,
    cryptoki::ModuleLoader,
    crypto_module::Pkcs11Module,
    module::LoadedModule,
    native::NativeLoader,
    registry::CertificateRegistry,
};

/// Loads the modules handling the connected cards and keeps the certificate registry in sync
/// with card insertions and removals.
///
/// A module path is loaded at most once.
pub struct ModuleManager {
    catalog: ModuleCatalog,
    loader: Arc<dyn ModuleLoader>,
    registry: Arc<CertificateRegistry>,
    modules: Mutex<BTreeMap<String, Arc<LoadedModule>>>,
    max_certificates_per_slot: usize,
}

impl ModuleManager {
    #[must_use]
    pub fn new(
        catalog: ModuleCatalog,
        loader: Arc<dyn ModuleLoader>,
        max_certificates_per_slot: usize,
    ) -> Self {
        Self {
            catalog,
            loader,
            registry: Arc::new(CertificateRegistry::new()),
            modules: Mutex::default(),
            max_certificates_per_slot,
        }
    }

    /// A manager loading real modules
    #[must_use]
    pub fn native(catalog: ModuleCatalog, max_certificates_per_slot: usize) -> Self {
        Self::new(catalog, Arc::new(NativeLoader), max_certificates_per_slot)
    }

    #[must_use]
    pub const fn catalog(&self) -> &ModuleCatalog {
        &self.catalog
    }

    #[must_use]
    pub fn registry(&self) -> Arc<CertificateRegistry> {
        self.registry.clone()
    }

    fn modules(&self) -> PResult<MutexGuard<'_, BTreeMap<String, Arc<LoadedModule>>>> {
        self.modules
            .lock()
            .map_err(|_| Pkcs11Error::Default("module table lock poisoned".to_owned()))
    }

    /// The module paths to try for the given ATRs
    #[must_use]
    pub fn resolve(&self, atrs: &[Vec<u8>]) -> Vec<String> {
        self.catalog.resolve(atrs)
    }

    /// Load `path`, or reuse the already loaded module, and enumerate its tokens.
    ///
    /// A loaded module is refreshed on every call: cards may have been swapped since the last one.
    pub fn load(&self, path: &str) -> PResult<Arc<LoadedModule>> {
        // held across loading so that concurrent calls cannot load the same path twice
        let mut modules = self.modules()?;
        if let Some(module) = modules.get(path) {
            module.refresh(&self.registry)?;
            return Ok(module.clone());
        }
        let module = Arc::new(LoadedModule::load(
            path,
            self.loader.as_ref(),
            self.max_certificates_per_slot,
        )?);
        module.refresh(&self.registry)?;
        modules.insert(path.to_owned(), module.clone());
        Ok(module)
    }

    /// The module for the connected cards: the first resolved path that loads.
    /// Returns `None` when no module handles the cards.
    pub fn module_for(&self, atrs: &[Vec<u8>]) -> PResult<Option<Pkcs11Module>> {
        let paths = self.resolve(atrs);
        if paths.len() > 1 {
            info!("{} candidate modules, using the first one", paths.len());
        }
        let Some(path) = paths.first() else {
            return Ok(None);
        };
        let module = self.load(path)?;
        Ok(Some(Pkcs11Module::new(module, self.registry.clone())))
    }

    /// A card was inserted: load the modules for its ATR and refresh them.
    /// Returns the paths of the modules now handling the card.
    pub fn card_inserted(&self, atr: &[u8]) -> PResult<Vec<String>> {
        let mut handled = Vec::new();
        for path in self.resolve(&[atr.to_vec()]) {
            if handled.contains(&path) {
                continue;
            }
            let already_loaded = self.modules()?.get(&path).cloned();
            let result = match already_loaded {
                Some(module) => module.refresh(&self.registry).map(|_| ()),
                None => self.load(&path).map(|_| ()),
            };
            match result {
                Ok(()) => handled.push(path),
                Err(e) => warn!("{path}: {e}"),
            }
        }
        Ok(handled)
    }

    /// A card was removed: refresh every module and unload the ones left without tokens
    pub fn card_removed(&self) -> PResult<()> {
        let mut modules = self.modules()?;
        let mut unloaded = Vec::new();
        for (path, module) in modules.iter() {
            match module.refresh(&self.registry) {
                Ok(0) => unloaded.push(path.clone()),
                Ok(_) => {}
                Err(e) => warn!("{path}: {e}"),
            }
        }
        for path in unloaded {
            info!("unloading {path}: no token left");
            modules.remove(&path);
            self.registry.remove_module(&path)?;
        }
        Ok(())
    }

    /// Paths of the loaded modules
    pub fn loaded(&self) -> PResult<Vec<String>> {
        Ok(self.modules()?.keys().cloned().collect())
    }
}
