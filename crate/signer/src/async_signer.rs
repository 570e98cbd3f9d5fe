use std::sync::Arc;

use tokensign_interfaces::{ErrorKind, Purpose};
use tokensign_logger::error;

use crate::{SigningOrchestrator, origin::WebOrigin};

/// Runs the blocking orchestrator calls on the tokio blocking pool
#[derive(Clone)]
pub struct AsyncSigner {
    orchestrator: Arc<SigningOrchestrator>,
}

impl AsyncSigner {
    #[must_use]
    pub const fn new(orchestrator: Arc<SigningOrchestrator>) -> Self {
        Self { orchestrator }
    }

    async fn run<T, F>(&self, f: F) -> Result<T, ErrorKind>
    where
        T: Send + 'static,
        F: FnOnce(&SigningOrchestrator) -> Result<T, ErrorKind> + Send + 'static,
    {
        let orchestrator = self.orchestrator.clone();
        tokio::task::spawn_blocking(move || f(&orchestrator))
            .await
            .map_err(|e| {
                error!("signing task failed: {e}");
                ErrorKind::TechnicalError
            })?
    }

    pub async fn authenticate(&self, origin: WebOrigin, nonce: String) -> Result<String, ErrorKind> {
        self.run(move |o| o.authenticate(&origin, &nonce)).await
    }

    pub async fn select_certificate(
        &self,
        origin: WebOrigin,
        purpose: Purpose,
    ) -> Result<Vec<u8>, ErrorKind> {
        self.run(move |o| o.select_certificate(&origin, purpose))
            .await
    }

    pub async fn sign(
        &self,
        origin: WebOrigin,
        certificate: Vec<u8>,
        hash: Vec<u8>,
    ) -> Result<Vec<u8>, ErrorKind> {
        self.run(move |o| o.sign(&origin, &certificate, &hash)).await
    }
}
