use idcheck_core::{
    DocumentMatchReport, FaceDetectionReport, StoreMatchReport, Verifier, VerifyError,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Verify(#[from] VerifyError),
    #[error("verification timed out after {0:?}")]
    Timeout(Duration),
    #[error("verification worker failed: {0}")]
    Unavailable(String),
}

/// Clone-safe handle to the shared verifier.
///
/// Each request runs on the blocking pool; inference and subprocess work
/// never block the async runtime. A request that exceeds the timeout is
/// abandoned by its caller, but its worker still runs to completion.
#[derive(Clone)]
pub struct EngineHandle {
    verifier: Arc<Verifier>,
    timeout: Duration,
}

impl EngineHandle {
    pub fn new(verifier: Arc<Verifier>, timeout: Duration) -> Self {
        Self { verifier, timeout }
    }

    pub async fn detect_faces(&self, image: Vec<u8>) -> Result<FaceDetectionReport, EngineError> {
        self.run(move |v| v.detect_faces(&image)).await
    }

    pub async fn match_with_store(&self, live: Vec<u8>) -> Result<StoreMatchReport, EngineError> {
        self.run(move |v| v.match_with_store(&live)).await
    }

    pub async fn match_with_document(
        &self,
        live: Vec<u8>,
        document: Vec<u8>,
        document_hint: Option<String>,
    ) -> Result<DocumentMatchReport, EngineError> {
        self.run(move |v| v.match_with_document(&live, &document, document_hint.as_deref()))
            .await
    }

    async fn run<T, F>(&self, op: F) -> Result<T, EngineError>
    where
        T: Send + 'static,
        F: FnOnce(&Verifier) -> Result<T, VerifyError> + Send + 'static,
    {
        let verifier = Arc::clone(&self.verifier);
        let task = tokio::task::spawn_blocking(move || op(&verifier));

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => Ok(result?),
            Ok(Err(join)) => Err(EngineError::Unavailable(join.to_string())),
            Err(_) => {
                tracing::warn!(timeout = ?self.timeout, "verification timed out");
                Err(EngineError::Timeout(self.timeout))
            }
        }
    }
}
