use std::sync::Arc;

use log::{error, info};
use tokio::sync::OnceCell;

use crate::error::{AnnotatorError, Result};

type Loader<D> = Box<dyn Fn() -> Result<D> + Send + Sync>;

/// Lazily loaded detector shared by every polling session.
///
/// Loading happens at most once. A failed load is remembered, so detection
/// stays unavailable for the rest of the session.
pub struct ModelSlot<D> {
    cell: OnceCell<Option<Arc<D>>>,
    loader: Loader<D>,
}

impl<D: Send + Sync + 'static> ModelSlot<D> {
    pub fn new<F>(loader: F) -> Self
    where
        F: Fn() -> Result<D> + Send + Sync + 'static,
    {
        Self {
            cell: OnceCell::new(),
            loader: Box::new(loader),
        }
    }

    /// Slot that is ready from the start.
    pub fn ready(detector: D) -> Self {
        Self {
            cell: OnceCell::new_with(Some(Some(Arc::new(detector)))),
            loader: Box::new(|| Err(AnnotatorError::ModelLoad("already loaded".to_string()))),
        }
    }

    /// Runs the loader on the blocking pool if nobody has yet.
    pub async fn ensure_loaded(self: &Arc<Self>) -> Option<Arc<D>> {
        let slot = self.clone();
        self.cell
            .get_or_init(|| async move {
                info!("Loading detection models...");
                let loaded = tokio::task::spawn_blocking(move || (slot.loader)()).await;
                match loaded {
                    Ok(Ok(detector)) => {
                        info!("Detection models loaded");
                        Some(Arc::new(detector))
                    }
                    Ok(Err(e)) => {
                        error!("Error loading detection models: {}", e);
                        None
                    }
                    Err(e) => {
                        error!("Model loader task failed: {}", e);
                        None
                    }
                }
            })
            .await
            .clone()
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.cell.get(), Some(Some(_)))
    }

    pub fn has_failed(&self) -> bool {
        matches!(self.cell.get(), Some(None))
    }

    pub fn detector(&self) -> Option<Arc<D>> {
        self.cell.get().cloned().flatten()
    }
}
