//! One-time extension loading.

use std::sync::{Arc, Once};

/// Loads the named extensions. Errors are reported, never fatal.
pub type ExtensionLoader =
    Arc<dyn Fn(&[String]) -> Result<(), Box<dyn std::error::Error + Send + Sync>> + Send + Sync>;

/// Runs an [`ExtensionLoader`] at most once.
///
/// Clones share the same guard, so every module built from one
/// registration loads extensions only on the first start.
#[derive(Clone)]
pub struct Extensions {
    loader: ExtensionLoader,
    once: Arc<Once>,
}

impl Extensions {
    pub fn new(loader: ExtensionLoader) -> Self {
        Self {
            loader,
            once: Arc::new(Once::new()),
        }
    }

    /// Invoke the loader with `names` unless it already ran.
    pub fn load_once(&self, names: &[String]) {
        self.once.call_once(|| {
            if let Err(e) = (self.loader)(names) {
                tracing::error!(extensions = ?names, error = %e, "Failed to load extensions");
            } else {
                tracing::info!(extensions = ?names, "Extensions loaded");
            }
        });
    }

    pub fn is_loaded(&self) -> bool {
        self.once.is_completed()
    }
}

impl std::fmt::Debug for Extensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extensions")
            .field("loaded", &self.is_loaded())
            .finish_non_exhaustive()
    }
}
