use anyhow::Result;
use std::path::Path;

/// Backing store for a scheme manager
/// Loads and persists scheme bodies; the manager owns identity and selection
pub trait SchemeProcessor<T>: Send + Sync {
    /// Load every scheme found under `root`
    fn load_all(&self, root: &Path) -> Result<Vec<T>>;

    /// Persist a single scheme under `root`
    fn save(&self, root: &Path, scheme: &T) -> Result<()>;

    /// Remove the stored copy of a scheme; a missing copy is not an error
    fn delete(&self, _root: &Path, _name: &str) -> Result<()> {
        Ok(())
    }

    /// Produce a bundled scheme by resource name
    fn load_bundled(&self, _resource_name: &str) -> Result<Option<T>> {
        Ok(None)
    }

    /// Lazy processors need bundled schemes registered before `load_all`
    fn is_lazy(&self) -> bool {
        false
    }

    /// Whether `load_all` can be called again to pick up external changes
    fn supports_reload(&self) -> bool {
        false
    }

    /// Whether a scheme may be renamed or deleted
    fn is_metadata_editable(&self, _scheme: &T) -> bool {
        true
    }
}
