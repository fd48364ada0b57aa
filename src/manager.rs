//! Thread-safe scheme manager
//!
//! Combines the registry with a storage collaborator, persistence
//! bookkeeping and change notifications. The registry and its bookkeeping
//! sit behind a single lock; storage calls and listener callbacks always
//! run with that lock released.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::events::SchemeListener;
use crate::models::{
    BulkReplace, EditableScheme, Scheme, SchemeError, SchemeRegistry, SchemeState,
    editable_copy_name,
};
use crate::storage::SchemeProcessor;

/// Predicate deciding whether an orphaned scheme is removed during a bulk replace
pub type RemoveCondition<'a, T> = &'a dyn Fn(&T) -> bool;

/// Registry plus persistence bookkeeping, guarded together
struct ManagerState<T> {
    registry: SchemeRegistry<T>,
    /// Names changed since the last successful save
    dirty: HashSet<String>,
    /// Names whose stored copy must be deleted on the next save
    pending_deletes: BTreeSet<String>,
    /// Names of bundled or otherwise read-only schemes
    bundled: HashSet<String>,
    /// `load_schemes` has run at least once
    loaded: bool,
}

impl<T: Scheme> ManagerState<T> {
    /// Record that `scheme` entered the registry from a caller
    fn track_added(&mut self, scheme: &T, editable: bool) {
        let name = scheme.name().to_string();
        self.pending_deletes.remove(&name);
        if editable {
            self.bundled.remove(&name);
            self.dirty.insert(name);
        } else {
            self.dirty.remove(&name);
            self.bundled.insert(name);
        }
    }

    /// Record that `name` left the registry
    fn track_removed(&mut self, name: &str, delete_stored: bool) {
        self.dirty.remove(name);
        let was_bundled = self.bundled.remove(name);
        if delete_stored && !was_bundled {
            self.pending_deletes.insert(name.to_string());
        }
    }
}

/// Change recorded under the lock and delivered after it is released
enum Notification<T> {
    CurrentChanged(Option<Arc<T>>, Option<Arc<T>>),
    Added(Arc<T>),
    Removed(Arc<T>),
    Replaced,
}

/// Manages a named collection of schemes with one current selection
pub struct SchemeManager<T, P> {
    processor: P,
    root_directory: PathBuf,
    state: Mutex<ManagerState<T>>,
    listeners: Mutex<Vec<Arc<dyn SchemeListener<T>>>>,
}

impl<T, P> SchemeManager<T, P>
where
    T: Scheme + Send + Sync + 'static,
    P: SchemeProcessor<T>,
{
    /// Create an empty manager bound to `root_directory`
    pub fn new(root_directory: impl Into<PathBuf>, processor: P) -> Self {
        SchemeManager {
            processor,
            root_directory: root_directory.into(),
            state: Mutex::new(ManagerState {
                registry: SchemeRegistry::new(),
                dirty: HashSet::new(),
                pending_deletes: BTreeSet::new(),
                bundled: HashSet::new(),
                loaded: false,
            }),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn processor(&self) -> &P {
        &self.processor
    }

    /// Storage location handed to the processor
    pub fn root_directory(&self) -> &Path {
        &self.root_directory
    }

    pub fn add_listener(&self, listener: Arc<dyn SchemeListener<T>>) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    // === Queries ===

    /// Snapshot of all schemes in listing order
    pub fn all_schemes(&self) -> Vec<Arc<T>> {
        self.state().registry.schemes().to_vec()
    }

    pub fn is_empty(&self) -> bool {
        self.state().registry.is_empty()
    }

    pub fn all_scheme_names(&self) -> Vec<String> {
        self.state().registry.scheme_names()
    }

    pub fn find_scheme_by_name(&self, name: &str) -> Option<Arc<T>> {
        self.state().registry.find(name).cloned()
    }

    /// Resolve the current scheme; `None` if nothing is selected or the
    /// selected name is not loaded
    pub fn current_scheme(&self) -> Option<Arc<T>> {
        self.state().registry.current()
    }

    /// Like `current_scheme`, but a selected name that does not resolve is
    /// reported as `UnresolvedSelection`
    pub fn require_current_scheme(&self) -> Result<Option<Arc<T>>, SchemeError> {
        self.state().registry.require_current()
    }

    pub fn current_scheme_name(&self) -> Option<String> {
        self.state().registry.current_name().map(str::to_string)
    }

    /// Bundled and read-only schemes cannot be renamed or deleted
    pub fn is_metadata_editable(&self, scheme: &T) -> bool {
        let bundled = self.state().bundled.contains(scheme.name());
        !bundled && self.processor.is_metadata_editable(scheme)
    }

    /// Persistence state of the named scheme
    pub fn scheme_state(&self, name: &str) -> Option<SchemeState> {
        let state = self.state();
        state.registry.find(name)?;
        Some(if state.bundled.contains(name) {
            SchemeState::NonPersistent
        } else if state.dirty.contains(name) {
            SchemeState::PossiblyChanged
        } else {
            SchemeState::Unchanged
        })
    }

    // === Selection ===

    /// Record the selection by name; the scheme is looked up on first use
    pub fn set_current_scheme_name(&self, name: Option<&str>, notify: bool) {
        let change = {
            let mut state = self.state();
            let old = state.registry.current();
            state.registry.set_current_name(name.map(str::to_string));
            let new = state.registry.current();
            current_change(old, new)
        };

        log::debug!("Current scheme name set to {:?}", name);
        if notify {
            self.fire(change.into_iter().collect());
        }
    }

    /// Select `scheme` (or clear the selection)
    pub fn set_current(&self, scheme: Option<Arc<T>>, notify: bool) {
        let change = {
            let mut state = self.state();
            let old = state.registry.current();
            state.registry.set_current(scheme);
            let new = state.registry.current();
            current_change(old, new)
        };

        if notify {
            self.fire(change.into_iter().collect());
        }
    }

    /// Select `scheme` and notify listeners
    pub fn set_current_scheme(&self, scheme: Option<Arc<T>>) {
        self.set_current(scheme, true);
    }

    // === Mutation ===

    /// Insert a scheme
    /// A name clash is rejected with `DuplicateName` unless
    /// `replace_existing`, in which case the old entry is replaced in place
    pub fn add_new_scheme(
        &self,
        scheme: impl Into<Arc<T>>,
        replace_existing: bool,
    ) -> Result<(), SchemeError> {
        let scheme = scheme.into();
        let editable = self.processor.is_metadata_editable(&scheme);
        {
            let mut state = self.state();
            state.registry.add_new(Arc::clone(&scheme), replace_existing)?;
            state.track_added(&scheme, editable);
        }

        self.fire(vec![Notification::Added(scheme)]);
        Ok(())
    }

    /// Insert a scheme, replacing any entry with the same name
    pub fn add_scheme(&self, scheme: impl Into<Arc<T>>) {
        if let Err(e) = self.add_new_scheme(scheme, true) {
            log::error!("Unexpected failure adding scheme: {}", e);
        }
    }

    /// Remove the entry named like `scheme`; false if there is none
    /// A removed current scheme leaves its name selected but unresolved
    pub fn remove_scheme(&self, scheme: &T) -> bool {
        let removed = {
            let mut state = self.state();
            let removed = state.registry.find(scheme.name()).cloned();
            if !state.registry.remove(scheme) {
                return false;
            }
            state.track_removed(scheme.name(), true);
            removed
        };

        if let Some(removed) = removed {
            self.fire(vec![Notification::Removed(removed)]);
        }
        true
    }

    /// Remove by name, returning the removed scheme
    pub fn remove_scheme_by_name(&self, name: &str) -> Option<Arc<T>> {
        let scheme = self.find_scheme_by_name(name)?;
        self.remove_scheme(&scheme);
        Some(scheme)
    }

    /// Drop every scheme; the selected name is kept
    /// Consider `set_schemes` when swapping one collection for another
    pub fn clear_all_schemes(&self) {
        let change = {
            let mut state = self.state();
            let old = state.registry.current();
            let names = state.registry.scheme_names();
            state.registry.clear();
            for name in &names {
                state.track_removed(name, true);
            }
            current_change(old, None)
        };

        let mut notifications = vec![Notification::Replaced];
        notifications.extend(change);
        self.fire(notifications);
    }

    /// Atomically swap the collection for `new_schemes`
    /// See `SchemeRegistry::set_schemes` for the ordering and selection
    /// rules. Listeners see the replacement first and the selection change
    /// (if any) after it.
    pub fn set_schemes(
        &self,
        new_schemes: Vec<Arc<T>>,
        new_current: Option<Arc<T>>,
        remove_condition: Option<RemoveCondition<'_, T>>,
    ) -> BulkReplace<T> {
        self.apply_schemes(new_schemes, new_current, remove_condition, true)
    }

    fn apply_schemes(
        &self,
        new_schemes: Vec<Arc<T>>,
        new_current: Option<Arc<T>>,
        remove_condition: Option<RemoveCondition<'_, T>>,
        from_caller: bool,
    ) -> BulkReplace<T> {
        // Editability and the removal predicate run with the lock released,
        // either may call back into this manager
        let editable: HashMap<String, bool> = new_schemes
            .iter()
            .map(|s| (s.name().to_string(), self.processor.is_metadata_editable(s)))
            .collect();
        let doomed =
            remove_condition.map(|condition| self.orphans_to_remove(&new_schemes, condition));

        let (report, change) = {
            let mut state = self.state();
            let old = state.registry.current();

            // Entries that appeared after the predicate ran are kept
            let resolved = doomed.map(|doomed| move |old: &T| doomed.contains(old.name()));
            let report = state.registry.set_schemes(
                new_schemes,
                new_current,
                resolved.as_ref().map(|c| c as &dyn Fn(&T) -> bool),
            );

            for removed in &report.removed {
                state.track_removed(removed.name(), from_caller);
            }
            for added in report.inserted.iter().chain(&report.replaced) {
                let editable = editable.get(added.name()).copied().unwrap_or(true);
                state.track_added(added, editable);
                if !from_caller {
                    state.dirty.remove(added.name());
                }
            }

            let new = state.registry.current();
            (report, current_change(old, new))
        };

        let mut notifications = vec![Notification::Replaced];
        notifications.extend(change);
        self.fire(notifications);
        report
    }

    /// Names of current entries missing from `new_schemes` that
    /// `condition` wants removed
    fn orphans_to_remove(
        &self,
        new_schemes: &[Arc<T>],
        condition: RemoveCondition<'_, T>,
    ) -> HashSet<String> {
        let new_names: HashSet<&str> = new_schemes.iter().map(|s| s.name()).collect();

        let mut doomed = HashSet::new();
        for old in self.all_schemes() {
            if !new_names.contains(old.name()) && condition(&*old) {
                doomed.insert(old.name().to_string());
            }
        }
        doomed
    }

    // === Editable copies ===

    /// Add a user-editable copy of `name`, named with the editable-copy prefix
    pub fn create_editable_copy(&self, name: &str) -> Result<Arc<T>, SchemeError>
    where
        T: EditableScheme,
    {
        let original = self
            .find_scheme_by_name(name)
            .ok_or_else(|| SchemeError::NotFound(name.to_string()))?;

        let copy = Arc::new(original.renamed(&editable_copy_name(name)));
        self.add_new_scheme(Arc::clone(&copy), false)?;

        log::info!("Created editable copy '{}' of '{}'", copy.name(), name);
        Ok(copy)
    }

    /// Rename a scheme by replacing it with a renamed copy in the same
    /// position; the selection follows the scheme
    pub fn rename_scheme(&self, old_name: &str, new_name: &str) -> Result<Arc<T>, SchemeError>
    where
        T: EditableScheme,
    {
        // Checks run unlocked; retry if the entry is swapped meanwhile
        let (original, renamed, change) = loop {
            let original = self
                .find_scheme_by_name(old_name)
                .ok_or_else(|| SchemeError::NotFound(old_name.to_string()))?;

            if !self.is_metadata_editable(&original) {
                return Err(SchemeError::ReadOnly(old_name.to_string()));
            }
            if old_name == new_name {
                return Ok(original);
            }

            let renamed = Arc::new(original.renamed(new_name));

            let mut state = self.state();
            let unchanged = state
                .registry
                .find(old_name)
                .is_some_and(|current| Arc::ptr_eq(current, &original));
            if !unchanged {
                continue;
            }

            let was_current = state.registry.current_name() == Some(old_name);
            let old_current = state.registry.current();

            state
                .registry
                .replace_entry(old_name, Arc::clone(&renamed))?;
            state.track_removed(old_name, true);
            state.track_added(&renamed, true);

            let change = if was_current {
                state.registry.set_current(Some(Arc::clone(&renamed)));
                current_change(old_current, Some(Arc::clone(&renamed)))
            } else {
                None
            };
            break (original, renamed, change);
        };

        log::info!("Renamed scheme '{}' to '{}'", old_name, new_name);

        let mut notifications = vec![
            Notification::Removed(original),
            Notification::Added(Arc::clone(&renamed)),
        ];
        notifications.extend(change);
        self.fire(notifications);
        Ok(renamed)
    }

    /// Remove a scheme after checking that it may be deleted
    pub fn delete_scheme(&self, name: &str) -> Result<Arc<T>, SchemeError> {
        let scheme = self
            .find_scheme_by_name(name)
            .ok_or_else(|| SchemeError::NotFound(name.to_string()))?;

        if !self.is_metadata_editable(&scheme) {
            return Err(SchemeError::ReadOnly(name.to_string()));
        }

        self.remove_scheme(&scheme);
        Ok(scheme)
    }

    /// Flag a scheme as changed so the next save writes it
    /// Returns false for unknown or read-only schemes
    pub fn mark_dirty(&self, name: &str) -> bool {
        let mut state = self.state();
        if !state.registry.contains(name) || state.bundled.contains(name) {
            return false;
        }
        state.dirty.insert(name.to_string())
    }

    // === Loading & persistence ===

    /// Register a bundled scheme from the processor's resources
    ///
    /// Must be called before `load_schemes` when the processor is lazy.
    /// A name that is already registered is skipped, so a stored scheme
    /// keeps precedence over a bundled one registered after it.
    pub fn load_bundled_scheme(
        &self,
        resource_name: &str,
        requestor: &str,
    ) -> anyhow::Result<Option<Arc<T>>> {
        if self.processor.is_lazy() && self.state().loaded {
            log::warn!(
                "Bundled scheme '{}' requested by {} after schemes were loaded",
                resource_name,
                requestor
            );
        }

        let Some(scheme) = self.processor.load_bundled(resource_name)? else {
            log::warn!(
                "Unknown bundled scheme '{}' requested by {}",
                resource_name,
                requestor
            );
            return Ok(None);
        };

        let scheme = Arc::new(scheme);
        {
            let mut state = self.state();
            if let Err(e) = state.registry.add_new(Arc::clone(&scheme), false) {
                log::debug!("Bundled scheme '{}' skipped: {}", resource_name, e);
                return Ok(None);
            }
            state.track_added(&scheme, false);
        }

        log::debug!("Loaded bundled scheme '{}' for {}", scheme.name(), requestor);
        self.fire(vec![Notification::Added(Arc::clone(&scheme))]);
        Ok(Some(scheme))
    }

    /// Load all schemes from the backing store
    /// Stored schemes replace registered ones of the same name (a user
    /// file overrides a bundled scheme). May be called more than once.
    pub fn load_schemes(&self) -> anyhow::Result<Vec<Arc<T>>> {
        let loaded: Vec<Arc<T>> = self
            .processor
            .load_all(&self.root_directory)?
            .into_iter()
            .map(Arc::new)
            .collect();

        let editable: Vec<bool> = loaded
            .iter()
            .map(|scheme| self.processor.is_metadata_editable(scheme))
            .collect();

        let change = {
            let mut state = self.state();
            let old = state.registry.current();
            for (scheme, editable) in loaded.iter().zip(editable) {
                state.registry.add(Arc::clone(scheme));
                state.track_added(scheme, editable);
                state.dirty.remove(scheme.name());
            }
            state.loaded = true;
            let new = state.registry.current();
            current_change(old, new)
        };

        log::info!(
            "Loaded {} scheme(s) from {:?}",
            loaded.len(),
            self.root_directory
        );

        let mut notifications = vec![Notification::Replaced];
        notifications.extend(change);
        self.fire(notifications);
        Ok(loaded)
    }

    /// Re-read the backing store, keeping bundled schemes
    /// No-op for processors without reload support. Unsaved changes to
    /// stored schemes are discarded.
    pub fn reload(&self) -> anyhow::Result<()> {
        if !self.processor.supports_reload() {
            return Ok(());
        }

        let fresh: Vec<Arc<T>> = self
            .processor
            .load_all(&self.root_directory)?
            .into_iter()
            .map(Arc::new)
            .collect();

        let bundled = {
            let state = self.state();
            if !state.dirty.is_empty() {
                log::warn!(
                    "Reload discards unsaved changes to {} scheme(s)",
                    state.dirty.len()
                );
            }
            state.bundled.clone()
        };

        let keep_bundled = |scheme: &T| !bundled.contains(scheme.name());
        let report = self.apply_schemes(fresh, None, Some(&keep_bundled), false);

        log::info!(
            "Reloaded schemes: {} new, {} updated, {} gone",
            report.inserted.len(),
            report.replaced.len(),
            report.removed.len()
        );
        Ok(())
    }

    /// Persist changed schemes and delete removed ones
    ///
    /// Best effort: every failure is appended to `errors` and the rest
    /// carries on. Schemes that saved are marked clean; failed ones stay
    /// dirty for the next attempt.
    pub fn save(&self, errors: &mut Vec<SchemeError>) {
        let failures_before = errors.len();
        let (deletes, to_save) = {
            let state = self.state();
            let deletes: Vec<String> = state.pending_deletes.iter().cloned().collect();
            let to_save: Vec<Arc<T>> = state
                .registry
                .schemes()
                .iter()
                .filter(|s| state.dirty.contains(s.name()) && !state.bundled.contains(s.name()))
                .cloned()
                .collect();
            (deletes, to_save)
        };

        // Deletions first so a new scheme can reuse a removed scheme's file
        let mut deleted = Vec::new();
        for name in deletes {
            match self.processor.delete(&self.root_directory, &name) {
                Ok(()) => deleted.push(name),
                Err(e) => {
                    log::error!("Failed to delete scheme '{}': {:#}", name, e);
                    errors.push(SchemeError::persistence(name, e));
                }
            }
        }

        let mut saved = Vec::new();
        for scheme in to_save {
            match self.processor.save(&self.root_directory, &scheme) {
                Ok(()) => saved.push(scheme),
                Err(e) => {
                    log::error!("Failed to save scheme '{}': {:#}", scheme.name(), e);
                    errors.push(SchemeError::persistence(scheme.name(), e));
                }
            }
        }

        let mut state = self.state();
        for name in &deleted {
            state.pending_deletes.remove(name);
        }
        for scheme in &saved {
            // A scheme replaced while saving stays dirty
            let unchanged = state
                .registry
                .find(scheme.name())
                .is_some_and(|current| Arc::ptr_eq(current, scheme));
            if unchanged {
                state.dirty.remove(scheme.name());
            }
        }

        log::info!(
            "Saved {} scheme(s), deleted {}, {} failure(s)",
            saved.len(),
            deleted.len(),
            errors.len() - failures_before
        );
    }

    // === Internals ===

    fn state(&self) -> MutexGuard<'_, ManagerState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fire(&self, notifications: Vec<Notification<T>>) {
        if notifications.is_empty() {
            return;
        }

        let listeners = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for notification in &notifications {
            for listener in &listeners {
                match notification {
                    Notification::CurrentChanged(old, new) => {
                        listener.current_scheme_changed(old.as_deref(), new.as_deref())
                    }
                    Notification::Added(scheme) => listener.scheme_added(scheme),
                    Notification::Removed(scheme) => listener.scheme_removed(scheme),
                    Notification::Replaced => listener.schemes_replaced(),
                }
            }
        }
    }
}

/// Selection change between two resolutions, if the instance differs
fn current_change<T>(old: Option<Arc<T>>, new: Option<Arc<T>>) -> Option<Notification<T>> {
    let same = match (&old, &new) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    };

    if same {
        None
    } else {
        Some(Notification::CurrentChanged(old, new))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ChannelListener, SchemeEvent};
    use crate::models::{BuiltInScheme, ColorScheme};
    use crate::storage::TomlSchemeStorage;
    use anyhow::bail;
    use std::collections::BTreeMap;
    use std::fs;
    use std::sync::mpsc::{self, Receiver};
    use std::thread;
    use tempfile::TempDir;

    /// In-memory backing store that can be told to fail saves
    #[derive(Default)]
    struct MemoryProcessor {
        store: Mutex<BTreeMap<String, ColorScheme>>,
        failing: Mutex<HashSet<String>>,
        saves: Mutex<Vec<String>>,
    }

    impl MemoryProcessor {
        fn with_stored(names: &[&str]) -> Self {
            let processor = Self::default();
            for name in names {
                processor.put(ColorScheme::new(*name));
            }
            processor
        }

        fn put(&self, scheme: ColorScheme) {
            self.store.lock().unwrap().insert(scheme.name.clone(), scheme);
        }

        fn stored_names(&self) -> Vec<String> {
            self.store.lock().unwrap().keys().cloned().collect()
        }

        fn fail_on(&self, name: &str) {
            self.failing.lock().unwrap().insert(name.to_string());
        }

        fn save_count(&self, name: &str) -> usize {
            self.saves.lock().unwrap().iter().filter(|n| *n == name).count()
        }
    }

    impl SchemeProcessor<ColorScheme> for MemoryProcessor {
        fn load_all(&self, _root: &Path) -> anyhow::Result<Vec<ColorScheme>> {
            Ok(self.store.lock().unwrap().values().cloned().collect())
        }

        fn save(&self, _root: &Path, scheme: &ColorScheme) -> anyhow::Result<()> {
            self.saves.lock().unwrap().push(scheme.name.clone());
            if self.failing.lock().unwrap().contains(&scheme.name) {
                bail!("disk full");
            }
            self.put(scheme.clone());
            Ok(())
        }

        fn delete(&self, _root: &Path, name: &str) -> anyhow::Result<()> {
            self.store.lock().unwrap().remove(name);
            Ok(())
        }

        fn load_bundled(&self, resource_name: &str) -> anyhow::Result<Option<ColorScheme>> {
            Ok(BuiltInScheme::from_name(resource_name).map(|b| b.to_scheme()))
        }

        fn is_lazy(&self) -> bool {
            true
        }

        fn supports_reload(&self) -> bool {
            true
        }

        fn is_metadata_editable(&self, scheme: &ColorScheme) -> bool {
            !scheme.bundled
        }
    }

    type TestManager = SchemeManager<ColorScheme, MemoryProcessor>;

    fn manager_with(names: &[&str]) -> TestManager {
        SchemeManager::new("/schemes", MemoryProcessor::with_stored(names))
    }

    fn listen(manager: &TestManager) -> Receiver<SchemeEvent> {
        let (tx, rx) = mpsc::channel();
        manager.add_listener(ChannelListener::shared(tx));
        rx
    }

    fn user(name: &str) -> Arc<ColorScheme> {
        Arc::new(ColorScheme::new(name))
    }

    #[test]
    fn test_load_schemes() {
        let manager = manager_with(&["A", "B"]);
        assert!(manager.is_empty());

        let loaded = manager.load_schemes().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(manager.all_scheme_names(), vec!["A", "B"]);
        assert_eq!(manager.scheme_state("A"), Some(SchemeState::Unchanged));
        assert_eq!(manager.root_directory(), Path::new("/schemes"));
    }

    #[test]
    fn test_lazy_selection_resolves_on_load() {
        let manager = manager_with(&["Dark", "Light"]);
        let rx = listen(&manager);

        manager.set_current_scheme_name(Some("Dark"), true);
        assert_eq!(manager.current_scheme_name().as_deref(), Some("Dark"));
        assert!(manager.current_scheme().is_none());
        assert!(matches!(
            manager.require_current_scheme(),
            Err(SchemeError::UnresolvedSelection(_))
        ));

        manager.load_schemes().unwrap();
        assert_eq!(manager.current_scheme().unwrap().name, "Dark");

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                SchemeEvent::Replaced,
                SchemeEvent::CurrentChanged {
                    old: None,
                    new: Some("Dark".to_string()),
                },
            ]
        );
    }

    #[test]
    fn test_add_new_scheme_duplicate() {
        let manager = manager_with(&[]);
        manager
            .add_new_scheme(ColorScheme::new("A").with_color("text", [1, 1, 1]), false)
            .unwrap();

        let result = manager.add_new_scheme(ColorScheme::new("A"), false);
        assert!(matches!(result, Err(SchemeError::DuplicateName(name)) if name == "A"));
        assert_eq!(
            manager.find_scheme_by_name("A").unwrap().color("text"),
            Some([1, 1, 1])
        );

        manager.add_scheme(ColorScheme::new("A"));
        assert_eq!(manager.find_scheme_by_name("A").unwrap().color("text"), None);
        assert_eq!(manager.all_scheme_names(), vec!["A"]);
    }

    #[test]
    fn test_set_current_then_read() {
        let manager = manager_with(&["A", "B"]);
        manager.load_schemes().unwrap();
        let rx = listen(&manager);

        let b = manager.find_scheme_by_name("B").unwrap();
        manager.set_current_scheme(Some(Arc::clone(&b)));
        assert!(Arc::ptr_eq(&manager.current_scheme().unwrap(), &b));
        assert_eq!(
            rx.try_recv().unwrap(),
            SchemeEvent::CurrentChanged {
                old: None,
                new: Some("B".to_string()),
            }
        );

        let a = manager.find_scheme_by_name("A").unwrap();
        manager.set_current(Some(a), false);
        assert_eq!(manager.current_scheme().unwrap().name, "A");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_remove_keeps_dangling_selection() {
        let manager = manager_with(&["A", "B"]);
        manager.load_schemes().unwrap();
        manager.set_current_scheme_name(Some("A"), false);

        let removed = manager.remove_scheme_by_name("A").unwrap();
        assert_eq!(removed.name, "A");
        assert!(manager.remove_scheme_by_name("A").is_none());
        assert!(!manager.remove_scheme(&ColorScheme::new("A")));

        assert_eq!(manager.current_scheme_name().as_deref(), Some("A"));
        assert!(manager.current_scheme().is_none());
    }

    #[test]
    fn test_removed_scheme_is_deleted_on_save() {
        let manager = manager_with(&["A", "B"]);
        manager.load_schemes().unwrap();

        manager.remove_scheme_by_name("A");
        assert_eq!(manager.processor().stored_names(), vec!["A", "B"]);

        let mut errors = Vec::new();
        manager.save(&mut errors);
        assert!(errors.is_empty());
        assert_eq!(manager.processor().stored_names(), vec!["B"]);
    }

    #[test]
    fn test_readding_cancels_deletion() {
        let manager = manager_with(&["A"]);
        manager.load_schemes().unwrap();

        manager.remove_scheme_by_name("A");
        manager.add_scheme(ColorScheme::new("A").with_color("text", [9, 9, 9]));

        let mut errors = Vec::new();
        manager.save(&mut errors);
        assert!(errors.is_empty());
        let stored = manager.processor().store.lock().unwrap().get("A").cloned();
        assert_eq!(stored.unwrap().color("text"), Some([9, 9, 9]));
    }

    #[test]
    fn test_save_partial_failure() {
        let manager = manager_with(&[]);
        manager.processor().fail_on("B");
        manager.add_scheme(ColorScheme::new("A"));
        manager.add_scheme(ColorScheme::new("B"));
        manager.add_scheme(ColorScheme::new("C"));

        let mut errors = Vec::new();
        manager.save(&mut errors);

        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].scheme_name(), "B");
        assert!(matches!(errors[0], SchemeError::Persistence { .. }));
        assert_eq!(manager.scheme_state("A"), Some(SchemeState::Unchanged));
        assert_eq!(manager.scheme_state("B"), Some(SchemeState::PossiblyChanged));
        assert_eq!(manager.scheme_state("C"), Some(SchemeState::Unchanged));

        // Only the failed scheme is retried
        let mut errors = Vec::new();
        manager.save(&mut errors);
        assert_eq!(errors.len(), 1);
        assert_eq!(manager.processor().save_count("A"), 1);
        assert_eq!(manager.processor().save_count("B"), 2);
        assert_eq!(manager.processor().save_count("C"), 1);
    }

    #[test]
    fn test_bundled_schemes() {
        let manager = manager_with(&[]);

        let bundled = manager
            .load_bundled_scheme("catppuccin-mocha", "test")
            .unwrap()
            .unwrap();
        assert!(!manager.is_metadata_editable(&bundled));
        assert_eq!(
            manager.scheme_state("catppuccin-mocha"),
            Some(SchemeState::NonPersistent)
        );
        assert!(
            manager
                .load_bundled_scheme("no-such-scheme", "test")
                .unwrap()
                .is_none()
        );

        let mut errors = Vec::new();
        manager.save(&mut errors);
        assert!(errors.is_empty());
        assert!(manager.processor().stored_names().is_empty());

        assert!(matches!(
            manager.delete_scheme("catppuccin-mocha"),
            Err(SchemeError::ReadOnly(_))
        ));
        assert!(!manager.mark_dirty("catppuccin-mocha"));
    }

    #[test]
    fn test_stored_scheme_overrides_bundled() {
        let manager = manager_with(&["tokyonight-day"]);
        manager.load_bundled_scheme("tokyonight-day", "test").unwrap();
        manager.load_bundled_scheme("tokyonight-night", "test").unwrap();
        manager.load_schemes().unwrap();

        let scheme = manager.find_scheme_by_name("tokyonight-day").unwrap();
        assert!(!scheme.bundled);
        assert!(manager.is_metadata_editable(&scheme));
        assert_eq!(
            manager.all_scheme_names(),
            vec!["tokyonight-day", "tokyonight-night"]
        );

        // Registered after loading: ignored because the name is taken
        assert!(
            manager
                .load_bundled_scheme("tokyonight-day", "late")
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_set_schemes() {
        let manager = manager_with(&["A", "B", "C"]);
        manager.load_schemes().unwrap();
        manager.set_current_scheme_name(Some("B"), false);
        let rx = listen(&manager);

        let report = manager.set_schemes(vec![user("B"), user("D")], None, None);
        assert_eq!(manager.all_scheme_names(), vec!["B", "D"]);
        assert_eq!(report.removed.len(), 2);
        assert_eq!(manager.current_scheme().unwrap().name, "B");
        assert_eq!(manager.scheme_state("D"), Some(SchemeState::PossiblyChanged));

        // Replacement first, then the selection moving to the new instance
        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(events[0], SchemeEvent::Replaced);
        assert_eq!(
            events[1],
            SchemeEvent::CurrentChanged {
                old: Some("B".to_string()),
                new: Some("B".to_string()),
            }
        );

        let mut errors = Vec::new();
        manager.save(&mut errors);
        assert_eq!(manager.processor().stored_names(), vec!["B", "D"]);
    }

    #[test]
    fn test_set_schemes_with_predicate() {
        let manager = manager_with(&["A", "B", "C"]);
        manager.load_schemes().unwrap();

        let keep_a = |s: &ColorScheme| s.name != "A";
        manager.set_schemes(vec![user("B"), user("D")], None, Some(&keep_a));
        assert_eq!(manager.all_scheme_names(), vec!["A", "B", "D"]);
    }

    #[test]
    fn test_set_schemes_with_new_current() {
        let manager = manager_with(&["A"]);
        manager.load_schemes().unwrap();
        manager.set_current_scheme_name(Some("A"), false);

        let d = user("D");
        manager.set_schemes(vec![Arc::clone(&d)], Some(Arc::clone(&d)), None);
        assert!(Arc::ptr_eq(&manager.current_scheme().unwrap(), &d));
    }

    #[test]
    fn test_clear_all_schemes() {
        let manager = manager_with(&["A", "B"]);
        manager.load_schemes().unwrap();
        manager.set_current_scheme_name(Some("B"), false);

        manager.clear_all_schemes();
        assert!(manager.is_empty());
        assert_eq!(manager.current_scheme_name().as_deref(), Some("B"));

        let mut errors = Vec::new();
        manager.save(&mut errors);
        assert!(manager.processor().stored_names().is_empty());
    }

    #[test]
    fn test_reload_picks_up_external_changes() {
        let manager = manager_with(&["A", "B"]);
        manager.load_bundled_scheme("catppuccin-latte", "test").unwrap();
        manager.load_schemes().unwrap();

        manager.processor().store.lock().unwrap().remove("A");
        manager.processor().put(ColorScheme::new("C"));

        manager.reload().unwrap();
        assert_eq!(
            manager.all_scheme_names(),
            vec!["catppuccin-latte", "B", "C"]
        );
        assert_eq!(manager.scheme_state("C"), Some(SchemeState::Unchanged));

        // Nothing queued: the store already matches
        let mut errors = Vec::new();
        manager.save(&mut errors);
        assert_eq!(manager.processor().save_count("B"), 0);
        assert_eq!(manager.processor().save_count("C"), 0);
    }

    #[test]
    fn test_create_editable_copy() {
        let manager = manager_with(&[]);
        manager.load_bundled_scheme("catppuccin-mocha", "test").unwrap();

        let copy = manager.create_editable_copy("catppuccin-mocha").unwrap();
        assert_eq!(copy.name, "_@user_catppuccin-mocha");
        assert!(manager.is_metadata_editable(&copy));
        assert_eq!(
            manager.scheme_state(&copy.name),
            Some(SchemeState::PossiblyChanged)
        );

        assert!(matches!(
            manager.create_editable_copy("catppuccin-mocha"),
            Err(SchemeError::DuplicateName(_))
        ));
        assert!(matches!(
            manager.create_editable_copy("missing"),
            Err(SchemeError::NotFound(_))
        ));
    }

    #[test]
    fn test_rename_scheme() {
        let manager = manager_with(&["A", "B", "C"]);
        manager.load_schemes().unwrap();
        manager.set_current_scheme_name(Some("B"), false);
        let rx = listen(&manager);

        let renamed = manager.rename_scheme("B", "X").unwrap();
        assert_eq!(renamed.name, "X");
        assert_eq!(manager.all_scheme_names(), vec!["A", "X", "C"]);
        assert_eq!(manager.current_scheme_name().as_deref(), Some("X"));
        assert!(Arc::ptr_eq(&manager.current_scheme().unwrap(), &renamed));

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                SchemeEvent::Removed("B".to_string()),
                SchemeEvent::Added("X".to_string()),
                SchemeEvent::CurrentChanged {
                    old: Some("B".to_string()),
                    new: Some("X".to_string()),
                },
            ]
        );

        let mut errors = Vec::new();
        manager.save(&mut errors);
        assert_eq!(manager.processor().stored_names(), vec!["A", "C", "X"]);

        assert!(matches!(
            manager.rename_scheme("A", "C"),
            Err(SchemeError::DuplicateName(_))
        ));
    }

    #[test]
    fn test_rename_bundled_is_rejected() {
        let manager = manager_with(&[]);
        manager.load_bundled_scheme("tokyonight-storm", "test").unwrap();

        assert!(matches!(
            manager.rename_scheme("tokyonight-storm", "mine"),
            Err(SchemeError::ReadOnly(_))
        ));
        assert!(manager.find_scheme_by_name("tokyonight-storm").is_some());
    }

    #[test]
    fn test_delete_scheme() {
        let manager = manager_with(&["A"]);
        manager.load_schemes().unwrap();

        assert_eq!(manager.delete_scheme("A").unwrap().name, "A");
        assert!(matches!(
            manager.delete_scheme("A"),
            Err(SchemeError::NotFound(_))
        ));
    }

    #[test]
    fn test_concurrent_adds_keep_names_unique() {
        let manager = Arc::new(manager_with(&[]));

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let manager = Arc::clone(&manager);
                thread::spawn(move || {
                    for i in 0..25 {
                        // Half of the names collide across threads
                        let name = if i % 2 == 0 {
                            format!("shared-{}", i)
                        } else {
                            format!("thread{}-{}", t, i)
                        };
                        let _ = manager.add_new_scheme(ColorScheme::new(name), false);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let names = manager.all_scheme_names();
        let unique: HashSet<_> = names.iter().collect();
        assert_eq!(unique.len(), names.len());
        assert_eq!(names.len(), 13 + 4 * 12);
    }

    #[test]
    fn test_set_schemes_predicate_may_query_manager() {
        let manager = Arc::new(manager_with(&["A", "B", "C"]));
        manager.load_bundled_scheme("catppuccin-latte", "test").unwrap();
        manager.load_schemes().unwrap();

        let (tx, rx) = mpsc::channel();
        let worker = Arc::clone(&manager);
        thread::spawn(move || {
            let queried = Arc::clone(&worker);
            let only_editable = |s: &ColorScheme| queried.is_metadata_editable(s);
            worker.set_schemes(vec![user("B")], None, Some(&only_editable));
            let _ = tx.send(worker.all_scheme_names());
        });

        let names = rx
            .recv_timeout(std::time::Duration::from_secs(5))
            .expect("set_schemes did not finish");
        assert_eq!(names, vec!["catppuccin-latte", "B"]);
    }

    #[test]
    fn test_save_appends_to_existing_errors() {
        let manager = manager_with(&[]);
        manager.processor().fail_on("B");
        manager.add_scheme(ColorScheme::new("A"));
        manager.add_scheme(ColorScheme::new("B"));

        let mut errors = vec![SchemeError::NotFound("earlier".to_string())];
        manager.save(&mut errors);

        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].scheme_name(), "earlier");
        assert_eq!(errors[1].scheme_name(), "B");
    }

    #[test]
    fn test_toml_store_keeps_similar_names_apart() {
        let dir = TempDir::new().unwrap();
        let manager: SchemeManager<ColorScheme, _> =
            SchemeManager::new(dir.path(), TomlSchemeStorage::new());
        manager.add_scheme(ColorScheme::new("a/b"));
        manager.add_scheme(ColorScheme::new("a_b"));

        let mut errors = Vec::new();
        manager.save(&mut errors);
        manager.remove_scheme_by_name("a/b");
        manager.save(&mut errors);
        assert!(errors.is_empty());

        manager.reload().unwrap();
        assert_eq!(manager.all_scheme_names(), vec!["a_b"]);
    }

    #[test]
    fn test_toml_store_deletes_file_scheme_was_loaded_from() {
        let dir = TempDir::new().unwrap();
        let custom = dir.path().join("custom.toml");
        fs::write(&custom, "name = \"Dark\"\n").unwrap();

        let manager: SchemeManager<ColorScheme, _> =
            SchemeManager::new(dir.path(), TomlSchemeStorage::new());
        manager.load_schemes().unwrap();
        assert_eq!(manager.all_scheme_names(), vec!["Dark"]);

        manager.delete_scheme("Dark").unwrap();
        let mut errors = Vec::new();
        manager.save(&mut errors);
        assert!(errors.is_empty());
        assert!(!custom.exists());

        manager.reload().unwrap();
        assert!(manager.is_empty());
    }
}
