use std::collections::HashSet;
use std::sync::Arc;

use super::error::SchemeError;
use super::scheme::Scheme;

/// Ordered collection of schemes plus the current selection
///
/// Names are unique. The current selection is kept as a name and an
/// optional resolved instance; the instance is dropped whenever the entry
/// it points at is replaced or removed, and reads fall back to a lookup
/// by name. This allows a selection to be recorded before the scheme it
/// names has been loaded.
#[derive(Debug, Clone)]
pub struct SchemeRegistry<T> {
    /// All schemes in listing order
    schemes: Vec<Arc<T>>,
    /// Name of the scheme that should be considered current
    current_name: Option<String>,
    /// Instance supplied together with the name by `set_current`
    current: Option<Arc<T>>,
}

/// What a bulk replace did to the collection
#[derive(Debug)]
pub struct BulkReplace<T> {
    /// Old entries dropped because they were missing from the new set
    pub removed: Vec<Arc<T>>,
    /// New entries whose name was not present before
    pub inserted: Vec<Arc<T>>,
    /// New entries that took the place of an existing one with the same name
    pub replaced: Vec<Arc<T>>,
    /// Old entries missing from the new set that the removal predicate spared
    pub kept: Vec<Arc<T>>,
}

impl<T> Default for BulkReplace<T> {
    fn default() -> Self {
        BulkReplace {
            removed: Vec::new(),
            inserted: Vec::new(),
            replaced: Vec::new(),
            kept: Vec::new(),
        }
    }
}

impl<T> BulkReplace<T> {
    /// True if the replace left the collection untouched
    pub fn is_noop(&self) -> bool {
        self.removed.is_empty() && self.inserted.is_empty() && self.replaced.is_empty()
    }
}

impl<T: Scheme> SchemeRegistry<T> {
    /// Create an empty registry with no selection
    pub fn new() -> Self {
        SchemeRegistry {
            schemes: Vec::new(),
            current_name: None,
            current: None,
        }
    }

    /// All schemes in listing order
    pub fn schemes(&self) -> &[Arc<T>] {
        &self.schemes
    }

    pub fn len(&self) -> usize {
        self.schemes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemes.is_empty()
    }

    /// Names of all schemes in listing order
    pub fn scheme_names(&self) -> Vec<String> {
        self.schemes.iter().map(|s| s.name().to_string()).collect()
    }

    /// Exact-match lookup by name
    pub fn find(&self, name: &str) -> Option<&Arc<T>> {
        self.schemes.iter().find(|s| s.name() == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.schemes.iter().position(|s| s.name() == name)
    }

    /// Insert a scheme
    /// With `replace_existing` an entry of the same name is swapped out in
    /// place and returned; without it a name clash is rejected and the
    /// existing entry is left untouched
    pub fn add_new(
        &mut self,
        scheme: Arc<T>,
        replace_existing: bool,
    ) -> Result<Option<Arc<T>>, SchemeError> {
        match self.position(scheme.name()) {
            Some(_) if !replace_existing => {
                Err(SchemeError::DuplicateName(scheme.name().to_string()))
            }
            Some(pos) => {
                self.forget_resolved(scheme.name());
                let old = std::mem::replace(&mut self.schemes[pos], scheme);
                log::debug!("Replaced scheme '{}'", old.name());
                Ok(Some(old))
            }
            None => {
                self.forget_resolved(scheme.name());
                log::debug!("Added scheme '{}'", scheme.name());
                self.schemes.push(scheme);
                Ok(None)
            }
        }
    }

    /// Insert a scheme, replacing any entry with the same name
    pub fn add(&mut self, scheme: Arc<T>) -> Option<Arc<T>> {
        match self.add_new(scheme, true) {
            Ok(replaced) => replaced,
            // replace_existing never reports a duplicate
            Err(_) => None,
        }
    }

    /// Put `scheme` into the slot held by `old_name`, keeping its position
    /// Fails if `old_name` is missing or another entry already uses the
    /// new name
    pub fn replace_entry(
        &mut self,
        old_name: &str,
        scheme: Arc<T>,
    ) -> Result<Arc<T>, SchemeError> {
        let pos = self
            .position(old_name)
            .ok_or_else(|| SchemeError::NotFound(old_name.to_string()))?;
        if scheme.name() != old_name && self.contains(scheme.name()) {
            return Err(SchemeError::DuplicateName(scheme.name().to_string()));
        }

        self.forget_resolved(old_name);
        self.forget_resolved(scheme.name());
        Ok(std::mem::replace(&mut self.schemes[pos], scheme))
    }

    /// Remove the entry with the same name as `scheme`
    /// Returns false if no such entry exists
    pub fn remove(&mut self, scheme: &T) -> bool {
        match self.position(scheme.name()) {
            Some(pos) => {
                let removed = self.schemes.remove(pos);
                self.forget_resolved(removed.name());
                log::debug!("Removed scheme '{}'", removed.name());
                true
            }
            None => false,
        }
    }

    /// Remove by name, returning the removed scheme
    pub fn remove_by_name(&mut self, name: &str) -> Option<Arc<T>> {
        let scheme = Arc::clone(self.find(name)?);
        self.remove(&scheme);
        Some(scheme)
    }

    /// Drop every scheme; the selected name is kept
    pub fn clear(&mut self) {
        self.schemes.clear();
        self.current = None;
    }

    /// Name of the selected scheme, resolvable or not
    pub fn current_name(&self) -> Option<&str> {
        self.current_name.as_deref()
    }

    /// Record a selection by name without resolving it
    pub fn set_current_name(&mut self, name: Option<String>) {
        self.current_name = name;
        self.current = None;
    }

    /// Select a scheme instance; `None` clears the selection
    ///
    /// Resolution still goes by name: a registered entry with the same name
    /// wins over `scheme`. An instance that is not registered is returned
    /// as selected until an entry with its name is added or the name is
    /// removed.
    pub fn set_current(&mut self, scheme: Option<Arc<T>>) {
        self.current_name = scheme.as_ref().map(|s| s.name().to_string());
        self.current = scheme;
    }

    /// Resolve the current selection
    pub fn current(&self) -> Option<Arc<T>> {
        let name = self.current_name.as_deref()?;
        self.find(name).or(self.current.as_ref()).cloned()
    }

    /// Resolve the current selection, treating a dangling name as an error
    pub fn require_current(&self) -> Result<Option<Arc<T>>, SchemeError> {
        match (&self.current_name, self.current()) {
            (None, _) => Ok(None),
            (Some(_), Some(scheme)) => Ok(Some(scheme)),
            (Some(name), None) => Err(SchemeError::UnresolvedSelection(name.clone())),
        }
    }

    /// Swap the whole collection for `new_schemes`
    ///
    /// Old entries whose name is missing from the new set are removed, or,
    /// when `remove_condition` is given, removed only if it returns true.
    /// The result follows the order of `new_schemes`; an entry spared by the
    /// predicate is placed right after the entry that preceded it in the
    /// old order (or first, if nothing did). Duplicate names inside
    /// `new_schemes` collapse onto the first position with the last value.
    ///
    /// With `new_current` the selection moves to it; otherwise the selected
    /// name is kept and resolves against the new collection.
    pub fn set_schemes(
        &mut self,
        new_schemes: Vec<Arc<T>>,
        new_current: Option<Arc<T>>,
        remove_condition: Option<&dyn Fn(&T) -> bool>,
    ) -> BulkReplace<T> {
        let mut result: Vec<Arc<T>> = Vec::with_capacity(new_schemes.len());
        for scheme in new_schemes {
            match result.iter().position(|s| s.name() == scheme.name()) {
                Some(pos) => {
                    log::warn!(
                        "Duplicate scheme name '{}' in replacement set, keeping the last one",
                        scheme.name()
                    );
                    result[pos] = scheme;
                }
                None => result.push(scheme),
            }
        }

        let mut report = BulkReplace::default();
        for scheme in &result {
            if self.contains(scheme.name()) {
                report.replaced.push(Arc::clone(scheme));
            } else {
                report.inserted.push(Arc::clone(scheme));
            }
        }

        let new_names: HashSet<String> = result.iter().map(|s| s.name().to_string()).collect();
        let mut anchor: Option<String> = None;

        for old in std::mem::take(&mut self.schemes) {
            if new_names.contains(old.name()) {
                anchor = Some(old.name().to_string());
                continue;
            }

            let remove = remove_condition.is_none_or(|condition| condition(old.as_ref()));
            if remove {
                report.removed.push(old);
                continue;
            }

            let pos = anchor
                .as_deref()
                .and_then(|name| result.iter().position(|s| s.name() == name))
                .map_or(0, |p| p + 1);
            anchor = Some(old.name().to_string());
            result.insert(pos, Arc::clone(&old));
            report.kept.push(old);
        }

        self.schemes = result;
        self.current = None;
        if let Some(scheme) = new_current {
            self.set_current(Some(scheme));
        }

        log::debug!(
            "Bulk replace: {} inserted, {} replaced, {} removed, {} kept",
            report.inserted.len(),
            report.replaced.len(),
            report.removed.len(),
            report.kept.len()
        );

        report
    }

    /// Drop the resolved selection if it points at `name`
    fn forget_resolved(&mut self, name: &str) {
        if self.current_name.as_deref() == Some(name) {
            self.current = None;
        }
    }
}

impl<T: Scheme> Default for SchemeRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}
