/// Name prefix that marks a scheme as a user-editable copy of a bundled one
pub const EDITABLE_COPY_PREFIX: &str = "_@user_";

/// Anything the registry can manage: a unit identified by its name
pub trait Scheme {
    fn name(&self) -> &str;
}

/// Schemes that can be duplicated under a new name
/// Used for editable copies and rename-via-copy
pub trait EditableScheme: Scheme + Sized {
    /// Return a copy of this scheme carrying `name`
    fn renamed(&self, name: &str) -> Self;
}

/// Persistence state of a scheme as seen by the manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemeState {
    /// Bundled or otherwise never written to the backing store
    NonPersistent,
    /// Added or replaced since the last successful save
    PossiblyChanged,
    /// Matches what the backing store holds
    Unchanged,
}

/// Name shown to users: the scheme name without the editable-copy prefix
pub fn display_name(name: &str) -> &str {
    name.strip_prefix(EDITABLE_COPY_PREFIX).unwrap_or(name)
}

/// Display name of a scheme instance
pub fn scheme_display_name<T: Scheme + ?Sized>(scheme: &T) -> &str {
    display_name(scheme.name())
}

/// Check whether a name carries the editable-copy prefix
pub fn is_editable_copy(name: &str) -> bool {
    name.starts_with(EDITABLE_COPY_PREFIX)
}

/// Name of the editable copy for `name`
/// Already-prefixed names are returned unchanged
pub fn editable_copy_name(name: &str) -> String {
    format!("{}{}", EDITABLE_COPY_PREFIX, display_name(name))
}

impl<T: Scheme + ?Sized> Scheme for std::sync::Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }
}
