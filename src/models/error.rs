/// Errors raised by registry and manager operations
#[derive(Debug, thiserror::Error)]
pub enum SchemeError {
    #[error("Scheme '{0}' already exists")]
    DuplicateName(String),

    #[error("Current scheme '{0}' is not loaded")]
    UnresolvedSelection(String),

    #[error("Scheme '{0}' not found")]
    NotFound(String),

    #[error("Scheme '{0}' is read-only and cannot be renamed or deleted")]
    ReadOnly(String),

    #[error("Failed to persist scheme '{name}': {source}")]
    Persistence {
        name: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
}

impl SchemeError {
    /// Wrap a collaborator failure for the named scheme
    pub fn persistence(name: impl Into<String>, source: anyhow::Error) -> Self {
        SchemeError::Persistence {
            name: name.into(),
            source: source.into(),
        }
    }

    /// Name of the scheme this error concerns
    pub fn scheme_name(&self) -> &str {
        match self {
            SchemeError::DuplicateName(name)
            | SchemeError::UnresolvedSelection(name)
            | SchemeError::NotFound(name)
            | SchemeError::ReadOnly(name) => name,
            SchemeError::Persistence { name, .. } => name,
        }
    }
}
