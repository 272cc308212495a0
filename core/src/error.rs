use std::fmt;
use std::path::PathBuf;


// ---------------------------------------------------------------------------
// Store errors
// ---------------------------------------------------------------------------

/// Errors surfaced by the registry, settings decoding and scenario loading.
///
/// The engine itself never fails: lookups that miss return `None` and
/// writes without a bound write-back are ignored.
#[derive(Debug)]
pub enum StoreError {
    /// No provider type is registered under this name.
    UnknownProviderType(String),
    /// A provider instance with this name already exists.
    ProviderExists(String),
    /// No provider instance is registered under this name.
    UnknownProvider(String),
    /// A provider setting could not be decoded into the requested type.
    InvalidSetting {
        key: String,
        error: serde_json::Error,
    },
    /// A scenario file could not be parsed.
    ScenarioParse(String),
    /// A scenario file could not be read.
    ScenarioNotFound(PathBuf),
    /// Filesystem I/O error.
    IoError(std::io::Error),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::UnknownProviderType(name) => {
                write!(f, "unknown provider type: {}", name)
            }
            StoreError::ProviderExists(name) => {
                write!(f, "provider already exists: {}", name)
            }
            StoreError::UnknownProvider(name) => write!(f, "unknown provider: {}", name),
            StoreError::InvalidSetting { key, error } => {
                write!(f, "invalid setting '{}': {}", key, error)
            }
            StoreError::ScenarioParse(msg) => write!(f, "invalid scenario: {}", msg),
            StoreError::ScenarioNotFound(path) => {
                write!(f, "scenario not found: {}", path.display())
            }
            StoreError::IoError(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::InvalidSetting { error, .. } => Some(error),
            StoreError::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::IoError(e)
    }
}

impl From<serde_yaml::Error> for StoreError {
    fn from(e: serde_yaml::Error) -> Self {
        StoreError::ScenarioParse(e.to_string())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(
            StoreError::UnknownProviderType("nt".into()).to_string(),
            "unknown provider type: nt"
        );
        assert_eq!(
            StoreError::ProviderExists("robot".into()).to_string(),
            "provider already exists: robot"
        );
        assert_eq!(
            StoreError::ScenarioNotFound(PathBuf::from("/tmp/x.yaml")).to_string(),
            "scenario not found: /tmp/x.yaml"
        );
    }

    #[test]
    fn io_error_converts() {
        let err: StoreError = std::io::Error::new(std::io::ErrorKind::Other, "boom").into();
        assert!(matches!(err, StoreError::IoError(_)));
        assert!(std::error::Error::source(&err).is_some());
    }
}
