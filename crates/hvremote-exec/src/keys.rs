//! SSH key resolution

use std::path::{Path, PathBuf};

use russh::keys::{PrivateKey, decode_secret_key};
use tracing::{debug, warn};

/// Where the private key comes from
#[derive(Debug, Clone)]
pub enum KeySource {
    /// Key material given inline
    Literal(String),
    /// Path to a key file, `~/` is expanded to the home directory
    Path(PathBuf),
}

/// Key resolution errors
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("failed to get home directory")]
    NoHomeDir,

    #[error("key file not found: {0}")]
    NotFound(String),

    #[error("failed to parse private key: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl KeySource {
    /// Load and parse the private key
    ///
    /// # Errors
    /// Returns `KeyError` if the file is missing or unreadable, or the key
    /// cannot be parsed
    pub fn resolve(&self) -> Result<PrivateKey, KeyError> {
        match self {
            KeySource::Literal(material) => {
                decode_secret_key(material, None).map_err(|e| KeyError::Parse(e.to_string()))
            }
            KeySource::Path(path) => {
                let path = expand_home(path)?;
                if !path.exists() {
                    return Err(KeyError::NotFound(path.display().to_string()));
                }
                warn_if_too_open(&path);

                let material = std::fs::read_to_string(&path)?;
                debug!(path = %path.display(), "loaded private key file");
                decode_secret_key(&material, None).map_err(|e| {
                    KeyError::Parse(format!("{}: {e}", path.display()))
                })
            }
        }
    }
}

/// Expand a leading `~/` to the current user's home directory
///
/// # Errors
/// Returns `KeyError::NoHomeDir` if the path needs expanding and no home
/// directory is known
pub fn expand_home(path: &Path) -> Result<PathBuf, KeyError> {
    let Ok(rest) = path.strip_prefix("~") else {
        return Ok(path.to_path_buf());
    };
    let home = dirs::home_dir().ok_or(KeyError::NoHomeDir)?;
    Ok(home.join(rest))
}

#[cfg(unix)]
fn warn_if_too_open(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    if let Ok(metadata) = std::fs::metadata(path) {
        // group or other bits set
        if metadata.permissions().mode() & 0o77 != 0 {
            warn!(path = %path.display(), "key file permissions too open (should be 600)");
        }
    }
}

#[cfg(not(unix))]
fn warn_if_too_open(_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_home() {
        let home = dirs::home_dir().unwrap();
        let expanded = expand_home(Path::new("~/.ssh/id_rsa")).unwrap();

        assert_eq!(expanded, home.join(".ssh/id_rsa"));
    }

    #[test]
    fn test_absolute_path_untouched() {
        let expanded = expand_home(Path::new("/etc/ssh/key")).unwrap();
        assert_eq!(expanded, PathBuf::from("/etc/ssh/key"));
    }

    #[test]
    fn test_missing_key_file() {
        let source = KeySource::Path(PathBuf::from("/nonexistent/hvremote/id_rsa"));
        assert!(matches!(source.resolve(), Err(KeyError::NotFound(_))));
    }

    #[test]
    fn test_garbage_literal_key() {
        let source = KeySource::Literal("not a key".to_string());
        assert!(matches!(source.resolve(), Err(KeyError::Parse(_))));
    }
}
