//! Auth token lookup.
//!
//! The session reads the token through a [`TokenStore`] on every connect
//! attempt, so a token refreshed between retries is picked up. The client
//! never validates the token itself.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::RwLock;

use crate::error::TokenError;

/// Source of the persisted auth token.
pub trait TokenStore: Send + Sync {
    /// Current token, or `None` when the user has none stored.
    fn load(&self) -> Result<Option<String>, TokenError>;
}

/// In-memory token, replaceable at runtime.
#[derive(Debug, Default)]
pub struct StaticToken {
    token: RwLock<Option<String>>,
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(Some(token.into())),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn set(&self, token: impl Into<String>) {
        if let Ok(mut guard) = self.token.write() {
            *guard = Some(token.into());
        }
    }

    pub fn clear(&self) {
        if let Ok(mut guard) = self.token.write() {
            *guard = None;
        }
    }
}

impl TokenStore for StaticToken {
    fn load(&self) -> Result<Option<String>, TokenError> {
        Ok(self.token.read().map(|t| t.clone()).unwrap_or_default())
    }
}

/// Token persisted in a file, as written by the login flow.
///
/// A missing or blank file means "no token".
#[derive(Debug, Clone)]
pub struct FileToken {
    path: PathBuf,
}

impl FileToken {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl TokenStore for FileToken {
    fn load(&self) -> Result<Option<String>, TokenError> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => {
                let token = contents.trim();
                Ok((!token.is_empty()).then(|| token.to_string()))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(TokenError::Read {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

impl<T: TokenStore + ?Sized> TokenStore for std::sync::Arc<T> {
    fn load(&self) -> Result<Option<String>, TokenError> {
        (**self).load()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_static_token_set_and_clear() {
        let store = StaticToken::empty();
        assert_eq!(store.load().unwrap(), None);

        store.set("t1");
        assert_eq!(store.load().unwrap().as_deref(), Some("t1"));

        store.clear();
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn test_file_token_trims_whitespace() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "  eyJhbGciOi.payload.sig  ").unwrap();

        let store = FileToken::new(file.path());
        assert_eq!(store.load().unwrap().as_deref(), Some("eyJhbGciOi.payload.sig"));
    }

    #[test]
    fn test_file_token_missing_or_blank_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(FileToken::new(dir.path().join("absent")).load().unwrap(), None);

        let blank = dir.path().join("blank");
        std::fs::write(&blank, "\n").unwrap();
        assert_eq!(FileToken::new(&blank).load().unwrap(), None);
    }

    #[test]
    fn test_file_token_directory_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileToken::new(dir.path()).load().unwrap_err();
        assert!(matches!(err, TokenError::Read { .. }));
    }

    #[test]
    fn test_arc_store_delegates() {
        let store = std::sync::Arc::new(StaticToken::new("shared"));
        let cloned = store.clone();
        store.set("rotated");
        assert_eq!(cloned.load().unwrap().as_deref(), Some("rotated"));
    }
}
