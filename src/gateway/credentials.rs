//! Credential Resolver
//!
//! Precedence, highest first:
//!
//! 1. A token and endpoint URL pair in the caller's request metadata
//! 2. A complete set of credential files in the first matching search
//!    directory (the backend reads them itself)
//!
//! When neither is found the request fails closed.

use super::error::GatewayError;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Transport-level metadata of one caller request (e.g. HTTP headers)
///
/// Keys are case-insensitive.
#[derive(Debug, Clone, Default)]
pub struct RequestMetadata {
    entries: HashMap<String, String>,
}

impl RequestMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl AsRef<str>, value: impl Into<String>) {
        self.entries
            .insert(key.as_ref().to_ascii_lowercase(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .get(&key.to_ascii_lowercase())
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for RequestMetadata {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut metadata = Self::new();
        for (key, value) in iter {
            metadata.insert(key, value);
        }
        metadata
    }
}

/// Where a bundle came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    RequestMetadata,
    Files(PathBuf),
}

/// Flag/value pairs prepended to every invocation
///
/// `Debug` never prints the values.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialBundle {
    pairs: Vec<(String, String)>,
    source: CredentialSource,
}

impl CredentialBundle {
    pub fn source(&self) -> &CredentialSource {
        &self.source
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Flag names carried by this bundle, used to mask logged argv
    pub fn flags(&self) -> impl Iterator<Item = &str> {
        self.pairs.iter().map(|(flag, _)| flag.as_str())
    }

    pub fn to_args(&self) -> Vec<String> {
        self.pairs
            .iter()
            .flat_map(|(flag, value)| [flag.clone(), value.clone()])
            .collect()
    }
}

impl fmt::Debug for CredentialBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialBundle")
            .field("flags", &self.flags().collect::<Vec<_>>())
            .field("source", &self.source)
            .finish()
    }
}

/// Metadata keys and the backend flags they map to
#[derive(Debug, Clone)]
pub struct HeaderCredentials {
    pub token_key: String,
    pub url_key: String,
    pub token_flag: String,
    pub url_flag: String,
}

/// Resolves a [`CredentialBundle`] for one backend
#[derive(Debug, Clone)]
pub struct CredentialResolver {
    backend: String,
    headers: HeaderCredentials,
    required_files: Vec<String>,
    search_dirs: Vec<PathBuf>,
}

impl CredentialResolver {
    pub fn new(
        backend: impl Into<String>,
        headers: HeaderCredentials,
        required_files: Vec<String>,
        search_dirs: Vec<PathBuf>,
    ) -> Self {
        Self {
            backend: backend.into(),
            headers,
            required_files,
            search_dirs,
        }
    }

    pub fn search_dirs(&self) -> &[PathBuf] {
        &self.search_dirs
    }

    /// Pick the credentials for one request
    ///
    /// # Errors
    ///
    /// [`GatewayError::CredentialsMissing`] when no source yields credentials.
    pub fn resolve(&self, metadata: &RequestMetadata) -> Result<CredentialBundle, GatewayError> {
        let token = metadata.get(&self.headers.token_key);
        let url = metadata.get(&self.headers.url_key);

        if let (Some(token), Some(url)) = (token, url) {
            debug!(backend = %self.backend, url = %url, "Using credentials from request metadata");
            return Ok(CredentialBundle {
                pairs: vec![
                    (self.headers.token_flag.clone(), token.to_string()),
                    (self.headers.url_flag.clone(), url.to_string()),
                ],
                source: CredentialSource::RequestMetadata,
            });
        }

        if let Some(dir) = self.find_credential_dir() {
            debug!(backend = %self.backend, dir = ?dir, "Using credential files");
            return Ok(CredentialBundle {
                pairs: Vec::new(),
                source: CredentialSource::Files(dir.to_path_buf()),
            });
        }

        Err(GatewayError::CredentialsMissing(self.backend.clone()))
    }

    fn find_credential_dir(&self) -> Option<&Path> {
        if self.required_files.is_empty() {
            return None;
        }
        self.search_dirs
            .iter()
            .find(|dir| self.required_files.iter().all(|file| dir.join(file).is_file()))
            .map(PathBuf::as_path)
    }
}

/// Expand a leading `~` to the user's home directory
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix('~') {
        Some(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest.trim_start_matches('/')),
            None => PathBuf::from(path),
        },
        None => PathBuf::from(path),
    }
}
