//! Capability Negotiator
//!
//! Discovers the latest interface version of every backend subsystem once
//! per process and installs them as default arguments. Concurrent first
//! requests funnel through a single discovery call; a failed discovery leaves
//! the cache empty so a later request can retry.
//!
//! A backend upgrade is only picked up after a restart.

use super::error::GatewayError;
use super::executor::{Backend, BoundedExecutor};
use crate::metrics;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Negotiated default version per version flag
///
/// Keys are full flags (`--os-compute-api-version`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilityCache {
    versions: BTreeMap<String, String>,
}

impl CapabilityCache {
    pub fn new(versions: BTreeMap<String, String>) -> Self {
        Self { versions }
    }

    pub fn get(&self, flag: &str) -> Option<&str> {
        self.versions.get(flag).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    /// Default version arguments, minus any flag the caller set explicitly
    pub fn default_args(&self, user_args: &[String]) -> Vec<String> {
        self.versions
            .iter()
            .filter(|(flag, _)| !user_args.iter().any(|arg| flag_name(arg) == flag.as_str()))
            .flat_map(|(flag, version)| [flag.clone(), version.clone()])
            .collect()
    }
}

impl FromIterator<(String, String)> for CapabilityCache {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

fn flag_name(arg: &str) -> &str {
    arg.split_once('=').map_or(arg, |(name, _)| name)
}

/// Backend-specific discovery command and output format
pub trait VersionCatalog: Send + Sync {
    /// Arguments of the discovery command (credentials are prepended)
    fn discovery_args(&self) -> Vec<String>;

    /// Turn the discovery output into a cache
    fn parse(&self, output: &str) -> Result<CapabilityCache, String>;
}

/// One-shot, race-free version negotiation
pub struct CapabilityNegotiator {
    catalog: Box<dyn VersionCatalog>,
    cache: OnceLock<Arc<CapabilityCache>>,
    lock: Mutex<()>,
    negotiations: AtomicUsize,
}

impl std::fmt::Debug for CapabilityNegotiator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityNegotiator")
            .field("cache", &self.cache.get())
            .field("negotiations", &self.negotiations())
            .finish()
    }
}

impl CapabilityNegotiator {
    pub fn new(catalog: impl VersionCatalog + 'static) -> Self {
        Self {
            catalog: Box::new(catalog),
            cache: OnceLock::new(),
            lock: Mutex::new(()),
            negotiations: AtomicUsize::new(0),
        }
    }

    /// The cache, if negotiation already succeeded
    pub fn cached(&self) -> Option<Arc<CapabilityCache>> {
        self.cache.get().cloned()
    }

    /// How many times the cache was written (at most once)
    pub fn negotiations(&self) -> usize {
        self.negotiations.load(Ordering::SeqCst)
    }

    /// Return the cache, negotiating first if needed
    ///
    /// The discovery command runs through `executor`, so it takes an
    /// execution slot like any other command.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Negotiation`] when the discovery command fails or its
    /// output cannot be parsed.
    pub async fn ensure(
        &self,
        executor: &BoundedExecutor,
        backend: &dyn Backend,
        credential_args: &[String],
    ) -> Result<Arc<CapabilityCache>, GatewayError> {
        if let Some(cache) = self.cache.get() {
            return Ok(cache.clone());
        }

        let _guard = self.lock.lock().await;
        // Another request may have finished negotiating while we waited
        if let Some(cache) = self.cache.get() {
            return Ok(cache.clone());
        }

        let mut args = credential_args.to_vec();
        args.extend(self.catalog.discovery_args());

        debug!(program = %backend.program(), "Negotiating API versions");
        let result = executor.run(backend, &args).await;
        if !result.success() {
            warn!(
                program = %backend.program(),
                exit_code = result.exit_code,
                "Version discovery failed"
            );
            return Err(GatewayError::Negotiation(format!(
                "({}):\n{}\n{}",
                result.exit_code, result.stdout, result.stderr
            )));
        }

        let cache = Arc::new(
            self.catalog
                .parse(result.output())
                .map_err(GatewayError::Negotiation)?,
        );

        self.negotiations.fetch_add(1, Ordering::SeqCst);
        metrics::NEGOTIATIONS_TOTAL
            .with_label_values(&[backend.program()])
            .inc();
        info!(
            program = %backend.program(),
            services = cache.len(),
            "API version defaults negotiated"
        );

        // Only this guarded section ever sets the cell
        let _ = self.cache.set(cache.clone());
        Ok(cache)
    }
}
