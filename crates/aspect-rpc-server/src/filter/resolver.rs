//! Filter resolution and per-method cache

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, trace};

use super::traits::{FilterEntry, RpcFilter};
use crate::error::RpcResult;
use crate::method::MethodDescriptor;
use crate::registry::{ServiceDescriptor, ServiceRegistry};
use crate::scope::RequestScope;

/// Cache key for a method's filter list: `declaringType#methodName`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodKey(String);

impl MethodKey {
    pub fn new(declaring_type: &str, method: &str) -> Self {
        Self(format!("{}#{}", declaring_type, method))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MethodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Computes and memoizes the ordered filter list of each method
///
/// The list for a key is composed exactly once: method-tier entries, then the
/// service's class-tier entries, then the global entries, each tier in
/// declaration order. Only the composition is cached. Instances for a
/// request are produced by [`FilterResolver::resolve`], which reuses shared
/// filters and builds scoped ones fresh from the request scope.
pub struct FilterResolver {
    global: Vec<FilterEntry>,
    cache: RwLock<HashMap<MethodKey, Arc<[FilterEntry]>>>,
    computations: AtomicUsize,
}

impl FilterResolver {
    pub fn new(global: Vec<FilterEntry>) -> Self {
        Self {
            global,
            cache: RwLock::new(HashMap::new()),
            computations: AtomicUsize::new(0),
        }
    }

    /// Global-tier entries in registration order
    pub fn global_filters(&self) -> &[FilterEntry] {
        &self.global
    }

    /// Ordered filter entries for `method` of `service` (get-or-compute)
    pub fn entries(
        &self,
        service: &ServiceDescriptor,
        method: &MethodDescriptor,
    ) -> Arc<[FilterEntry]> {
        let key = method.key();

        if let Some(entries) = self.cache.read().get(&key) {
            trace!(key = %key, "filter cache hit");
            return Arc::clone(entries);
        }

        // Re-check under the write lock: a concurrent first access may have won
        let mut cache = self.cache.write();
        let entries = cache.entry(key).or_insert_with_key(|key| {
            let entries = self.compose(service, method);
            self.computations.fetch_add(1, Ordering::Relaxed);
            debug!(
                key = %key,
                filters = ?entries.iter().map(FilterEntry::name).collect::<Vec<_>>(),
                "composed filter chain"
            );
            entries.into()
        });
        Arc::clone(entries)
    }

    /// Filter instances for one request, in resolved order
    pub fn resolve(
        &self,
        service: &ServiceDescriptor,
        method: &MethodDescriptor,
        scope: &RequestScope,
    ) -> RpcResult<Vec<Arc<dyn RpcFilter>>> {
        self.entries(service, method)
            .iter()
            .map(|entry| entry.instantiate(scope))
            .collect()
    }

    /// Compose the chain of every registered method ahead of the first request
    ///
    /// Returns the number of methods composed by this call.
    pub fn prewarm(&self, registry: &ServiceRegistry) -> usize {
        let before = self.computations();
        for service in registry.iter() {
            for method in service.methods() {
                self.entries(service, method);
            }
        }
        self.computations() - before
    }

    /// Number of cached method keys
    pub fn cached_len(&self) -> usize {
        self.cache.read().len()
    }

    /// How many times a chain was composed since construction
    pub fn computations(&self) -> usize {
        self.computations.load(Ordering::Relaxed)
    }

    fn compose(&self, service: &ServiceDescriptor, method: &MethodDescriptor) -> Vec<FilterEntry> {
        let mut entries: Vec<FilterEntry> = method
            .filters()
            .iter()
            .chain(service.filters())
            .chain(&self.global)
            .cloned()
            .collect();
        // Stable: declaration order survives within a tier
        entries.sort_by_key(FilterEntry::tier);
        debug_assert!(entries.windows(2).all(|w| w[0].tier() <= w[1].tier()));
        entries
    }
}

impl Default for FilterResolver {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl fmt::Debug for FilterResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterResolver")
            .field("global", &self.global)
            .field("cached", &self.cached_len())
            .field("computations", &self.computations())
            .finish()
    }
}
