//! Search parameter registry and compiled-plan cache.
//!
//! The registry stores parameter definitions indexed by (resource type,
//! code) and by canonical URL, with common parameters (base includes
//! `Resource`/`DomainResource`) applying to every resource type. The plan
//! cache memoizes compiler output per (resource type, code) for the process
//! lifetime; it is rebuilt only when the structural schema itself is
//! replaced, which is owned by the schema-loading caller.
//!
//! Uses DashMap for lock-free concurrent access. Compilation is pure, so
//! concurrent callers may race to compile the same plan; the first inserted
//! result is kept and redundant computation is tolerated.

use dashmap::DashMap;
use std::sync::Arc;

use clindex_core::CoreError;
use clindex_core::schema::SchemaProvider;

use crate::details::{SearchParameterDetails, compile_search_parameter_details};
use crate::parameters::{SearchParameter, SearchParameterKind, derive_identifier_parameter};

/// Registry for search parameter definitions plus the compiled-plan cache.
///
/// Thread-safe with lock-free reads.
#[derive(Debug, Default)]
pub struct SearchParameterRegistry {
    /// Parameters indexed by (resource_type, code) as composite key
    by_resource: DashMap<(String, String), Arc<SearchParameter>>,
    /// All parameters by canonical URL
    by_url: DashMap<String, Arc<SearchParameter>>,
    /// Common parameters (apply to all resources)
    common: DashMap<String, Arc<SearchParameter>>,
    /// Compiled plans by (resource_type, code)
    plans: DashMap<(String, String), Arc<SearchParameterDetails>>,
}

impl SearchParameterRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a search parameter definition.
    ///
    /// Thread-safe; can be called concurrently from multiple threads.
    pub fn register(&self, param: SearchParameter) {
        let param = Arc::new(param);

        self.by_url.insert(param.url.clone(), param.clone());

        if param.is_common() {
            self.common.insert(param.code.clone(), param.clone());
        }

        for base in &param.base {
            self.by_resource
                .insert((base.clone(), param.code.clone()), param.clone());
        }
    }

    /// Get a search parameter for a resource type and code.
    ///
    /// Checks resource-specific parameters first, then common parameters.
    /// A `code:identifier` miss derives the identifier companion of the
    /// underlying reference parameter on the fly.
    pub fn get(&self, resource_type: &str, code: &str) -> Option<Arc<SearchParameter>> {
        let key = (resource_type.to_string(), code.to_string());
        if let Some(param) = self.by_resource.get(&key) {
            return Some(param.clone());
        }
        if let Some(param) = self.common.get(code) {
            return Some(param.clone());
        }

        if let Some(base_code) = code.strip_suffix(":identifier") {
            let base = self.get(resource_type, base_code)?;
            if base.kind == SearchParameterKind::Reference {
                return Some(Arc::new(derive_identifier_parameter(&base)));
            }
        }

        None
    }

    /// Get all search parameters applicable to a resource type.
    pub fn get_all_for_type(&self, resource_type: &str) -> Vec<Arc<SearchParameter>> {
        let mut params: Vec<_> = self
            .common
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        params.extend(
            self.by_resource
                .iter()
                .filter(|entry| entry.key().0 == resource_type)
                .map(|entry| entry.value().clone()),
        );
        params
    }

    /// Get a search parameter by its canonical URL.
    pub fn get_by_url(&self, url: &str) -> Option<Arc<SearchParameter>> {
        self.by_url.get(url).map(|entry| entry.value().clone())
    }

    /// Get the compiled plan for a (resource type, code) pair, compiling and
    /// caching it on first use.
    ///
    /// Compute-or-fetch is idempotent rather than mutually exclusive:
    /// concurrent racers may both compile, the first inserted result wins,
    /// and every caller sees a structurally identical plan.
    pub fn details(
        &self,
        resource_type: &str,
        code: &str,
        schema: &dyn SchemaProvider,
    ) -> Result<Arc<SearchParameterDetails>, CoreError> {
        let key = (resource_type.to_string(), code.to_string());
        if let Some(hit) = self.plans.get(&key) {
            return Ok(hit.clone());
        }

        let param = self.get(resource_type, code).ok_or_else(|| {
            CoreError::configuration(format!(
                "unknown search parameter {resource_type}.{code}"
            ))
        })?;
        let details = compile_search_parameter_details(resource_type, &param, schema)?;
        tracing::debug!(
            resource_type = resource_type,
            code = code,
            storage = ?details.storage,
            array = details.array,
            "compiled search parameter plan"
        );

        let entry = self.plans.entry(key).or_insert_with(|| Arc::new(details));
        Ok(entry.value().clone())
    }

    /// Number of registered parameter definitions.
    pub fn len(&self) -> usize {
        self.by_url.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.by_url.is_empty()
    }

    /// Number of cached compiled plans.
    pub fn cached_plans(&self) -> usize {
        self.plans.len()
    }
}
