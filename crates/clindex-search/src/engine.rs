//! Token search engine facade.
//!
//! Ties the registry, structural schema, and value evaluator together behind
//! one object: the write path turns a resource instance into its encoded
//! token entries, the read path turns filters and sort codes into boolean
//! expressions and sort descriptions for the storage executor.

use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

use clindex_core::CoreError;
use clindex_core::schema::SchemaProvider;
use clindex_core::value::JsonEvaluator;

use crate::codec::encode_tokens;
use crate::condition::{
    ConditionError, Expression, TokenSort, ValueSetProvider, build_token_condition,
    build_token_sort,
};
use crate::details::{SearchParameterDetails, StorageStrategy};
use crate::filter::SearchFilter;
use crate::parameters::{SearchParameter, SearchParameterKind};
use crate::registry::SearchParameterRegistry;
use crate::tokens::{TokenExtractor, is_case_sensitive};

/// Errors surfaced by the engine facade.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Configuration(#[from] CoreError),

    #[error(transparent)]
    Condition(#[from] ConditionError),

    #[error("Unknown search parameter {resource_type}.{code}")]
    UnknownParameter { resource_type: String, code: String },

    #[error("Search parameter {resource_type}.{code} is not token-indexed")]
    NotTokenIndexed { resource_type: String, code: String },
}

impl EngineError {
    /// Check if this error is a client error (4xx category)
    pub fn is_client_error(&self) -> bool {
        match self {
            Self::Configuration(inner) => inner.is_client_error(),
            Self::Condition(inner) => inner.is_client_error(),
            Self::UnknownParameter { .. } | Self::NotTokenIndexed { .. } => true,
        }
    }
}

/// Facade over the token subsystem.
///
/// Owns no connections, transactions, or locks; every method is a
/// synchronous, side-effect-free transformation over in-memory data.
pub struct TokenSearchEngine<S: SchemaProvider> {
    registry: Arc<SearchParameterRegistry>,
    schema: Arc<S>,
    evaluator: JsonEvaluator,
}

impl<S: SchemaProvider> TokenSearchEngine<S> {
    pub fn new(registry: Arc<SearchParameterRegistry>, schema: Arc<S>) -> Self {
        Self {
            registry,
            schema,
            evaluator: JsonEvaluator,
        }
    }

    pub fn registry(&self) -> &SearchParameterRegistry {
        &self.registry
    }

    /// Write path: extract and encode the token entries of one resource.
    ///
    /// The result is persisted verbatim as the resource's token column.
    pub fn index_resource(
        &self,
        resource_type: &str,
        resource: &Value,
    ) -> Result<Vec<String>, EngineError> {
        let mut indexed: Vec<(Arc<SearchParameter>, Arc<SearchParameterDetails>)> = Vec::new();

        for param in self.registry.get_all_for_type(resource_type) {
            match param.kind {
                SearchParameterKind::Token => {
                    let details =
                        self.registry
                            .details(resource_type, &param.code, self.schema.as_ref())?;
                    if details.storage == StorageStrategy::TokenColumns {
                        indexed.push((param, details));
                    }
                }
                // Reference parameters index their identifier companion
                SearchParameterKind::Reference => {
                    let companion_code = format!("{}:identifier", param.code);
                    let Some(companion) = self.registry.get(resource_type, &companion_code)
                    else {
                        continue;
                    };
                    let details = self.registry.details(
                        resource_type,
                        &companion_code,
                        self.schema.as_ref(),
                    )?;
                    indexed.push((companion, details));
                }
                _ => {}
            }
        }

        // Registry iteration order is arbitrary; sort so the encoded column
        // is stable for identical resources
        indexed.sort_by(|a, b| a.0.code.cmp(&b.0.code));

        let extractor = TokenExtractor::new(&self.evaluator);
        let tokens = extractor.extract(resource, &indexed)?;
        tracing::debug!(
            resource_type = resource_type,
            tokens = tokens.len(),
            "indexed resource tokens"
        );
        Ok(encode_tokens(&tokens))
    }

    /// Read path: build the boolean expression for a token filter.
    pub fn token_condition(
        &self,
        resource_type: &str,
        filter: &SearchFilter,
        value_sets: &dyn ValueSetProvider,
    ) -> Result<Expression, EngineError> {
        let param = self.registry.get(resource_type, &filter.code).ok_or_else(|| {
            EngineError::UnknownParameter {
                resource_type: resource_type.to_string(),
                code: filter.code.clone(),
            }
        })?;
        let details = self
            .registry
            .details(resource_type, &filter.code, self.schema.as_ref())?;
        if details.storage != StorageStrategy::TokenColumns {
            return Err(EngineError::NotTokenIndexed {
                resource_type: resource_type.to_string(),
                code: filter.code.clone(),
            });
        }
        let case_sensitive = is_case_sensitive(&param, &details);
        Ok(build_token_condition(
            &details,
            filter,
            case_sensitive,
            value_sets,
        )?)
    }

    /// Read path: sort key description for a token sort code.
    pub fn token_sort(
        &self,
        resource_type: &str,
        code: &str,
        descending: bool,
    ) -> Result<TokenSort, EngineError> {
        if self.registry.get(resource_type, code).is_none() {
            return Err(EngineError::UnknownParameter {
                resource_type: resource_type.to_string(),
                code: code.to_string(),
            });
        }
        Ok(build_token_sort(code, descending))
    }
}
