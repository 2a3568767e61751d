//! Token extraction.
//!
//! Evaluates compiled token parameters against a resource instance and
//! produces the deduplicated (code, system, value) triples that get encoded
//! into the shared token column. Reference parameters participate through
//! their derived `code:identifier` companions, whose values are references
//! carrying an identifier.

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use clindex_core::CoreError;
use clindex_core::pathexpr::parse_path_expression;
use clindex_core::value::{
    Coding, EvaluatedValue, TypedValue, ValueEvaluator, scalar_to_string,
};

use crate::details::{SearchParameterDetails, StorageStrategy};
use crate::parameters::SearchParameter;

/// Reserved system bucket for tokens derived from concept text and coding
/// display values; targeted by the TEXT operator.
pub const TEXT_SYSTEM: &str = "text";

/// Element types whose tokens preserve case.
const CASE_SENSITIVE_TYPES: &[&str] = &["Identifier", "CodeableConcept", "Coding"];

/// One extracted token: the atomic unit of exact-match indexing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupToken {
    pub code: String,
    pub system: Option<String>,
    pub value: Option<String>,
}

/// Whether a parameter's tokens are matched case-sensitively.
///
/// `:identifier` companions are always case-sensitive; otherwise the element
/// type decides. ContactPoint-derived tokens are lower-cased at extraction
/// regardless of this policy.
pub fn is_case_sensitive(param: &SearchParameter, details: &SearchParameterDetails) -> bool {
    if param.code.ends_with(":identifier") {
        return true;
    }
    details
        .element_definitions
        .iter()
        .flat_map(|element| element.types.iter())
        .any(|t| CASE_SENSITIVE_TYPES.contains(&t.code.as_str()))
}

/// Extracts tokens from resource instances using compiled plans.
pub struct TokenExtractor<'a> {
    evaluator: &'a dyn ValueEvaluator,
}

impl<'a> TokenExtractor<'a> {
    pub fn new(evaluator: &'a dyn ValueEvaluator) -> Self {
        Self { evaluator }
    }

    /// Extract the deduplicated token list for one resource.
    ///
    /// Only parameters whose plan stores encoded token entries contribute.
    /// Order of first occurrence is preserved; duplicates by
    /// (code, system, value) collapse to one token.
    pub fn extract(
        &self,
        resource: &Value,
        parameters: &[(Arc<SearchParameter>, Arc<SearchParameterDetails>)],
    ) -> Result<Vec<LookupToken>, CoreError> {
        let mut seen: IndexSet<(String, Option<String>, Option<String>)> = IndexSet::new();
        for (param, details) in parameters {
            if details.storage != StorageStrategy::TokenColumns {
                continue;
            }
            self.extract_parameter(resource, param, details, &mut seen)?;
        }
        Ok(seen
            .into_iter()
            .map(|(code, system, value)| LookupToken {
                code,
                system,
                value,
            })
            .collect())
    }

    fn extract_parameter(
        &self,
        resource: &Value,
        param: &SearchParameter,
        details: &SearchParameterDetails,
        seen: &mut IndexSet<(String, Option<String>, Option<String>)>,
    ) -> Result<(), CoreError> {
        let Some(expression) = param.expression.as_deref() else {
            return Ok(());
        };
        let parsed = parse_path_expression(expression)?;
        let case_sensitive = is_case_sensitive(param, details);

        for evaluated in self.evaluator.evaluate(resource, &parsed) {
            let type_code = resolved_type(&evaluated, details);
            let Some(typed) = TypedValue::from_json(&evaluated.value, &type_code) else {
                tracing::warn!(
                    code = %param.code,
                    declared = %type_code,
                    "discarding value that does not match its declared shape"
                );
                continue;
            };
            collect_tokens(&param.code, case_sensitive, &typed, seen);
        }
        Ok(())
    }
}

/// The concrete type of an evaluated value: the evaluator's narrowing if it
/// produced one, else the first declared type of the plan's elements.
fn resolved_type(evaluated: &EvaluatedValue, details: &SearchParameterDetails) -> String {
    if let Some(hint) = &evaluated.type_hint {
        return hint.clone();
    }
    details
        .element_definitions
        .iter()
        .flat_map(|element| element.types.iter())
        .map(|t| t.code.clone())
        .next()
        .unwrap_or_else(|| "string".to_string())
}

fn collect_tokens(
    code: &str,
    case_sensitive: bool,
    typed: &TypedValue,
    seen: &mut IndexSet<(String, Option<String>, Option<String>)>,
) {
    match typed {
        TypedValue::Identifier(identifier) => {
            push_token(
                seen,
                code,
                case_sensitive,
                identifier.system.clone(),
                identifier.value.clone(),
            );
        }

        TypedValue::CodeableConcept(concept) => {
            if concept.text.is_some() {
                push_token(
                    seen,
                    code,
                    case_sensitive,
                    Some(TEXT_SYSTEM.to_string()),
                    concept.text.clone(),
                );
            }
            for coding in &concept.coding {
                push_coding_tokens(seen, code, case_sensitive, coding);
            }
        }

        TypedValue::Coding(coding) => {
            push_coding_tokens(seen, code, case_sensitive, coding);
        }

        // Contact points are always case-insensitive
        TypedValue::ContactPoint(contact) => {
            push_token(
                seen,
                code,
                false,
                contact.system.clone(),
                contact.value.as_deref().map(str::to_lowercase),
            );
        }

        // Only the identifier accompanying a reference is token-indexed;
        // the reference URI itself belongs to the reference column
        TypedValue::Reference(reference) => {
            if let Some(identifier) = &reference.identifier {
                push_token(
                    seen,
                    code,
                    case_sensitive,
                    identifier.system.clone(),
                    identifier.value.clone(),
                );
            }
        }

        TypedValue::Primitive(value) => {
            if let Some(text) = scalar_to_string(value) {
                push_token(seen, code, case_sensitive, None, Some(text));
            }
        }
    }
}

fn push_coding_tokens(
    seen: &mut IndexSet<(String, Option<String>, Option<String>)>,
    code: &str,
    case_sensitive: bool,
    coding: &Coding,
) {
    if coding.display.is_some() {
        push_token(
            seen,
            code,
            case_sensitive,
            Some(TEXT_SYSTEM.to_string()),
            coding.display.clone(),
        );
    }
    push_token(
        seen,
        code,
        case_sensitive,
        coding.system.clone(),
        coding.code.clone(),
    );
}

fn push_token(
    seen: &mut IndexSet<(String, Option<String>, Option<String>)>,
    code: &str,
    case_sensitive: bool,
    system: Option<String>,
    value: Option<String>,
) {
    let system = system.filter(|s| !s.is_empty());
    let mut value = value.filter(|v| !v.is_empty());
    if system.is_none() && value.is_none() {
        return;
    }
    if !case_sensitive {
        value = value.map(|v| v.to_lowercase());
    }
    seen.insert((code.to_string(), system, value));
}
