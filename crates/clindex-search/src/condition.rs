//! Token condition and sort building.
//!
//! Translates a token filter plus a compiled plan into a boolean expression
//! tree over the encoded token column. The tree is storage-agnostic: leaves
//! are entry matchers evaluated against each encoded entry, and a generic
//! query-expression renderer owned by the storage layer turns it into an
//! executable query. All matcher payloads are in encoded space (escaped
//! fields, field-boundary prefixes), so the renderer needs only the codec's
//! reserved bytes and plain string operations.

use thiserror::Error;

use crate::codec::{
    FIELD_SEPARATOR, NULL_MARKER, TOKEN_COLUMN, encode_token, entry_prefix, escape_field,
};
use crate::details::{SearchParameterDetails, StorageStrategy};
use crate::filter::{SearchFilter, SystemQuery, TokenOperator, TokenQuery, parse_token_query};
use crate::tokens::{LookupToken, TEXT_SYSTEM};

/// Client input errors from condition building. Reported to the caller as a
/// structured bad-request outcome; never a crash.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConditionError {
    #[error("Invalid value for missing/present, expected true or false: {0}")]
    InvalidMissingValue(String),

    #[error("Invalid token value: {0}")]
    InvalidTokenValue(String),

    #[error("Unknown ValueSet: {0}")]
    UnknownValueSet(String),
}

impl ConditionError {
    /// All condition errors are client errors (4xx category).
    pub fn is_client_error(&self) -> bool {
        true
    }
}

/// ValueSet resolution consumed by IN/NOT_IN.
pub trait ValueSetProvider {
    /// The declared system/reference strings of a ValueSet, or `None` when
    /// the reference is unknown.
    fn systems(&self, reference: &str) -> Option<Vec<String>>;
}

/// Leaf predicate, evaluated against each encoded entry of the token column.
///
/// `scope` is always a field-boundary prefix (`code SEP` or
/// `code SEP system SEP`); `value` payloads are escaped field content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryMatcher {
    /// Entry equals the encoded form exactly
    Exact(String),
    /// Entry starts with the prefix
    Prefix(String),
    /// Entry starts with `scope` and its value slot equals `value`
    ValueExact { scope: String, value: String },
    /// Entry starts with `scope` and its value slot starts with `value`
    ValuePrefix { scope: String, value: String },
    /// Entry starts with `scope` and its value slot contains `value`
    ValueContains { scope: String, value: String },
}

impl EntryMatcher {
    /// Whether evaluating this matcher cannot use an exact-match index.
    pub fn is_expensive(&self) -> bool {
        matches!(self, Self::ValuePrefix { .. } | Self::ValueContains { .. })
    }
}

/// Boolean query expression over the encoded token column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expression {
    And(Vec<Expression>),
    Or(Vec<Expression>),
    Not(Box<Expression>),
    /// Some entry of `column` satisfies the matcher
    Match { column: String, matcher: EntryMatcher },
    /// Constant condition (empty disjunctions, empty ValueSets)
    Always(bool),
}

impl Expression {
    /// Leaf over the shared token column.
    pub fn match_entry(matcher: EntryMatcher) -> Self {
        Self::Match {
            column: TOKEN_COLUMN.to_string(),
            matcher,
        }
    }

    /// Negate an expression as a single unit.
    pub fn negate(inner: Expression) -> Self {
        Self::Not(Box::new(inner))
    }

    /// Whether any leaf requires a higher-cost scan.
    pub fn is_expensive(&self) -> bool {
        match self {
            Self::And(terms) | Self::Or(terms) => terms.iter().any(Expression::is_expensive),
            Self::Not(inner) => inner.is_expensive(),
            Self::Match { matcher, .. } => matcher.is_expensive(),
            Self::Always(_) => false,
        }
    }
}

/// Collapse a term list into a disjunction.
fn or_of(mut terms: Vec<Expression>) -> Expression {
    match terms.len() {
        0 => Expression::Always(true),
        1 => terms.pop().unwrap_or(Expression::Always(true)),
        _ => Expression::Or(terms),
    }
}

/// Build the boolean condition for a token filter against a compiled plan.
///
/// Comma-separated values become disjunction terms; a negating operator
/// negates the combined disjunction as a single unit, so `code:not=a,b`
/// means "neither a nor b".
pub fn build_token_condition(
    details: &SearchParameterDetails,
    filter: &SearchFilter,
    case_sensitive: bool,
    value_sets: &dyn ValueSetProvider,
) -> Result<Expression, ConditionError> {
    debug_assert_eq!(details.storage, StorageStrategy::TokenColumns);

    match filter.operator {
        TokenOperator::Missing | TokenOperator::Present => build_presence_condition(filter),
        TokenOperator::In | TokenOperator::NotIn => {
            build_membership_condition(filter, value_sets)
        }
        TokenOperator::Equals | TokenOperator::NotEquals | TokenOperator::Not => {
            build_equality_condition(filter, case_sensitive)
        }
        TokenOperator::Text => build_text_condition(filter, case_sensitive),
        TokenOperator::Contains => build_contains_condition(filter, case_sensitive),
    }
}

fn split_terms(values: &[String]) -> impl Iterator<Item = &str> {
    values
        .iter()
        .flat_map(|value| value.split(','))
        .filter(|term| !term.is_empty())
}

fn build_equality_condition(
    filter: &SearchFilter,
    case_sensitive: bool,
) -> Result<Expression, ConditionError> {
    let mut terms = Vec::new();
    for raw in split_terms(&filter.values) {
        let query = parse_token_query(raw)
            .ok_or_else(|| ConditionError::InvalidTokenValue(raw.to_string()))?;
        terms.push(equality_term(&filter.code, query, case_sensitive));
    }
    if terms.is_empty() {
        return Ok(Expression::Always(true));
    }
    let disjunction = or_of(terms);
    Ok(if filter.operator.is_negating() {
        Expression::negate(disjunction)
    } else {
        disjunction
    })
}

fn equality_term(code: &str, query: TokenQuery, case_sensitive: bool) -> Expression {
    let value = query.value.map(|v| fold_case(&v, case_sensitive));
    let matcher = match (query.system, value) {
        // system|value: one exact encoded entry
        (SystemQuery::Value(system), Some(value)) => EntryMatcher::Exact(encode_token(
            &LookupToken {
                code: code.to_string(),
                system: Some(system),
                value: Some(value),
            },
        )),
        // system|: any value under that system
        (SystemQuery::Value(system), None) => {
            EntryMatcher::Prefix(entry_prefix(code, Some(system.as_str())))
        }
        // |value: value stored without a system
        (SystemQuery::Absent, Some(value)) => EntryMatcher::Exact(encode_token(&LookupToken {
            code: code.to_string(),
            system: None,
            value: Some(value),
        })),
        (SystemQuery::Absent, None) => EntryMatcher::Prefix(format!(
            "{}{FIELD_SEPARATOR}{NULL_MARKER}{FIELD_SEPARATOR}",
            escape_field(code)
        )),
        // value: any system
        (SystemQuery::Any, Some(value)) => EntryMatcher::ValueExact {
            scope: entry_prefix(code, None),
            value: escape_field(&value),
        },
        (SystemQuery::Any, None) => EntryMatcher::Prefix(entry_prefix(code, None)),
    };
    Expression::match_entry(matcher)
}

fn build_text_condition(
    filter: &SearchFilter,
    case_sensitive: bool,
) -> Result<Expression, ConditionError> {
    let terms = split_terms(&filter.values)
        .map(|raw| {
            Expression::match_entry(EntryMatcher::ValuePrefix {
                scope: entry_prefix(&filter.code, Some(TEXT_SYSTEM)),
                value: escape_field(&fold_case(raw, case_sensitive)),
            })
        })
        .collect();
    Ok(or_of(terms))
}

fn build_contains_condition(
    filter: &SearchFilter,
    case_sensitive: bool,
) -> Result<Expression, ConditionError> {
    let scope = entry_prefix(&filter.code, None);
    let terms = split_terms(&filter.values)
        .map(|raw| {
            // Cheap prefix pre-filter first, then the substring scan
            Expression::And(vec![
                Expression::match_entry(EntryMatcher::Prefix(scope.clone())),
                Expression::match_entry(EntryMatcher::ValueContains {
                    scope: scope.clone(),
                    value: escape_field(&fold_case(raw, case_sensitive)),
                }),
            ])
        })
        .collect();
    Ok(or_of(terms))
}

fn build_presence_condition(filter: &SearchFilter) -> Result<Expression, ConditionError> {
    let literal = filter.values.first().map(String::as_str).unwrap_or("");
    let flag = if literal.eq_ignore_ascii_case("true") {
        true
    } else if literal.eq_ignore_ascii_case("false") {
        false
    } else {
        return Err(ConditionError::InvalidMissingValue(literal.to_string()));
    };

    // missing=true and present=false both assert absence
    let wants_missing = match filter.operator {
        TokenOperator::Missing => flag,
        _ => !flag,
    };
    let exists = Expression::match_entry(EntryMatcher::Prefix(entry_prefix(&filter.code, None)));
    Ok(if wants_missing {
        Expression::negate(exists)
    } else {
        exists
    })
}

fn build_membership_condition(
    filter: &SearchFilter,
    value_sets: &dyn ValueSetProvider,
) -> Result<Expression, ConditionError> {
    let mut terms = Vec::new();
    for reference in split_terms(&filter.values) {
        let systems = value_sets
            .systems(reference)
            .ok_or_else(|| ConditionError::UnknownValueSet(reference.to_string()))?;
        tracing::debug!(
            value_set = reference,
            systems = systems.len(),
            "resolved ValueSet membership"
        );
        if systems.is_empty() {
            terms.push(Expression::Always(false));
            continue;
        }
        terms.push(or_of(
            systems
                .iter()
                .map(|system| {
                    Expression::match_entry(EntryMatcher::Prefix(entry_prefix(
                        &filter.code,
                        Some(system.as_str()),
                    )))
                })
                .collect(),
        ));
    }
    if terms.is_empty() {
        return Ok(Expression::Always(true));
    }
    let combined = or_of(terms);
    Ok(if filter.operator.is_negating() {
        Expression::negate(combined)
    } else {
        combined
    })
}

fn fold_case(value: &str, case_sensitive: bool) -> String {
    if case_sensitive {
        value.to_string()
    } else {
        value.to_lowercase()
    }
}

/// Sort key description for a token-typed sort code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSort {
    pub column: String,
    /// Field-boundary prefix selecting the entries of the sort code
    pub entry_prefix: String,
    pub descending: bool,
}

/// Build the sort key for a token code.
///
/// The sort value is the value slot of the *first* encoded entry matching
/// the code. When a resource carries several entries for the same code the
/// chosen value depends on extraction order; this is a documented
/// limitation, not a defined ordering.
pub fn build_token_sort(code: &str, descending: bool) -> TokenSort {
    TokenSort {
        column: TOKEN_COLUMN.to_string(),
        entry_prefix: entry_prefix(code, None),
        descending,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::details::{SearchColumnType, SearchParameterDetails};
    use std::collections::HashMap;

    struct StaticValueSets(HashMap<String, Vec<String>>);

    impl StaticValueSets {
        fn empty() -> Self {
            Self(HashMap::new())
        }

        fn with(reference: &str, systems: &[&str]) -> Self {
            let mut map = HashMap::new();
            map.insert(
                reference.to_string(),
                systems.iter().map(|s| s.to_string()).collect(),
            );
            Self(map)
        }
    }

    impl ValueSetProvider for StaticValueSets {
        fn systems(&self, reference: &str) -> Option<Vec<String>> {
            self.0.get(reference).cloned()
        }
    }

    fn details() -> SearchParameterDetails {
        SearchParameterDetails {
            column_name: "code".to_string(),
            column_type: SearchColumnType::Text,
            element_definitions: Vec::new(),
            array: true,
            storage: StorageStrategy::TokenColumns,
        }
    }

    fn build(filter: &SearchFilter, case_sensitive: bool) -> Expression {
        build_token_condition(&details(), filter, case_sensitive, &StaticValueSets::empty())
            .unwrap()
    }

    fn filter(operator: TokenOperator, value: &str) -> SearchFilter {
        SearchFilter::new("code", operator, vec![value.to_string()])
    }

    #[test]
    fn test_system_and_value_equality() {
        let expr = build(
            &filter(TokenOperator::Equals, "http://loinc.org|386661006"),
            true,
        );
        let expected = encode_token(&LookupToken {
            code: "code".to_string(),
            system: Some("http://loinc.org".to_string()),
            value: Some("386661006".to_string()),
        });
        assert_eq!(
            expr,
            Expression::match_entry(EntryMatcher::Exact(expected))
        );
        assert!(!expr.is_expensive());
    }

    #[test]
    fn test_case_insensitive_folds_value() {
        let expr = build(&filter(TokenOperator::Equals, "email|Homer@Example.COM"), false);
        let Expression::Match {
            matcher: EntryMatcher::Exact(entry),
            ..
        } = expr
        else {
            panic!("expected exact matcher");
        };
        assert!(entry.contains("homer@example.com"));
        // The system part is not folded
        assert!(entry.contains("email"));
    }

    #[test]
    fn test_system_only_and_value_only_forms() {
        let expr = build(&filter(TokenOperator::Equals, "http://loinc.org|"), true);
        assert_eq!(
            expr,
            Expression::match_entry(EntryMatcher::Prefix(entry_prefix(
                "code",
                Some("http://loinc.org")
            )))
        );

        let expr = build(&filter(TokenOperator::Equals, "|386661006"), true);
        let expected = encode_token(&LookupToken {
            code: "code".to_string(),
            system: None,
            value: Some("386661006".to_string()),
        });
        assert_eq!(expr, Expression::match_entry(EntryMatcher::Exact(expected)));

        let expr = build(&filter(TokenOperator::Equals, "386661006"), true);
        assert_eq!(
            expr,
            Expression::match_entry(EntryMatcher::ValueExact {
                scope: entry_prefix("code", None),
                value: "386661006".to_string(),
            })
        );
    }

    #[test]
    fn test_not_equals_negates_whole_disjunction() {
        let expr = build(&filter(TokenOperator::NotEquals, "a,b"), true);
        let Expression::Not(inner) = expr else {
            panic!("expected negation");
        };
        let Expression::Or(terms) = *inner else {
            panic!("expected disjunction inside the negation");
        };
        assert_eq!(terms.len(), 2);
    }

    #[test]
    fn test_missing_and_present() {
        let expr = build(&filter(TokenOperator::Missing, "true"), true);
        assert!(matches!(expr, Expression::Not(_)));

        let expr = build(&filter(TokenOperator::Missing, "false"), true);
        assert!(matches!(expr, Expression::Match { .. }));

        // present=false also asserts absence
        let expr = build(&filter(TokenOperator::Present, "false"), true);
        assert!(matches!(expr, Expression::Not(_)));

        let expr = build(&filter(TokenOperator::Present, "true"), true);
        assert!(matches!(expr, Expression::Match { .. }));
    }

    #[test]
    fn test_missing_rejects_bad_literal() {
        let err = build_token_condition(
            &details(),
            &filter(TokenOperator::Missing, "maybe"),
            true,
            &StaticValueSets::empty(),
        )
        .unwrap_err();
        assert_eq!(err, ConditionError::InvalidMissingValue("maybe".to_string()));
        assert!(err.is_client_error());
    }

    #[test]
    fn test_bare_pipe_is_client_error() {
        let err = build_token_condition(
            &details(),
            &filter(TokenOperator::Equals, "|"),
            true,
            &StaticValueSets::empty(),
        )
        .unwrap_err();
        assert_eq!(err, ConditionError::InvalidTokenValue("|".to_string()));
    }

    #[test]
    fn test_text_operator_targets_text_bucket() {
        let expr = build(&filter(TokenOperator::Text, "Fever"), true);
        let Expression::Match {
            matcher: EntryMatcher::ValuePrefix { scope, value },
            ..
        } = &expr
        else {
            panic!("expected value prefix matcher");
        };
        assert_eq!(scope, &entry_prefix("code", Some(TEXT_SYSTEM)));
        assert_eq!(value, "Fever");
        assert!(expr.is_expensive());
    }

    #[test]
    fn test_contains_pairs_scan_with_prefilter() {
        let expr = build(&filter(TokenOperator::Contains, "466"), true);
        let Expression::And(parts) = &expr else {
            panic!("expected conjunction");
        };
        assert!(matches!(
            &parts[0],
            Expression::Match {
                matcher: EntryMatcher::Prefix(_),
                ..
            }
        ));
        assert!(matches!(
            &parts[1],
            Expression::Match {
                matcher: EntryMatcher::ValueContains { .. },
                ..
            }
        ));
        assert!(expr.is_expensive());
    }

    #[test]
    fn test_value_set_membership() {
        let provider = StaticValueSets::with(
            "http://example.org/vs/loinc-codes",
            &["http://loinc.org", "http://snomed.info/sct"],
        );
        let expr = build_token_condition(
            &details(),
            &filter(TokenOperator::In, "http://example.org/vs/loinc-codes"),
            true,
            &provider,
        )
        .unwrap();
        let Expression::Or(terms) = &expr else {
            panic!("expected disjunction over member systems");
        };
        assert_eq!(terms.len(), 2);

        let expr = build_token_condition(
            &details(),
            &filter(TokenOperator::NotIn, "http://example.org/vs/loinc-codes"),
            true,
            &provider,
        )
        .unwrap();
        assert!(matches!(expr, Expression::Not(_)));
    }

    #[test]
    fn test_empty_value_set_matches_nothing() {
        let provider = StaticValueSets::with("http://example.org/vs/empty", &[]);
        let expr = build_token_condition(
            &details(),
            &filter(TokenOperator::In, "http://example.org/vs/empty"),
            true,
            &provider,
        )
        .unwrap();
        assert_eq!(expr, Expression::Always(false));
    }

    #[test]
    fn test_unknown_value_set_is_client_error() {
        let err = build_token_condition(
            &details(),
            &filter(TokenOperator::In, "http://example.org/vs/nope"),
            true,
            &StaticValueSets::empty(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            ConditionError::UnknownValueSet("http://example.org/vs/nope".to_string())
        );
    }

    #[test]
    fn test_token_sort_description() {
        let sort = build_token_sort("code", false);
        assert_eq!(sort.column, TOKEN_COLUMN);
        assert_eq!(sort.entry_prefix, entry_prefix("code", None));
        assert!(!sort.descending);
    }
}
