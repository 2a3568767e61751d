//! Search filter model.
//!
//! A filter is (code, operator, values); values may carry comma-separated
//! disjunction terms, and each term may split on the first `|` into a
//! system part and a value part.

use serde::{Deserialize, Serialize};

/// Operators supported for token filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TokenOperator {
    /// Default equality match
    Equals,
    NotEquals,
    Not,
    /// Relaxed match against the text bucket (higher cost)
    Text,
    /// Substring match on token values (higher cost)
    Contains,
    Missing,
    Present,
    /// ValueSet membership
    In,
    NotIn,
}

impl TokenOperator {
    /// Parse an operator from its modifier spelling.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "eq" => Some(Self::Equals),
            "ne" => Some(Self::NotEquals),
            "not" => Some(Self::Not),
            "text" => Some(Self::Text),
            "contains" => Some(Self::Contains),
            "missing" => Some(Self::Missing),
            "present" => Some(Self::Present),
            "in" => Some(Self::In),
            "not-in" => Some(Self::NotIn),
            _ => None,
        }
    }

    /// Whether the operator negates the combined disjunction of its terms.
    pub fn is_negating(self) -> bool {
        matches!(self, Self::NotEquals | Self::Not | Self::NotIn)
    }
}

/// One token filter as received from the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchFilter {
    pub code: String,
    pub operator: TokenOperator,
    pub values: Vec<String>,
}

impl SearchFilter {
    pub fn new(code: impl Into<String>, operator: TokenOperator, values: Vec<String>) -> Self {
        Self {
            code: code.into(),
            operator,
            values,
        }
    }
}

/// The system part of a parsed `system|value` term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SystemQuery {
    /// No `|` present: match any system
    Any,
    /// `|value`: match tokens stored without a system
    Absent,
    /// `system|…`: match this system exactly
    Value(String),
}

/// One parsed disjunction term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenQuery {
    pub system: SystemQuery,
    pub value: Option<String>,
}

/// Parse one term. Splits on the first `|` only, so values may themselves
/// contain `|`. Returns `None` for terms that constrain nothing (`""`, `"|"`).
pub fn parse_token_query(raw: &str) -> Option<TokenQuery> {
    if raw.is_empty() || raw == "|" {
        return None;
    }
    match raw.split_once('|') {
        None => Some(TokenQuery {
            system: SystemQuery::Any,
            value: Some(raw.to_string()),
        }),
        Some(("", value)) => Some(TokenQuery {
            system: SystemQuery::Absent,
            value: Some(value.to_string()),
        }),
        Some((system, "")) => Some(TokenQuery {
            system: SystemQuery::Value(system.to_string()),
            value: None,
        }),
        Some((system, value)) => Some(TokenQuery {
            system: SystemQuery::Value(system.to_string()),
            value: Some(value.to_string()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_token_query_forms() {
        assert_eq!(
            parse_token_query("http://loinc.org|8480-6"),
            Some(TokenQuery {
                system: SystemQuery::Value("http://loinc.org".to_string()),
                value: Some("8480-6".to_string()),
            })
        );
        assert_eq!(
            parse_token_query("http://loinc.org|"),
            Some(TokenQuery {
                system: SystemQuery::Value("http://loinc.org".to_string()),
                value: None,
            })
        );
        assert_eq!(
            parse_token_query("|8480-6"),
            Some(TokenQuery {
                system: SystemQuery::Absent,
                value: Some("8480-6".to_string()),
            })
        );
        assert_eq!(
            parse_token_query("8480-6"),
            Some(TokenQuery {
                system: SystemQuery::Any,
                value: Some("8480-6".to_string()),
            })
        );
    }

    #[test]
    fn test_parse_token_query_splits_on_first_pipe_only() {
        let query = parse_token_query("urn:x|a|b").unwrap();
        assert_eq!(query.system, SystemQuery::Value("urn:x".to_string()));
        assert_eq!(query.value.as_deref(), Some("a|b"));
    }

    #[test]
    fn test_parse_token_query_rejects_empty() {
        assert_eq!(parse_token_query(""), None);
        assert_eq!(parse_token_query("|"), None);
    }

    #[test]
    fn test_operator_parse_and_negation() {
        assert_eq!(TokenOperator::parse("not-in"), Some(TokenOperator::NotIn));
        assert_eq!(TokenOperator::parse("bogus"), None);
        assert!(TokenOperator::NotEquals.is_negating());
        assert!(TokenOperator::Not.is_negating());
        assert!(TokenOperator::NotIn.is_negating());
        assert!(!TokenOperator::Equals.is_negating());
        assert!(!TokenOperator::Missing.is_negating());
    }
}
