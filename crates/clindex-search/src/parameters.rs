use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Declared search parameter type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchParameterKind {
    Number,
    Date,
    String,
    Token,
    Reference,
    Composite,
    Quantity,
    Uri,
    Special,
}

impl SearchParameterKind {
    /// Parse a declared search parameter type from a string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "number" => Some(Self::Number),
            "date" => Some(Self::Date),
            "string" => Some(Self::String),
            "token" => Some(Self::Token),
            "reference" => Some(Self::Reference),
            "composite" => Some(Self::Composite),
            "quantity" => Some(Self::Quantity),
            "uri" => Some(Self::Uri),
            "special" => Some(Self::Special),
            _ => None,
        }
    }
}

/// A declarative search parameter definition.
///
/// Carries the fields the compiler and extractor need: the hyphenated
/// identifier (`Patient-name`), the query code (`name`), the declared type,
/// the path expression, and the base resource types it applies to.
#[derive(Debug, Clone)]
pub struct SearchParameter {
    /// Hyphenated identifier, unique across the definition set
    pub id: String,
    /// The code used in search queries (e.g. "name", "identifier")
    pub code: String,
    /// The canonical URL of this search parameter
    pub url: String,
    /// Declared search parameter type
    pub kind: SearchParameterKind,
    /// Declarative path expression for extracting values
    pub expression: Option<String>,
    /// Resource types this parameter applies to
    pub base: Vec<String>,
    /// Target resource types for reference parameters
    pub target: Vec<String>,
    /// Human-readable description
    pub description: String,
}

impl SearchParameter {
    /// Create a new search parameter with required fields.
    pub fn new(
        id: impl Into<String>,
        code: impl Into<String>,
        kind: SearchParameterKind,
        base: Vec<String>,
    ) -> Self {
        let id = id.into();
        Self {
            url: format!("http://clindex.org/SearchParameter/{id}"),
            id,
            code: code.into(),
            kind,
            expression: None,
            base,
            target: Vec::new(),
            description: String::new(),
        }
    }

    /// Set the canonical URL.
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Set the path expression.
    #[must_use]
    pub fn with_expression(mut self, expression: impl Into<String>) -> Self {
        self.expression = Some(expression.into());
        self
    }

    /// Set target resource types.
    #[must_use]
    pub fn with_targets(mut self, targets: Vec<String>) -> Self {
        self.target = targets;
        self
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Check if this parameter applies to a given resource type.
    pub fn applies_to(&self, resource_type: &str) -> bool {
        self.base
            .iter()
            .any(|b| b == resource_type || b == "Resource" || b == "DomainResource")
    }

    /// Check if this is a common parameter (applies to all resources).
    pub fn is_common(&self) -> bool {
        self.base
            .iter()
            .any(|b| b == "Resource" || b == "DomainResource")
    }

    /// Get this parameter as an Arc for shared ownership.
    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }
}

/// Derive the identifier-shaped companion of a reference parameter.
///
/// A reference parameter `subject` implicitly also indexes the identifier
/// system/value that may accompany a reference, queryable as
/// `subject:identifier`. The companion is a token parameter over the same
/// expression; extraction reads `Reference.identifier` from its values.
pub fn derive_identifier_parameter(param: &SearchParameter) -> SearchParameter {
    SearchParameter {
        id: format!("{}-identifier", param.id),
        code: format!("{}:identifier", param.code),
        url: format!("{}-identifier", param.url),
        kind: SearchParameterKind::Token,
        expression: param.expression.clone(),
        base: param.base.clone(),
        target: Vec::new(),
        description: format!("Identifier companion of {}", param.code),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parse() {
        assert_eq!(
            SearchParameterKind::parse("token"),
            Some(SearchParameterKind::Token)
        );
        assert_eq!(
            SearchParameterKind::parse("reference"),
            Some(SearchParameterKind::Reference)
        );
        assert_eq!(SearchParameterKind::parse("bogus"), None);
    }

    #[test]
    fn test_applies_to() {
        let param = SearchParameter::new(
            "Patient-name",
            "name",
            SearchParameterKind::String,
            vec!["Patient".to_string()],
        );
        assert!(param.applies_to("Patient"));
        assert!(!param.applies_to("Observation"));
        assert!(!param.is_common());

        let common = SearchParameter::new(
            "Resource-id",
            "_id",
            SearchParameterKind::Token,
            vec!["Resource".to_string()],
        );
        assert!(common.applies_to("Patient"));
        assert!(common.is_common());
    }

    #[test]
    fn test_derive_identifier_parameter() {
        let subject = SearchParameter::new(
            "Observation-subject",
            "subject",
            SearchParameterKind::Reference,
            vec!["Observation".to_string()],
        )
        .with_expression("Observation.subject");

        let derived = derive_identifier_parameter(&subject);
        assert_eq!(derived.code, "subject:identifier");
        assert_eq!(derived.kind, SearchParameterKind::Token);
        assert_eq!(derived.expression.as_deref(), Some("Observation.subject"));
        assert_eq!(derived.base, vec!["Observation".to_string()]);
    }
}
