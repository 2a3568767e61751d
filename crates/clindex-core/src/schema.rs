//! Structural schema model and element lookup.
//!
//! The search parameter compiler walks path expressions against this model.
//! It is intentionally schema-level: it knows declared element types and
//! cardinality, not profiles. Choice-typed elements are stored under their
//! `name[x]` key and resolved either unnarrowed (`value`) or narrowed to a
//! single type through a type-suffixed property name (`valueQuantity`).

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single declared type of a schema element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementType {
    pub code: String,
}

impl ElementType {
    pub fn new(code: impl Into<String>) -> Self {
        Self { code: code.into() }
    }
}

/// One property of a structural type, as declared by the schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementDefinition {
    /// Dotted schema path, e.g. `Observation.code`
    pub path: String,
    /// Declared types; more than one entry means a choice-typed element
    #[serde(rename = "type")]
    pub types: Vec<ElementType>,
    /// Whether the element is multi-valued
    pub array: bool,
}

impl ElementDefinition {
    /// Create a new element definition with the given declared type codes.
    pub fn new(path: impl Into<String>, type_codes: &[&str]) -> Self {
        Self {
            path: path.into(),
            types: type_codes.iter().map(|c| ElementType::new(*c)).collect(),
            array: false,
        }
    }

    /// Mark the element as multi-valued.
    #[must_use]
    pub fn with_array(mut self, array: bool) -> Self {
        self.array = array;
        self
    }

    /// Check whether the element declares the given type code.
    pub fn has_type(&self, code: &str) -> bool {
        self.types.iter().any(|t| t.code == code)
    }
}

/// The outcome of resolving one path step against a type.
///
/// `narrowed` is set when a choice-typed element was matched through a
/// type-suffixed property name and carries the single narrowed type code.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedElement {
    pub definition: ElementDefinition,
    pub narrowed: Option<String>,
}

/// Structural schema lookup consumed by the search parameter compiler.
pub trait SchemaProvider {
    /// Resolve a property of a type (or backbone path) to its element
    /// definition. `type_key` is either a type name (`Patient`, `HumanName`)
    /// or a backbone path (`Patient.contact`).
    fn resolve_element(&self, type_key: &str, property: &str) -> Option<ResolvedElement>;

    /// Whether a type code is a backbone/element wrapper whose children are
    /// keyed by the parent path rather than a named type.
    fn is_backbone_element(&self, type_code: &str) -> bool;
}

/// In-memory structural schema.
///
/// Element tables are ordered so compiled plans are stable across runs.
#[derive(Debug, Default)]
pub struct StructureSchema {
    types: HashMap<String, IndexMap<String, ElementDefinition>>,
}

impl StructureSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one element under a type or backbone key.
    pub fn define(&mut self, type_key: &str, property: &str, element: ElementDefinition) {
        self.types
            .entry(type_key.to_string())
            .or_default()
            .insert(property.to_string(), element);
    }

    /// Check whether the schema knows a type or backbone key.
    pub fn contains_type(&self, type_key: &str) -> bool {
        self.types.contains_key(type_key)
    }

    /// Number of registered type keys.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl SchemaProvider for StructureSchema {
    fn resolve_element(&self, type_key: &str, property: &str) -> Option<ResolvedElement> {
        let elements = self.types.get(type_key)?;

        // Exact property name
        if let Some(definition) = elements.get(property) {
            return Some(ResolvedElement {
                definition: definition.clone(),
                narrowed: None,
            });
        }

        // Choice-typed elements: `value[x]` answers both `value` (unnarrowed)
        // and `valueQuantity` (narrowed to Quantity)
        for (key, definition) in elements {
            let Some(base) = key.strip_suffix("[x]") else {
                continue;
            };
            if property == base {
                return Some(ResolvedElement {
                    definition: definition.clone(),
                    narrowed: None,
                });
            }
            if let Some(suffix) = property.strip_prefix(base)
                && suffix.chars().next().is_some_and(|c| c.is_ascii_uppercase())
                && let Some(t) = definition
                    .types
                    .iter()
                    .find(|t| t.code.eq_ignore_ascii_case(suffix))
            {
                return Some(ResolvedElement {
                    definition: definition.clone(),
                    narrowed: Some(t.code.clone()),
                });
            }
        }

        None
    }

    fn is_backbone_element(&self, type_code: &str) -> bool {
        type_code == "BackboneElement" || type_code == "Element"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> StructureSchema {
        let mut schema = StructureSchema::new();
        schema.define(
            "Patient",
            "birthDate",
            ElementDefinition::new("Patient.birthDate", &["date"]),
        );
        schema.define(
            "Patient",
            "name",
            ElementDefinition::new("Patient.name", &["HumanName"]).with_array(true),
        );
        schema.define(
            "Observation",
            "value[x]",
            ElementDefinition::new("Observation.value[x]", &["Quantity", "string", "dateTime"]),
        );
        schema
    }

    #[test]
    fn test_resolve_exact() {
        let schema = schema();
        let resolved = schema.resolve_element("Patient", "birthDate").unwrap();
        assert_eq!(resolved.definition.path, "Patient.birthDate");
        assert!(resolved.narrowed.is_none());
        assert!(!resolved.definition.array);

        assert!(schema.resolve_element("Patient", "nope").is_none());
        assert!(schema.resolve_element("Practitioner", "name").is_none());
    }

    #[test]
    fn test_resolve_choice_unnarrowed() {
        let schema = schema();
        let resolved = schema.resolve_element("Observation", "value").unwrap();
        assert!(resolved.narrowed.is_none());
        assert_eq!(resolved.definition.types.len(), 3);
    }

    #[test]
    fn test_resolve_choice_narrowed() {
        let schema = schema();
        let resolved = schema
            .resolve_element("Observation", "valueQuantity")
            .unwrap();
        assert_eq!(resolved.narrowed.as_deref(), Some("Quantity"));

        // Primitive type codes are lowercase in the schema but the property
        // suffix is capitalized
        let resolved = schema
            .resolve_element("Observation", "valueDateTime")
            .unwrap();
        assert_eq!(resolved.narrowed.as_deref(), Some("dateTime"));

        assert!(schema.resolve_element("Observation", "valueRatio").is_none());
    }

    #[test]
    fn test_backbone_detection() {
        let schema = schema();
        assert!(schema.is_backbone_element("BackboneElement"));
        assert!(schema.is_backbone_element("Element"));
        assert!(!schema.is_backbone_element("HumanName"));
    }
}
