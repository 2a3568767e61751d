//! Search parameter compilation.
//!
//! Walks a parsed path expression against the structural schema and derives
//! how the parameter is stored and queried: column name, semantic column
//! type, array-ness, and storage strategy. Compilation is a pure function of
//! (resource type, parameter definition, schema); identical inputs always
//! produce an identical plan, which is what makes the process-wide plan
//! cache safe without locking.
//!
//! Compilation failures are configuration errors: a search parameter that
//! cannot be compiled is a deployment-time defect, surfaced when the schema
//! is loaded and never retried per request.

use std::collections::BTreeSet;

use clindex_core::pathexpr::{PathExpression, parse_path_expression};
use clindex_core::schema::{ElementDefinition, SchemaProvider};
use clindex_core::CoreError;
use serde::{Deserialize, Serialize};

use crate::parameters::{SearchParameter, SearchParameterKind};

/// Semantic column type of a compiled search parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchColumnType {
    Boolean,
    Number,
    Quantity,
    Text,
    Reference,
    Canonical,
    Date,
    DateTime,
    Period,
    Uuid,
}

/// Physical representation chosen for a search parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageStrategy {
    /// Dedicated column on the resource table
    InlineColumn,
    /// Side lookup table (names, contact points, addresses)
    LookupTable,
    /// Encoded entries in the shared token column
    TokenColumns,
}

/// The compiled, immutable plan for one search parameter on one resource
/// type. Never mutated after construction; shared via `Arc` from the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchParameterDetails {
    /// Deterministic camelCase form of the hyphenated code
    pub column_name: String,
    /// Semantic column type
    pub column_type: SearchColumnType,
    /// Resolved schema elements of the final path step, in clause order
    pub element_definitions: Vec<ElementDefinition>,
    /// Whether the parameter can hold more than one value per resource
    pub array: bool,
    /// Physical storage strategy
    pub storage: StorageStrategy,
}

/// Parameters stored in the name lookup table.
const NAME_TABLE_PARAMS: &[&str] = &[
    "individual-given",
    "individual-family",
    "individual-phonetic",
    "Patient-name",
    "Person-name",
    "Practitioner-name",
    "RelatedPerson-name",
];

/// Parameters stored in the contact point lookup table.
const TELECOM_TABLE_PARAMS: &[&str] = &[
    "individual-telecom",
    "individual-email",
    "individual-phone",
    "OrganizationAffiliation-telecom",
    "OrganizationAffiliation-email",
    "OrganizationAffiliation-phone",
    "PractitionerRole-telecom",
    "PractitionerRole-email",
    "PractitionerRole-phone",
];

/// Parameters stored in the address lookup table.
const ADDRESS_TABLE_PARAMS: &[&str] = &[
    "individual-address",
    "InsurancePlan-address",
    "Location-address",
    "Organization-address",
];

/// Element types whose token parameters store encoded token entries.
const TOKEN_ELEMENT_TYPES: &[&str] = &["Identifier", "CodeableConcept", "Coding", "ContactPoint"];

/// Convert a hyphenated search code to its column name.
///
/// `-` and `:` are separators: `birth-date` becomes `birthDate`,
/// `subject:identifier` becomes `subjectIdentifier`.
pub fn convert_code_to_column_name(code: &str) -> String {
    let mut out = String::with_capacity(code.len());
    let mut upper_next = false;
    for c in code.chars() {
        if c == '-' || c == ':' {
            upper_next = true;
        } else if upper_next {
            out.extend(c.to_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }
    out
}

/// Compile a search parameter against the structural schema.
pub fn compile_search_parameter_details(
    resource_type: &str,
    param: &SearchParameter,
    schema: &dyn SchemaProvider,
) -> Result<SearchParameterDetails, CoreError> {
    if let Some(details) = base_parameter_details(&param.code) {
        return Ok(details);
    }

    let expression = param.expression.as_deref().ok_or_else(|| {
        CoreError::configuration(format!("search parameter {} has no expression", param.id))
    })?;
    let parsed = parse_path_expression(expression)?;

    // A union expression may cover several resource types; retain only the
    // clauses that apply here
    let clauses: Vec<&PathExpression> = parsed
        .split_union()
        .into_iter()
        .filter(|clause| {
            matches!(
                clause.leading_identifier(),
                Some(lead) if lead == resource_type || lead == "Resource" || lead == "DomainResource"
            )
        })
        .collect();
    if clauses.is_empty() {
        return Err(CoreError::configuration(format!(
            "no clause of search parameter {} applies to {resource_type}",
            param.id
        )));
    }

    let mut walker = DetailsWalker {
        schema,
        array: false,
        narrowed: BTreeSet::new(),
        elements: Vec::new(),
    };
    let mut forced_single = false;

    for clause in clauses {
        let (leading, steps) = flatten_steps(clause)?;
        match detect_special_case(&steps) {
            // Common extension shape indexed without profile awareness:
            // always an array of codes
            Some(SpecialCase::ExtensionValueCode { extension_step }) => {
                walker.walk_clause(&leading, &steps[..=extension_step])?;
                walker.narrowed.insert("code".to_string());
                walker.array = true;
            }
            // Arrays of dateTime are not supported by the query layer
            Some(SpecialCase::ExtensionValueDateTime) => {
                walker.walk_clause(&leading, &steps)?;
                forced_single = true;
            }
            None => walker.walk_clause(&leading, &steps)?,
        }
    }
    if forced_single {
        walker.array = false;
    }

    let declared: BTreeSet<String> = walker
        .elements
        .iter()
        .flat_map(|e| e.types.iter().map(|t| t.code.clone()))
        .collect();
    let property_types = if walker.narrowed.is_empty() {
        declared.clone()
    } else {
        walker.narrowed.clone()
    };
    let observed: BTreeSet<String> = declared.union(&property_types).cloned().collect();

    Ok(SearchParameterDetails {
        column_name: convert_code_to_column_name(&param.code),
        column_type: column_type_for(param.kind, &property_types),
        element_definitions: walker.elements,
        array: walker.array,
        storage: classify_storage(param, &observed),
    })
}

/// Fixed plans for base parameters that exist on every resource row and
/// never consult the schema.
fn base_parameter_details(code: &str) -> Option<SearchParameterDetails> {
    match code {
        "_id" => Some(SearchParameterDetails {
            column_name: "id".to_string(),
            column_type: SearchColumnType::Uuid,
            element_definitions: Vec::new(),
            array: false,
            storage: StorageStrategy::InlineColumn,
        }),
        "_lastUpdated" => Some(SearchParameterDetails {
            column_name: "lastUpdated".to_string(),
            column_type: SearchColumnType::DateTime,
            element_definitions: Vec::new(),
            array: false,
            storage: StorageStrategy::InlineColumn,
        }),
        _ => None,
    }
}

fn classify_storage(param: &SearchParameter, observed_types: &BTreeSet<String>) -> StorageStrategy {
    let id = param.id.as_str();
    if NAME_TABLE_PARAMS.contains(&id)
        || TELECOM_TABLE_PARAMS.contains(&id)
        || ADDRESS_TABLE_PARAMS.contains(&id)
        || param.code.starts_with("address-")
    {
        return StorageStrategy::LookupTable;
    }
    if param.kind == SearchParameterKind::Token
        && (param.code.ends_with(":identifier")
            || TOKEN_ELEMENT_TYPES
                .iter()
                .any(|t| observed_types.contains(*t)))
    {
        return StorageStrategy::TokenColumns;
    }
    StorageStrategy::InlineColumn
}

fn column_type_for(
    kind: SearchParameterKind,
    property_types: &BTreeSet<String>,
) -> SearchColumnType {
    let single = |code: &str| property_types.len() == 1 && property_types.contains(code);
    match kind {
        SearchParameterKind::Date => {
            if single("date") {
                SearchColumnType::Date
            } else if single("Period") {
                SearchColumnType::Period
            } else {
                SearchColumnType::DateTime
            }
        }
        SearchParameterKind::Reference => {
            if property_types.contains("canonical") {
                SearchColumnType::Canonical
            } else {
                SearchColumnType::Reference
            }
        }
        SearchParameterKind::Token => {
            if single("boolean") {
                SearchColumnType::Boolean
            } else {
                SearchColumnType::Text
            }
        }
        SearchParameterKind::Number => SearchColumnType::Number,
        SearchParameterKind::Quantity => SearchColumnType::Quantity,
        SearchParameterKind::String
        | SearchParameterKind::Uri
        | SearchParameterKind::Composite
        | SearchParameterKind::Special => SearchColumnType::Text,
    }
}

// ============================================================================
// Expression flattening
// ============================================================================

/// One linear step of a flattened expression clause.
#[derive(Debug, Clone, PartialEq)]
enum FlatStep {
    Property(String),
    Index(usize),
    /// Type narrowing from `as`, `ofType`, or `where(resolve() is T)`
    Cast(String),
}

/// Flatten a clause into (leading type identifier, linear steps).
///
/// Generic `where(...)` filters and trailing `first()`/`last()` selectors
/// affect result cardinality, not the stored shape, and are dropped;
/// type-discriminating predicates are kept as casts.
fn flatten_steps(clause: &PathExpression) -> Result<(String, Vec<FlatStep>), CoreError> {
    let mut steps = Vec::new();
    flatten_into(clause, &mut steps)?;
    match steps.split_first() {
        Some((FlatStep::Property(leading), rest)) => Ok((leading.clone(), rest.to_vec())),
        _ => Err(CoreError::UnsupportedExpression(
            "expression clause does not start with a type identifier".to_string(),
        )),
    }
}

fn flatten_into(expr: &PathExpression, out: &mut Vec<FlatStep>) -> Result<(), CoreError> {
    match expr {
        PathExpression::Identifier(name) => out.push(FlatStep::Property(name.clone())),

        PathExpression::Property { base, name } => {
            flatten_into(base, out)?;
            out.push(FlatStep::Property(name.clone()));
        }

        PathExpression::Index { base, index } => {
            flatten_into(base, out)?;
            out.push(FlatStep::Index(*index));
        }

        PathExpression::Cast { base, type_name } => {
            flatten_into(base, out)?;
            out.push(FlatStep::Cast(type_name.clone()));
        }

        PathExpression::Call {
            base: Some(base),
            function,
            args,
        } => {
            flatten_into(base, out)?;
            match function.as_str() {
                "where" => {
                    if let Some(type_name) = type_discriminator(args) {
                        out.push(FlatStep::Cast(type_name));
                    }
                }
                "ofType" | "as" => match args.first() {
                    Some(PathExpression::Identifier(type_name)) => {
                        out.push(FlatStep::Cast(type_name.clone()));
                    }
                    _ => {
                        return Err(CoreError::UnsupportedExpression(format!(
                            "{function}() requires a type name argument"
                        )));
                    }
                },
                "resolve" | "first" | "last" => {}
                other => return Err(CoreError::UnsupportedFunction(other.to_string())),
            }
        }

        PathExpression::Call { base: None, function, .. } => {
            return Err(CoreError::UnsupportedFunction(function.clone()));
        }

        PathExpression::Union { .. }
        | PathExpression::Infix { .. }
        | PathExpression::Check { .. }
        | PathExpression::Literal(_) => {
            return Err(CoreError::UnsupportedExpression(format!("{expr:?}")));
        }
    }
    Ok(())
}

/// Extract the narrowed type from a `where(resolve() is T)` predicate.
fn type_discriminator(args: &[PathExpression]) -> Option<String> {
    match args.first() {
        Some(PathExpression::Check { base, type_name })
            if matches!(
                base.as_ref(),
                PathExpression::Call { function, .. } if function == "resolve"
            ) =>
        {
            Some(type_name.clone())
        }
        _ => None,
    }
}

// ============================================================================
// Special cases
// ============================================================================

/// The two documented paths where the generic schema walk is overridden
/// instead of requiring full profile awareness.
#[derive(Debug, PartialEq)]
enum SpecialCase {
    ExtensionValueCode { extension_step: usize },
    ExtensionValueDateTime,
}

fn detect_special_case(steps: &[FlatStep]) -> Option<SpecialCase> {
    let props: Vec<(usize, &str)> = steps
        .iter()
        .enumerate()
        .filter_map(|(i, step)| match step {
            FlatStep::Property(name) => Some((i, name.as_str())),
            _ => None,
        })
        .collect();
    let names: Vec<&str> = props.iter().map(|(_, name)| *name).collect();

    if names.ends_with(&["extension", "value", "code"]) {
        return Some(SpecialCase::ExtensionValueCode {
            extension_step: props[props.len() - 3].0,
        });
    }
    if names.ends_with(&["extension", "value", "coding", "code"]) {
        return Some(SpecialCase::ExtensionValueCode {
            extension_step: props[props.len() - 4].0,
        });
    }
    if names.ends_with(&["extension", "valueDateTime"]) {
        return Some(SpecialCase::ExtensionValueDateTime);
    }
    None
}

// ============================================================================
// Schema walk
// ============================================================================

struct DetailsWalker<'a> {
    schema: &'a dyn SchemaProvider,
    array: bool,
    narrowed: BTreeSet<String>,
    elements: Vec<ElementDefinition>,
}

impl DetailsWalker<'_> {
    /// Walk one flattened clause, accumulating array-ness, narrowed types,
    /// and the resolved elements of the final step.
    fn walk_clause(&mut self, leading: &str, steps: &[FlatStep]) -> Result<(), CoreError> {
        let mut current: Vec<String> = vec![leading.to_string()];
        let mut last: Vec<ElementDefinition> = Vec::new();

        for (i, step) in steps.iter().enumerate() {
            match step {
                FlatStep::Property(name) => {
                    // An indexer directly after a step pins it to one value
                    let pinned = matches!(steps.get(i + 1), Some(FlatStep::Index(_)));
                    let mut next: Vec<String> = Vec::new();
                    let mut resolved: Vec<ElementDefinition> = Vec::new();

                    for key in &current {
                        let Some(res) = self.schema.resolve_element(key, name) else {
                            continue;
                        };
                        if res.definition.array && !pinned {
                            self.array = true;
                        }
                        match &res.narrowed {
                            Some(narrowed_type) => {
                                self.narrowed.insert(narrowed_type.clone());
                                if !next.contains(narrowed_type) {
                                    next.push(narrowed_type.clone());
                                }
                            }
                            None => {
                                for t in &res.definition.types {
                                    let context = if self.schema.is_backbone_element(&t.code) {
                                        format!("{key}.{name}")
                                    } else {
                                        t.code.clone()
                                    };
                                    if !next.contains(&context) {
                                        next.push(context);
                                    }
                                }
                            }
                        }
                        resolved.push(res.definition);
                    }

                    if resolved.is_empty() {
                        return Err(CoreError::unresolved_path_segment(
                            current.join(" | "),
                            name.clone(),
                        ));
                    }
                    current = next;
                    last = resolved;
                }
                FlatStep::Index(_) => {}
                FlatStep::Cast(type_name) => {
                    self.narrowed.insert(type_name.clone());
                    current = vec![type_name.clone()];
                }
            }
        }

        self.elements.extend(last);
        Ok(())
    }
}
