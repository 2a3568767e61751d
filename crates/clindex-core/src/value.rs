//! Typed value model and JSON path evaluation.
//!
//! Evaluates a parsed path expression against a resource instance and hands
//! back the matching values, tagged with a concrete type where navigation
//! could narrow a choice-typed property. The token extractor coerces the
//! results into the closed set of shapes it understands.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::pathexpr::{InfixOperator, PathExpression};

/// An identifier attached to a resource (business identifier).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identifier {
    pub system: Option<String>,
    pub value: Option<String>,
}

/// A single coded value from a code system.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coding {
    pub system: Option<String>,
    pub code: Option<String>,
    pub display: Option<String>,
}

/// A concept, optionally with free text and one or more codings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeableConcept {
    pub text: Option<String>,
    #[serde(default)]
    pub coding: Vec<Coding>,
}

/// A contact detail (phone, email, …).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactPoint {
    pub system: Option<String>,
    pub value: Option<String>,
}

/// A reference to another resource, possibly carrying an identifier instead
/// of (or alongside) a literal reference URI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reference {
    pub reference: Option<String>,
    pub display: Option<String>,
    pub identifier: Option<Identifier>,
}

/// The closed set of value shapes the token subsystem understands.
///
/// Matched exhaustively by consumers; adding a shape is a compile-time
/// exhaustiveness failure rather than a silent fallthrough.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    Identifier(Identifier),
    Coding(Coding),
    CodeableConcept(CodeableConcept),
    ContactPoint(ContactPoint),
    Reference(Reference),
    Primitive(Value),
}

impl TypedValue {
    /// Coerce a JSON value into a shape, guided by a declared type code.
    ///
    /// Returns `None` when the value cannot be read as the requested
    /// structured shape; unknown type codes fall through to `Primitive`.
    pub fn from_json(value: &Value, type_code: &str) -> Option<TypedValue> {
        match type_code {
            "Identifier" => serde_json::from_value(value.clone())
                .ok()
                .map(TypedValue::Identifier),
            "Coding" => serde_json::from_value(value.clone())
                .ok()
                .map(TypedValue::Coding),
            "CodeableConcept" => serde_json::from_value(value.clone())
                .ok()
                .map(TypedValue::CodeableConcept),
            "ContactPoint" => serde_json::from_value(value.clone())
                .ok()
                .map(TypedValue::ContactPoint),
            "Reference" => serde_json::from_value(value.clone())
                .ok()
                .map(TypedValue::Reference),
            _ => Some(TypedValue::Primitive(value.clone())),
        }
    }
}

/// One value produced by path evaluation. `type_hint` carries the concrete
/// type when navigation went through a type-suffixed choice key or a cast.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluatedValue {
    pub value: Value,
    pub type_hint: Option<String>,
}

/// Typed-value evaluator consumed by the token extractor.
pub trait ValueEvaluator {
    /// Evaluate a path expression against a resource instance.
    fn evaluate(&self, resource: &Value, expression: &PathExpression) -> Vec<EvaluatedValue>;
}

/// Default evaluator walking raw resource JSON.
///
/// Arrays are flattened transparently, choice-typed properties match their
/// type-suffixed JSON keys, and `where(...)` predicates are applied with the
/// small predicate language search parameters actually use. Unknown
/// functions yield no values; strictness about unsupported constructs is the
/// compiler's job, not the evaluator's.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEvaluator;

impl ValueEvaluator for JsonEvaluator {
    fn evaluate(&self, resource: &Value, expression: &PathExpression) -> Vec<EvaluatedValue> {
        let mut results = Vec::new();
        for clause in expression.split_union() {
            results.extend(eval_node(resource, clause));
        }
        results
    }
}

fn eval_node(resource: &Value, expr: &PathExpression) -> Vec<EvaluatedValue> {
    match expr {
        PathExpression::Identifier(name) => {
            let resource_type = resource.get("resourceType").and_then(Value::as_str);
            if resource_type == Some(name.as_str())
                || name == "Resource"
                || name == "DomainResource"
            {
                vec![EvaluatedValue {
                    value: resource.clone(),
                    type_hint: None,
                }]
            } else {
                Vec::new()
            }
        }

        PathExpression::Property { base, name } => eval_node(resource, base)
            .iter()
            .flat_map(|ev| navigate_property(&ev.value, name))
            .collect(),

        PathExpression::Index { base, index } => {
            eval_node(resource, base).into_iter().nth(*index).into_iter().collect()
        }

        PathExpression::Cast { base, type_name } => {
            filter_by_type(eval_node(resource, base), type_name)
        }

        PathExpression::Call {
            base: Some(base),
            function,
            args,
        } => {
            let values = eval_node(resource, base);
            match function.as_str() {
                "where" => match args.first() {
                    Some(predicate) => values
                        .into_iter()
                        .filter(|ev| eval_predicate(&ev.value, predicate))
                        .collect(),
                    None => values,
                },
                "ofType" | "as" => match args.first() {
                    Some(PathExpression::Identifier(type_name)) => {
                        filter_by_type(values, type_name)
                    }
                    _ => Vec::new(),
                },
                "resolve" => values,
                "first" => values.into_iter().take(1).collect(),
                "last" => values.into_iter().last().into_iter().collect(),
                other => {
                    tracing::trace!(function = other, "unhandled function in value evaluation");
                    Vec::new()
                }
            }
        }

        // Boolean contexts and bare calls produce no values
        _ => Vec::new(),
    }
}

fn navigate_property(value: &Value, name: &str) -> Vec<EvaluatedValue> {
    match value {
        Value::Object(obj) => {
            if let Some(child) = obj.get(name) {
                return flatten(child, None);
            }
            // Choice-typed properties are stored under type-suffixed keys,
            // e.g. `effective` matches `effectiveDateTime`
            let mut results = Vec::new();
            for (key, child) in obj {
                if key.len() > name.len()
                    && key.starts_with(name)
                    && key.as_bytes()[name.len()].is_ascii_uppercase()
                {
                    results.extend(flatten(child, Some(key[name.len()..].to_string())));
                }
            }
            results
        }
        Value::Array(arr) => arr
            .iter()
            .flat_map(|item| navigate_property(item, name))
            .collect(),
        _ => Vec::new(),
    }
}

fn flatten(value: &Value, type_hint: Option<String>) -> Vec<EvaluatedValue> {
    match value {
        Value::Array(arr) => arr
            .iter()
            .map(|item| EvaluatedValue {
                value: item.clone(),
                type_hint: type_hint.clone(),
            })
            .collect(),
        Value::Null => Vec::new(),
        other => vec![EvaluatedValue {
            value: other.clone(),
            type_hint,
        }],
    }
}

/// Keep values whose hint matches the requested type. Values that carry no
/// hint pass through: the compiled plan already pinned their declared type.
fn filter_by_type(values: Vec<EvaluatedValue>, type_name: &str) -> Vec<EvaluatedValue> {
    values
        .into_iter()
        .filter(|ev| match &ev.type_hint {
            Some(hint) => hint.eq_ignore_ascii_case(type_name),
            None => true,
        })
        .map(|ev| EvaluatedValue {
            value: ev.value,
            type_hint: Some(type_name.to_string()),
        })
        .collect()
}

fn eval_predicate(item: &Value, predicate: &PathExpression) -> bool {
    match predicate {
        PathExpression::Infix { op, left, right } => match op {
            InfixOperator::Equals => predicate_equals(item, left, right),
            InfixOperator::NotEquals => !predicate_equals(item, left, right),
            InfixOperator::And => {
                eval_predicate(item, left) && eval_predicate(item, right)
            }
            InfixOperator::Or => eval_predicate(item, left) || eval_predicate(item, right),
        },

        // `resolve() is Patient`: check the reference target type
        PathExpression::Check { base, type_name } => {
            if matches!(
                base.as_ref(),
                PathExpression::Call { function, .. } if function == "resolve"
            ) {
                item.get("reference")
                    .and_then(Value::as_str)
                    .is_some_and(|r| r.starts_with(&format!("{type_name}/")))
            } else {
                false
            }
        }

        PathExpression::Call {
            base: Some(base),
            function,
            ..
        } if function == "exists" => !resolve_relative(item, base).is_empty(),

        _ => false,
    }
}

fn predicate_equals(item: &Value, left: &PathExpression, right: &PathExpression) -> bool {
    match (left, right) {
        (PathExpression::Literal(lit), path) | (path, PathExpression::Literal(lit)) => {
            resolve_relative(item, path)
                .iter()
                .any(|v| scalar_to_string(v).as_deref() == Some(lit.as_str()))
        }
        _ => false,
    }
}

/// Resolve a property chain relative to a predicate item.
fn resolve_relative(item: &Value, expr: &PathExpression) -> Vec<Value> {
    match expr {
        PathExpression::Identifier(name) => match item.get(name) {
            Some(Value::Array(arr)) => arr.clone(),
            Some(Value::Null) | None => Vec::new(),
            Some(other) => vec![other.clone()],
        },
        PathExpression::Property { base, name } => resolve_relative(item, base)
            .iter()
            .flat_map(|v| resolve_relative(v, &PathExpression::Identifier(name.clone())))
            .collect(),
        _ => Vec::new(),
    }
}

/// String form of a scalar JSON value, `None` for containers and null.
pub fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pathexpr::parse_path_expression;
    use serde_json::json;

    fn eval(resource: &Value, expression: &str) -> Vec<EvaluatedValue> {
        let expr = parse_path_expression(expression).unwrap();
        JsonEvaluator.evaluate(resource, &expr)
    }

    #[test]
    fn test_evaluate_simple_property() {
        let resource = json!({"resourceType": "Patient", "gender": "female"});
        let values = eval(&resource, "Patient.gender");
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].value, json!("female"));
    }

    #[test]
    fn test_evaluate_flattens_arrays() {
        let resource = json!({
            "resourceType": "Patient",
            "identifier": [
                {"system": "http://hospital.org", "value": "MRN123"},
                {"system": "http://insurer.org", "value": "9876"}
            ]
        });
        let values = eval(&resource, "Patient.identifier");
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn test_evaluate_resource_type_mismatch() {
        let resource = json!({"resourceType": "Observation", "status": "final"});
        assert!(eval(&resource, "Patient.gender").is_empty());
    }

    #[test]
    fn test_evaluate_union_picks_matching_clause() {
        let resource = json!({"resourceType": "Person", "name": [{"family": "Chalmers"}]});
        let values = eval(&resource, "Patient.name | Person.name");
        assert_eq!(values.len(), 1);
    }

    #[test]
    fn test_evaluate_choice_property() {
        let resource = json!({
            "resourceType": "Observation",
            "valueQuantity": {"value": 4.2, "unit": "mg"}
        });
        let values = eval(&resource, "Observation.value");
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].type_hint.as_deref(), Some("Quantity"));
    }

    #[test]
    fn test_evaluate_of_type_filter() {
        let resource = json!({
            "resourceType": "Observation",
            "valueString": "high"
        });
        assert_eq!(eval(&resource, "Observation.value.ofType(string)").len(), 1);
        assert!(eval(&resource, "Observation.value.ofType(Quantity)").is_empty());
    }

    #[test]
    fn test_evaluate_where_predicate() {
        let resource = json!({
            "resourceType": "Patient",
            "telecom": [
                {"system": "phone", "value": "555-0100"},
                {"system": "email", "value": "chalmers@example.com"}
            ]
        });
        let values = eval(&resource, "Patient.telecom.where(system='phone')");
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].value["value"], json!("555-0100"));
    }

    #[test]
    fn test_evaluate_resolve_is_filter() {
        let resource = json!({
            "resourceType": "Observation",
            "subject": {"reference": "Patient/123"}
        });
        let values = eval(
            &resource,
            "Observation.subject.where(resolve() is Patient)",
        );
        assert_eq!(values.len(), 1);
        assert!(
            eval(&resource, "Observation.subject.where(resolve() is Group)").is_empty()
        );
    }

    #[test]
    fn test_evaluate_indexer_and_first_last() {
        let resource = json!({
            "resourceType": "Patient",
            "name": [{"family": "Chalmers"}, {"family": "Windsor"}]
        });
        let indexed = eval(&resource, "Patient.name[1]");
        assert_eq!(indexed.len(), 1);
        assert_eq!(indexed[0].value["family"], json!("Windsor"));

        assert_eq!(
            eval(&resource, "Patient.name.first()")[0].value["family"],
            json!("Chalmers")
        );
        assert_eq!(
            eval(&resource, "Patient.name.last()")[0].value["family"],
            json!("Windsor")
        );
    }

    #[test]
    fn test_typed_value_coercion() {
        let concept = json!({
            "text": "Fever",
            "coding": [{"system": "http://loinc.org", "code": "386661006"}]
        });
        let typed = TypedValue::from_json(&concept, "CodeableConcept").unwrap();
        let TypedValue::CodeableConcept(cc) = typed else {
            panic!("expected CodeableConcept");
        };
        assert_eq!(cc.text.as_deref(), Some("Fever"));
        assert_eq!(cc.coding.len(), 1);

        let scalar = json!("final");
        assert_eq!(
            TypedValue::from_json(&scalar, "code"),
            Some(TypedValue::Primitive(json!("final")))
        );
    }
}
