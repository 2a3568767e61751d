pub mod error;
pub mod pathexpr;
pub mod schema;
pub mod value;

pub use error::{CoreError, ErrorCategory, Result};
pub use pathexpr::{InfixOperator, PathExpression, parse_path_expression};
pub use schema::{
    ElementDefinition, ElementType, ResolvedElement, SchemaProvider, StructureSchema,
};
pub use value::{
    CodeableConcept, Coding, ContactPoint, EvaluatedValue, Identifier, JsonEvaluator, Reference,
    TypedValue, ValueEvaluator,
};
