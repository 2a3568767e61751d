pub mod codec;
pub mod condition;
pub mod details;
pub mod engine;
pub mod filter;
pub mod parameters;
pub mod registry;
pub mod tokens;

pub use codec::{CodecError, TOKEN_COLUMN, decode_tokens, encode_tokens};
pub use condition::{
    ConditionError, EntryMatcher, Expression, TokenSort, ValueSetProvider, build_token_condition,
    build_token_sort,
};
pub use details::{
    SearchColumnType, SearchParameterDetails, StorageStrategy, compile_search_parameter_details,
};
pub use engine::{EngineError, TokenSearchEngine};
pub use filter::{SearchFilter, SystemQuery, TokenOperator, TokenQuery};
pub use parameters::{SearchParameter, SearchParameterKind, derive_identifier_parameter};
pub use registry::SearchParameterRegistry;
pub use tokens::{LookupToken, TokenExtractor, is_case_sensitive};
