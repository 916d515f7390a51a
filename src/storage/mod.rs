pub mod memory;
pub mod schema;

pub use memory::{
    tokenize, IndexStats, NodeIndex, QueryResult, SearchHit, SearchParams,
    SearchResult,
};
pub use schema::{FieldType, Schema};
