pub mod api;
pub mod cli;
pub mod collector;
pub mod config;
pub mod error;
pub mod flatten;
pub mod parser;
pub mod storage;
pub mod types;

// Re-export commonly used types
pub use types::*;
pub use api::{TreeDex, TreeDexBuilder};
pub use cli::{CliApp, CliArgs};
pub use collector::{Collection, CollectOptions, FailurePolicy, SkipReason, SkippedFile, SourceCollector};
pub use config::TreedexConfig;
pub use error::{IndexerError, Result};
pub use flatten::{check_lineage, Flattener, IdAllocator, SequentialAllocator, UuidAllocator};
pub use parser::{ParseOptions, SourceLanguage, SourceParser, TreeSitterParser};
pub use storage::{FieldType, NodeIndex, Schema, SearchHit, SearchParams, SearchResult};
