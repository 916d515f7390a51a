pub mod flat;
pub mod syntax;

pub use flat::FlatNode;
pub use syntax::{is_truthy, Position, Slot, SourceLocation, SyntaxNode};
