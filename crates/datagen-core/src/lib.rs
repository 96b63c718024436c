//! Core contracts for datagen.
//!
//! This crate defines the DSL node tree, the reference and condition
//! grammars, the tree builder that validates a raw schema document, and the
//! static dependency analysis used by the lazy generation path.

pub mod analysis;
pub mod builder;
pub mod condition;
pub mod error;
pub mod keywords;
pub mod node;
pub mod reference;
pub mod validation;

pub use analysis::{DependencyAnalysis, HotPaths, analyze_dependencies};
pub use builder::{BuiltTree, DslTreeBuilder, GeneratorCatalog, build_tree, parse_schema};
pub use condition::{
    Comparison, ComparisonOperator, Condition, ConditionValue, LogicalOperator, parse_condition,
};
pub use error::{Error, Result};
pub use node::{
    ArrayField, ArraySize, ChoiceField, CollectionNode, FieldEntry, FieldNode, GeneratedField,
    GeneratorOptions, ItemNode, NodeId, PickDecl, ReferenceField, ReferenceSpreadField, RootNode,
    RuntimeOption, SpreadField, SpreadMapping,
};
pub use reference::{
    IndexSelector, ReferenceNode, ReferenceSyntax, ReferenceTarget, TagSelector, parse_reference,
};
pub use validation::{IssueSeverity, ValidationIssue, ValidationReport};
