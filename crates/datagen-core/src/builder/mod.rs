//! Builds a [`RootNode`] from a raw JSON document, collecting every problem
//! into a [`ValidationReport`] instead of stopping at the first one.
//!
//! Pass one declares collections (by key and final name), tags and pick
//! aliases. Pass two builds every collection and field against those
//! declarations. Checks that need finished items (self references,
//! conditional field names, shadow bindings) run last.

mod collection;
mod field;
mod reference;

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{Error, Result};
use crate::keywords::{COUNT, ITEM, NAME, PICK, SEED, TAGS};
use crate::node::{NodeId, RootNode};
use crate::validation::{ValidationIssue, ValidationReport};

/// Answers whether a generator id is known. Implemented by the generator
/// registry of the generation crate.
pub trait GeneratorCatalog {
    fn has_generator(&self, id: &str) -> bool;
}

impl GeneratorCatalog for [&str] {
    fn has_generator(&self, id: &str) -> bool {
        self.contains(&id)
    }
}

impl<const N: usize> GeneratorCatalog for [&str; N] {
    fn has_generator(&self, id: &str) -> bool {
        self.contains(&id)
    }
}

impl GeneratorCatalog for BTreeSet<String> {
    fn has_generator(&self, id: &str) -> bool {
        self.contains(id)
    }
}

/// A validated tree with the warnings found while building it.
#[derive(Debug, Clone)]
pub struct BuiltTree {
    pub root: RootNode,
    pub warnings: Vec<ValidationIssue>,
}

/// Tree builder bound to a generator catalog.
pub struct DslTreeBuilder<'c> {
    catalog: &'c dyn GeneratorCatalog,
}

impl<'c> DslTreeBuilder<'c> {
    pub fn new(catalog: &'c dyn GeneratorCatalog) -> Self {
        Self { catalog }
    }

    /// Build and validate. Returns every error found on failure.
    pub fn build(&self, document: &Value) -> std::result::Result<BuiltTree, ValidationReport> {
        let mut state = BuildState::new(self.catalog);

        let Value::Object(root) = document else {
            state.report.push_error(ValidationIssue::error(
                "invalid_root",
                "/",
                "DSL root must be an object",
            ));
            return Err(state.report);
        };

        let seed = state.parse_seed(root);
        state.declare(root);

        let mut collections = Vec::new();
        for (ordinal, (key, value)) in collection_entries(root).enumerate() {
            if let Some(collection) = state.build_collection(ordinal, key, value) {
                collections.push(collection);
            }
        }

        let root_node = RootNode { seed, collections };
        state.run_deferred(&root_node);

        debug!(
            collections = root_node.collections.len(),
            errors = state.report.errors.len(),
            warnings = state.report.warnings.len(),
            "dsl tree built"
        );

        if state.report.is_ok() {
            Ok(BuiltTree {
                root: root_node,
                warnings: state.report.warnings,
            })
        } else {
            Err(state.report)
        }
    }
}

/// Build and validate `document` against `catalog`.
pub fn build_tree(
    document: &Value,
    catalog: &dyn GeneratorCatalog,
) -> std::result::Result<BuiltTree, ValidationReport> {
    DslTreeBuilder::new(catalog).build(document)
}

/// Parse JSON text and build the tree, folding both failure kinds into
/// [`Error`].
pub fn parse_schema(json: &str, catalog: &dyn GeneratorCatalog) -> Result<BuiltTree> {
    let document: Value = serde_json::from_str(json)?;
    build_tree(&document, catalog).map_err(Error::Validation)
}

fn collection_entries(root: &Map<String, Value>) -> impl Iterator<Item = (&String, &Value)> {
    root.iter().filter(|(key, _)| key.as_str() != SEED)
}

/// Where a collection, tag or pick was declared.
#[derive(Debug, Clone)]
struct TagOwner {
    name: String,
    key: String,
}

#[derive(Debug, Clone)]
struct PickTarget {
    collection: String,
}

#[derive(Debug, Default)]
struct Declarations {
    /// Key or final name to first declaration ordinal.
    collections: BTreeMap<String, usize>,
    tags: BTreeMap<String, TagOwner>,
    picks: BTreeMap<String, PickTarget>,
}

/// Check that needs the finished tree.
#[derive(Debug)]
pub(crate) enum Deferred {
    SelfPath {
        collection: usize,
        pointer: String,
        reference: String,
        path: String,
    },
    Shadow {
        collection: usize,
        pointer: String,
        reference: String,
        binding: String,
    },
    Conditional {
        pointer: String,
        reference: String,
        collection: String,
        paths: Vec<String>,
        field: Option<String>,
    },
}

pub(crate) struct BuildState<'c> {
    catalog: &'c dyn GeneratorCatalog,
    declarations: Declarations,
    report: ValidationReport,
    deferred: Vec<Deferred>,
    next_id: u32,
}

/// Position of the field being built, for paths and messages.
#[derive(Debug, Clone)]
pub(crate) struct Scope {
    /// Ordinal of the owning collection.
    pub collection: usize,
    pub collection_key: String,
    /// JSON pointer of the current node.
    pub pointer: String,
    /// Dotted field name used in messages.
    pub field: String,
    /// True only for direct fields of a collection item.
    pub top_level: bool,
}

impl Scope {
    fn item(collection: usize, key: &str) -> Self {
        Self {
            collection,
            collection_key: key.to_string(),
            pointer: format!("/{}/item", escape_pointer(key)),
            field: String::new(),
            top_level: true,
        }
    }

    pub(crate) fn child(&self, name: &str) -> Self {
        let field = if self.field.is_empty() {
            name.to_string()
        } else {
            format!("{}.{name}", self.field)
        };
        Self {
            collection: self.collection,
            collection_key: self.collection_key.clone(),
            pointer: format!("{}/{}", self.pointer, escape_pointer(name)),
            field,
            top_level: false,
        }
    }

    /// Scope for a sub part of the same field (`filter/0`, `options/x`).
    pub(crate) fn part(&self, segment: &str, label: &str) -> Self {
        Self {
            collection: self.collection,
            collection_key: self.collection_key.clone(),
            pointer: format!("{}/{}", self.pointer, escape_pointer(segment)),
            field: format!("{}{label}", self.field),
            top_level: false,
        }
    }
}

fn escape_pointer(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

impl<'c> BuildState<'c> {
    fn new(catalog: &'c dyn GeneratorCatalog) -> Self {
        Self {
            catalog,
            declarations: Declarations::default(),
            report: ValidationReport::default(),
            deferred: Vec::new(),
            next_id: 0,
        }
    }

    pub(crate) fn next_id(&mut self) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        id
    }

    pub(crate) fn error(&mut self, code: &str, pointer: &str, message: impl Into<String>) {
        self.report
            .push_error(ValidationIssue::error(code, pointer, message));
    }

    pub(crate) fn warning(&mut self, code: &str, pointer: &str, message: impl Into<String>) {
        self.report
            .push_warning(ValidationIssue::warning(code, pointer, message));
    }

    fn parse_seed(&mut self, root: &Map<String, Value>) -> Option<u64> {
        let value = root.get(SEED)?;
        match value.as_u64() {
            Some(seed) => Some(seed),
            None => match value.as_i64() {
                // Negative seeds keep their bit pattern.
                Some(seed) => Some(seed as u64),
                None => {
                    self.error("invalid_seed", "/seed", "seed must be an integer");
                    None
                }
            },
        }
    }

    /// Pass one: collections, tags and picks.
    fn declare(&mut self, root: &Map<String, Value>) {
        for (ordinal, (key, value)) in collection_entries(root).enumerate() {
            let Value::Object(definition) = value else {
                continue;
            };
            let name = definition
                .get(NAME)
                .and_then(Value::as_str)
                .unwrap_or(key)
                .to_string();

            self.declarations
                .collections
                .entry(key.clone())
                .or_insert(ordinal);
            self.declarations
                .collections
                .entry(name.clone())
                .or_insert(ordinal);

            let pointer = format!("/{}", escape_pointer(key));
            self.declare_tags(key, &name, definition, &pointer);
            self.declare_picks(key, definition, &pointer);
        }
    }

    fn declare_tags(
        &mut self,
        key: &str,
        name: &str,
        definition: &Map<String, Value>,
        pointer: &str,
    ) {
        let Some(tags) = definition.get(TAGS) else {
            return;
        };
        let pointer = format!("{pointer}/{TAGS}");
        let Value::Array(tags) = tags else {
            self.error("invalid_tags", &pointer, "tags must be an array of strings");
            return;
        };

        for (idx, tag) in tags.iter().enumerate() {
            let Some(tag) = tag.as_str() else {
                self.error(
                    "invalid_tags",
                    &format!("{pointer}/{idx}"),
                    "tags must be an array of strings",
                );
                continue;
            };
            match self.declarations.tags.get(tag) {
                Some(owner) if owner.name != name => {
                    let message = format!(
                        "tag '{tag}' is already declared by collection '{}'",
                        owner.key
                    );
                    self.error("tag_conflict", &format!("{pointer}/{idx}"), message);
                }
                Some(_) => {}
                None => {
                    self.declarations.tags.insert(
                        tag.to_string(),
                        TagOwner {
                            name: name.to_string(),
                            key: key.to_string(),
                        },
                    );
                }
            }
        }
    }

    fn declare_picks(&mut self, key: &str, definition: &Map<String, Value>, pointer: &str) {
        let Some(picks) = definition.get(PICK) else {
            return;
        };
        let pointer = format!("{pointer}/{PICK}");
        let Value::Object(picks) = picks else {
            self.error("invalid_pick", &pointer, "pick must be an object");
            return;
        };
        let count = collection::count_of(definition);

        for (alias, index) in picks {
            let alias_pointer = format!("{pointer}/{}", escape_pointer(alias));
            let Some(index) = index.as_u64() else {
                self.error(
                    "invalid_pick",
                    &alias_pointer,
                    format!("pick alias '{alias}' must have an integer index"),
                );
                continue;
            };
            if let Some(count) = count
                && index >= count
            {
                self.error(
                    "pick_out_of_bounds",
                    &alias_pointer,
                    format!("pick alias '{alias}' index {index} is out of bounds (count: {count})"),
                );
                continue;
            }
            if self.declarations.picks.contains_key(alias) {
                self.error(
                    "duplicate_pick",
                    &alias_pointer,
                    format!("pick alias '{alias}' is already declared"),
                );
                continue;
            }
            self.declarations.picks.insert(
                alias.clone(),
                PickTarget {
                    collection: key.to_string(),
                },
            );
        }
    }

    pub(crate) fn collection_ordinal(&self, name: &str) -> Option<usize> {
        self.declarations.collections.get(name).copied()
    }

    pub(crate) fn has_tag(&self, tag: &str) -> bool {
        self.declarations.tags.contains_key(tag)
    }

    pub(crate) fn pick_collection(&self, alias: &str) -> Option<&str> {
        self.declarations
            .picks
            .get(alias)
            .map(|target| target.collection.as_str())
    }

    pub(crate) fn has_generator(&self, id: &str) -> bool {
        self.catalog.has_generator(id)
    }

    pub(crate) fn defer(&mut self, check: Deferred) {
        self.deferred.push(check);
    }

    /// Final pass over checks that need complete items.
    fn run_deferred(&mut self, root: &RootNode) {
        let deferred = std::mem::take(&mut self.deferred);
        let ordinals: BTreeMap<usize, usize> = root
            .collections
            .iter()
            .enumerate()
            .filter_map(|(idx, collection)| {
                self.collection_ordinal(&collection.key)
                    .map(|ordinal| (ordinal, idx))
            })
            .collect();

        for check in deferred {
            match check {
                Deferred::SelfPath {
                    collection,
                    pointer,
                    reference,
                    path,
                } => {
                    let Some(item) = ordinals
                        .get(&collection)
                        .map(|idx| &root.collections[*idx].item)
                    else {
                        continue;
                    };
                    if !item.has_path(&path) {
                        self.error(
                            "unknown_self_field",
                            &pointer,
                            format!("Self reference '{reference}' references non-existent field: {path}"),
                        );
                    }
                }
                Deferred::Shadow {
                    collection,
                    pointer,
                    reference,
                    binding,
                } => {
                    let Some(item) = ordinals
                        .get(&collection)
                        .map(|idx| &root.collections[*idx].item)
                    else {
                        continue;
                    };
                    let declared = format!("${binding}");
                    if item.get(&declared).is_none() {
                        self.error(
                            "unknown_shadow_binding",
                            &pointer,
                            format!(
                                "Reference '{reference}' uses shadow binding '{declared}' which is not declared in this item"
                            ),
                        );
                    }
                }
                Deferred::Conditional {
                    pointer,
                    reference,
                    collection,
                    paths,
                    field,
                } => {
                    let targets = root.resolve(&collection);
                    if targets.is_empty() {
                        continue;
                    }
                    for path in paths {
                        if !targets.iter().any(|target| target.item.has_path(&path)) {
                            self.error(
                                "unknown_condition_field",
                                &pointer,
                                format!(
                                    "Conditional reference '{reference}' references non-existent field '{path}' in collection '{collection}'"
                                ),
                            );
                        }
                    }
                    if let Some(field) = field
                        && !targets.iter().any(|target| target.item.has_path(&field))
                    {
                        self.error(
                            "unknown_condition_field",
                            &pointer,
                            format!(
                                "Conditional reference '{reference}' extracts non-existent field '{field}' from collection '{collection}'"
                            ),
                        );
                    }
                }
            }
        }
    }

    fn build_collection(
        &mut self,
        ordinal: usize,
        key: &str,
        value: &Value,
    ) -> Option<crate::node::CollectionNode> {
        let pointer = format!("/{}", escape_pointer(key));
        let Value::Object(definition) = value else {
            self.error(
                "invalid_collection",
                &pointer,
                format!("Collection '{key}' must be an object"),
            );
            return None;
        };

        let count = self.validate_count(definition, &pointer);
        let name = match definition.get(NAME) {
            None => key.to_string(),
            Some(Value::String(name)) => name.clone(),
            Some(_) => {
                self.error(
                    "invalid_name",
                    &format!("{pointer}/{NAME}"),
                    format!("Collection '{key}' name must be a string"),
                );
                key.to_string()
            }
        };

        let Some(item) = definition.get(ITEM) else {
            self.error(
                "missing_item",
                &pointer,
                format!("Collection '{key}' is missing required 'item' field"),
            );
            return None;
        };
        let Value::Object(item) = item else {
            self.error(
                "invalid_item",
                &format!("{pointer}/{ITEM}"),
                "Item definition must be an object",
            );
            return None;
        };

        let scope = Scope::item(ordinal, key);
        let item = self.build_item(&scope, item);

        Some(crate::node::CollectionNode {
            key: key.to_string(),
            name,
            count: count.unwrap_or(1),
            tags: collection::tags_of(definition),
            picks: collection::picks_of(definition),
            item,
        })
    }

    fn validate_count(&mut self, definition: &Map<String, Value>, pointer: &str) -> Option<u64> {
        let value = definition.get(COUNT)?;
        let pointer = format!("{pointer}/{COUNT}");
        if let Some(count) = value.as_u64() {
            return Some(count);
        }
        match value.as_i64() {
            Some(negative) => self.error(
                "invalid_count",
                &pointer,
                format!("count must be non-negative, got: {negative}"),
            ),
            None => self.error(
                "invalid_count",
                &pointer,
                "count must be a non-negative integer",
            ),
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    const CATALOG: [&str; 3] = ["name", "number", "uuid"];

    #[test]
    fn pointer_segments_are_escaped() {
        assert_eq!(escape_pointer("a/b~c"), "a~1b~0c");
    }

    #[test]
    fn seed_is_not_a_collection() {
        let tree = build_tree(
            &json!({"seed": 7, "users": {"count": 2, "item": {"id": {"gen": "uuid"}}}}),
            &CATALOG,
        )
        .expect("valid");
        assert_eq!(tree.root.seed, Some(7));
        assert_eq!(tree.root.collections.len(), 1);
        assert_eq!(tree.root.collections[0].count, 2);
    }

    #[test]
    fn root_must_be_an_object() {
        let report = build_tree(&json!([1, 2]), &CATALOG).expect_err("invalid");
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].message, "DSL root must be an object");
    }

    #[test]
    fn node_ids_are_unique() {
        let tree = build_tree(
            &json!({
                "users": {"item": {
                    "a": {"gen": "number"},
                    "b": {"gen": "number"},
                    "c": {"ref": "this.a"}
                }}
            }),
            &CATALOG,
        )
        .expect("valid");
        let item = &tree.root.collections[0].item;
        let mut ids = Vec::new();
        for entry in &item.fields {
            match &entry.node {
                crate::node::FieldNode::Generated(generated) => ids.push(generated.id),
                crate::node::FieldNode::Reference(reference) => ids.push(reference.reference.id),
                _ => {}
            }
        }
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 3);
    }
}
