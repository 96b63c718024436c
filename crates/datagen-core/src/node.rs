//! The DSL tree. Nodes are built once by the builder and never mutated.

use serde_json::{Map, Value};

use crate::keywords::{SHADOW_PREFIX, SPREAD_PREFIX};
use crate::reference::ReferenceNode;

/// Stable identity of a node that keeps per-run state (round-robin cursors,
/// invocation counters).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

/// Root of a parsed schema.
#[derive(Debug, Clone, PartialEq)]
pub struct RootNode {
    pub seed: Option<u64>,
    /// Collections in declaration order.
    pub collections: Vec<CollectionNode>,
}

impl RootNode {
    /// Look up a collection by its DSL key.
    pub fn collection(&self, key: &str) -> Option<&CollectionNode> {
        self.collections.iter().find(|collection| collection.key == key)
    }

    /// Declaration position of a collection key.
    pub fn position(&self, key: &str) -> Option<usize> {
        self.collections
            .iter()
            .position(|collection| collection.key == key)
    }

    /// Collections addressed by `name`: the DSL key when one matches,
    /// otherwise every collection sharing that final name.
    pub fn resolve(&self, name: &str) -> Vec<&CollectionNode> {
        if let Some(collection) = self.collection(name) {
            return vec![collection];
        }
        self.collections
            .iter()
            .filter(|collection| collection.name == name)
            .collect()
    }

    /// Collections carrying `tag`.
    pub fn tagged(&self, tag: &str) -> Vec<&CollectionNode> {
        self.collections
            .iter()
            .filter(|collection| collection.tags.iter().any(|candidate| candidate == tag))
            .collect()
    }

    /// Collection owning a pick alias.
    pub fn pick_owner(&self, alias: &str) -> Option<&CollectionNode> {
        self.collections
            .iter()
            .find(|collection| collection.picks.iter().any(|pick| pick.alias == alias))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PickDecl {
    pub alias: String,
    pub index: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollectionNode {
    /// Key in the DSL document.
    pub key: String,
    /// Output name; several keys may share one.
    pub name: String,
    pub count: u64,
    pub tags: Vec<String>,
    pub picks: Vec<PickDecl>,
    pub item: ItemNode,
}

/// Ordered field map of an item or nested object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemNode {
    pub fields: Vec<FieldEntry>,
}

impl ItemNode {
    pub fn get(&self, name: &str) -> Option<&FieldNode> {
        self.fields
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| &entry.node)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|entry| entry.name == name)
    }

    /// Whether `path` names a value this item will contain. Object fields
    /// and object literals are descended; generated and referenced values
    /// are opaque and accept any sub path. Keys produced by a spread with an
    /// explicit field list count as fields.
    pub fn has_path(&self, path: &str) -> bool {
        let (head, rest) = match path.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (path, None),
        };

        if let Some(node) = self.get(head) {
            return match rest {
                None => true,
                Some(rest) => node.has_sub_path(rest),
            };
        }

        self.fields.iter().any(|entry| {
            entry
                .node
                .spread_mappings()
                .is_some_and(|mappings| mappings.iter().any(|mapping| mapping.target == head))
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldEntry {
    pub name: String,
    pub node: FieldNode,
}

impl FieldEntry {
    /// `$name` fields are item-scoped bindings, never emitted.
    pub fn is_shadow(&self) -> bool {
        self.name.starts_with(SHADOW_PREFIX)
    }

    /// Spread entries merge their object into the parent.
    pub fn is_spread(&self) -> bool {
        self.name.starts_with(SPREAD_PREFIX)
            && matches!(
                self.node,
                FieldNode::Spread(_) | FieldNode::ReferenceSpread(_)
            )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldNode {
    Literal(Value),
    Generated(GeneratedField),
    Choice(ChoiceField),
    Object(ItemNode),
    Array(ArrayField),
    Spread(SpreadField),
    ReferenceSpread(ReferenceSpreadField),
    Reference(ReferenceField),
}

impl FieldNode {
    fn has_sub_path(&self, path: &str) -> bool {
        match self {
            FieldNode::Object(item) => item.has_path(path),
            FieldNode::Literal(value) => {
                let mut current = value;
                for part in path.split('.') {
                    match current.get(part) {
                        Some(next) => current = next,
                        None => return false,
                    }
                }
                true
            }
            FieldNode::Generated(_)
            | FieldNode::Reference(_)
            | FieldNode::Spread(_)
            | FieldNode::ReferenceSpread(_) => true,
            FieldNode::Choice(choice) => choice
                .options
                .iter()
                .any(|option| option.has_sub_path(path)),
            FieldNode::Array(_) => false,
        }
    }

    /// Explicit key mappings of a spread field.
    pub fn spread_mappings(&self) -> Option<&[SpreadMapping]> {
        match self {
            FieldNode::Spread(spread) => Some(&spread.mappings),
            FieldNode::ReferenceSpread(spread) => Some(&spread.mappings),
            _ => None,
        }
    }

    /// References reachable from this node, including filters, runtime
    /// options and nested fields.
    pub fn references(&self) -> Vec<&ReferenceNode> {
        let mut out = Vec::new();
        self.collect_references(&mut out);
        out
    }

    fn collect_references<'a>(&'a self, out: &mut Vec<&'a ReferenceNode>) {
        match self {
            FieldNode::Literal(_) => {}
            FieldNode::Generated(generated) => {
                generated.options.collect_references(out);
                collect_filters(&generated.filters, out);
            }
            FieldNode::Choice(choice) => {
                for option in &choice.options {
                    option.collect_references(out);
                }
                collect_filters(&choice.filters, out);
            }
            FieldNode::Object(item) => {
                for entry in &item.fields {
                    entry.node.collect_references(out);
                }
            }
            FieldNode::Array(array) => array.item.collect_references(out),
            FieldNode::Spread(spread) => spread.options.collect_references(out),
            FieldNode::ReferenceSpread(spread) => {
                out.push(&spread.reference);
                collect_filters(&spread.filters, out);
            }
            FieldNode::Reference(reference) => {
                out.push(&reference.reference);
                collect_filters(&reference.filters, out);
            }
        }
    }
}

fn collect_filters<'a>(filters: &'a [FieldNode], out: &mut Vec<&'a ReferenceNode>) {
    for filter in filters {
        filter.collect_references(out);
    }
}

/// `{"gen": "name.firstName", "options": {...}}`
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedField {
    pub id: NodeId,
    pub generator: String,
    /// Sub path of the generated object, from `gen: "name.firstName"`.
    pub path: Option<String>,
    pub options: GeneratorOptions,
    /// Exclusion filters.
    pub filters: Vec<FieldNode>,
}

/// Generator options split into values known at parse time and values
/// computed per item.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeneratorOptions {
    pub static_options: Map<String, Value>,
    pub runtime: Vec<(String, RuntimeOption)>,
}

impl GeneratorOptions {
    pub fn is_static(&self) -> bool {
        self.runtime.is_empty()
    }

    fn collect_references<'a>(&'a self, out: &mut Vec<&'a ReferenceNode>) {
        for (_, option) in &self.runtime {
            match option {
                RuntimeOption::Reference { reference, .. } => out.push(reference),
                RuntimeOption::Field(node) => node.collect_references(out),
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeOption {
    /// `{"ref": "this.tier", "map": {"gold": 100}}`
    Reference {
        reference: ReferenceNode,
        map: Option<Map<String, Value>>,
    },
    /// A nested `gen` or `choice` spec.
    Field(Box<FieldNode>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChoiceField {
    pub id: NodeId,
    pub options: Vec<FieldNode>,
    /// Same length as `options`, all positive, rounded to two decimals.
    pub weights: Option<Vec<f64>>,
    pub filters: Vec<FieldNode>,
}

impl ChoiceField {
    /// Literal values of every option, when all options are literals.
    pub fn literal_options(&self) -> Option<Vec<Value>> {
        self.options
            .iter()
            .map(|option| match option {
                FieldNode::Literal(value) => Some(value.clone()),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArraySize {
    Fixed(u64),
    Range { min: u64, max: u64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArrayField {
    pub item: Box<FieldNode>,
    pub size: ArraySize,
}

/// `"target:source"` entry of a spread field list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpreadMapping {
    pub target: String,
    pub source: String,
}

impl SpreadMapping {
    pub fn parse(spec: &str) -> Self {
        match spec.split_once(':') {
            Some((target, source)) => Self {
                target: target.to_string(),
                source: source.to_string(),
            },
            None => Self {
                target: spec.to_string(),
                source: spec.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpreadField {
    pub id: NodeId,
    pub generator: String,
    pub path: Option<String>,
    pub options: GeneratorOptions,
    /// Empty means every key of the generated object.
    pub mappings: Vec<SpreadMapping>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceSpreadField {
    pub reference: ReferenceNode,
    pub mappings: Vec<SpreadMapping>,
    pub filters: Vec<FieldNode>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceField {
    pub reference: ReferenceNode,
    pub filters: Vec<FieldNode>,
}
