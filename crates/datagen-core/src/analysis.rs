//! Which fields of each collection are read by references elsewhere in the
//! schema. Lazy generation computes these fields up front and leaves the
//! rest pending.

use std::collections::{BTreeMap, BTreeSet};

use crate::node::{FieldEntry, FieldNode, GeneratorOptions, RootNode, RuntimeOption};
use crate::reference::{ReferenceNode, ReferenceTarget, TagSelector};

/// Field paths of one collection that other nodes read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HotPaths {
    /// Some reference reads whole items.
    pub all: bool,
    pub paths: BTreeSet<String>,
}

impl HotPaths {
    pub fn is_empty(&self) -> bool {
        !self.all && self.paths.is_empty()
    }

    fn heads(&self) -> impl Iterator<Item = &str> {
        self.paths
            .iter()
            .map(|path| path.split_once('.').map_or(path.as_str(), |(head, _)| head))
    }

    /// Whether computing `entry` is needed to serve a hot path. Spreads
    /// without an explicit field list may produce any key.
    pub fn requires(&self, entry: &FieldEntry) -> bool {
        if self.all {
            return true;
        }
        if self.heads().any(|head| head == entry.name) {
            return true;
        }
        match entry.node.spread_mappings() {
            Some([]) => !self.paths.is_empty(),
            Some(mappings) => mappings
                .iter()
                .any(|mapping| self.heads().any(|head| head == mapping.target)),
            None => false,
        }
    }

    fn mark(&mut self, field: Option<&str>) {
        match field {
            Some(path) => {
                self.paths.insert(path.to_string());
            }
            None => self.all = true,
        }
    }
}

/// Hot paths per collection, keyed by DSL key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyAnalysis {
    collections: BTreeMap<String, HotPaths>,
}

impl DependencyAnalysis {
    pub fn hot_paths(&self, collection_key: &str) -> Option<&HotPaths> {
        self.collections
            .get(collection_key)
            .filter(|hot| !hot.is_empty())
    }

    pub fn requires(&self, collection_key: &str, entry: &FieldEntry) -> bool {
        self.hot_paths(collection_key)
            .is_some_and(|hot| hot.requires(entry))
    }
}

/// Walk every field of every collection and record what its references
/// read.
pub fn analyze_dependencies(root: &RootNode) -> DependencyAnalysis {
    let mut analyzer = Analyzer {
        root,
        analysis: DependencyAnalysis::default(),
    };
    for collection in &root.collections {
        for entry in &collection.item.fields {
            analyzer.visit(&entry.node);
        }
    }
    analyzer.analysis
}

struct Analyzer<'r> {
    root: &'r RootNode,
    analysis: DependencyAnalysis,
}

impl Analyzer<'_> {
    fn visit(&mut self, node: &FieldNode) {
        match node {
            FieldNode::Literal(_) => {}
            FieldNode::Generated(generated) => {
                self.visit_options(&generated.options);
                self.visit_all(&generated.filters);
            }
            FieldNode::Choice(choice) => {
                self.visit_all(&choice.options);
                self.visit_all(&choice.filters);
            }
            FieldNode::Object(item) => {
                for entry in &item.fields {
                    self.visit(&entry.node);
                }
            }
            FieldNode::Array(array) => self.visit(&array.item),
            FieldNode::Spread(spread) => self.visit_options(&spread.options),
            FieldNode::ReferenceSpread(spread) => {
                let field = spread.reference.target.field();
                if field.is_none() && !spread.mappings.is_empty() {
                    for mapping in &spread.mappings {
                        self.mark(&spread.reference, Some(&mapping.source));
                    }
                } else {
                    self.mark(&spread.reference, field);
                }
                self.visit_all(&spread.filters);
            }
            FieldNode::Reference(reference) => {
                self.mark(&reference.reference, reference.reference.target.field());
                self.visit_all(&reference.filters);
            }
        }
    }

    fn visit_all(&mut self, nodes: &[FieldNode]) {
        for node in nodes {
            self.visit(node);
        }
    }

    fn visit_options(&mut self, options: &GeneratorOptions) {
        for (_, option) in &options.runtime {
            match option {
                RuntimeOption::Reference { reference, .. } => {
                    self.mark(reference, reference.target.field());
                }
                RuntimeOption::Field(node) => self.visit(node),
            }
        }
    }

    fn mark(&mut self, reference: &ReferenceNode, field: Option<&str>) {
        let keys: Vec<String> = match &reference.target {
            ReferenceTarget::Collection { collection, .. }
            | ReferenceTarget::Indexed { collection, .. } => self.keys_for(collection),
            ReferenceTarget::Conditional {
                collection,
                condition,
                ..
            } => {
                let keys = self.keys_for(collection);
                for key in &keys {
                    let hot = self.analysis.collections.entry(key.clone()).or_default();
                    for path in condition.referenced_paths() {
                        hot.paths.insert(path.to_string());
                    }
                }
                keys
            }
            ReferenceTarget::Tag { tag, .. } => match tag {
                TagSelector::Static(tag) => self
                    .root
                    .tagged(tag)
                    .into_iter()
                    .map(|collection| collection.key.clone())
                    .collect(),
                TagSelector::SelfField(_) => self
                    .root
                    .collections
                    .iter()
                    .filter(|collection| !collection.tags.is_empty())
                    .map(|collection| collection.key.clone())
                    .collect(),
            },
            ReferenceTarget::Pick { alias, .. } => self
                .root
                .pick_owner(alias)
                .map(|collection| vec![collection.key.clone()])
                .unwrap_or_default(),
            ReferenceTarget::SelfField { .. } | ReferenceTarget::Shadow { .. } => return,
        };

        for key in keys {
            self.analysis
                .collections
                .entry(key)
                .or_default()
                .mark(field);
        }
    }

    fn keys_for(&self, collection: &str) -> Vec<String> {
        self.root
            .resolve(collection)
            .into_iter()
            .map(|collection| collection.key.clone())
            .collect()
    }
}
