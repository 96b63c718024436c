use crate::reference::{
    ReferenceNode, ReferenceSyntax, ReferenceTarget, TagSelector, parse_reference,
};

use super::{BuildState, Deferred, Scope};

impl BuildState<'_> {
    /// Parse `raw` and check every name it uses against the declarations.
    /// Problems are recorded and `None` is returned.
    pub(crate) fn build_reference(
        &mut self,
        scope: &Scope,
        raw: &str,
        sequential: bool,
    ) -> Option<ReferenceNode> {
        let label = format!("Reference field '{}'", scope.field);
        let syntax = match parse_reference(raw) {
            Ok(syntax) => syntax,
            Err(err) => {
                self.error(
                    "invalid_reference",
                    &scope.pointer,
                    format!("{label} {}", err.describe()),
                );
                return None;
            }
        };

        let target = match syntax {
            ReferenceSyntax::Named { name, field } => {
                if self.pick_collection(&name).is_some() {
                    self.warn_forward_pick(scope, &label, &name);
                    ReferenceTarget::Pick { alias: name, field }
                } else if self.collection_ordinal(&name).is_some() {
                    self.warn_forward_collection(scope, &label, &name);
                    ReferenceTarget::Collection {
                        collection: name,
                        field,
                    }
                } else {
                    self.error(
                        "undeclared_reference",
                        &scope.pointer,
                        format!("{label} references undeclared collection or pick: {name}"),
                    );
                    return None;
                }
            }
            ReferenceSyntax::Collection { collection, field } => {
                self.require_collection(scope, &label, &collection)?;
                ReferenceTarget::Collection { collection, field }
            }
            ReferenceSyntax::Indexed {
                collection,
                index,
                field,
            } => {
                self.require_collection(scope, &label, &collection)?;
                ReferenceTarget::Indexed {
                    collection,
                    index,
                    field,
                }
            }
            ReferenceSyntax::Tag { tag, field } => {
                match &tag {
                    TagSelector::Static(name) => {
                        if !self.has_tag(name) {
                            self.error(
                                "undeclared_tag",
                                &scope.pointer,
                                format!("{label} references undeclared tag: {name}"),
                            );
                            return None;
                        }
                    }
                    TagSelector::SelfField(path) => self.defer(Deferred::SelfPath {
                        collection: scope.collection,
                        pointer: scope.pointer.clone(),
                        reference: raw.to_string(),
                        path: path.clone(),
                    }),
                }
                ReferenceTarget::Tag { tag, field }
            }
            ReferenceSyntax::SelfField { path } => {
                self.defer(Deferred::SelfPath {
                    collection: scope.collection,
                    pointer: scope.pointer.clone(),
                    reference: raw.to_string(),
                    path: path.clone(),
                });
                ReferenceTarget::SelfField { path }
            }
            ReferenceSyntax::Shadow { binding, path } => {
                self.defer(Deferred::Shadow {
                    collection: scope.collection,
                    pointer: scope.pointer.clone(),
                    reference: raw.to_string(),
                    binding: binding.clone(),
                });
                ReferenceTarget::Shadow { binding, path }
            }
            ReferenceSyntax::Conditional {
                collection,
                condition,
                field,
            } => {
                self.require_collection(scope, &label, &collection)?;
                for binding in condition.bindings() {
                    self.defer(Deferred::Shadow {
                        collection: scope.collection,
                        pointer: scope.pointer.clone(),
                        reference: raw.to_string(),
                        binding: binding.to_string(),
                    });
                }
                self.defer(Deferred::Conditional {
                    pointer: scope.pointer.clone(),
                    reference: raw.to_string(),
                    collection: collection.clone(),
                    paths: condition
                        .referenced_paths()
                        .into_iter()
                        .map(str::to_string)
                        .collect(),
                    field: field.clone(),
                });
                ReferenceTarget::Conditional {
                    collection,
                    condition,
                    field,
                }
            }
        };

        Some(ReferenceNode {
            id: self.next_id(),
            raw: raw.trim().to_string(),
            sequential,
            target,
        })
    }

    fn require_collection(&mut self, scope: &Scope, label: &str, collection: &str) -> Option<()> {
        if self.collection_ordinal(collection).is_none() {
            self.error(
                "undeclared_reference",
                &scope.pointer,
                format!("{label} references undeclared collection: {collection}"),
            );
            return None;
        }
        self.warn_forward_collection(scope, label, collection);
        Some(())
    }

    fn warn_forward_collection(&mut self, scope: &Scope, label: &str, collection: &str) {
        let Some(ordinal) = self.collection_ordinal(collection) else {
            return;
        };
        if ordinal >= scope.collection {
            self.warning(
                "forward_reference",
                &scope.pointer,
                format!(
                    "{label} references collection '{collection}' before it is generated; it resolves to an empty pool"
                ),
            );
        }
    }

    fn warn_forward_pick(&mut self, scope: &Scope, label: &str, alias: &str) {
        let Some(owner) = self.pick_collection(alias).map(str::to_string) else {
            return;
        };
        let Some(ordinal) = self.collection_ordinal(&owner) else {
            return;
        };
        if ordinal >= scope.collection {
            self.warning(
                "forward_reference",
                &scope.pointer,
                format!(
                    "{label} uses pick '{alias}' of collection '{owner}' before it is generated; it resolves to null"
                ),
            );
        }
    }
}
