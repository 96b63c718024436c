//! Emit one collection item by item.
//!
//! Every other collection not yet in the context is generated and
//! registered first, whether it is declared before or after the target.
//! Target items are registered as they are produced, so a later item can
//! reference an earlier one. Streaming a collection again replaces its
//! earlier items.

use serde_json::Value;
use tracing::info;

use datagen_core::{CollectionNode, RootNode};

use crate::context::{GenerationContext, LATEST_EPOCH};
use crate::engine::generate_collection;
use crate::errors::GenerationError;
use crate::evaluator::{Evaluator, ForcePlan};
use crate::generators::GeneratorRegistry;
use crate::model::{CollectionReport, GenerationReport};

pub struct StreamingGeneration<'t> {
    root: &'t RootNode,
    registry: &'t GeneratorRegistry,
    ctx: GenerationContext<'t>,
}

impl<'t> StreamingGeneration<'t> {
    pub(crate) fn new(
        root: &'t RootNode,
        registry: &'t GeneratorRegistry,
        ctx: GenerationContext<'t>,
    ) -> Self {
        Self {
            root,
            registry,
            ctx,
        }
    }

    /// Stream the collection with DSL key or final name `target`.
    pub fn stream(&mut self, target: &str) -> Result<ItemStream<'_, 't>, GenerationError> {
        let (target_epoch, collection) = self
            .root
            .collections
            .iter()
            .enumerate()
            .find(|(_, collection)| collection.key == target)
            .or_else(|| {
                self.root
                    .collections
                    .iter()
                    .enumerate()
                    .find(|(_, collection)| collection.name == target)
            })
            .ok_or_else(|| GenerationError::UnknownCollection(target.to_string()))?;

        if self.ctx.is_registered(&collection.key) {
            self.ctx.forget_collection(&collection.key);
        }
        for (epoch, other) in self.root.collections.iter().enumerate() {
            if epoch == target_epoch || self.ctx.is_registered(&other.key) {
                continue;
            }
            let items =
                generate_collection(self.registry, &mut self.ctx, other, epoch, ForcePlan::Eager)?;
            self.ctx.register_collection(other, epoch, &items);
        }

        info!(
            collection = %collection.key,
            count = collection.count,
            "streaming started"
        );
        Ok(ItemStream {
            registry: self.registry,
            ctx: &mut self.ctx,
            collection,
            epoch: target_epoch,
            next: 0,
            done: false,
        })
    }

    pub fn report(&self) -> &GenerationReport {
        self.ctx.report()
    }

    pub fn into_report(self) -> GenerationReport {
        self.ctx.into_report()
    }
}

/// Iterator over the items of a streamed collection. Stops after the first
/// error.
pub struct ItemStream<'s, 't> {
    registry: &'t GeneratorRegistry,
    ctx: &'s mut GenerationContext<'t>,
    collection: &'t CollectionNode,
    epoch: usize,
    next: u64,
    done: bool,
}

impl ItemStream<'_, '_> {
    /// Items emitted so far.
    pub fn emitted(&self) -> u64 {
        self.next
    }
}

impl Iterator for ItemStream<'_, '_> {
    type Item = Result<Value, GenerationError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.next >= self.collection.count {
            self.done = true;
            self.ctx.report_mut().record_collection(CollectionReport {
                key: self.collection.key.clone(),
                name: self.collection.name.clone(),
                items_requested: self.collection.count,
                items_generated: self.next,
            });
            info!(
                collection = %self.collection.key,
                items_generated = self.next,
                "streaming completed"
            );
            return None;
        }

        let index = self.next;
        let produced = {
            let mut evaluator = Evaluator::new(self.registry, &mut *self.ctx);
            evaluator
                .create_item(self.collection, index, LATEST_EPOCH, ForcePlan::Eager)
                .and_then(|item| {
                    let value = evaluator.materialize(&item)?;
                    Ok((item, value))
                })
        };

        match produced {
            Ok((item, value)) => {
                self.ctx.append_item(self.collection, self.epoch, &item);
                self.next += 1;
                Some(Ok(value))
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.done {
            return (0, Some(0));
        }
        let remaining = usize::try_from(self.collection.count - self.next).unwrap_or(usize::MAX);
        (0, Some(remaining))
    }
}
