//! Items whose fields are computed on demand and cached.

use std::cell::RefCell;
use std::rc::Rc;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde_json::Value;

use datagen_core::{CollectionNode, ItemNode};

use crate::errors::GenerationError;

pub type ItemRef<'t> = Rc<LazyItem<'t>>;

#[derive(Debug, Clone)]
enum FieldSlot {
    Pending,
    InProgress,
    Ready(Value),
}

/// One generated item. Field values live in slots that move from pending
/// to in progress to ready, each computed at most once.
#[derive(Debug)]
pub struct LazyItem<'t> {
    collection: &'t CollectionNode,
    index: u64,
    epoch: usize,
    seed: u64,
    slots: RefCell<Vec<FieldSlot>>,
}

impl<'t> LazyItem<'t> {
    pub fn new(collection: &'t CollectionNode, index: u64, epoch: usize, run_seed: u64) -> Self {
        let collection_seed = hash_seed(run_seed, &collection.key);
        Self {
            collection,
            index,
            epoch,
            seed: hash_row_seed(collection_seed, index, 0),
            slots: RefCell::new(vec![FieldSlot::Pending; collection.item.fields.len()]),
        }
    }

    pub fn collection(&self) -> &'t CollectionNode {
        self.collection
    }

    pub fn template(&self) -> &'t ItemNode {
        &self.collection.item
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    /// Registrations from earlier epochs are visible to this item.
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    /// RNG dedicated to one field of this item.
    pub fn field_rng(&self, field: &str) -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(hash_seed(self.seed, field))
    }

    pub fn cached(&self, position: usize) -> Option<Value> {
        match self.slots.borrow().get(position) {
            Some(FieldSlot::Ready(value)) => Some(value.clone()),
            _ => None,
        }
    }

    pub fn is_ready(&self, position: usize) -> bool {
        matches!(self.slots.borrow().get(position), Some(FieldSlot::Ready(_)))
    }

    /// Mark a pending slot as in progress. Fails when the slot is already
    /// being computed further up the stack.
    pub(crate) fn begin(&self, position: usize) -> Result<(), GenerationError> {
        let mut slots = self.slots.borrow_mut();
        match slots.get_mut(position) {
            Some(slot @ FieldSlot::Pending) => {
                *slot = FieldSlot::InProgress;
                Ok(())
            }
            _ => {
                let name = self
                    .template()
                    .fields
                    .get(position)
                    .map(|entry| entry.name.clone())
                    .unwrap_or_default();
                Err(GenerationError::CircularReference(name))
            }
        }
    }

    pub(crate) fn fill(&self, position: usize, value: Value) {
        if let Some(slot) = self.slots.borrow_mut().get_mut(position) {
            *slot = FieldSlot::Ready(value);
        }
    }

    pub(crate) fn reset(&self, position: usize) {
        if let Some(slot) = self.slots.borrow_mut().get_mut(position) {
            *slot = FieldSlot::Pending;
        }
    }

    /// Fields not computed yet.
    pub fn pending_fields(&self) -> usize {
        self.slots
            .borrow()
            .iter()
            .filter(|slot| !matches!(slot, FieldSlot::Ready(_)))
            .count()
    }
}

pub(crate) fn hash_seed(seed: u64, key: &str) -> u64 {
    let mut hash = seed ^ 0xcbf29ce484222325;
    for byte in key.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

pub(crate) fn hash_row_seed(collection_seed: u64, index: u64, attempt: u32) -> u64 {
    let mut hash = collection_seed ^ index.wrapping_mul(0x9e3779b97f4a7c15);
    hash ^= attempt as u64;
    hash = hash.wrapping_mul(0x100000001b3);
    hash
}

#[cfg(test)]
mod tests {
    use datagen_core::{FieldEntry, FieldNode};
    use rand::RngCore;
    use serde_json::json;

    use super::*;

    fn collection() -> CollectionNode {
        CollectionNode {
            key: "users".to_string(),
            name: "users".to_string(),
            count: 2,
            tags: Vec::new(),
            picks: Vec::new(),
            item: ItemNode {
                fields: vec![
                    FieldEntry {
                        name: "a".to_string(),
                        node: FieldNode::Literal(json!(1)),
                    },
                    FieldEntry {
                        name: "b".to_string(),
                        node: FieldNode::Literal(json!(2)),
                    },
                ],
            },
        }
    }

    #[test]
    fn slots_move_through_states() {
        let collection = collection();
        let item = LazyItem::new(&collection, 0, 0, 42);
        assert_eq!(item.pending_fields(), 2);

        item.begin(0).expect("pending slot");
        assert!(matches!(
            item.begin(0),
            Err(GenerationError::CircularReference(name)) if name == "a"
        ));
        item.fill(0, json!(1));
        assert_eq!(item.cached(0), Some(json!(1)));
        assert_eq!(item.pending_fields(), 1);

        item.begin(1).expect("pending slot");
        item.reset(1);
        assert!(!item.is_ready(1));
    }

    #[test]
    fn field_rng_depends_on_item_and_field() {
        let collection = collection();
        let first = LazyItem::new(&collection, 0, 0, 42);
        let again = LazyItem::new(&collection, 0, 0, 42);
        let second = LazyItem::new(&collection, 1, 0, 42);

        assert_eq!(
            first.field_rng("a").next_u64(),
            again.field_rng("a").next_u64()
        );
        assert_ne!(
            first.field_rng("a").next_u64(),
            first.field_rng("b").next_u64()
        );
        assert_ne!(
            first.field_rng("a").next_u64(),
            second.field_rng("a").next_u64()
        );
    }
}
