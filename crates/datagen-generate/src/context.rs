//! Run-wide state shared by every item evaluation: registered collections,
//! tag pools, pick bindings, per-node counters and the run report.
//!
//! Every registration is stamped with the epoch (declaration ordinal) of the
//! collection it belongs to. A lookup made on behalf of an item only sees
//! registrations from earlier epochs, so a value computed late (lazy mode)
//! sees the same pools it would have seen when its item was created.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use rand::Rng;
use serde_json::Value;
use tracing::{debug, warn};

use datagen_core::{CollectionNode, NodeId};

use crate::errors::GenerationError;
use crate::lazy::ItemRef;
use crate::model::{FilteringBehavior, GenerateOptions, GenerationIssue, GenerationReport};

/// Epoch of items that see every registration made so far.
pub const LATEST_EPOCH: usize = usize::MAX;

#[derive(Clone)]
struct Registration<'t> {
    item: ItemRef<'t>,
    epoch: usize,
}

pub struct GenerationContext<'t> {
    seed: u64,
    max_filtering_retries: u32,
    filtering_behavior: FilteringBehavior,
    by_name: BTreeMap<String, Vec<Registration<'t>>>,
    by_key: BTreeMap<String, Vec<Registration<'t>>>,
    tags: BTreeMap<String, Vec<Registration<'t>>>,
    picks: BTreeMap<String, Registration<'t>>,
    registered: BTreeSet<String>,
    cursors: HashMap<NodeId, u64>,
    invocations: HashMap<NodeId, u64>,
    report: GenerationReport,
}

impl<'t> GenerationContext<'t> {
    pub fn new(seed: u64, options: &GenerateOptions, report: GenerationReport) -> Self {
        Self {
            seed,
            max_filtering_retries: options.max_filtering_retries,
            filtering_behavior: options.filtering_behavior,
            by_name: BTreeMap::new(),
            by_key: BTreeMap::new(),
            tags: BTreeMap::new(),
            picks: BTreeMap::new(),
            registered: BTreeSet::new(),
            cursors: HashMap::new(),
            invocations: HashMap::new(),
            report,
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn max_filtering_retries(&self) -> u32 {
        self.max_filtering_retries
    }

    pub fn filtering_behavior(&self) -> FilteringBehavior {
        self.filtering_behavior
    }

    pub fn report(&self) -> &GenerationReport {
        &self.report
    }

    pub fn report_mut(&mut self) -> &mut GenerationReport {
        &mut self.report
    }

    pub fn into_report(self) -> GenerationReport {
        self.report
    }

    /// Whether a collection key has items in the context, from a full run
    /// or from streaming.
    pub fn is_registered(&self, key: &str) -> bool {
        self.registered.contains(key)
    }

    /// Register a finished collection under its final name, its DSL key
    /// (when it differs), every tag, and every pick whose index exists.
    pub fn register_collection(
        &mut self,
        collection: &'t CollectionNode,
        epoch: usize,
        items: &[ItemRef<'t>],
    ) {
        for item in items {
            self.push_item(collection, epoch, item);
        }
        for pick in &collection.picks {
            let Some(item) = usize::try_from(pick.index)
                .ok()
                .and_then(|index| items.get(index))
            else {
                continue;
            };
            self.picks.insert(
                pick.alias.clone(),
                Registration {
                    item: item.clone(),
                    epoch,
                },
            );
        }
        self.registered.insert(collection.key.clone());
        debug!(
            collection = %collection.key,
            name = %collection.name,
            items = items.len(),
            tags = collection.tags.len(),
            "collection registered"
        );
    }

    /// Register one streamed item. Picks bind when their index matches the
    /// item's position.
    pub fn append_item(&mut self, collection: &'t CollectionNode, epoch: usize, item: &ItemRef<'t>) {
        self.push_item(collection, epoch, item);
        if !self.registered.contains(&collection.key) {
            self.registered.insert(collection.key.clone());
        }
        for pick in &collection.picks {
            if pick.index == item.index() {
                self.picks.insert(
                    pick.alias.clone(),
                    Registration {
                        item: item.clone(),
                        epoch,
                    },
                );
            }
        }
    }

    /// Drop every registration of a collection: its items in the name, key
    /// and tag pools, and the picks bound to them.
    pub fn forget_collection(&mut self, key: &str) {
        let foreign = |registration: &Registration<'t>| registration.item.collection().key != key;
        for pool in self
            .by_name
            .values_mut()
            .chain(self.by_key.values_mut())
            .chain(self.tags.values_mut())
        {
            pool.retain(foreign);
        }
        self.by_name.retain(|_, pool| !pool.is_empty());
        self.by_key.retain(|_, pool| !pool.is_empty());
        self.tags.retain(|_, pool| !pool.is_empty());
        self.picks.retain(|_, registration| foreign(registration));
        self.registered.remove(key);
        debug!(collection = %key, "collection forgotten");
    }

    fn push_item(&mut self, collection: &'t CollectionNode, epoch: usize, item: &ItemRef<'t>) {
        let registration = Registration {
            item: item.clone(),
            epoch,
        };
        self.by_name
            .entry(collection.name.clone())
            .or_default()
            .push(registration.clone());
        if collection.key != collection.name {
            self.by_key
                .entry(collection.key.clone())
                .or_default()
                .push(registration.clone());
        }
        for tag in &collection.tags {
            self.tags
                .entry(tag.clone())
                .or_default()
                .push(registration.clone());
        }
    }

    /// Items of a collection addressed by DSL key or final name.
    pub fn collection_pool(&self, name: &str, epoch: usize) -> Vec<ItemRef<'t>> {
        let registrations = self
            .by_key
            .get(name)
            .or_else(|| self.by_name.get(name));
        visible(registrations, epoch)
    }

    pub fn tag_pool(&self, tag: &str, epoch: usize) -> Vec<ItemRef<'t>> {
        visible(self.tags.get(tag), epoch)
    }

    pub fn pick(&self, alias: &str, epoch: usize) -> Option<ItemRef<'t>> {
        self.picks
            .get(alias)
            .filter(|registration| registration.epoch < epoch)
            .map(|registration| registration.item.clone())
    }

    /// Index into a pool of `len` candidates: uniform, or round-robin per
    /// reference node when `sequential`.
    pub fn select(
        &mut self,
        len: usize,
        node: NodeId,
        sequential: bool,
        rng: &mut dyn rand::RngCore,
    ) -> Option<usize> {
        if len == 0 {
            return None;
        }
        if sequential {
            let cursor = self.cursors.entry(node).or_insert(0);
            let index = (*cursor % len as u64) as usize;
            *cursor += 1;
            return Some(index);
        }
        Some(rng.random_range(0..len))
    }

    /// Zero-based call count for a generator node.
    pub fn next_invocation(&mut self, node: NodeId) -> u64 {
        let counter = self.invocations.entry(node).or_insert(0);
        let current = *counter;
        *counter += 1;
        current
    }

    /// Apply the configured behavior when filtering leaves nothing.
    pub fn handle_filtering_failure(
        &mut self,
        message: String,
        attempts: u32,
    ) -> Result<Value, GenerationError> {
        self.report.record_filter_exhausted();
        match self.filtering_behavior {
            FilteringBehavior::ReturnNull => {
                warn!(attempts, reason = %message, "filtering exhausted, emitting null");
                self.report
                    .record_warning(GenerationIssue::warning("filter_exhausted", message, None));
                Ok(Value::Null)
            }
            FilteringBehavior::ThrowException => {
                Err(GenerationError::FilteringExhausted { message, attempts })
            }
        }
    }
}

fn visible<'t>(registrations: Option<&Vec<Registration<'t>>>, epoch: usize) -> Vec<ItemRef<'t>> {
    registrations
        .map(|registrations| {
            registrations
                .iter()
                .filter(|registration| registration.epoch < epoch)
                .map(|registration| registration.item.clone())
                .collect()
        })
        .unwrap_or_default()
}
