use std::time::Instant;

use serde_json::Value;
use tracing::{info, warn};

use datagen_core::{CollectionNode, RootNode, analyze_dependencies};

use crate::context::GenerationContext;
use crate::dataset::Dataset;
use crate::errors::GenerationError;
use crate::evaluator::{Evaluator, ForcePlan};
use crate::generators::GeneratorRegistry;
use crate::lazy::ItemRef;
use crate::model::{CollectionReport, GenerateOptions, GenerationReport};
use crate::streaming::StreamingGeneration;

/// Result of a generation run.
#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub dataset: Dataset,
    pub report: GenerationReport,
}

/// Entry point for generating datasets from a validated tree.
#[derive(Debug, Clone, Default)]
pub struct GenerationEngine {
    options: GenerateOptions,
}

impl GenerationEngine {
    pub fn new(options: GenerateOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &GenerateOptions {
        &self.options
    }

    /// Seed for a run: the configured one, else the schema's, else 0.
    pub fn run_seed(&self, root: &RootNode) -> u64 {
        self.options.seed.or(root.seed).unwrap_or(0)
    }

    /// Generate every collection and materialize the dataset. Lazy items
    /// are used when `memory_optimized` is set; both paths yield the same
    /// dataset for the same seed.
    pub fn run<'t>(
        &self,
        root: &'t RootNode,
        registry: &'t GeneratorRegistry,
    ) -> Result<GenerationResult, GenerationError> {
        self.options.validate()?;
        let start = Instant::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        let seed = self.run_seed(root);

        info!(
            run_id = %run_id,
            collections = root.collections.len(),
            seed,
            memory_optimized = self.options.memory_optimized,
            "generation started"
        );

        let outcome = self
            .build(root, registry, run_id.clone(), self.options.memory_optimized)
            .and_then(|mut generation| {
                let dataset = generation.materialize()?;
                Ok((dataset, generation.into_report()))
            })
            .and_then(|(dataset, mut report)| {
                report.fingerprint = Some(dataset.fingerprint()?);
                Ok((dataset, report))
            });

        match outcome {
            Ok((dataset, mut report)) => {
                report.duration_ms = start.elapsed().as_millis() as u64;
                info!(
                    run_id = %run_id,
                    collections = dataset.collections().len(),
                    items = dataset.total_items(),
                    filters_exhausted = report.filters_exhausted,
                    duration_ms = report.duration_ms,
                    "generation completed"
                );
                Ok(GenerationResult { dataset, report })
            }
            Err(err) => {
                warn!(run_id = %run_id, error = %err, "generation failed");
                Err(err)
            }
        }
    }

    /// Generate every collection with lazy items. Only fields read by other
    /// references (and order dependent fields) are computed up front.
    pub fn generate_lazy<'t>(
        &self,
        root: &'t RootNode,
        registry: &'t GeneratorRegistry,
    ) -> Result<LazyGeneration<'t>, GenerationError> {
        self.options.validate()?;
        let run_id = uuid::Uuid::new_v4().to_string();
        self.build(root, registry, run_id, true)
    }

    /// Handle for emitting one collection item by item.
    pub fn streaming<'t>(
        &self,
        root: &'t RootNode,
        registry: &'t GeneratorRegistry,
    ) -> Result<StreamingGeneration<'t>, GenerationError> {
        self.options.validate()?;
        let run_id = uuid::Uuid::new_v4().to_string();
        let seed = self.run_seed(root);
        let report = GenerationReport::new(run_id, seed, false);
        let ctx = GenerationContext::new(seed, &self.options, report);
        Ok(StreamingGeneration::new(root, registry, ctx))
    }

    fn build<'t>(
        &self,
        root: &'t RootNode,
        registry: &'t GeneratorRegistry,
        run_id: String,
        lazy: bool,
    ) -> Result<LazyGeneration<'t>, GenerationError> {
        let seed = self.run_seed(root);
        let report = GenerationReport::new(run_id, seed, lazy);
        let mut ctx = GenerationContext::new(seed, &self.options, report);
        let analysis = lazy.then(|| analyze_dependencies(root));
        let plan = match &analysis {
            Some(analysis) => ForcePlan::Lazy(analysis),
            None => ForcePlan::Eager,
        };

        let mut collections = Vec::with_capacity(root.collections.len());
        for (epoch, collection) in root.collections.iter().enumerate() {
            let items = generate_collection(registry, &mut ctx, collection, epoch, plan)?;
            ctx.register_collection(collection, epoch, &items);
            collections.push(GeneratedCollection {
                node: collection,
                items,
            });
        }

        Ok(LazyGeneration {
            registry,
            ctx,
            collections,
        })
    }
}

/// Create every item of one collection and record it in the report.
pub(crate) fn generate_collection<'t>(
    registry: &'t GeneratorRegistry,
    ctx: &mut GenerationContext<'t>,
    collection: &'t CollectionNode,
    epoch: usize,
    plan: ForcePlan<'_>,
) -> Result<Vec<ItemRef<'t>>, GenerationError> {
    let start = Instant::now();
    info!(
        collection = %collection.key,
        name = %collection.name,
        count = collection.count,
        "generating collection"
    );

    let mut evaluator = Evaluator::new(registry, ctx);
    let mut items = Vec::new();
    for index in 0..collection.count {
        items.push(evaluator.create_item(collection, index, epoch, plan)?);
    }

    ctx.report_mut().record_collection(CollectionReport {
        key: collection.key.clone(),
        name: collection.name.clone(),
        items_requested: collection.count,
        items_generated: items.len() as u64,
    });
    info!(
        collection = %collection.key,
        items_generated = items.len(),
        duration_ms = start.elapsed().as_millis() as u64,
        "collection generated"
    );
    Ok(items)
}

struct GeneratedCollection<'t> {
    node: &'t CollectionNode,
    items: Vec<ItemRef<'t>>,
}

/// Generated collections whose items may still hold pending fields.
pub struct LazyGeneration<'t> {
    registry: &'t GeneratorRegistry,
    ctx: GenerationContext<'t>,
    collections: Vec<GeneratedCollection<'t>>,
}

impl<'t> LazyGeneration<'t> {
    /// DSL keys of the generated collections, in declaration order.
    pub fn collection_keys(&self) -> impl Iterator<Item = &str> {
        self.collections
            .iter()
            .map(|collection| collection.node.key.as_str())
    }

    pub fn items(&self, key: &str) -> Option<&[ItemRef<'t>]> {
        self.collections
            .iter()
            .find(|collection| collection.node.key == key)
            .map(|collection| collection.items.as_slice())
    }

    /// Fields not computed yet, across every item.
    pub fn pending_fields(&self) -> usize {
        self.collections
            .iter()
            .flat_map(|collection| collection.items.iter())
            .map(|item| item.pending_fields())
            .sum()
    }

    /// Materialize one item, computing its pending fields.
    pub fn materialize_item(&mut self, key: &str, index: usize) -> Result<Value, GenerationError> {
        let item = self
            .items(key)
            .ok_or_else(|| GenerationError::UnknownCollection(key.to_string()))?
            .get(index)
            .cloned()
            .ok_or_else(|| {
                GenerationError::InvalidReference(format!("{key}[{index}]"))
            })?;
        Evaluator::new(self.registry, &mut self.ctx).materialize(&item)
    }

    /// Materialize every item into a dataset keyed by final name.
    pub fn materialize(&mut self) -> Result<Dataset, GenerationError> {
        let mut dataset = Dataset::new();
        let mut evaluator = Evaluator::new(self.registry, &mut self.ctx);
        for collection in &self.collections {
            let output = dataset.ensure(&collection.node.name);
            for item in &collection.items {
                output.items.push(evaluator.materialize(item)?);
            }
        }
        Ok(dataset)
    }

    pub fn report(&self) -> &GenerationReport {
        self.ctx.report()
    }

    pub fn into_report(self) -> GenerationReport {
        self.ctx.into_report()
    }
}
