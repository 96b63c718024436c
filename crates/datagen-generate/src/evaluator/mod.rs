//! Turns field nodes into values for one item at a time.
//!
//! Each field of an item is computed with its own RNG (see
//! [`LazyItem::field_rng`]) and cached in the item's slot, so the value of a
//! field does not depend on when it is computed. Self references and shadow
//! bindings force the slot they read.

mod options;
mod reference;

use std::rc::Rc;

use rand::{Rng, RngCore};
use serde_json::{Map, Value};

use datagen_core::{
    ArrayField, ArraySize, ChoiceField, CollectionNode, DependencyAnalysis, FieldEntry,
    FieldNode, GeneratedField, GeneratorOptions, ItemNode, NodeId, ReferenceSpreadField,
    RuntimeOption, SpreadField, SpreadMapping,
};

use crate::context::GenerationContext;
use crate::errors::GenerationError;
use crate::filtering::{FilterOutcome, is_excluded, retry_filter};
use crate::generators::choice::weighted_index;
use crate::generators::{Generator, GeneratorContext, GeneratorRegistry, project};
use crate::lazy::{ItemRef, LazyItem};
use crate::model::GenerationIssue;

/// Which fields are computed when an item is created.
#[derive(Clone, Copy)]
pub(crate) enum ForcePlan<'a> {
    /// Every field, in declaration order.
    Eager,
    /// Fields read by references elsewhere, plus fields whose value depends
    /// on evaluation order. The rest stay pending.
    Lazy(&'a DependencyAnalysis),
}

pub(crate) struct Evaluator<'t, 'c> {
    registry: &'t GeneratorRegistry,
    ctx: &'c mut GenerationContext<'t>,
    building: Vec<PartialObject<'t>>,
}

/// Object field whose nested fields are being computed. `path` is the
/// dotted path from the item root.
struct PartialObject<'t> {
    item: ItemRef<'t>,
    path: String,
    fields: Map<String, Value>,
}

impl<'t, 'c> Evaluator<'t, 'c> {
    pub(crate) fn new(registry: &'t GeneratorRegistry, ctx: &'c mut GenerationContext<'t>) -> Self {
        Self {
            registry,
            ctx,
            building: Vec::new(),
        }
    }

    pub(crate) fn create_item(
        &mut self,
        collection: &'t CollectionNode,
        index: u64,
        epoch: usize,
        plan: ForcePlan<'_>,
    ) -> Result<ItemRef<'t>, GenerationError> {
        let item = Rc::new(LazyItem::new(collection, index, epoch, self.ctx.seed()));
        for (position, entry) in collection.item.fields.iter().enumerate() {
            let required = match plan {
                ForcePlan::Eager => true,
                ForcePlan::Lazy(analysis) => {
                    analysis.requires(&collection.key, entry)
                        || order_sensitive(&entry.node, self.registry)
                }
            };
            if required {
                self.force(&item, position)?;
            }
        }
        Ok(item)
    }

    /// Value of a top-level field, computing it on first use.
    pub(crate) fn force(
        &mut self,
        item: &ItemRef<'t>,
        position: usize,
    ) -> Result<Value, GenerationError> {
        if let Some(value) = item.cached(position) {
            return Ok(value);
        }
        let template: &'t ItemNode = item.template();
        let Some(entry) = template.fields.get(position) else {
            return Ok(Value::Null);
        };

        item.begin(position)?;
        let mut rng = item.field_rng(&entry.name);
        let computed = match &entry.node {
            FieldNode::Object(object) => {
                self.eval_object(object, Some(entry.name.clone()), item, &mut rng)
            }
            node => self.eval_field(node, &entry.name, item, &mut rng),
        };
        match computed {
            Ok(value) => {
                item.fill(position, value.clone());
                Ok(value)
            }
            Err(err) => {
                item.reset(position);
                Err(err)
            }
        }
    }

    /// Compute every remaining field and build the emitted object. Shadow
    /// bindings are left out; spreads merge their keys.
    pub(crate) fn materialize(&mut self, item: &ItemRef<'t>) -> Result<Value, GenerationError> {
        let template: &'t ItemNode = item.template();
        let mut object = Map::new();
        for (position, entry) in template.fields.iter().enumerate() {
            if entry.is_shadow() {
                continue;
            }
            let value = self.force(item, position)?;
            merge_entry(&mut object, entry, value);
        }
        Ok(Value::Object(object))
    }

    /// Value at `path` inside an object field of `item` that is still being
    /// computed. Siblings not computed yet read as null. `None` when no such
    /// object is in progress.
    fn partial_value(&self, item: &ItemRef<'t>, path: &str) -> Option<Value> {
        self.building
            .iter()
            .rev()
            .filter(|partial| Rc::ptr_eq(&partial.item, item))
            .find_map(|partial| {
                let rest = path.strip_prefix(partial.path.as_str())?.strip_prefix('.')?;
                let (head, tail) = match rest.split_once('.') {
                    Some((head, tail)) => (head, Some(tail)),
                    None => (rest, None),
                };
                let value = match (partial.fields.get(head), tail) {
                    (Some(value), Some(tail)) => project(value, tail).cloned(),
                    (Some(value), None) => Some(value.clone()),
                    (None, _) => None,
                };
                Some(value.unwrap_or(Value::Null))
            })
    }

    fn eval_field(
        &mut self,
        node: &'t FieldNode,
        field: &str,
        item: &ItemRef<'t>,
        rng: &mut dyn RngCore,
    ) -> Result<Value, GenerationError> {
        match node {
            FieldNode::Literal(value) => Ok(value.clone()),
            FieldNode::Generated(generated) => self.eval_generated(generated, field, item, rng),
            FieldNode::Choice(choice) => self.eval_choice(choice, field, item, rng),
            FieldNode::Object(object) => self.eval_object(object, None, item, rng),
            FieldNode::Array(array) => self.eval_array(array, field, item, rng),
            FieldNode::Spread(spread) => self.eval_spread(spread, field, item, rng),
            FieldNode::ReferenceSpread(spread) => {
                self.eval_reference_spread(spread, field, item, rng)
            }
            FieldNode::Reference(reference) => {
                self.resolve_reference(&reference.reference, &reference.filters, field, item, rng)
            }
        }
    }

    fn eval_generated(
        &mut self,
        generated: &'t GeneratedField,
        field: &str,
        item: &ItemRef<'t>,
        rng: &mut dyn RngCore,
    ) -> Result<Value, GenerationError> {
        let registry = self.registry;
        let generator = registry
            .generator(&generated.generator)
            .ok_or_else(|| GenerationError::UnknownGenerator(generated.generator.clone()))?;
        let params = self.resolve_options(&generated.options, field, item, rng)?;
        let exclusions = self.eval_filters(&generated.filters, field, item, rng)?;
        self.run_generator(
            generator,
            generated.id,
            field,
            params.as_ref(),
            generated.path.as_deref(),
            &exclusions,
            rng,
        )
    }

    /// Call a generator once, natively filtered, or through the retry loop.
    fn run_generator(
        &mut self,
        generator: &dyn Generator,
        node: NodeId,
        field: &str,
        params: Option<&Value>,
        path: Option<&str>,
        exclusions: &[Value],
        rng: &mut dyn RngCore,
    ) -> Result<Value, GenerationError> {
        if exclusions.is_empty() {
            return draw(self.ctx, generator, node, field, params, path, rng);
        }

        if generator.supports_filtering() {
            let mut gen_ctx = self.generator_context(generator, node, field);
            let produced = match path {
                Some(path) => generator
                    .generate_at_path_with_filter(&mut gen_ctx, params, path, exclusions, rng)?,
                None => generator.generate_with_filter(&mut gen_ctx, params, exclusions, rng)?,
            };
            return match produced {
                Some(value) => Ok(value),
                None => self.ctx.handle_filtering_failure(
                    format!("Field '{field}' has no valid values after filtering"),
                    1,
                ),
            };
        }

        let max_attempts = self.ctx.max_filtering_retries();
        let ctx = &mut *self.ctx;
        let outcome = retry_filter(
            max_attempts,
            || draw(ctx, generator, node, field, params, path, &mut *rng),
            |value| is_excluded(value, exclusions),
        )?;
        self.settle(outcome, || {
            format!("Field '{field}' failed to generate a valid value after {max_attempts} retries")
        })
    }

    fn generator_context<'f>(
        &mut self,
        generator: &dyn Generator,
        node: NodeId,
        field: &'f str,
    ) -> GeneratorContext<'f> {
        GeneratorContext {
            field,
            invocation: self.record_call(generator, node),
        }
    }

    /// Count one call of a generator node in the report and the node's
    /// invocation counter. Returns the call's zero-based invocation.
    fn record_call(&mut self, generator: &dyn Generator, node: NodeId) -> u64 {
        self.ctx.report_mut().record_generator_usage(generator.id());
        self.ctx.next_invocation(node)
    }

    /// Record retry attempts and turn exhaustion into the configured
    /// filtering behavior.
    fn settle<F>(
        &mut self,
        outcome: FilterOutcome<Value>,
        message: F,
    ) -> Result<Value, GenerationError>
    where
        F: FnOnce() -> String,
    {
        self.ctx.report_mut().record_filter_attempts(outcome.attempts());
        match outcome {
            FilterOutcome::Accepted { value, .. } => Ok(value),
            FilterOutcome::Exhausted { attempts } => {
                self.ctx.handle_filtering_failure(message(), attempts)
            }
        }
    }

    fn eval_choice(
        &mut self,
        choice: &'t ChoiceField,
        field: &str,
        item: &ItemRef<'t>,
        rng: &mut dyn RngCore,
    ) -> Result<Value, GenerationError> {
        let exclusions = self.eval_filters(&choice.filters, field, item, rng)?;

        let registry = self.registry;
        if let Some(options) = choice.literal_options()
            && let Some(generator) = registry.generator("choice")
        {
            let mut params = Map::new();
            params.insert("options".to_string(), Value::Array(options));
            if let Some(weights) = &choice.weights {
                params.insert("weights".to_string(), Value::from(weights.clone()));
            }
            let params = Value::Object(params);
            return self.run_generator(
                generator,
                choice.id,
                field,
                Some(&params),
                None,
                &exclusions,
                rng,
            );
        }

        let weights = choice
            .weights
            .clone()
            .unwrap_or_else(|| vec![1.0; choice.options.len()]);
        if exclusions.is_empty() {
            return self.eval_choice_option(choice, &weights, field, item, rng);
        }

        let max_attempts = self.ctx.max_filtering_retries();
        let outcome = retry_filter(
            max_attempts,
            || self.eval_choice_option(choice, &weights, field, item, &mut *rng),
            |value| is_excluded(value, &exclusions),
        )?;
        self.settle(outcome, || {
            format!("Field '{field}' failed to generate a valid value after {max_attempts} retries")
        })
    }

    fn eval_choice_option(
        &mut self,
        choice: &'t ChoiceField,
        weights: &[f64],
        field: &str,
        item: &ItemRef<'t>,
        rng: &mut dyn RngCore,
    ) -> Result<Value, GenerationError> {
        match weighted_index(weights, rng).and_then(|index| choice.options.get(index)) {
            Some(option) => self.eval_field(option, field, item, rng),
            None => Ok(Value::Null),
        }
    }

    /// Nested object. With a `path` (an object field reached through
    /// objects only) the fields built so far are visible to self references
    /// made by later siblings.
    fn eval_object(
        &mut self,
        object: &'t ItemNode,
        path: Option<String>,
        item: &ItemRef<'t>,
        rng: &mut dyn RngCore,
    ) -> Result<Value, GenerationError> {
        let Some(path) = path else {
            let mut out = Map::new();
            for entry in &object.fields {
                let value = self.eval_field(&entry.node, &entry.name, item, rng)?;
                merge_entry(&mut out, entry, value);
            }
            return Ok(Value::Object(out));
        };

        let depth = self.building.len();
        self.building.push(PartialObject {
            item: item.clone(),
            path,
            fields: Map::new(),
        });
        let filled = self.fill_partial(object, depth, item, rng);
        self.building.truncate(depth + 1);
        let partial = self.building.pop();
        filled?;
        Ok(Value::Object(
            partial.map(|partial| partial.fields).unwrap_or_default(),
        ))
    }

    fn fill_partial(
        &mut self,
        object: &'t ItemNode,
        depth: usize,
        item: &ItemRef<'t>,
        rng: &mut dyn RngCore,
    ) -> Result<(), GenerationError> {
        for entry in &object.fields {
            let value = match &entry.node {
                FieldNode::Object(nested) => {
                    let path = self
                        .building
                        .get(depth)
                        .map(|partial| format!("{}.{}", partial.path, entry.name));
                    self.eval_object(nested, path, item, rng)?
                }
                node => self.eval_field(node, &entry.name, item, rng)?,
            };
            if let Some(partial) = self.building.get_mut(depth) {
                merge_entry(&mut partial.fields, entry, value);
            }
        }
        Ok(())
    }

    fn eval_array(
        &mut self,
        array: &'t ArrayField,
        field: &str,
        item: &ItemRef<'t>,
        rng: &mut dyn RngCore,
    ) -> Result<Value, GenerationError> {
        let size = match array.size {
            ArraySize::Fixed(size) => size,
            ArraySize::Range { min, max } => rng.random_range(min..=max.max(min)),
        };
        let mut values = Vec::new();
        for _ in 0..size {
            values.push(self.eval_field(&array.item, field, item, rng)?);
        }
        Ok(Value::Array(values))
    }

    fn eval_spread(
        &mut self,
        spread: &'t SpreadField,
        field: &str,
        item: &ItemRef<'t>,
        rng: &mut dyn RngCore,
    ) -> Result<Value, GenerationError> {
        let registry = self.registry;
        let generator = registry
            .generator(&spread.generator)
            .ok_or_else(|| GenerationError::UnknownGenerator(spread.generator.clone()))?;
        let params = self.resolve_options(&spread.options, field, item, rng)?;

        let suppliers = generator.field_suppliers();
        let supplied = params.is_none()
            && spread.path.is_none()
            && !spread.mappings.is_empty()
            && spread
                .mappings
                .iter()
                .all(|mapping| suppliers.iter().any(|supplier| supplier.name == mapping.source));
        if supplied {
            self.record_call(generator, spread.id);
            let mut object = Map::new();
            for mapping in &spread.mappings {
                if let Some(supplier) = suppliers
                    .iter()
                    .find(|supplier| supplier.name == mapping.source)
                {
                    object.insert(mapping.target.clone(), (supplier.supply)(rng));
                }
            }
            return Ok(Value::Object(object));
        }

        let value = draw(
            self.ctx,
            generator,
            spread.id,
            field,
            params.as_ref(),
            spread.path.as_deref(),
            rng,
        )?;
        match value {
            Value::Object(object) => Ok(Value::Object(apply_mappings(object, &spread.mappings))),
            _ => Err(GenerationError::generator(
                generator.id(),
                format!("spread field '{field}' requires an object value"),
            )),
        }
    }

    fn eval_reference_spread(
        &mut self,
        spread: &'t ReferenceSpreadField,
        field: &str,
        item: &ItemRef<'t>,
        rng: &mut dyn RngCore,
    ) -> Result<Value, GenerationError> {
        let value = self.resolve_reference(&spread.reference, &spread.filters, field, item, rng)?;
        match value {
            Value::Object(object) => Ok(Value::Object(apply_mappings(object, &spread.mappings))),
            Value::Null => Ok(Value::Object(Map::new())),
            _ => {
                self.ctx.report_mut().record_warning(GenerationIssue::warning(
                    "spread_non_object",
                    format!(
                        "Spread reference '{}' resolved to a non-object value",
                        spread.reference
                    ),
                    Some(field.to_string()),
                ));
                Ok(Value::Object(Map::new()))
            }
        }
    }

    /// Values of the exclusion filters. Nulls are dropped.
    fn eval_filters(
        &mut self,
        filters: &'t [FieldNode],
        field: &str,
        item: &ItemRef<'t>,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<Value>, GenerationError> {
        let mut values = Vec::new();
        for filter in filters {
            let value = self.eval_field(filter, field, item, rng)?;
            if !value.is_null() {
                values.push(value);
            }
        }
        Ok(values)
    }
}

/// One unfiltered generator call.
fn draw(
    ctx: &mut GenerationContext<'_>,
    generator: &dyn Generator,
    node: NodeId,
    field: &str,
    params: Option<&Value>,
    path: Option<&str>,
    rng: &mut dyn RngCore,
) -> Result<Value, GenerationError> {
    ctx.report_mut().record_generator_usage(generator.id());
    let mut gen_ctx = GeneratorContext {
        field,
        invocation: ctx.next_invocation(node),
    };
    match path {
        Some(path) => generator.generate_at_path(&mut gen_ctx, params, path, rng),
        None => generator.generate(&mut gen_ctx, params, rng),
    }
}

/// Add a computed field to an object under construction. Spread entries
/// merge their keys instead.
fn merge_entry(object: &mut Map<String, Value>, entry: &FieldEntry, value: Value) {
    if !entry.is_spread() {
        object.insert(entry.name.clone(), value);
    } else if let Value::Object(spread) = value {
        object.extend(spread);
    }
}

fn apply_mappings(object: Map<String, Value>, mappings: &[SpreadMapping]) -> Map<String, Value> {
    if mappings.is_empty() {
        return object;
    }
    mappings
        .iter()
        .map(|mapping| {
            let value = object.get(&mapping.source).cloned().unwrap_or(Value::Null);
            (mapping.target.clone(), value)
        })
        .collect()
}

/// Whether a field's value depends on how many times its nodes ran before:
/// sequential references and stateful generators.
pub(crate) fn order_sensitive(node: &FieldNode, registry: &GeneratorRegistry) -> bool {
    let stateful = |id: &str| {
        registry
            .generator(id)
            .is_some_and(|generator| generator.is_stateful())
    };
    match node {
        FieldNode::Literal(_) => false,
        FieldNode::Generated(generated) => {
            stateful(&generated.generator)
                || options_order_sensitive(&generated.options, registry)
                || any_order_sensitive(&generated.filters, registry)
        }
        FieldNode::Choice(choice) => {
            any_order_sensitive(&choice.options, registry)
                || any_order_sensitive(&choice.filters, registry)
        }
        FieldNode::Object(object) => object
            .fields
            .iter()
            .any(|entry| order_sensitive(&entry.node, registry)),
        FieldNode::Array(array) => order_sensitive(&array.item, registry),
        FieldNode::Spread(spread) => {
            stateful(&spread.generator) || options_order_sensitive(&spread.options, registry)
        }
        FieldNode::ReferenceSpread(spread) => {
            spread.reference.sequential || any_order_sensitive(&spread.filters, registry)
        }
        FieldNode::Reference(reference) => {
            reference.reference.sequential || any_order_sensitive(&reference.filters, registry)
        }
    }
}

fn any_order_sensitive(nodes: &[FieldNode], registry: &GeneratorRegistry) -> bool {
    nodes.iter().any(|node| order_sensitive(node, registry))
}

fn options_order_sensitive(options: &GeneratorOptions, registry: &GeneratorRegistry) -> bool {
    options.runtime.iter().any(|(_, option)| match option {
        RuntimeOption::Reference { reference, .. } => reference.sequential,
        RuntimeOption::Field(node) => order_sensitive(node, registry),
    })
}
