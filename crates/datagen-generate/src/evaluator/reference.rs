use rand::RngCore;
use serde_json::Value;

use datagen_core::{
    Condition, ConditionValue, FieldNode, IndexSelector, ReferenceNode, ReferenceTarget,
    TagSelector,
};

use super::Evaluator;
use crate::errors::GenerationError;
use crate::filtering::{compare, is_excluded};
use crate::generators::project;
use crate::lazy::ItemRef;

impl<'t> Evaluator<'t, '_> {
    /// Resolve a reference for a field of `item`: build the candidate pool,
    /// apply the condition and exclusion filters, then select.
    pub(super) fn resolve_reference(
        &mut self,
        reference: &'t ReferenceNode,
        filters: &'t [FieldNode],
        field: &str,
        item: &ItemRef<'t>,
        rng: &mut dyn RngCore,
    ) -> Result<Value, GenerationError> {
        let exclusions = self.eval_filters(filters, field, item, rng)?;
        let epoch = item.epoch();

        match &reference.target {
            ReferenceTarget::Collection { collection, field } => {
                let pool = self.ctx.collection_pool(collection, epoch);
                self.select_from(reference, pool, field.as_deref(), &exclusions, rng)
            }
            ReferenceTarget::Indexed {
                collection,
                index,
                field,
            } => {
                let mut pool = self.ctx.collection_pool(collection, epoch);
                match *index {
                    IndexSelector::Single(index) => {
                        let Some(candidate) = usize::try_from(index)
                            .ok()
                            .and_then(|index| pool.get(index))
                            .cloned()
                        else {
                            return Ok(Value::Null);
                        };
                        let value = self.project(&candidate, field.as_deref())?;
                        self.single_value(reference, value, &exclusions)
                    }
                    IndexSelector::Range { start, end } => {
                        let start = usize::try_from(start).unwrap_or(usize::MAX);
                        if start >= pool.len() {
                            return Ok(Value::Null);
                        }
                        let last = pool.len() - 1;
                        let end = end
                            .and_then(|end| usize::try_from(end).ok())
                            .map_or(last, |end| end.min(last));
                        pool.truncate(end + 1);
                        pool.drain(..start);
                        self.select_from(reference, pool, field.as_deref(), &exclusions, rng)
                    }
                }
            }
            ReferenceTarget::Tag { tag, field } => {
                let tag = match tag {
                    TagSelector::Static(tag) => tag.clone(),
                    TagSelector::SelfField(path) => match self.self_value(item, path)? {
                        Value::Null => return Ok(Value::Null),
                        Value::String(tag) => tag,
                        other => other.to_string(),
                    },
                };
                let pool = self.ctx.tag_pool(&tag, epoch);
                self.select_from(reference, pool, field.as_deref(), &exclusions, rng)
            }
            ReferenceTarget::Pick { alias, field } => {
                let Some(candidate) = self.ctx.pick(alias, epoch) else {
                    return Ok(Value::Null);
                };
                let value = self.project(&candidate, field.as_deref())?;
                self.single_value(reference, value, &exclusions)
            }
            ReferenceTarget::SelfField { path } => {
                let value = self.self_value(item, path)?;
                self.single_value(reference, value, &exclusions)
            }
            ReferenceTarget::Shadow { binding, path } => {
                let value = self.shadow_value(item, binding, path.as_deref())?;
                self.single_value(reference, value, &exclusions)
            }
            ReferenceTarget::Conditional {
                collection,
                condition,
                field,
            } => {
                let pool = self.ctx.collection_pool(collection, epoch);
                if pool.is_empty() {
                    return Ok(Value::Null);
                }
                let mut matched = Vec::new();
                for candidate in pool {
                    if self.matches(condition, &candidate, item)? {
                        matched.push(candidate);
                    }
                }
                if matched.is_empty() {
                    return self.ctx.handle_filtering_failure(
                        format!("Conditional reference '{reference}' matched no items"),
                        0,
                    );
                }
                self.select_from(reference, matched, field.as_deref(), &exclusions, rng)
            }
        }
    }

    /// Pick one candidate and project `field` out of it. Exclusions are
    /// applied to the projected values before selecting.
    fn select_from(
        &mut self,
        reference: &ReferenceNode,
        pool: Vec<ItemRef<'t>>,
        field: Option<&str>,
        exclusions: &[Value],
        rng: &mut dyn RngCore,
    ) -> Result<Value, GenerationError> {
        if exclusions.is_empty() {
            let Some(index) = self
                .ctx
                .select(pool.len(), reference.id, reference.sequential, rng)
            else {
                return Ok(Value::Null);
            };
            return self.project(&pool[index], field);
        }

        let mut values = Vec::with_capacity(pool.len());
        for candidate in &pool {
            let value = self.project(candidate, field)?;
            if !is_excluded(&value, exclusions) {
                values.push(value);
            }
        }
        match self
            .ctx
            .select(values.len(), reference.id, reference.sequential, rng)
        {
            Some(index) => Ok(values.swap_remove(index)),
            None => self.ctx.handle_filtering_failure(
                format!("Reference '{reference}' has no valid values after filtering"),
                1,
            ),
        }
    }

    fn single_value(
        &mut self,
        reference: &ReferenceNode,
        value: Value,
        exclusions: &[Value],
    ) -> Result<Value, GenerationError> {
        if is_excluded(&value, exclusions) {
            return self.ctx.handle_filtering_failure(
                format!("Reference '{reference}' value matches filter"),
                1,
            );
        }
        Ok(value)
    }

    fn matches(
        &mut self,
        condition: &'t Condition,
        candidate: &ItemRef<'t>,
        item: &ItemRef<'t>,
    ) -> Result<bool, GenerationError> {
        condition.try_evaluate(|comparison| {
            let expected = match &comparison.value {
                ConditionValue::Literal(value) => value.clone(),
                ConditionValue::Binding { name, path } => {
                    self.shadow_value(item, name, path.as_deref())?
                }
            };
            let actual = self.lookup(candidate, &comparison.path)?;
            Ok(compare(actual.as_ref(), comparison.operator, &expected))
        })
    }

    /// Whole item, or the value at `field`. Missing paths are null.
    fn project(
        &mut self,
        candidate: &ItemRef<'t>,
        field: Option<&str>,
    ) -> Result<Value, GenerationError> {
        match field {
            None => self.materialize(candidate),
            Some(path) => Ok(self.lookup(candidate, path)?.unwrap_or(Value::Null)),
        }
    }

    fn self_value(&mut self, item: &ItemRef<'t>, path: &str) -> Result<Value, GenerationError> {
        if let Some(value) = self.partial_value(item, path) {
            return Ok(value);
        }
        Ok(self.lookup(item, path)?.unwrap_or(Value::Null))
    }

    fn shadow_value(
        &mut self,
        item: &ItemRef<'t>,
        binding: &str,
        path: Option<&str>,
    ) -> Result<Value, GenerationError> {
        let name = format!("${binding}");
        let position = item
            .template()
            .position(&name)
            .ok_or_else(|| GenerationError::UnboundShadow(binding.to_string()))?;
        let value = self.force(item, position)?;
        Ok(match path {
            None => value,
            Some(path) => project(&value, path).cloned().unwrap_or(Value::Null),
        })
    }

    /// Value at a dotted path of an item, computing only the top-level field
    /// it starts with. Keys merged in by spreads are found through the
    /// spread that produces them. `None` when the item has no such value.
    pub(super) fn lookup(
        &mut self,
        item: &ItemRef<'t>,
        path: &str,
    ) -> Result<Option<Value>, GenerationError> {
        let (head, rest) = match path.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (path, None),
        };
        let descend = |value: Value| match rest {
            None => Some(value),
            Some(rest) => project(&value, rest).cloned(),
        };

        let template = item.template();
        if let Some(position) = template.position(head) {
            return Ok(descend(self.force(item, position)?));
        }

        for (position, entry) in template.fields.iter().enumerate() {
            if !entry.is_spread() {
                continue;
            }
            let provides = match entry.node.spread_mappings() {
                Some([]) => true,
                Some(mappings) => mappings.iter().any(|mapping| mapping.target == head),
                None => false,
            };
            if !provides {
                continue;
            }
            if let Some(value) = self.force(item, position)?.get(head) {
                return Ok(descend(value.clone()));
            }
        }
        Ok(None)
    }
}
