use rand::RngCore;
use serde_json::Value;

use datagen_core::{GeneratorOptions, RuntimeOption};

use super::Evaluator;
use crate::errors::GenerationError;
use crate::lazy::ItemRef;

impl<'t> Evaluator<'t, '_> {
    /// Generator options for one call: static values plus runtime values
    /// computed for `item`. `None` when the field has no options at all.
    /// Option references that resolve to null are left out, so the
    /// generator falls back to its default.
    pub(super) fn resolve_options(
        &mut self,
        options: &'t GeneratorOptions,
        field: &str,
        item: &ItemRef<'t>,
        rng: &mut dyn RngCore,
    ) -> Result<Option<Value>, GenerationError> {
        if options.static_options.is_empty() && options.is_static() {
            return Ok(None);
        }

        let mut resolved = options.static_options.clone();
        for (name, option) in &options.runtime {
            let value = match option {
                RuntimeOption::Reference { reference, map } => {
                    let value = self.resolve_reference(reference, &[], field, item, rng)?;
                    if value.is_null() {
                        continue;
                    }
                    match map {
                        None => value,
                        Some(map) => {
                            let key = match &value {
                                Value::String(key) => key.clone(),
                                other => other.to_string(),
                            };
                            map.get(&key).cloned().ok_or_else(|| {
                                GenerationError::InvalidOptions(format!(
                                    "Option '{name}' in field '{field}' has no map entry for '{key}'"
                                ))
                            })?
                        }
                    }
                }
                RuntimeOption::Field(node) => self.eval_field(node, field, item, rng)?,
            };
            resolved.insert(name.clone(), value);
        }
        Ok(Some(Value::Object(resolved)))
    }
}
