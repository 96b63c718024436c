//! Generator plugin interface and the registry the evaluator draws from.

use std::collections::BTreeMap;

use rand::RngCore;
use serde_json::Value;

use datagen_core::GeneratorCatalog;

use crate::errors::GenerationError;
use crate::filtering::is_excluded;

pub mod choice;
pub mod primitives;
pub mod semantic;

/// Per-call context handed to generators.
#[derive(Debug, Clone, Copy)]
pub struct GeneratorContext<'a> {
    /// Name of the field being generated.
    pub field: &'a str,
    /// Zero-based count of earlier calls from the same node in this run.
    pub invocation: u64,
}

/// Produces one named sub value without building the whole object.
#[derive(Clone, Copy)]
pub struct FieldSupplier {
    pub name: &'static str,
    pub supply: fn(&mut dyn RngCore) -> Value,
}

pub trait Generator {
    fn id(&self) -> &'static str;

    fn generate(
        &self,
        ctx: &mut GeneratorContext<'_>,
        params: Option<&Value>,
        rng: &mut dyn RngCore,
    ) -> Result<Value, GenerationError>;

    /// Whether [`Generator::generate_with_filter`] honours the exclusion
    /// list itself. Otherwise the evaluator retries.
    fn supports_filtering(&self) -> bool {
        false
    }

    /// `Ok(None)` when no acceptable value exists.
    fn generate_with_filter(
        &self,
        ctx: &mut GeneratorContext<'_>,
        params: Option<&Value>,
        filter: &[Value],
        rng: &mut dyn RngCore,
    ) -> Result<Option<Value>, GenerationError> {
        let value = self.generate(ctx, params, rng)?;
        Ok((!is_excluded(&value, filter)).then_some(value))
    }

    fn field_suppliers(&self) -> &'static [FieldSupplier] {
        &[]
    }

    /// Value at a dotted path of the generated object.
    fn generate_at_path(
        &self,
        ctx: &mut GeneratorContext<'_>,
        params: Option<&Value>,
        path: &str,
        rng: &mut dyn RngCore,
    ) -> Result<Value, GenerationError> {
        if params.is_none()
            && let Some(supplier) = self
                .field_suppliers()
                .iter()
                .find(|supplier| supplier.name == path)
        {
            return Ok((supplier.supply)(rng));
        }
        let value = self.generate(ctx, params, rng)?;
        project(&value, path).cloned().ok_or_else(|| {
            GenerationError::generator(self.id(), format!("no value at path '{path}'"))
        })
    }

    fn generate_at_path_with_filter(
        &self,
        ctx: &mut GeneratorContext<'_>,
        params: Option<&Value>,
        path: &str,
        filter: &[Value],
        rng: &mut dyn RngCore,
    ) -> Result<Option<Value>, GenerationError> {
        let value = self.generate_at_path(ctx, params, path, rng)?;
        Ok((!is_excluded(&value, filter)).then_some(value))
    }

    /// Output depends on how often the generator was called before, so
    /// lazy generation must not defer it.
    fn is_stateful(&self) -> bool {
        false
    }
}

/// Walk a dotted path through nested objects.
pub fn project<'v>(value: &'v Value, path: &str) -> Option<&'v Value> {
    path.split('.')
        .try_fold(value, |current, segment| current.get(segment))
}

/// Registry of generators by id.
pub struct GeneratorRegistry {
    generators: BTreeMap<&'static str, Box<dyn Generator>>,
}

impl Default for GeneratorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl GeneratorRegistry {
    /// Registry without any generator.
    pub fn empty() -> Self {
        Self {
            generators: BTreeMap::new(),
        }
    }

    /// Registry with the built-in library.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        primitives::register(&mut registry);
        choice::register(&mut registry);
        semantic::register(&mut registry);
        registry
    }

    /// Add or replace a generator under its own id.
    pub fn register_generator(&mut self, generator: Box<dyn Generator>) {
        self.generators.insert(generator.id(), generator);
    }

    pub fn generator(&self, id: &str) -> Option<&dyn Generator> {
        self.generators.get(id).map(|generator| generator.as_ref())
    }

    pub fn ids(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.generators.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.generators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.generators.is_empty()
    }
}

impl GeneratorCatalog for GeneratorRegistry {
    fn has_generator(&self, id: &str) -> bool {
        self.generators.contains_key(id)
    }
}
