use serde_json::{Map, Value};

use crate::keywords::{
    ARRAY, CHOICE, COUNT, DEFAULT_MAX_SIZE, DEFAULT_MIN_SIZE, FIELDS, FILTER, GEN, ITEM, MAP,
    MAX_SIZE, MIN_SIZE, OPTIONS, REF, SEQUENTIAL, SIZE, SPREAD_PREFIX, VALUE, WEIGHTS,
};
use crate::node::{
    ArrayField, ArraySize, ChoiceField, FieldEntry, FieldNode, GeneratedField, GeneratorOptions,
    ItemNode, ReferenceField, ReferenceSpreadField, RuntimeOption, SpreadField, SpreadMapping,
};

use super::{BuildState, Scope};

/// Keys of a generated field that are never passed to the generator.
const RESERVED: [&str; 5] = [GEN, FILTER, OPTIONS, FIELDS, WEIGHTS];

impl BuildState<'_> {
    pub(crate) fn build_item(&mut self, scope: &Scope, item: &Map<String, Value>) -> ItemNode {
        let mut fields = Vec::with_capacity(item.len());
        for (name, value) in item {
            let field_scope = scope.child(name);

            if name.starts_with(crate::keywords::SHADOW_PREFIX) && !scope.top_level {
                self.error(
                    "nested_shadow_binding",
                    &field_scope.pointer,
                    format!("Shadow binding '{name}' is only allowed at the top level of an item"),
                );
                continue;
            }

            let node = if name.starts_with(SPREAD_PREFIX) {
                self.build_spread(&field_scope, value)
            } else {
                self.build_field(&field_scope, value)
            };
            if let Some(node) = node {
                fields.push(FieldEntry {
                    name: name.clone(),
                    node,
                });
            }
        }
        ItemNode { fields }
    }

    pub(crate) fn build_field(&mut self, scope: &Scope, value: &Value) -> Option<FieldNode> {
        let Value::Object(spec) = value else {
            return Some(FieldNode::Literal(value.clone()));
        };

        if spec.contains_key(COUNT) {
            return self.build_counted(scope, spec);
        }
        if spec.contains_key(GEN) {
            return self.build_generated(scope, spec);
        }
        if let Some(options) = spec.get(CHOICE) {
            return self.build_choice(scope, Some(options), spec);
        }
        if spec.contains_key(REF) {
            return self.build_reference_field(scope, spec);
        }
        if let Some(array) = spec.get(ARRAY) {
            return self.build_array(scope, array);
        }
        Some(FieldNode::Object(self.build_item(scope, spec)))
    }

    /// `{"count": n, "item": spec}`, `{"count": n, "value": literal}` or
    /// `{"count": n, ...spec}`.
    fn build_counted(&mut self, scope: &Scope, spec: &Map<String, Value>) -> Option<FieldNode> {
        let count_pointer = scope.part(COUNT, "").pointer;
        let count = match spec.get(COUNT).and_then(Value::as_u64) {
            Some(count) => count,
            None => {
                self.error(
                    "invalid_count",
                    &count_pointer,
                    format!("Field '{}' count must be a non-negative integer", scope.field),
                );
                return None;
            }
        };

        let mut rest = spec.clone();
        rest.remove(COUNT);
        let item = if rest.is_empty() {
            self.error(
                "invalid_array",
                &scope.pointer,
                format!(
                    "Field '{}' with count must have additional field definition",
                    scope.field
                ),
            );
            return None;
        } else if rest.len() == 1 && rest.contains_key(VALUE) {
            FieldNode::Literal(rest.get(VALUE).cloned().unwrap_or(Value::Null))
        } else if rest.len() == 1 && rest.contains_key(ITEM) {
            let item_scope = scope.part(ITEM, "[item]");
            self.build_field(&item_scope, rest.get(ITEM).unwrap_or(&Value::Null))?
        } else {
            self.build_field(&scope.part(ITEM, "[item]"), &Value::Object(rest))?
        };

        Some(FieldNode::Array(ArrayField {
            item: Box::new(item),
            size: ArraySize::Fixed(count),
        }))
    }

    fn build_generated(&mut self, scope: &Scope, spec: &Map<String, Value>) -> Option<FieldNode> {
        let Some(generator) = spec.get(GEN).and_then(Value::as_str) else {
            self.error(
                "invalid_generator",
                &scope.part(GEN, "").pointer,
                format!("Generated field '{}' gen must be a string", scope.field),
            );
            return None;
        };

        if generator == CHOICE {
            return self.build_choice(scope, spec.get(OPTIONS), spec);
        }

        let (generator, path) = split_generator(generator);
        if !self.has_generator(generator) {
            self.error(
                "unknown_generator",
                &scope.part(GEN, "").pointer,
                format!("Unknown generator: {generator}"),
            );
            return None;
        }

        let filters = self.build_filters(scope, spec, "Generated field");
        let options = self.build_options(scope, spec);
        Some(FieldNode::Generated(GeneratedField {
            id: self.next_id(),
            generator: generator.to_string(),
            path,
            options,
            filters,
        }))
    }

    fn build_choice(
        &mut self,
        scope: &Scope,
        options: Option<&Value>,
        spec: &Map<String, Value>,
    ) -> Option<FieldNode> {
        let label = format!("Choice field '{}'", scope.field);
        let Some(Value::Array(raw_options)) = options else {
            self.error(
                "invalid_choice",
                &scope.pointer,
                format!("{label} must have a non-empty 'options' array"),
            );
            return None;
        };
        if raw_options.is_empty() {
            self.error(
                "invalid_choice",
                &scope.pointer,
                format!("{label} must have a non-empty 'options' array"),
            );
            return None;
        }

        let options_key = if spec.contains_key(CHOICE) { CHOICE } else { OPTIONS };
        let mut built = Vec::with_capacity(raw_options.len());
        for (idx, option) in raw_options.iter().enumerate() {
            let option_scope = scope
                .part(options_key, "")
                .part(&idx.to_string(), "[option]");
            if let Some(node) = self.build_field(&option_scope, option) {
                built.push(node);
            }
        }
        if built.len() != raw_options.len() {
            return None;
        }

        let weights = match spec.get(WEIGHTS) {
            None => None,
            Some(weights) => Some(self.build_weights(scope, &label, weights, built.len())?),
        };
        let filters = self.build_filters(scope, spec, "Choice field");

        Some(FieldNode::Choice(ChoiceField {
            id: self.next_id(),
            options: built,
            weights,
            filters,
        }))
    }

    fn build_weights(
        &mut self,
        scope: &Scope,
        label: &str,
        weights: &Value,
        expected: usize,
    ) -> Option<Vec<f64>> {
        let pointer = scope.part(WEIGHTS, "").pointer;
        let Value::Array(weights) = weights else {
            self.error(
                "invalid_weights",
                &pointer,
                format!("{label} weights must be an array"),
            );
            return None;
        };
        if weights.len() != expected {
            self.error(
                "invalid_weights",
                &pointer,
                format!("{label} weights must have the same length as options"),
            );
            return None;
        }

        let parsed: Option<Vec<f64>> = weights
            .iter()
            .map(|weight| weight.as_f64().filter(|weight| *weight > 0.0))
            .collect();
        match parsed {
            Some(parsed) => Some(
                parsed
                    .into_iter()
                    .map(|weight| (weight * 100.0).round() / 100.0)
                    .collect(),
            ),
            None => {
                self.error(
                    "invalid_weights",
                    &pointer,
                    format!("{label} weights must be positive numbers"),
                );
                None
            }
        }
    }

    fn build_reference_field(
        &mut self,
        scope: &Scope,
        spec: &Map<String, Value>,
    ) -> Option<FieldNode> {
        let raw = self.reference_text(scope, spec)?;
        let sequential = self.sequential_flag(scope, spec);
        let filters = self.build_filters(scope, spec, "Reference field");
        let reference = self.build_reference(scope, raw, sequential)?;
        Some(FieldNode::Reference(ReferenceField { reference, filters }))
    }

    fn build_spread(&mut self, scope: &Scope, value: &Value) -> Option<FieldNode> {
        let label = format!("Spread field '{}'", scope.field);
        let Value::Object(spec) = value else {
            self.error(
                "invalid_spread",
                &scope.pointer,
                format!("{label} must be an object with 'gen' or 'ref'"),
            );
            return None;
        };

        if spec.contains_key(REF) {
            let raw = self.reference_text(scope, spec)?;
            let sequential = self.sequential_flag(scope, spec);
            let mappings = self.build_mappings(scope, &label, spec)?;
            let filters = self.build_filters(scope, spec, "Spread field");
            let reference = self.build_reference(scope, raw, sequential)?;
            return Some(FieldNode::ReferenceSpread(ReferenceSpreadField {
                reference,
                mappings,
                filters,
            }));
        }

        let Some(generator) = spec.get(GEN).and_then(Value::as_str) else {
            self.error(
                "invalid_spread",
                &scope.pointer,
                format!("{label} must be an object with 'gen' or 'ref'"),
            );
            return None;
        };
        let (generator, path) = split_generator(generator);
        if !self.has_generator(generator) {
            self.error(
                "unknown_generator",
                &scope.part(GEN, "").pointer,
                format!("Unknown generator: {generator}"),
            );
            return None;
        }

        let mappings = self.build_mappings(scope, &label, spec)?;
        let options = self.build_options(scope, spec);
        Some(FieldNode::Spread(SpreadField {
            id: self.next_id(),
            generator: generator.to_string(),
            path,
            options,
            mappings,
        }))
    }

    fn build_array(&mut self, scope: &Scope, array: &Value) -> Option<FieldNode> {
        let label = format!("Array field '{}'", scope.field);
        let array_scope = scope.part(ARRAY, "");
        let Value::Object(array) = array else {
            self.error(
                "invalid_array",
                &array_scope.pointer,
                format!("{label} array definition must be an object"),
            );
            return None;
        };
        let Some(item) = array.get(ITEM) else {
            self.error(
                "invalid_array",
                &array_scope.pointer,
                format!("{label} must have an 'item' definition"),
            );
            return None;
        };

        let has_size = array.contains_key(SIZE);
        let has_range = array.contains_key(MIN_SIZE) || array.contains_key(MAX_SIZE);
        if has_size && has_range {
            self.error(
                "invalid_array",
                &array_scope.pointer,
                format!("{label} cannot have both 'size' and 'minSize/maxSize'"),
            );
            return None;
        }

        let size = if has_size {
            let Some(size) = array.get(SIZE).and_then(Value::as_u64) else {
                self.error(
                    "invalid_array",
                    &array_scope.part(SIZE, "").pointer,
                    format!("{label} size must be a non-negative integer"),
                );
                return None;
            };
            ArraySize::Fixed(size)
        } else {
            let min = self.size_bound(&array_scope, &label, array, MIN_SIZE, DEFAULT_MIN_SIZE)?;
            let max = self.size_bound(&array_scope, &label, array, MAX_SIZE, DEFAULT_MAX_SIZE)?;
            if min > max {
                self.error(
                    "invalid_array",
                    &array_scope.pointer,
                    format!("{label} minSize cannot be greater than maxSize"),
                );
                return None;
            }
            ArraySize::Range { min, max }
        };

        let item = self.build_field(&array_scope.part(ITEM, "[item]"), item)?;
        Some(FieldNode::Array(ArrayField {
            item: Box::new(item),
            size,
        }))
    }

    fn size_bound(
        &mut self,
        scope: &Scope,
        label: &str,
        array: &Map<String, Value>,
        key: &str,
        default: u64,
    ) -> Option<u64> {
        match array.get(key) {
            None => Some(default),
            Some(value) => match value.as_u64() {
                Some(bound) => Some(bound),
                None => {
                    self.error(
                        "invalid_array",
                        &scope.part(key, "").pointer,
                        format!("{label} {key} must be a non-negative integer"),
                    );
                    None
                }
            },
        }
    }

    fn build_filters(
        &mut self,
        scope: &Scope,
        spec: &Map<String, Value>,
        kind: &str,
    ) -> Vec<FieldNode> {
        let Some(filters) = spec.get(FILTER) else {
            return Vec::new();
        };
        let Value::Array(filters) = filters else {
            self.error(
                "invalid_filter",
                &scope.part(FILTER, "").pointer,
                format!("{kind} '{}' filter must be an array", scope.field),
            );
            return Vec::new();
        };

        filters
            .iter()
            .enumerate()
            .filter_map(|(idx, filter)| {
                let filter_scope = scope.part(FILTER, "").part(&idx.to_string(), "[filter]");
                self.build_field(&filter_scope, filter)
            })
            .collect()
    }

    /// Options come from an explicit `options` object and from any key of
    /// the field that is not reserved, so `{"gen": "number", "min": 1}` and
    /// `{"gen": "number", "options": {"min": 1}}` are the same field.
    fn build_options(&mut self, scope: &Scope, spec: &Map<String, Value>) -> GeneratorOptions {
        let mut options = GeneratorOptions::default();

        match spec.get(OPTIONS) {
            None => {}
            Some(Value::Object(explicit)) => {
                let options_scope = scope.part(OPTIONS, "");
                for (key, value) in explicit {
                    self.add_option(&options_scope, &mut options, key, value);
                }
            }
            Some(_) => self.error(
                "invalid_options",
                &scope.part(OPTIONS, "").pointer,
                format!("Generated field '{}' options must be an object", scope.field),
            ),
        }

        for (key, value) in spec {
            if RESERVED.contains(&key.as_str()) || key == REF || key == SEQUENTIAL {
                continue;
            }
            self.add_option(scope, &mut options, key, value);
        }
        options
    }

    fn add_option(
        &mut self,
        scope: &Scope,
        options: &mut GeneratorOptions,
        key: &str,
        value: &Value,
    ) {
        let option_scope = scope.part(key, &format!(".{key}"));
        let Value::Object(spec) = value else {
            options.static_options.insert(key.to_string(), value.clone());
            return;
        };

        if spec.contains_key(REF) {
            let Some(raw) = self.reference_text(&option_scope, spec) else {
                return;
            };
            let map = match spec.get(MAP) {
                None => None,
                Some(Value::Object(map)) => Some(map.clone()),
                Some(_) => {
                    self.error(
                        "invalid_option_map",
                        &option_scope.part(MAP, "").pointer,
                        format!(
                            "Option '{key}' in field '{}' has invalid map - must be an object",
                            scope.field.trim_end_matches('.')
                        ),
                    );
                    return;
                }
            };
            let sequential = self.sequential_flag(&option_scope, spec);
            if let Some(reference) = self.build_reference(&option_scope, raw, sequential) {
                options
                    .runtime
                    .push((key.to_string(), RuntimeOption::Reference { reference, map }));
            }
            return;
        }

        if spec.contains_key(GEN) || spec.contains_key(CHOICE) {
            if let Some(node) = self.build_field(&option_scope, value) {
                options
                    .runtime
                    .push((key.to_string(), RuntimeOption::Field(Box::new(node))));
            }
            return;
        }

        options.static_options.insert(key.to_string(), value.clone());
    }

    fn build_mappings(
        &mut self,
        scope: &Scope,
        label: &str,
        spec: &Map<String, Value>,
    ) -> Option<Vec<SpreadMapping>> {
        let Some(fields) = spec.get(FIELDS) else {
            return Some(Vec::new());
        };
        let pointer = scope.part(FIELDS, "").pointer;
        let Value::Array(fields) = fields else {
            self.error(
                "invalid_spread",
                &pointer,
                format!("{label} fields must be an array"),
            );
            return None;
        };

        let mut mappings = Vec::with_capacity(fields.len());
        for field in fields {
            match field.as_str().map(str::trim) {
                Some(spec) if !spec.is_empty() => mappings.push(SpreadMapping::parse(spec)),
                _ => {
                    self.error(
                        "invalid_spread",
                        &pointer,
                        format!("{label} fields must be non-empty strings"),
                    );
                    return None;
                }
            }
        }
        if mappings.is_empty() {
            self.error(
                "invalid_spread",
                &pointer,
                format!("{label} must have at least one field when fields array is provided"),
            );
            return None;
        }
        Some(mappings)
    }

    fn reference_text<'v>(&mut self, scope: &Scope, spec: &'v Map<String, Value>) -> Option<&'v str> {
        match spec.get(REF) {
            Some(Value::String(raw)) => Some(raw),
            _ => {
                self.error(
                    "invalid_reference",
                    &scope.part(REF, "").pointer,
                    format!("Reference field '{}' ref must be a string", scope.field),
                );
                None
            }
        }
    }

    fn sequential_flag(&mut self, scope: &Scope, spec: &Map<String, Value>) -> bool {
        match spec.get(SEQUENTIAL) {
            None => false,
            Some(Value::Bool(flag)) => *flag,
            Some(_) => {
                self.error(
                    "invalid_sequential",
                    &scope.part(SEQUENTIAL, "").pointer,
                    format!("Reference field '{}' sequential must be a boolean", scope.field),
                );
                false
            }
        }
    }
}

/// `"name.firstName"` is generator `name` with path `firstName`.
fn split_generator(spec: &str) -> (&str, Option<String>) {
    match spec.split_once('.') {
        Some((generator, path)) if !path.is_empty() => (generator, Some(path.to_string())),
        Some((generator, _)) => (generator, None),
        None => (spec, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generator_path_is_split_once() {
        assert_eq!(
            split_generator("address.geo.lat"),
            ("address", Some("geo.lat".to_string()))
        );
        assert_eq!(split_generator("uuid"), ("uuid", None));
    }
}
