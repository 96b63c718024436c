use std::cell::Cell;
use std::rc::Rc;

use rand::RngCore;
use serde_json::{Value, json};

use datagen_core::build_tree;
use datagen_generate::{
    FilteringBehavior, GenerateOptions, GenerationEngine, GenerationError, Generator,
    GeneratorContext, GeneratorRegistry,
};

/// Always yields the same value and counts its calls.
struct Constant {
    calls: Rc<Cell<u32>>,
}

impl Generator for Constant {
    fn id(&self) -> &'static str {
        "constant"
    }

    fn generate(
        &self,
        _ctx: &mut GeneratorContext<'_>,
        _params: Option<&Value>,
        _rng: &mut dyn RngCore,
    ) -> Result<Value, GenerationError> {
        self.calls.set(self.calls.get() + 1);
        Ok(json!(7))
    }
}

fn registry_with_constant() -> (GeneratorRegistry, Rc<Cell<u32>>) {
    let calls = Rc::new(Cell::new(0));
    let mut registry = GeneratorRegistry::with_defaults();
    registry.register_generator(Box::new(Constant {
        calls: Rc::clone(&calls),
    }));
    (registry, calls)
}

fn options(behavior: FilteringBehavior, retries: u32) -> GenerateOptions {
    GenerateOptions {
        max_filtering_retries: retries,
        filtering_behavior: behavior,
        ..GenerateOptions::default()
    }
}

fn excluded_constant() -> Value {
    json!({
        "things": {
            "count": 1,
            "item": {"value": {"gen": "constant", "filter": [7]}}
        }
    })
}

#[test]
fn exhaustion_yields_null_after_exactly_max_attempts() {
    let (registry, calls) = registry_with_constant();
    let root = build_tree(&excluded_constant(), &registry)
        .expect("schema builds")
        .root;

    let result = GenerationEngine::new(options(FilteringBehavior::ReturnNull, 5))
        .run(&root, &registry)
        .expect("null behavior keeps running");

    assert_eq!(calls.get(), 5);
    assert_eq!(result.dataset.get("things"), Some(&[json!({"value": null})][..]));
    assert_eq!(result.report.filter_attempts, 5);
    assert_eq!(result.report.filters_exhausted, 1);
    assert_eq!(result.report.warnings_by_code.get("filter_exhausted"), Some(&1));
    assert_eq!(result.report.generator_usage.get("constant"), Some(&5));
}

#[test]
fn exhaustion_raises_under_throw_behavior() {
    let (registry, calls) = registry_with_constant();
    let root = build_tree(&excluded_constant(), &registry)
        .expect("schema builds")
        .root;

    let err = GenerationEngine::new(options(FilteringBehavior::ThrowException, 3))
        .run(&root, &registry)
        .expect_err("throw behavior aborts");

    assert_eq!(calls.get(), 3);
    match err {
        GenerationError::FilteringExhausted { message, attempts } => {
            assert_eq!(attempts, 3);
            assert_eq!(
                message,
                "Field 'value' failed to generate a valid value after 3 retries"
            );
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn native_filtering_does_not_retry() {
    let registry = GeneratorRegistry::with_defaults();
    let document = json!({
        "things": {
            "count": 2,
            "item": {"tier": {"choice": ["gold", "basic"], "filter": ["gold", "basic"]}}
        }
    });
    let root = build_tree(&document, &registry).expect("schema builds").root;

    let result = GenerationEngine::new(options(FilteringBehavior::ReturnNull, 50))
        .run(&root, &registry)
        .expect("run generation");

    for item in result.dataset.get("things").expect("things") {
        assert_eq!(item["tier"], Value::Null);
    }
    assert_eq!(result.report.filters_exhausted, 2);
    assert_eq!(result.report.filter_attempts, 0);
}

#[test]
fn fully_excluded_reference_pool_applies_behavior() {
    let registry = GeneratorRegistry::with_defaults();
    let document = json!({
        "users": {"count": 3, "item": {"id": {"gen": "sequence"}}},
        "orders": {
            "count": 1,
            "item": {"user": {"ref": "users[*].id", "filter": [0, 1, 2.0]}}
        }
    });
    let root = build_tree(&document, &registry).expect("schema builds").root;

    let result = GenerationEngine::new(options(FilteringBehavior::ReturnNull, 10))
        .run(&root, &registry)
        .expect("run generation");
    assert_eq!(result.dataset.get("orders"), Some(&[json!({"user": null})][..]));

    let err = GenerationEngine::new(options(FilteringBehavior::ThrowException, 10))
        .run(&root, &registry)
        .expect_err("throw behavior aborts");
    assert!(
        err.to_string()
            .contains("Reference 'users[*].id' has no valid values after filtering"),
        "unexpected message: {err}"
    );
}

#[test]
fn unmatched_condition_applies_behavior() {
    let registry = GeneratorRegistry::with_defaults();
    let document = json!({
        "users": {"count": 4, "item": {"id": {"gen": "sequence"}, "status": "inactive"}},
        "orders": {"count": 2, "item": {"user": {"ref": "users[status='active'].id"}}}
    });
    let root = build_tree(&document, &registry).expect("schema builds").root;

    let result = GenerationEngine::default()
        .run(&root, &registry)
        .expect("run generation");
    assert_eq!(result.report.filters_exhausted, 2);
    for order in result.dataset.get("orders").expect("orders") {
        assert_eq!(order["user"], Value::Null);
    }
}
