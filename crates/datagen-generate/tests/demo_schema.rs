use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

use serde_json::Value;
use sha2::{Digest, Sha256};

use datagen_core::{BuiltTree, parse_schema};
use datagen_generate::output::write_dataset_json;
use datagen_generate::{GenerateOptions, GenerationEngine, GenerationResult, GeneratorRegistry};

fn demo_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../demos").join(name)
}

fn load_demo(registry: &GeneratorRegistry) -> BuiltTree {
    let path = demo_path("shop.schema.json");
    let contents = fs::read_to_string(&path)
        .unwrap_or_else(|_| panic!("missing schema at {}", path.display()));
    parse_schema(&contents, registry).expect("demo schema is valid")
}

fn run_demo(memory_optimized: bool) -> GenerationResult {
    let registry = GeneratorRegistry::with_defaults();
    let tree = load_demo(&registry);
    let options = GenerateOptions {
        memory_optimized,
        ..GenerateOptions::default()
    };
    GenerationEngine::new(options)
        .run(&tree.root, &registry)
        .expect("run demo")
}

fn hash_file(path: &std::path::Path) -> String {
    let bytes = fs::read(path).expect("read dataset");
    hex::encode(Sha256::digest(&bytes))
}

#[test]
fn demo_schema_builds_without_warnings() {
    let registry = GeneratorRegistry::with_defaults();
    let tree = load_demo(&registry);

    assert!(tree.warnings.is_empty(), "{:?}", tree.warnings);
    let keys: Vec<&str> = tree
        .root
        .collections
        .iter()
        .map(|collection| collection.key.as_str())
        .collect();
    assert_eq!(
        keys,
        vec!["countries", "staff", "customers", "products", "orders"]
    );
}

#[test]
fn demo_dataset_is_consistent() {
    let result = run_demo(false);
    let dataset = &result.dataset;

    assert_eq!(
        dataset.names().collect::<Vec<_>>(),
        vec!["countries", "users", "products", "orders"]
    );
    let users = dataset.get("users").expect("users");
    assert_eq!(users.len(), 23);

    let codes: HashSet<&Value> = dataset
        .get("countries")
        .expect("countries")
        .iter()
        .map(|country| &country["code"])
        .collect();
    let skus: HashSet<&Value> = dataset
        .get("products")
        .expect("products")
        .iter()
        .map(|product| &product["sku"])
        .collect();
    let admin = &users[0]["name"];

    for customer in users.iter().filter(|user| user["role"] == "customer") {
        assert!(codes.contains(&customer["country"]));
    }
    for order in dataset.get("orders").expect("orders") {
        assert!(order.get("$buyer").is_none());
        assert_ne!(order["status"], "cancelled");
        assert_eq!(&order["approvedBy"], admin);
        assert!(skus.contains(&order["sku"]));
        assert!(order["unitPrice"].is_f64() || order["unitPrice"].is_u64());

        let buyer = users
            .iter()
            .find(|user| user["id"] == order["buyerId"])
            .expect("buyer exists");
        assert_eq!(buyer["status"], "active");
        assert_eq!(buyer["role"], "customer");
        assert_eq!(buyer["address"]["city"], order["shipTo"]);
    }
}

#[test]
fn demo_output_is_stable_across_runs_and_modes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let eager_path = dir.path().join("eager.json");
    let lazy_path = dir.path().join("lazy.json");

    write_dataset_json(&eager_path, &run_demo(false).dataset).expect("write eager");
    write_dataset_json(&lazy_path, &run_demo(true).dataset).expect("write lazy");

    assert_eq!(hash_file(&eager_path), hash_file(&lazy_path));

    let again = dir.path().join("again.json");
    write_dataset_json(&again, &run_demo(false).dataset).expect("write again");
    assert_eq!(hash_file(&eager_path), hash_file(&again));
}
