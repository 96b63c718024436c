use std::collections::{BTreeSet, HashSet};

use serde_json::{Value, json};

use datagen_core::{RootNode, build_tree};
use datagen_generate::{
    FilteringBehavior, GenerateOptions, GenerationEngine, GenerationError, GenerationResult,
    GeneratorRegistry,
};

fn build(registry: &GeneratorRegistry, document: Value) -> RootNode {
    build_tree(&document, registry)
        .unwrap_or_else(|report| panic!("schema should build:\n{}", report.render()))
        .root
}

fn run_with(options: GenerateOptions, document: Value) -> GenerationResult {
    let registry = GeneratorRegistry::with_defaults();
    let root = build(&registry, document);
    GenerationEngine::new(options)
        .run(&root, &registry)
        .expect("run generation")
}

fn run(document: Value) -> GenerationResult {
    run_with(GenerateOptions::default(), document)
}

fn column<'a>(items: &'a [Value], field: &str) -> Vec<&'a Value> {
    items.iter().map(|item| &item[field]).collect()
}

fn geography() -> Value {
    json!({
        "seed": 7,
        "countries": {
            "count": 5,
            "item": {
                "name": {"gen": "country.name"},
                "code": {"gen": "country.countryCode"}
            }
        },
        "cities": {
            "count": 20,
            "item": {
                "name": {"gen": "address.city"},
                "country": {"ref": "countries[*].name"}
            }
        }
    })
}

#[test]
fn references_only_yield_generated_values() {
    let result = run(geography());
    let countries = result.dataset.get("countries").expect("countries");
    let cities = result.dataset.get("cities").expect("cities");

    let names: HashSet<&Value> = column(countries, "name").into_iter().collect();
    assert_eq!(countries.len(), 5);
    assert_eq!(cities.len(), 20);
    for country in column(cities, "country") {
        assert!(names.contains(country), "unknown country {country}");
    }
}

#[test]
fn fixed_seed_runs_are_byte_identical() {
    let first = run(geography());
    let second = run(geography());

    assert_eq!(
        serde_json::to_string(&first.dataset).expect("serialize first"),
        serde_json::to_string(&second.dataset).expect("serialize second")
    );
    assert_eq!(first.report.fingerprint, second.report.fingerprint);
    assert_ne!(first.report.run_id, second.report.run_id);

    let reseeded = run_with(
        GenerateOptions {
            seed: Some(8),
            ..GenerateOptions::default()
        },
        geography(),
    );
    assert_eq!(reseeded.report.seed, 8);
    assert_ne!(first.report.fingerprint, reseeded.report.fingerprint);
}

#[test]
fn conditional_reference_only_yields_matching_items() {
    let result = run(json!({
        "users": {
            "count": 30,
            "item": {
                "id": {"gen": "sequence", "start": 1},
                "status": {"choice": ["active", "inactive"]}
            }
        },
        "orders": {
            "count": 40,
            "item": {"user": {"ref": "users[status='active'].id"}}
        }
    }));

    let users = result.dataset.get("users").expect("users");
    let active: HashSet<&Value> = users
        .iter()
        .filter(|user| user["status"] == "active")
        .map(|user| &user["id"])
        .collect();
    assert!(!active.is_empty());

    for user in column(result.dataset.get("orders").expect("orders"), "user") {
        assert!(active.contains(user), "order points at inactive user {user}");
    }
}

#[test]
fn mixed_logical_chains_fold_left_to_right() {
    let person = |id: &str, status: &str, tier: &str, age: u64| {
        json!({
            "name": "people",
            "item": {"id": id, "status": status, "tier": tier, "age": age}
        })
    };
    let result = run(json!({
        "a": person("a", "active", "basic", 20),
        "b": person("b", "inactive", "gold", 40),
        "c": person("c", "active", "basic", 40),
        "picks": {
            "count": 60,
            "item": {"person": {"ref": "people[status='active' or tier='gold' and age>30].id"}}
        }
    }));

    let picked: BTreeSet<&str> = column(result.dataset.get("picks").expect("picks"), "person")
        .into_iter()
        .filter_map(Value::as_str)
        .collect();
    assert_eq!(picked, BTreeSet::from(["b", "c"]));
    assert_eq!(result.dataset.get("people").map(<[Value]>::len), Some(3));
}

#[test]
fn shadow_bindings_are_consistent_and_never_emitted() {
    let result = run(json!({
        "users": {
            "count": 10,
            "item": {
                "id": {"gen": "uuid"},
                "name": {"gen": "name.fullName"},
                "city": {"gen": "address.city"}
            }
        },
        "orders": {
            "count": 25,
            "item": {
                "$user": {"ref": "users[*]"},
                "userId": {"ref": "$user.id"},
                "userName": {"ref": "$user.name"},
                "shipTo": {"ref": "$user.city"}
            }
        }
    }));

    let users = result.dataset.get("users").expect("users");
    for order in result.dataset.get("orders").expect("orders") {
        assert!(order.get("$user").is_none());
        let user = users
            .iter()
            .find(|user| user["id"] == order["userId"])
            .expect("order user exists");
        assert_eq!(user["name"], order["userName"]);
        assert_eq!(user["city"], order["shipTo"]);
    }
}

#[test]
fn range_reference_stays_inside_bounds() {
    let result = run(json!({
        "employees": {
            "count": 10,
            "item": {"id": {"gen": "sequence"}}
        },
        "assignments": {
            "count": 50,
            "item": {
                "employee": {"ref": "employees[0:4].id"},
                "late": {"ref": "employees[8:].id"},
                "missing": {"ref": "employees[12].id"}
            }
        }
    }));

    for assignment in result.dataset.get("assignments").expect("assignments") {
        let employee = assignment["employee"].as_u64().expect("employee id");
        let late = assignment["late"].as_u64().expect("late id");
        assert!(employee <= 4, "index {employee} outside range");
        assert!((8..=9).contains(&late), "index {late} outside range");
        assert_eq!(assignment["missing"], Value::Null);
    }
}

#[test]
fn sequential_references_cycle_through_the_pool() {
    let result = run(json!({
        "users": {"count": 3, "item": {"id": {"gen": "sequence", "start": 10}}},
        "orders": {
            "count": 7,
            "item": {"user": {"ref": "users[*].id", "sequential": true}}
        }
    }));

    let users: Vec<u64> = column(result.dataset.get("orders").expect("orders"), "user")
        .into_iter()
        .filter_map(Value::as_u64)
        .collect();
    assert_eq!(users, vec![10, 11, 12, 10, 11, 12, 10]);
}

#[test]
fn weights_bias_choices() {
    let result = run(json!({
        "draws": {
            "count": 1000,
            "item": {
                "tier": {"gen": "choice", "options": ["gold", "basic"], "weights": [0.95, 0.05]}
            }
        }
    }));

    let gold = column(result.dataset.get("draws").expect("draws"), "tier")
        .into_iter()
        .filter(|tier| *tier == "gold")
        .count();
    assert!(gold > 800, "gold drawn {gold} times");
}

#[test]
fn exclusion_filters_skip_listed_values() {
    let result = run(json!({
        "users": {"count": 4, "item": {"id": {"gen": "sequence"}}},
        "orders": {
            "count": 30,
            "item": {
                "first": {"ref": "users[*].id"},
                "second": {"ref": "users[*].id", "filter": [{"ref": "this.first"}]},
                "tier": {"choice": ["gold", "silver", "basic"], "filter": ["gold"]}
            }
        }
    }));

    for order in result.dataset.get("orders").expect("orders") {
        assert_ne!(order["first"], order["second"]);
        assert!(order["second"].is_u64());
        assert_ne!(order["tier"], "gold");
    }
    assert_eq!(result.report.filters_exhausted, 0);
}

#[test]
fn spreads_merge_generated_and_referenced_keys() {
    let result = run(json!({
        "users": {
            "count": 3,
            "item": {
                "id": {"gen": "uuid"},
                "...name": {"gen": "name", "fields": ["firstName", "lastName"]}
            }
        },
        "orders": {
            "count": 5,
            "item": {
                "...buyer": {"ref": "users[*]", "fields": ["buyerId:id", "firstName"]}
            }
        }
    }));

    for user in result.dataset.get("users").expect("users") {
        let keys: Vec<&str> = user
            .as_object()
            .expect("object item")
            .keys()
            .map(String::as_str)
            .collect();
        assert_eq!(keys, vec!["id", "firstName", "lastName"]);
    }

    assert_eq!(result.report.generator_usage.get("name"), Some(&3));

    let users = result.dataset.get("users").expect("users");
    for order in result.dataset.get("orders").expect("orders") {
        let user = users
            .iter()
            .find(|user| user["id"] == order["buyerId"])
            .expect("buyer exists");
        assert_eq!(user["firstName"], order["firstName"]);
        assert!(order.get("lastName").is_none());
    }
}

#[test]
fn tags_and_picks_resolve_to_their_collections() {
    let result = run(json!({
        "admins": {
            "count": 2,
            "tags": ["staff"],
            "pick": {"root": 1},
            "item": {"id": {"gen": "sequence", "start": 100}}
        },
        "clerks": {
            "count": 2,
            "tags": ["staff"],
            "item": {"id": {"gen": "sequence", "start": 200}}
        },
        "audits": {
            "count": 20,
            "item": {
                "by": {"ref": "byTag[staff].id"},
                "approver": {"ref": "root.id"}
            }
        }
    }));

    for audit in result.dataset.get("audits").expect("audits") {
        let by = audit["by"].as_u64().expect("tagged id");
        assert!([100, 101, 200, 201].contains(&by));
        assert_eq!(audit["approver"], json!(101));
    }
}

#[test]
fn forward_references_resolve_to_null() {
    let registry = GeneratorRegistry::with_defaults();
    let built = build_tree(
        &json!({
            "orders": {"count": 2, "item": {"user": {"ref": "users[*].id"}}},
            "users": {"count": 2, "item": {"id": {"gen": "uuid"}}}
        }),
        &registry,
    )
    .expect("forward references only warn");
    assert!(!built.warnings.is_empty());

    let result = GenerationEngine::default()
        .run(&built.root, &registry)
        .expect("run generation");
    for user in column(result.dataset.get("orders").expect("orders"), "user") {
        assert_eq!(user, &Value::Null);
    }
}

#[test]
fn report_counts_collections_and_generator_usage() {
    let result = run(geography());

    let collections: Vec<(&str, u64)> = result
        .report
        .collections
        .iter()
        .map(|collection| (collection.key.as_str(), collection.items_generated))
        .collect();
    assert_eq!(collections, vec![("countries", 5), ("cities", 20)]);
    assert_eq!(result.report.generator_usage.get("country"), Some(&10));
    assert_eq!(result.report.generator_usage.get("address"), Some(&20));
    assert_eq!(
        result.report.fingerprint.as_deref(),
        result.dataset.fingerprint().ok().as_deref()
    );
}

#[test]
fn self_reference_cycles_are_reported() {
    let registry = GeneratorRegistry::with_defaults();
    let root = build(
        &registry,
        json!({
            "loops": {
                "item": {
                    "a": {"ref": "this.b"},
                    "b": {"ref": "this.a"}
                }
            }
        }),
    );

    let err = GenerationEngine::default()
        .run(&root, &registry)
        .expect_err("cycle should fail");
    assert!(matches!(err, GenerationError::CircularReference(_)));
}

#[test]
fn options_are_validated_before_running() {
    let registry = GeneratorRegistry::with_defaults();
    let root = build(&registry, geography());
    let options = GenerateOptions {
        max_filtering_retries: 0,
        filtering_behavior: FilteringBehavior::ThrowException,
        ..GenerateOptions::default()
    };

    let err = GenerationEngine::new(options)
        .run(&root, &registry)
        .expect_err("zero retries rejected");
    assert!(matches!(err, GenerationError::InvalidOptions(_)));
}

#[test]
fn null_option_references_fall_back_to_defaults() {
    let result = run(json!({
        "limits": {
            "count": 3,
            "item": {"min": 50, "max": null, "tier": null}
        },
        "rows": {
            "count": 40,
            "item": {
                "bounded": {
                    "gen": "number",
                    "options": {
                        "min": {"ref": "limits[*].min"},
                        "max": {"ref": "limits[*].max"}
                    }
                },
                "mapped": {
                    "gen": "number",
                    "options": {"max": {"ref": "limits[*].tier", "map": {"gold": 5}}}
                }
            }
        }
    }));

    for row in result.dataset.get("rows").expect("rows") {
        let bounded = row["bounded"].as_u64().expect("bounded number");
        assert!((50..=10_000).contains(&bounded), "{bounded} outside defaults");
        let mapped = row["mapped"].as_u64().expect("mapped number");
        assert!(mapped <= 10_000);
    }
}

#[test]
fn nested_self_references_read_earlier_siblings() {
    let document = json!({
        "seed": 5,
        "users": {
            "count": 6,
            "item": {
                "address": {
                    "city": {"gen": "address.city"},
                    "label": {"ref": "this.address.city"},
                    "geo": {
                        "lat": {"gen": "number", "min": 1, "max": 9},
                        "copy": {"ref": "this.address.geo.lat"}
                    },
                    "early": {"ref": "this.address.late"},
                    "late": "set"
                },
                "city": {"ref": "this.address.city"}
            }
        }
    });

    let eager = run(document.clone());
    let lazy = run_with(
        GenerateOptions {
            memory_optimized: true,
            ..GenerateOptions::default()
        },
        document,
    );
    assert_eq!(eager.dataset, lazy.dataset);

    for user in eager.dataset.get("users").expect("users") {
        let address = &user["address"];
        assert!(address["city"].is_string());
        assert_eq!(address["label"], address["city"]);
        assert_eq!(address["geo"]["copy"], address["geo"]["lat"]);
        assert_eq!(address["early"], Value::Null);
        assert_eq!(address["late"], "set");
        assert_eq!(user["city"], address["city"]);
    }
}
