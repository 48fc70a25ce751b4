//! 规则热替换场景

use super::{record, run_with_readers};
use expr_engine::{RuleSet, RuleEntry, RuleStore, Value};
use std::sync::atomic::Ordering;

const REPLACEMENTS: u64 = 2000;

#[test]
fn test_evaluation_sees_one_generation() {
    let store = RuleStore::new();
    // 版本 g 的规则是 `mark + (g - 1)`
    assert_eq!(store.install("offset", "mark + 0").unwrap(), 1);

    let results = run_with_readers(
        &store,
        |store, done| {
            let handle = store.handle("offset").expect("规则不存在");
            let mut last_generation = 0;
            let mut checked = 0u64;
            while !done.load(Ordering::Acquire) {
                let rule = handle.load();
                let generation = rule.generation();
                let value = rule.evaluate(&record(10)).expect("求值失败");

                assert_eq!(value, 10 + (generation - 1) as Value);
                assert_eq!(rule.display(), format!("mark + {}", generation - 1));
                assert!(generation >= last_generation, "版本倒退");
                last_generation = generation;
                checked += 1;
            }
            checked
        },
        |store| {
            for i in 1..=REPLACEMENTS {
                let generation = store.replace("offset", &format!("mark + {}", i)).unwrap();
                assert_eq!(generation, i + 1);
            }
        },
    );

    assert_eq!(results.len(), super::READERS);
    assert_eq!(store.get("offset").unwrap().generation(), REPLACEMENTS + 1);
}

#[test]
fn test_match_result_belongs_to_old_or_new_rule() {
    let store = RuleStore::new();
    store.install("flip", "mark == 1").unwrap();

    run_with_readers(
        &store,
        |store, done| {
            while !done.load(Ordering::Acquire) {
                let rule = store.get("flip").expect("规则不存在");
                let expected = match rule.display() {
                    "mark == 1" => true,
                    "mark == 2" => false,
                    other => panic!("未知版本: {}", other),
                };
                assert_eq!(rule.matches(&record(1)), expected);
            }
        },
        |store| {
            for i in 0..REPLACEMENTS {
                let text = if i % 2 == 0 { "mark == 2" } else { "mark == 1" };
                store.replace("flip", text).unwrap();
            }
        },
    );
}

#[test]
fn test_rejected_replacement_never_visible() {
    let store = RuleStore::new();
    store.install("stable", "ctmark == 0").unwrap();

    run_with_readers(
        &store,
        |store, done| {
            while !done.load(Ordering::Acquire) {
                assert_eq!(store.matching(&record(0)), vec!["stable"]);
            }
        },
        |store| {
            for _ in 0..200 {
                assert!(store.replace("stable", "ctmark ==").is_err());
                assert!(store.install("broken", "this == 0").is_err());
                let set = RuleSet {
                    rules: vec![
                        RuleEntry::text("stable", "mark == 9"),
                        RuleEntry::text("broken", "mark +"),
                    ],
                };
                assert!(store.apply(&set).is_err());
            }
        },
    );

    assert_eq!(store.get("stable").unwrap().generation(), 1);
}

#[test]
fn test_snapshot_outlives_removal() {
    let store = RuleStore::new();
    store.install("gone", "mark > 0").unwrap();

    let snapshots = run_with_readers(
        &store,
        |store, done| {
            let mut held = Vec::new();
            while !done.load(Ordering::Acquire) {
                if let Some(rule) = store.get("gone") {
                    held.push(rule);
                }
            }
            held
        },
        |store| {
            for _ in 0..REPLACEMENTS {
                store.remove("gone").unwrap();
                store.install("gone", "mark > 0").unwrap();
            }
            store.remove("gone").unwrap();
        },
    );

    assert!(!store.contains("gone"));
    for rule in snapshots.iter().flatten() {
        assert!(rule.matches(&record(1)));
        assert!(!rule.matches(&record(0)));
    }
}
