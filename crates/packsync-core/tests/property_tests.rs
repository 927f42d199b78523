//! # Property-Based Tests
//!
//! Determinism and lifecycle invariants checked with proptest.

use packsync_core::{
    AttrMap, AttributeSchema, Attributes, EntityState, MemoryStore, PackDefinition, PackOutcome,
    PackSync, ResourceSpec, ResourceStore, SchemaRegistry, SyncConfig, VersionSpec,
    compare_versions,
};
use proptest::collection::{btree_map, btree_set, vec};
use proptest::prelude::*;
use serde_json::Value as JsonValue;
use std::cmp::Ordering;

fn synced(config: SyncConfig) -> PackSync<MemoryStore> {
    let mut sync = PackSync::new(MemoryStore::new(SchemaRegistry::builtin()), config);
    sync.register().expect("register");
    sync
}

fn policy_pack(policies: &[String], description: &str) -> PackDefinition {
    let mut pack = PackDefinition {
        name: "prop".to_string(),
        description: description.to_string(),
        ..PackDefinition::default()
    };
    for name in policies {
        pack.policies.insert(name.clone(), AttrMap::new());
    }
    pack
}

// =============================================================================
// PROPERTY TESTS
// =============================================================================

proptest! {
    /// Overlay never introduces a key the schema does not declare.
    #[test]
    fn overlay_only_touches_declared_keys(
        declared in btree_set("[a-e]", 0..5),
        overrides in btree_map("[a-h]", "[a-z0-9]{0,6}", 0..8),
    ) {
        let mut attributes = Attributes::declared(declared.iter().map(|k| (k.clone(), String::new())));
        let before = attributes.clone();
        let overrides: AttrMap = overrides
            .into_iter()
            .map(|(k, v)| (k, JsonValue::String(v)))
            .collect();

        let applied = attributes.overlay(&overrides);

        prop_assert_eq!(attributes.len(), before.len());
        prop_assert!(applied <= declared.len());
        for (key, value) in attributes.iter() {
            match overrides.get(key) {
                Some(JsonValue::String(v)) => prop_assert_eq!(value, v.as_str()),
                _ => prop_assert_eq!(Some(value), before.get(key)),
            }
        }
    }

    /// The signature ignores the declared version and load-time origin.
    #[test]
    fn signature_is_version_independent(
        version in "[0-9]{1,2}(\\.[0-9]{1,2}){0,2}",
        origin in "[a-z/]{1,12}",
        description in ".{0,20}",
    ) {
        let base = PackDefinition {
            name: "web".to_string(),
            description,
            ..PackDefinition::default()
        };
        let mut versioned = base.clone();
        versioned.version = Some(version);
        versioned.origin = Some(origin);
        prop_assert_eq!(base.signature().expect("sig"), versioned.signature().expect("sig"));
    }

    /// Versions order numerically, component by component.
    #[test]
    fn compare_versions_matches_numeric_triples(
        a in (0u64..50, 0u64..50, 0u64..50),
        b in (0u64..50, 0u64..50, 0u64..50),
    ) {
        let left = format!("{}.{}.{}", a.0, a.1, a.2);
        let right = format!("{}.{}.{}", b.0, b.1, b.2);
        prop_assert_eq!(compare_versions(&left, &right), a.cmp(&b));
        let parsed = VersionSpec::parse(&left).expect("parse");
        prop_assert_eq!(parsed.to_string(), left);
    }

    /// A transition always lands in the state matching the declaration.
    #[test]
    fn state_transition_converges(pending in any::<bool>(), declared in any::<bool>()) {
        let state = if pending { EntityState::PendingDeletion } else { EntityState::Default };
        let next = state.transition(declared).unwrap_or(state);
        let expected = if declared { EntityState::Default } else { EntityState::PendingDeletion };
        prop_assert_eq!(next, expected);
        prop_assert_eq!(next.transition(declared), None);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// A second sync of an unchanged pack writes nothing, in both modes.
    #[test]
    fn unchanged_pack_is_skipped_without_writes(
        policies in vec("[a-z]{1,6}", 0..6),
        semver in any::<bool>(),
    ) {
        let mut config = SyncConfig::new("g", "1.0");
        config.semver = semver;
        let mut sync = synced(config);
        let pack = policy_pack(&policies, "d");

        let first = sync.sync_pack(&pack).expect("first");
        prop_assert!(first.is_published());
        let writes = sync.store().writes();
        let second = sync.sync_pack(&pack).expect("second");
        let skipped = matches!(second.outcome, PackOutcome::Skipped { .. });
        prop_assert!(skipped);
        prop_assert_eq!(sync.store().writes(), writes);
    }

    /// Each content change yields the next patch of the same minor.
    #[test]
    fn semver_patches_strictly_increase(changes in btree_set("[a-z]{1,8}", 1..6)) {
        let mut config = SyncConfig::new("g", "4.2");
        config.semver = true;
        let mut sync = synced(config);

        let mut last: Option<VersionSpec> = None;
        for description in &changes {
            let report = sync.sync_pack(&policy_pack(&[], description)).expect("sync");
            let version = match &report.outcome {
                PackOutcome::Published { version, .. } => VersionSpec::parse(version).expect("parse"),
                other => return Err(TestCaseError::fail(format!("expected publish, got {other:?}"))),
            };
            prop_assert_eq!((version.major, version.minor), (4, Some(2)));
            if let Some(previous) = last {
                prop_assert_eq!(
                    compare_versions(&previous.to_string(), &version.to_string()),
                    Ordering::Less
                );
                prop_assert_eq!(version.patch, previous.patch.map(|p| p + 1));
            }
            last = Some(version);
        }
    }

    /// Dropping resources marks them, never removes them.
    #[test]
    fn sweep_never_removes(keep in btree_set("[a-m]{1,4}", 0..4), drop in btree_set("[n-z]{1,4}", 1..4)) {
        let mut schema = SchemaRegistry::builtin();
        schema.register_class("mgmt.catalog.Box", AttributeSchema::default());
        let mut sync = PackSync::new(MemoryStore::new(schema), SyncConfig::new("g", "1"));
        sync.register().expect("register");

        let mut pack = PackDefinition { name: "boxes".to_string(), ..PackDefinition::default() };
        for name in keep.iter().chain(drop.iter()) {
            pack.resources.insert(name.clone(), ResourceSpec { cookbook: "box".to_string(), ..ResourceSpec::default() });
        }
        sync.sync_pack(&pack).expect("full");
        let total = sync.store().ci_count();

        for name in &drop {
            pack.resources.remove(name);
        }
        sync.sync_pack(&pack).expect("reduced");
        prop_assert_eq!(sync.store().ci_count(), total);
        for name in &drop {
            let ci = sync
                .store()
                .find_ci("/public/g/packs/boxes/1", "mgmt.catalog.Box", name)
                .expect("find")
                .expect("still present");
            prop_assert_eq!(ci.state, EntityState::PendingDeletion);
        }
    }
}
