//! # Sweep Engine
//!
//! Mutable versions are rewritten in place, so before reconciliation every
//! existing CI and relation of the version is checked against the new
//! definition:
//! - still declared and `pending_deletion` -> back to `default`
//! - no longer declared and `default` -> `pending_deletion`
//!
//! Nothing is ever physically removed. The sweep visits the `_default` scope
//! (the version namespace) and one scope per Mode CI found there. A scope
//! whose environment the pack no longer declares has nothing declared in it.

use crate::pack::{PackDefinition, ResourceSpec, relation_key};
use crate::primitives::{DEFAULT_ENVIRONMENT, MODE_CLASS};
use crate::report::{ItemKind, SweepReport};
use crate::store::{CiQuery, RelationFilter, ResourceStore};
use crate::types::{EntityState, PackSyncError, Relation};
use std::collections::{BTreeMap, BTreeSet};

/// What one environment scope declares.
struct Declared {
    resources: BTreeMap<String, ResourceSpec>,
    entrypoints: BTreeSet<String>,
    procedures: BTreeSet<String>,
    variables: BTreeSet<String>,
    /// Names retained regardless of relations.
    names: BTreeSet<String>,
    relation_keys: BTreeSet<String>,
}

impl Declared {
    fn for_environment(pack: &PackDefinition, environment: &str) -> Self {
        let active = environment == DEFAULT_ENVIRONMENT || pack.environments.contains_key(environment);
        if !active {
            return Self {
                resources: BTreeMap::new(),
                entrypoints: BTreeSet::new(),
                procedures: BTreeSet::new(),
                variables: BTreeSet::new(),
                names: BTreeSet::new(),
                relation_keys: BTreeSet::new(),
            };
        }

        let resources = pack.resources_for(environment);
        let entrypoints: BTreeSet<String> = pack.environment_entrypoints(environment).into_keys().collect();
        let procedures: BTreeSet<String> = pack.environment_procedures(environment).into_keys().collect();
        let variables: BTreeSet<String> = pack.environment_variables(environment).into_keys().collect();

        let mut names: BTreeSet<String> = resources.keys().cloned().collect();
        names.insert(pack.name.clone());
        names.extend(pack.environments.keys().cloned());
        names.extend(procedures.iter().cloned());
        names.extend(variables.iter().cloned());
        names.extend(pack.environment_policies(environment).into_keys());

        Self {
            resources,
            entrypoints,
            procedures,
            variables,
            names,
            relation_keys: pack.relation_keys(),
        }
    }

    /// Whether the definition still implies `relation`.
    fn implies(&self, pack_name: &str, relation: &Relation) -> bool {
        let (Some(from), Some(to)) = (relation.from_name(), relation.to_name()) else {
            return false;
        };
        let short = relation.short_name();
        if self.relation_keys.contains(&relation_key(from, short, to)) {
            return true;
        }
        match short {
            "Payload" => self
                .resources
                .get(from)
                .is_some_and(|r| r.payloads.keys().any(|p| p.eq_ignore_ascii_case(to))),
            "WatchedBy" => self
                .resources
                .get(from)
                .is_some_and(|r| r.monitors.contains_key(to)),
            "Requires" => {
                self.resources.contains_key(to)
                    && (from == pack_name || self.resources.contains_key(from))
            }
            "Entrypoint" => self.entrypoints.contains(to),
            "ControlledBy" => self.procedures.contains(to),
            "ValueFor" => self.variables.contains(from),
            _ => false,
        }
    }
}

/// Sweep every scope of the mutable version living under `version_ns`.
pub fn sweep<S: ResourceStore + ?Sized>(
    store: &mut S,
    version_ns: &str,
    pack: &PackDefinition,
    comments: &str,
) -> Result<SweepReport, PackSyncError> {
    let mut report = SweepReport::default();

    let mut scopes = vec![(DEFAULT_ENVIRONMENT.to_string(), version_ns.to_string())];
    for mode in store.find_cis(&CiQuery::in_namespace(version_ns).class(MODE_CLASS))? {
        let ns = format!("{version_ns}/{}", mode.name);
        scopes.push((mode.name, ns));
    }

    for (environment, ns_path) in &scopes {
        let declared = Declared::for_environment(pack, environment);
        sweep_scope(store, ns_path, pack, &declared, comments, &mut report)?;
        report.scopes.push(environment.clone());
    }

    tracing::info!(
        pack = %pack.name,
        scopes = report.scopes.len(),
        restored = report.restored,
        marked = report.marked,
        "sweep finished"
    );
    Ok(report)
}

fn sweep_scope<S: ResourceStore + ?Sized>(
    store: &mut S,
    ns_path: &str,
    pack: &PackDefinition,
    declared: &Declared,
    comments: &str,
    report: &mut SweepReport,
) -> Result<(), PackSyncError> {
    // Step 1: relations, collecting the targets that stay.
    let mut retained = declared.names.clone();
    for relation in store.find_relations(&RelationFilter::in_namespace(ns_path).with_endpoints())? {
        let implied = declared.implies(&pack.name, &relation);
        if implied {
            if let Some(to) = relation.to_name() {
                retained.insert(to.to_string());
            }
        }
        let Some(next) = relation.state.transition(implied) else {
            continue;
        };
        let label = format!(
            "{}:{}->{}",
            relation.relation_name,
            relation.from_name().unwrap_or_default(),
            relation.to_name().unwrap_or_default()
        );
        let mut updated = relation.detached();
        updated.state = next;
        updated.comments = comments.to_string();
        if store.save_relation(&mut updated)? {
            count(report, next);
            tracing::debug!(ns = ns_path, item = %label, state = %next, "relation state changed");
        } else {
            report.failed(ItemKind::Relation, &label, "rejected by store");
        }
    }

    // Step 2: CIs.
    for mut ci in store.find_cis(&CiQuery::in_namespace(ns_path))? {
        let Some(next) = ci.state.transition(retained.contains(&ci.name)) else {
            continue;
        };
        ci.state = next;
        ci.comments = comments.to_string();
        if store.save_ci(&mut ci)? {
            count(report, next);
            tracing::debug!(ns = ns_path, item = %ci.name, state = %next, "ci state changed");
        } else {
            report.failed(ItemKind::Ci, &ci.name, "rejected by store");
        }
    }
    Ok(())
}

fn count(report: &mut SweepReport, state: EntityState) {
    match state {
        EntityState::Default => report.restored += 1,
        EntityState::PendingDeletion => report.marked += 1,
    }
}

// =============================================================================
// TESTS
// =============================================================================
