//! Monitors and payloads: per-component relations to small target CIs named
//! after the monitor or payload.
//!
//! Older graphs may hold several components pointing at one target CI of the
//! same name. On a create-miss the target is therefore looked up by name
//! among every relation of the same kind in the namespace and reused when
//! found, instead of creating a second CI with that name.

use super::{ComponentIds, Reconciler, stamp_ci, stamp_relation};
use crate::pack::ResourceSpec;
use crate::primitives::{PAYLOAD_RELATION, QPATH_CLASS, monitor_class, watched_by_relation};
use crate::report::ItemKind;
use crate::store::{RelationFilter, ResourceStore};
use crate::types::{AttrMap, Ci, PackSyncError};
use std::collections::BTreeMap;

/// What kind of attachment is being reconciled.
struct Attachment {
    kind: ItemKind,
    relation_name: String,
    class_name: String,
    /// Payload names are matched case-insensitively.
    fold_case: bool,
}

impl Attachment {
    fn index_key(&self, name: &str) -> String {
        if self.fold_case {
            name.to_lowercase()
        } else {
            name.to_string()
        }
    }
}

impl<S: ResourceStore + ?Sized> Reconciler<'_, S> {
    pub(super) fn monitors(
        &mut self,
        resources: &BTreeMap<String, ResourceSpec>,
        components: &ComponentIds,
    ) -> Result<(), PackSyncError> {
        let attachment = Attachment {
            kind: ItemKind::Monitor,
            relation_name: watched_by_relation(self.scope.package),
            class_name: monitor_class(self.scope.package),
            fold_case: false,
        };
        self.attach(&attachment, resources, components, |r| &r.monitors)
    }

    pub(super) fn payloads(
        &mut self,
        resources: &BTreeMap<String, ResourceSpec>,
        components: &ComponentIds,
    ) -> Result<(), PackSyncError> {
        let attachment = Attachment {
            kind: ItemKind::Payload,
            relation_name: PAYLOAD_RELATION.to_string(),
            class_name: QPATH_CLASS.to_string(),
            fold_case: true,
        };
        self.attach(&attachment, resources, components, |r| &r.payloads)
    }

    fn attach(
        &mut self,
        attachment: &Attachment,
        resources: &BTreeMap<String, ResourceSpec>,
        components: &ComponentIds,
        declared: fn(&ResourceSpec) -> &BTreeMap<String, AttrMap>,
    ) -> Result<(), PackSyncError> {
        if resources.values().all(|r| declared(r).is_empty()) {
            return Ok(());
        }
        let existing = self.store.find_relations(
            &RelationFilter::in_namespace(self.ns())
                .named(attachment.relation_name.as_str())
                .with_endpoints(),
        )?;

        // Secondary index by target name, consulted only on create-miss.
        let mut by_name: BTreeMap<String, Ci> = BTreeMap::new();
        for relation in &existing {
            if let Some(target) = relation.to_ci.as_deref() {
                by_name
                    .entry(attachment.index_key(&target.name))
                    .or_insert_with(|| target.clone());
            }
        }

        for (component, resource) in resources {
            let Some(&owner) = components.get(component) else {
                continue;
            };
            for (name, attrs) in declared(resource) {
                let key = attachment.index_key(name);
                let found = existing.iter().find(|r| {
                    r.from_ci_id == Some(owner)
                        && r.to_ci
                            .as_deref()
                            .is_some_and(|t| t.class_name == attachment.class_name && attachment.index_key(&t.name) == key)
                });

                let mut relation = match found {
                    Some(relation) => {
                        let mut relation = relation.clone();
                        relation.from_ci = None;
                        // A shared target may have been rewritten earlier in this pass.
                        if let Some(fresh) = by_name.get(&key).filter(|ci| ci.id == relation.to_ci_id) {
                            relation.to_ci = Some(Box::new(fresh.clone()));
                        }
                        relation
                    }
                    None => {
                        let mut relation = self
                            .store
                            .build_relation(&attachment.relation_name, self.ns());
                        relation.from_ci_id = Some(owner);
                        let target = match by_name.get(&key) {
                            Some(shared) => {
                                tracing::warn!(
                                    environment = %self.scope.environment,
                                    item = %name,
                                    component = %component,
                                    kind = %attachment.kind,
                                    "target name already used by another component, reusing it"
                                );
                                self.report.reused += 1;
                                shared.clone()
                            }
                            None => match self.store.find_ci(self.ns(), &attachment.class_name, name)? {
                                // left without a relation by an earlier run
                                Some(loose) => loose,
                                None => self.store.build_ci(self.ns(), &attachment.class_name, name),
                            },
                        };
                        relation.to_ci = Some(Box::new(target));
                        relation
                    }
                };
                stamp_relation(&mut relation, &self.scope.comments);
                if let Some(target) = relation.to_ci.as_deref_mut() {
                    target.attributes.overlay(attrs);
                    stamp_ci(target, &self.scope.comments);
                }

                let label = format!("{component}/{name}");
                if !self.store.save_relation(&mut relation)? {
                    self.report.failed(attachment.kind, &label, "rejected by store");
                    continue;
                }
                self.report.saved();
                tracing::debug!(environment = %self.scope.environment, item = %label, kind = %attachment.kind, "saved");
                if let Some(target) = relation.to_ci {
                    by_name.insert(key, *target);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::super::reconcile;
    use super::super::tests::{pack, scope, test_store};
    use crate::store::{CiQuery, RelationFilter, ResourceStore};
    use serde_json::json;

    #[test]
    fn shared_monitor_name_resolves_to_one_ci() {
        let mut store = test_store();
        let p = pack();
        let report = reconcile(&mut store, &scope(), &p, &p.resources_for("_default")).unwrap();
        assert_eq!(report.reused, 1);

        let monitors = store
            .find_cis(&CiQuery::in_namespace(scope().ns_path).class("mgmt.catalog.Monitor"))
            .unwrap();
        assert_eq!(monitors.len(), 1);

        let watched = store
            .find_relations(&RelationFilter::in_namespace(scope().ns_path).named("mgmt.catalog.WatchedBy"))
            .unwrap();
        assert_eq!(watched.len(), 2);
        assert!(watched.iter().all(|r| r.to_ci_id == monitors[0].id));

        // structured values are flattened; both components' overrides land
        assert_eq!(monitors[0].attributes.get("thresholds"), Some(r#"{"crit":1}"#));
        assert_eq!(monitors[0].attributes.get("duration"), Some("5"));
    }

    #[test]
    fn shared_target_is_stable_across_runs() {
        let mut store = test_store();
        let p = pack();
        reconcile(&mut store, &scope(), &p, &p.resources_for("_default")).unwrap();
        let report = reconcile(&mut store, &scope(), &p, &p.resources_for("_default")).unwrap();
        assert_eq!(report.reused, 0);
        let monitors = store
            .find_cis(&CiQuery::in_namespace(scope().ns_path).class("mgmt.catalog.Monitor"))
            .unwrap();
        assert_eq!(monitors.len(), 1);
    }

    #[test]
    fn unrelated_target_of_the_same_name_is_adopted() {
        let mut store = test_store();
        let mut loose = store.build_ci(&scope().ns_path, "mgmt.catalog.Monitor", "HttpCheck");
        assert!(store.save_ci(&mut loose).unwrap());

        let p = pack();
        let report = reconcile(&mut store, &scope(), &p, &p.resources_for("_default")).unwrap();
        assert!(report.failures.iter().all(|f| f.kind != crate::report::ItemKind::Monitor));

        let monitors = store
            .find_cis(&CiQuery::in_namespace(scope().ns_path).class("mgmt.catalog.Monitor"))
            .unwrap();
        assert_eq!(monitors.len(), 1);
        assert_eq!(monitors[0].id, loose.id);
        assert_eq!(monitors[0].attributes.get("cmd"), Some("check_http"));

        let watched = store
            .find_relations(&RelationFilter::in_namespace(scope().ns_path).named("mgmt.catalog.WatchedBy"))
            .unwrap();
        assert_eq!(watched.len(), 2);
        assert!(watched.iter().all(|r| r.to_ci_id == loose.id));
    }

    #[test]
    fn payload_names_match_case_insensitively() {
        let mut store = test_store();
        let mut p = pack();
        p.resources
            .get_mut("java")
            .unwrap()
            .payloads
            .insert("DEPS".to_string(), serde_json::from_value(json!({"description": "d"})).unwrap());
        reconcile(&mut store, &scope(), &p, &p.resources_for("_default")).unwrap();

        let qpaths = store
            .find_cis(&CiQuery::in_namespace(scope().ns_path).class("mgmt.manifest.Qpath"))
            .unwrap();
        assert_eq!(qpaths.len(), 1);
        // java sorts first, so its spelling names the shared CI
        assert_eq!(qpaths[0].name, "DEPS");
        assert_eq!(qpaths[0].attributes.get("definition"), Some("q"));
    }
}
