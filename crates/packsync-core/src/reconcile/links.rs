//! Edges between CIs the reconciler already holds: DependsOn and ManagedVia
//! between components, Entrypoint from the platform to a component.

use super::{ComponentIds, Reconciler, stamp_relation};
use crate::pack::{EntrypointSpec, PackDefinition, relation_key};
use crate::primitives::{ENTRYPOINT_RELATION, MANAGED_VIA_RELATION, depends_on_relation};
use crate::report::ItemKind;
use crate::store::{RelationFilter, ResourceStore};
use crate::types::{AttrMap, CiId, PackSyncError, Relation};
use std::collections::BTreeMap;

impl<S: ResourceStore + ?Sized> Reconciler<'_, S> {
    pub(super) fn depends_on(
        &mut self,
        pack: &PackDefinition,
        components: &ComponentIds,
    ) -> Result<(), PackSyncError> {
        let relation_name = depends_on_relation(&self.scope.environment);
        let existing = self.existing(&relation_name)?;
        for (from, targets) in &pack.depends_on {
            let Some(&from_id) = components.get(from) else {
                continue;
            };
            for (to, attrs) in targets {
                // Dependencies on components absent from this environment are dropped.
                let Some(&to_id) = components.get(to) else {
                    tracing::debug!(environment = %self.scope.environment, item = %from, target = %to, "dependency target not present, skipped");
                    continue;
                };
                let label = relation_key(from, "DependsOn", to);
                self.upsert_edge(ItemKind::DependsOn, &relation_name, (from_id, to_id), attrs, &label, &existing)?;
            }
        }
        Ok(())
    }

    pub(super) fn managed_via(
        &mut self,
        pack: &PackDefinition,
        components: &ComponentIds,
    ) -> Result<(), PackSyncError> {
        if pack.managed_via.is_empty() {
            return Ok(());
        }
        let existing = self.existing(MANAGED_VIA_RELATION)?;
        for (from, targets) in &pack.managed_via {
            for (to, attrs) in targets {
                let label = relation_key(from, "ManagedVia", to);
                let (Some(&from_id), Some(&to_id)) = (components.get(from), components.get(to)) else {
                    self.report.failed(ItemKind::ManagedVia, &label, "endpoint component missing");
                    continue;
                };
                self.upsert_edge(ItemKind::ManagedVia, MANAGED_VIA_RELATION, (from_id, to_id), attrs, &label, &existing)?;
            }
        }
        Ok(())
    }

    pub(super) fn entrypoints(
        &mut self,
        platform: CiId,
        entrypoints: &BTreeMap<String, EntrypointSpec>,
        components: &ComponentIds,
    ) -> Result<(), PackSyncError> {
        if entrypoints.is_empty() {
            return Ok(());
        }
        let existing = self.existing(ENTRYPOINT_RELATION)?;
        for (name, spec) in entrypoints {
            let Some(&to_id) = components.get(name) else {
                tracing::warn!(environment = %self.scope.environment, item = %name, "entrypoint names no component, skipped");
                continue;
            };
            self.upsert_edge(ItemKind::Entrypoint, ENTRYPOINT_RELATION, (platform, to_id), &spec.attributes, name, &existing)?;
        }
        Ok(())
    }

    fn existing(&self, relation_name: &str) -> Result<Vec<Relation>, PackSyncError> {
        self.store
            .find_relations(&RelationFilter::in_namespace(self.ns()).named(relation_name))
    }

    fn upsert_edge(
        &mut self,
        kind: ItemKind,
        relation_name: &str,
        (from, to): (CiId, CiId),
        attrs: &AttrMap,
        label: &str,
        existing: &[Relation],
    ) -> Result<(), PackSyncError> {
        let found = existing
            .iter()
            .find(|r| r.from_ci_id == Some(from) && r.to_ci_id == Some(to));
        let created = found.is_none();
        let mut relation = match found {
            Some(relation) => relation.detached(),
            None => {
                let mut relation = self.store.build_relation(relation_name, self.ns());
                relation.from_ci_id = Some(from);
                relation.to_ci_id = Some(to);
                relation
            }
        };
        relation.attributes.overlay(attrs);
        stamp_relation(&mut relation, &self.scope.comments);

        if !self.store.save_relation(&mut relation)? {
            self.report.failed(kind, label, "rejected by store");
            return Ok(());
        }
        self.report.saved();
        if created {
            tracing::info!(environment = %self.scope.environment, item = label, kind = %kind, "created");
        } else {
            tracing::debug!(environment = %self.scope.environment, item = label, kind = %kind, "updated");
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::super::tests::{pack, scope, test_store};
    use super::super::reconcile;
    use crate::report::ItemKind;
    use crate::store::{RelationFilter, ResourceStore};

    #[test]
    fn depends_on_skips_absent_targets() {
        let mut store = test_store();
        let p = pack();
        let report = reconcile(&mut store, &scope(), &p, &p.resources_for("_default")).unwrap();
        assert!(report.failures.iter().all(|f| f.kind != ItemKind::DependsOn));

        let deps = store
            .find_relations(&RelationFilter::in_namespace(scope().ns_path).named("mgmt.catalog.DependsOn").with_endpoints())
            .unwrap();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].from_name(), Some("tomcat"));
        assert_eq!(deps[0].to_name(), Some("java"));
        assert_eq!(deps[0].attributes.get("flex"), Some("true"));
    }

    #[test]
    fn manifest_environment_uses_manifest_depends_on() {
        let mut store = test_store();
        let p = pack();
        let mut env_scope = scope();
        env_scope.environment = "single".to_string();
        env_scope.package = "mgmt.manifest";
        env_scope.ns_path = format!("{}/single", env_scope.ns_path);
        reconcile(&mut store, &env_scope, &p, &p.resources_for("single")).unwrap();

        let deps = store
            .find_relations(&RelationFilter::in_namespace(env_scope.ns_path.as_str()).named("mgmt.manifest.DependsOn"))
            .unwrap();
        assert_eq!(deps.len(), 1);
    }

    #[test]
    fn entrypoint_and_managed_via_edges() {
        let mut store = test_store();
        let p = pack();
        reconcile(&mut store, &scope(), &p, &p.resources_for("_default")).unwrap();
        let ns = scope().ns_path;

        let entry = store
            .find_relations(&RelationFilter::in_namespace(ns.as_str()).named("mgmt.Entrypoint").with_endpoints())
            .unwrap();
        assert_eq!(entry.len(), 1);
        assert_eq!(entry[0].from_name(), Some("tomcat"));
        assert_eq!(entry[0].attributes.get("description"), Some("front"));

        let managed = store
            .find_relations(&RelationFilter::in_namespace(ns.as_str()).named("mgmt.manifest.ManagedVia").with_endpoints())
            .unwrap();
        assert_eq!(managed.len(), 1);
        assert_eq!(managed[0].to_name(), Some("compute"));
    }
}
