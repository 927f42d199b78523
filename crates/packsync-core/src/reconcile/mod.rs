//! # Graph Reconciler
//!
//! Upserts the graph of one environment so that it matches the pack.
//!
//! ## Order
//!
//! 1. Platform CI (abort-level: nothing else is meaningful without it)
//! 2. Components, each linked from the platform by `Requires`
//! 3. DependsOn, ManagedVia and Entrypoint edges ([`links`])
//! 4. Monitors and payloads ([`attachments`])
//! 5. Procedures, variables and policies
//!
//! Later steps use the CI ids produced by earlier ones. Every upsert looks the
//! entity up by identity, builds it from the class schema when missing,
//! overlays only declared attributes, and saves with `state = default`. A
//! rejected save is recorded in the [`EnvironmentReport`] and the remaining
//! items still run; store failures propagate.

mod attachments;
mod links;

use crate::pack::{PackDefinition, ResourceSpec};
use crate::primitives::{
    CONTROLLED_BY_RELATION, DESCRIPTION_ATTRIBUTE, PROCEDURE_CLASS, REQUIRES_RELATION,
    TEMPLATE_ATTRIBUTE, capitalize, localvar_class, policy_class, value_for_relation,
};
use crate::report::{EnvironmentReport, ItemKind};
use crate::store::{RelationFilter, ResourceStore};
use crate::types::{AttrMap, Ci, CiId, EntityState, PackSyncError, Relation};
use std::collections::BTreeMap;

/// Where and how one environment is reconciled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    /// Namespace holding the environment's graph.
    pub ns_path: String,
    pub environment: String,
    /// `mgmt.catalog` or `mgmt.manifest`.
    pub package: &'static str,
    pub version: String,
    /// Source group written to the platform's `source` attribute.
    pub register: String,
    pub comments: String,
}

/// Component name -> CI id, as produced by the component step.
pub type ComponentIds = BTreeMap<String, CiId>;

/// Reconcile one environment of `pack` under `scope`.
pub fn reconcile<S: ResourceStore + ?Sized>(
    store: &mut S,
    scope: &Scope,
    pack: &PackDefinition,
    resources: &BTreeMap<String, ResourceSpec>,
) -> Result<EnvironmentReport, PackSyncError> {
    let env = scope.environment.as_str();
    let mut reconciler = Reconciler {
        store,
        scope,
        report: EnvironmentReport::new(env, &scope.ns_path),
    };

    let platform = reconciler.platform(pack)?;
    let components = reconciler.components(platform, resources)?;
    reconciler.depends_on(pack, &components)?;
    reconciler.managed_via(pack, &components)?;
    reconciler.entrypoints(platform, &pack.environment_entrypoints(env), &components)?;
    reconciler.monitors(resources, &components)?;
    reconciler.payloads(resources, &components)?;
    reconciler.procedures(platform, &pack.environment_procedures(env))?;
    reconciler.variables(platform, &pack.environment_variables(env))?;
    reconciler.policies(&pack.environment_policies(env))?;

    tracing::info!(
        pack = %pack.name,
        version = %scope.version,
        environment = env,
        saved = reconciler.report.saved,
        failed = reconciler.report.failures.len(),
        "environment reconciled"
    );
    Ok(reconciler.report)
}

pub(crate) fn stamp_ci(ci: &mut Ci, comments: &str) {
    ci.state = EntityState::Default;
    ci.comments = comments.to_string();
}

pub(crate) fn stamp_relation(relation: &mut Relation, comments: &str) {
    relation.state = EntityState::Default;
    relation.comments = comments.to_string();
}

fn owned_end(relation: &Relation, inbound: bool) -> Option<&Ci> {
    if inbound {
        relation.from_ci.as_deref()
    } else {
        relation.to_ci.as_deref()
    }
}

/// A relation whose far end is a CI owned by it, matched by class and name.
struct OwnedLink<'x> {
    kind: ItemKind,
    relation_name: &'x str,
    /// The CI the relation hangs off (platform).
    anchor: CiId,
    /// Relation points from the owned CI into the anchor.
    inbound: bool,
    class_name: &'x str,
    name: &'x str,
    target_attrs: &'x AttrMap,
    relation_attrs: &'x AttrMap,
}

struct Reconciler<'a, S: ResourceStore + ?Sized> {
    store: &'a mut S,
    scope: &'a Scope,
    report: EnvironmentReport,
}

impl<S: ResourceStore + ?Sized> Reconciler<'_, S> {
    fn ns(&self) -> &str {
        &self.scope.ns_path
    }

    // =========================================================================
    // PLATFORM
    // =========================================================================

    fn platform(&mut self, pack: &PackDefinition) -> Result<CiId, PackSyncError> {
        let class_name = format!("{}.{}", self.scope.package, capitalize(&pack.pack_type));
        let (mut ci, created) = match self.store.find_ci(self.ns(), &class_name, &pack.name)? {
            Some(ci) => (ci, false),
            None => (self.store.build_ci(self.ns(), &class_name, &pack.name), true),
        };

        ci.attributes.overlay(&pack.platform.attributes);
        ci.attributes.set(DESCRIPTION_ATTRIBUTE, pack.description.as_str());
        ci.attributes.set("source", self.scope.register.as_str());
        ci.attributes.set("pack", capitalize(&pack.name));
        ci.attributes.set("version", self.scope.version.as_str());
        stamp_ci(&mut ci, &self.scope.comments);

        if !self.store.save_ci(&mut ci)? {
            return Err(PackSyncError::Rejected {
                kind: "platform",
                name: pack.name.clone(),
            });
        }
        self.report.saved();
        if created {
            tracing::info!(environment = %self.scope.environment, item = %pack.name, class = %class_name, "created platform");
        } else {
            tracing::debug!(environment = %self.scope.environment, item = %pack.name, "updated platform");
        }
        ci.id.ok_or_else(|| PackSyncError::Store("saved platform has no id".to_string()))
    }

    // =========================================================================
    // COMPONENTS
    // =========================================================================

    fn components(
        &mut self,
        platform: CiId,
        resources: &BTreeMap<String, ResourceSpec>,
    ) -> Result<ComponentIds, PackSyncError> {
        let existing = self.store.find_relations(
            &RelationFilter::in_namespace(self.ns())
                .short("Requires")
                .from_ci(platform)
                .with_endpoints(),
        )?;

        let mut ids = ComponentIds::new();
        for (name, resource) in resources {
            let class_name = resource.class_name(self.scope.package);
            let link = OwnedLink {
                kind: ItemKind::Component,
                relation_name: REQUIRES_RELATION,
                anchor: platform,
                inbound: false,
                class_name: &class_name,
                name,
                target_attrs: &resource.attributes,
                relation_attrs: &resource.requires,
            };
            if let Some(id) = self.upsert_owned(&link, &existing)? {
                ids.insert(name.clone(), id);
            }
        }
        Ok(ids)
    }

    /// Upsert a relation together with the CI it owns. Returns the owned
    /// CI's id, or `None` when the store rejected the save.
    fn upsert_owned(
        &mut self,
        link: &OwnedLink<'_>,
        existing: &[Relation],
    ) -> Result<Option<CiId>, PackSyncError> {
        let found = existing
            .iter()
            .find(|r| {
                owned_end(r, link.inbound)
                    .is_some_and(|ci| ci.name == link.name && ci.class_name == link.class_name)
            })
            .cloned();
        let created = found.is_none();

        let mut relation = match found {
            Some(mut relation) => {
                // The anchor was saved already; only the owned end is rewritten.
                if link.inbound {
                    relation.to_ci = None;
                } else {
                    relation.from_ci = None;
                }
                relation
            }
            None => {
                let mut relation = self.store.build_relation(link.relation_name, self.ns());
                let target = match self.store.find_ci(self.ns(), link.class_name, link.name)? {
                    Some(ci) => ci,
                    None => self.store.build_ci(self.ns(), link.class_name, link.name),
                };
                if link.inbound {
                    relation.from_ci = Some(Box::new(target));
                    relation.to_ci_id = Some(link.anchor);
                } else {
                    relation.from_ci_id = Some(link.anchor);
                    relation.to_ci = Some(Box::new(target));
                }
                relation
            }
        };

        if link.relation_name == REQUIRES_RELATION {
            relation.attributes.set(TEMPLATE_ATTRIBUTE, link.name);
        }
        relation.attributes.overlay(link.relation_attrs);
        stamp_relation(&mut relation, &self.scope.comments);
        let owned = if link.inbound {
            relation.from_ci.as_deref_mut()
        } else {
            relation.to_ci.as_deref_mut()
        };
        if let Some(ci) = owned {
            ci.attributes.overlay(link.target_attrs);
            stamp_ci(ci, &self.scope.comments);
        }

        if !self.store.save_relation(&mut relation)? {
            self.report.failed(link.kind, link.name, "rejected by store");
            return Ok(None);
        }
        self.report.saved();
        if created {
            tracing::info!(environment = %self.scope.environment, item = link.name, kind = %link.kind, "created");
        } else {
            tracing::debug!(environment = %self.scope.environment, item = link.name, kind = %link.kind, "updated");
        }

        let owned_id = if link.inbound {
            relation.from_ci_id
        } else {
            relation.to_ci_id
        };
        Ok(owned_id)
    }

    // =========================================================================
    // PROCEDURES, VARIABLES, POLICIES
    // =========================================================================

    fn procedures(
        &mut self,
        platform: CiId,
        procedures: &BTreeMap<String, AttrMap>,
    ) -> Result<(), PackSyncError> {
        if procedures.is_empty() {
            return Ok(());
        }
        let existing = self.store.find_relations(
            &RelationFilter::in_namespace(self.ns())
                .named(CONTROLLED_BY_RELATION)
                .from_ci(platform)
                .with_endpoints(),
        )?;
        let empty = AttrMap::new();
        for (name, attrs) in procedures {
            let link = OwnedLink {
                kind: ItemKind::Procedure,
                relation_name: CONTROLLED_BY_RELATION,
                anchor: platform,
                inbound: false,
                class_name: PROCEDURE_CLASS,
                name,
                target_attrs: attrs,
                relation_attrs: &empty,
            };
            self.upsert_owned(&link, &existing)?;
        }
        Ok(())
    }

    fn variables(
        &mut self,
        platform: CiId,
        variables: &BTreeMap<String, AttrMap>,
    ) -> Result<(), PackSyncError> {
        if variables.is_empty() {
            return Ok(());
        }
        let relation_name = value_for_relation(self.scope.package);
        let class_name = localvar_class(self.scope.package);
        let existing = self.store.find_relations(
            &RelationFilter::in_namespace(self.ns())
                .named(relation_name.as_str())
                .to_ci(platform)
                .with_endpoints(),
        )?;
        let empty = AttrMap::new();
        for (name, attrs) in variables {
            let link = OwnedLink {
                kind: ItemKind::Variable,
                relation_name: &relation_name,
                anchor: platform,
                inbound: true,
                class_name: &class_name,
                name,
                target_attrs: attrs,
                relation_attrs: &empty,
            };
            self.upsert_owned(&link, &existing)?;
        }
        Ok(())
    }

    fn policies(&mut self, policies: &BTreeMap<String, AttrMap>) -> Result<(), PackSyncError> {
        let class_name = policy_class(self.scope.package);
        for (name, attrs) in policies {
            let mut ci = match self.store.find_ci(self.ns(), &class_name, name)? {
                Some(ci) => ci,
                None => self.store.build_ci(self.ns(), &class_name, name),
            };
            ci.attributes.overlay(attrs);
            stamp_ci(&mut ci, &self.scope.comments);
            if self.store.save_ci(&mut ci)? {
                self.report.saved();
                tracing::debug!(environment = %self.scope.environment, item = %name, "saved policy");
            } else {
                self.report.failed(ItemKind::Policy, name, "rejected by store");
            }
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
