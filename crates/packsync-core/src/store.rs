//! # Resource Store Contract
//!
//! The engine reads and writes the graph only through [`ResourceStore`].
//!
//! Save semantics shared by every implementation:
//! - `save_*` returns `Ok(false)` on validation failure (unknown class or
//!   relation, identity collision, missing endpoint) and `Err` only when the
//!   store itself fails.
//! - Saving a relation saves its embedded endpoint CIs too, creating them
//!   when they have no id yet. The relation and its endpoints are accepted or
//!   rejected together: a rejected relation leaves no new CI behind.
//! - Saving registers the entity's namespace and its ancestors.
//! - Destroying a CI removes every relation attached to it.
//!
//! [`MemoryStore`] is the deterministic in-memory implementation. The
//! persistent one lives in [`crate::storage`].

use crate::schema::SchemaRegistry;
use crate::types::{Ci, CiId, CiKey, PackSyncError, Relation, RelationId, short_name};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// QUERIES
// =============================================================================

/// Lookup of CIs in one namespace.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CiQuery {
    pub ns_path: String,
    pub class_name: Option<String>,
    pub name: Option<String>,
}

impl CiQuery {
    #[must_use]
    pub fn in_namespace(ns_path: impl Into<String>) -> Self {
        Self {
            ns_path: ns_path.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn class(mut self, class_name: impl Into<String>) -> Self {
        self.class_name = Some(class_name.into());
        self
    }

    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn matches(&self, ci: &Ci) -> bool {
        ci.ns_path == self.ns_path
            && self.class_name.as_ref().is_none_or(|c| *c == ci.class_name)
            && self.name.as_ref().is_none_or(|n| *n == ci.name)
    }
}

/// Which end of a relation `RelationFilter::ci_id` refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Relations leaving the CI.
    #[default]
    From,
    /// Relations arriving at the CI.
    To,
}

/// Relation lookup. Unset fields do not constrain the result.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RelationFilter {
    pub ns_path: Option<String>,
    pub relation_name: Option<String>,
    /// Matches the last segment of the relation name.
    pub short_name: Option<String>,
    pub ci_id: Option<CiId>,
    pub direction: Direction,
    /// Class of the endpoint opposite to `ci_id` (the target when no CI is given).
    pub target_class_name: Option<String>,
    /// Fill `from_ci`/`to_ci` on the returned relations.
    pub include_endpoints: bool,
}

impl RelationFilter {
    #[must_use]
    pub fn in_namespace(ns_path: impl Into<String>) -> Self {
        Self {
            ns_path: Some(ns_path.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn named(mut self, relation_name: impl Into<String>) -> Self {
        self.relation_name = Some(relation_name.into());
        self
    }

    #[must_use]
    pub fn short(mut self, short_name: impl Into<String>) -> Self {
        self.short_name = Some(short_name.into());
        self
    }

    #[must_use]
    pub fn from_ci(mut self, id: CiId) -> Self {
        self.ci_id = Some(id);
        self.direction = Direction::From;
        self
    }

    #[must_use]
    pub fn to_ci(mut self, id: CiId) -> Self {
        self.ci_id = Some(id);
        self.direction = Direction::To;
        self
    }

    #[must_use]
    pub fn target_class(mut self, class_name: impl Into<String>) -> Self {
        self.target_class_name = Some(class_name.into());
        self
    }

    #[must_use]
    pub fn with_endpoints(mut self) -> Self {
        self.include_endpoints = true;
        self
    }

    /// Whether a stored relation (with its resolved endpoints) passes the filter.
    #[must_use]
    pub fn matches(&self, relation: &Relation, from: &Ci, to: &Ci) -> bool {
        if self
            .ns_path
            .as_ref()
            .is_some_and(|ns| *ns != relation.ns_path)
        {
            return false;
        }
        if self
            .relation_name
            .as_ref()
            .is_some_and(|n| *n != relation.relation_name)
        {
            return false;
        }
        if self
            .short_name
            .as_ref()
            .is_some_and(|s| s != short_name(&relation.relation_name))
        {
            return false;
        }
        let (anchor, other) = match self.direction {
            Direction::From => (relation.from_ci_id, to),
            Direction::To => (relation.to_ci_id, from),
        };
        if self.ci_id.is_some() && self.ci_id != anchor {
            return false;
        }
        self.target_class_name
            .as_ref()
            .is_none_or(|c| *c == other.class_name)
    }
}

// =============================================================================
// STORE TRAIT
// =============================================================================

/// Access to a namespaced CI/relation graph.
pub trait ResourceStore {
    /// Attribute schemas new entities are built from.
    fn schema(&self) -> &SchemaRegistry;

    fn namespace_exists(&self, ns_path: &str) -> Result<bool, PackSyncError>;

    /// Register a namespace and its ancestors.
    fn create_namespace(&mut self, ns_path: &str) -> Result<(), PackSyncError>;

    fn find_cis(&self, query: &CiQuery) -> Result<Vec<Ci>, PackSyncError>;

    fn find_relations(&self, filter: &RelationFilter) -> Result<Vec<Relation>, PackSyncError>;

    /// Persist a CI, assigning its id on creation. `Ok(false)` on validation failure.
    fn save_ci(&mut self, ci: &mut Ci) -> Result<bool, PackSyncError>;

    /// Persist a relation and its embedded endpoints. `Ok(false)` on validation failure.
    fn save_relation(&mut self, relation: &mut Relation) -> Result<bool, PackSyncError>;

    /// Remove a CI and its relations. `Ok(false)` when it does not exist.
    fn destroy_ci(&mut self, id: CiId) -> Result<bool, PackSyncError>;

    /// Build an unsaved CI with the schema of its class.
    fn build_ci(&self, ns_path: &str, class_name: &str, name: &str) -> Ci {
        Ci::new(
            ns_path,
            class_name,
            name,
            self.schema().ci_attributes(class_name),
        )
    }

    /// Build an unsaved relation with the schema of its name.
    fn build_relation(&self, relation_name: &str, ns_path: &str) -> Relation {
        Relation::new(
            relation_name,
            ns_path,
            self.schema().relation_attributes(relation_name),
        )
    }

    /// Single CI by identity.
    fn find_ci(
        &self,
        ns_path: &str,
        class_name: &str,
        name: &str,
    ) -> Result<Option<Ci>, PackSyncError> {
        Ok(self
            .find_cis(&CiQuery::in_namespace(ns_path).class(class_name).named(name))?
            .into_iter()
            .next())
    }
}

/// `/a/b/c` -> `/a`, `/a/b`, `/a/b/c`.
pub(crate) fn namespace_chain(ns_path: &str) -> Vec<String> {
    let mut chain = Vec::new();
    let mut current = String::new();
    for segment in ns_path.split('/').filter(|s| !s.is_empty()) {
        current.push('/');
        current.push_str(segment);
        chain.push(current.clone());
    }
    chain
}

/// Identity of a relation within the store.
pub(crate) type RelationKey = (String, CiId, CiId);

pub(crate) fn relation_key(relation: &Relation) -> Option<RelationKey> {
    Some((
        relation.relation_name.clone(),
        relation.from_ci_id?,
        relation.to_ci_id?,
    ))
}

// =============================================================================
// MEMORY STORE
// =============================================================================

/// Deterministic in-memory store with sequential ids.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    schema: SchemaRegistry,
    namespaces: BTreeSet<String>,
    cis: BTreeMap<CiId, Ci>,
    ci_index: BTreeMap<CiKey, CiId>,
    relations: BTreeMap<RelationId, Relation>,
    relation_index: BTreeMap<RelationKey, RelationId>,
    next_ci_id: u64,
    next_relation_id: u64,
    writes: u64,
}

impl MemoryStore {
    #[must_use]
    pub fn new(schema: SchemaRegistry) -> Self {
        Self {
            schema,
            ..Self::default()
        }
    }

    /// Number of successful mutations since creation.
    #[must_use]
    pub fn writes(&self) -> u64 {
        self.writes
    }

    #[must_use]
    pub fn ci_count(&self) -> usize {
        self.cis.len()
    }

    #[must_use]
    pub fn relation_count(&self) -> usize {
        self.relations.len()
    }

    /// Every stored relation, endpoints filled.
    pub fn all_relations(&self) -> Vec<Relation> {
        self.relations
            .values()
            .filter_map(|r| self.with_endpoints(r))
            .collect()
    }

    fn with_endpoints(&self, relation: &Relation) -> Option<Relation> {
        let from = self.cis.get(&relation.from_ci_id?)?;
        let to = self.cis.get(&relation.to_ci_id?)?;
        let mut out = relation.detached();
        out.from_ci = Some(Box::new(from.clone()));
        out.to_ci = Some(Box::new(to.clone()));
        Some(out)
    }

    /// Whether `save_ci` would accept the CI.
    fn accepts_ci(&self, ci: &Ci) -> bool {
        if self.schema.class(&ci.class_name).is_none() {
            return false;
        }
        let key = ci.key();
        let holder = self.ci_index.get(&key).copied();
        match ci.id {
            Some(id) => self.cis.contains_key(&id) && holder.is_none_or(|other| other == id),
            None => holder.is_none(),
        }
    }

    /// Whether `save_relation` would accept the relation, embedded endpoints
    /// included. Checked up front so a rejection writes nothing.
    fn accepts_relation(&self, relation: &Relation) -> bool {
        if self.schema.relation(&relation.relation_name).is_none() {
            return false;
        }
        let embedded: Vec<&Ci> = [relation.from_ci.as_deref(), relation.to_ci.as_deref()]
            .into_iter()
            .flatten()
            .collect();
        if !embedded.iter().all(|ci| self.accepts_ci(ci)) {
            return false;
        }
        if matches!(embedded.as_slice(), [a, b] if a.id.is_none() && b.id.is_none() && a.key() == b.key())
        {
            return false;
        }

        // A new endpoint makes the relation identity fresh.
        let endpoint = |embedded: Option<&Ci>, id: Option<CiId>| match embedded {
            Some(ci) => Some(ci.id),
            None => id.map(Some),
        };
        let (Some(from), Some(to)) = (
            endpoint(relation.from_ci.as_deref(), relation.from_ci_id),
            endpoint(relation.to_ci.as_deref(), relation.to_ci_id),
        ) else {
            return false;
        };
        if [from, to]
            .into_iter()
            .flatten()
            .any(|id| !self.cis.contains_key(&id))
        {
            return false;
        }

        if relation.id.is_some_and(|id| !self.relations.contains_key(&id)) {
            return false;
        }
        let (Some(from), Some(to)) = (from, to) else {
            return true;
        };
        let key = (relation.relation_name.clone(), from, to);
        match self.relation_index.get(&key) {
            Some(holder) => relation.id == Some(*holder),
            None => true,
        }
    }

    fn register(&mut self, ns_path: &str) {
        for ns in namespace_chain(ns_path) {
            self.namespaces.insert(ns);
        }
    }
}

impl ResourceStore for MemoryStore {
    fn schema(&self) -> &SchemaRegistry {
        &self.schema
    }

    fn namespace_exists(&self, ns_path: &str) -> Result<bool, PackSyncError> {
        Ok(self.namespaces.contains(ns_path))
    }

    fn create_namespace(&mut self, ns_path: &str) -> Result<(), PackSyncError> {
        self.register(ns_path);
        self.writes += 1;
        Ok(())
    }

    fn find_cis(&self, query: &CiQuery) -> Result<Vec<Ci>, PackSyncError> {
        Ok(self
            .cis
            .values()
            .filter(|ci| query.matches(ci))
            .cloned()
            .collect())
    }

    fn find_relations(&self, filter: &RelationFilter) -> Result<Vec<Relation>, PackSyncError> {
        let mut out = Vec::new();
        for relation in self.relations.values() {
            let Some(full) = self.with_endpoints(relation) else {
                continue;
            };
            let (Some(from), Some(to)) = (full.from_ci.as_deref(), full.to_ci.as_deref()) else {
                continue;
            };
            if !filter.matches(relation, from, to) {
                continue;
            }
            out.push(if filter.include_endpoints {
                full
            } else {
                relation.detached()
            });
        }
        Ok(out)
    }

    fn save_ci(&mut self, ci: &mut Ci) -> Result<bool, PackSyncError> {
        if !self.accepts_ci(ci) {
            return Ok(false);
        }
        let key = ci.key();
        let id = match ci.id {
            Some(id) => {
                if let Some(previous) = self.cis.get(&id) {
                    let previous_key = previous.key();
                    if previous_key != key {
                        self.ci_index.remove(&previous_key);
                    }
                }
                id
            }
            None => {
                self.next_ci_id += 1;
                CiId(self.next_ci_id)
            }
        };
        ci.id = Some(id);
        self.register(&ci.ns_path);
        self.ci_index.insert(key, id);
        self.cis.insert(id, ci.clone());
        self.writes += 1;
        Ok(true)
    }

    fn save_relation(&mut self, relation: &mut Relation) -> Result<bool, PackSyncError> {
        if !self.accepts_relation(relation) {
            return Ok(false);
        }
        let from = match relation.from_ci.as_deref_mut() {
            Some(ci) => {
                if !self.save_ci(ci)? {
                    return Ok(false);
                }
                ci.id
            }
            None => relation.from_ci_id,
        };
        let to = match relation.to_ci.as_deref_mut() {
            Some(ci) => {
                if !self.save_ci(ci)? {
                    return Ok(false);
                }
                ci.id
            }
            None => relation.to_ci_id,
        };
        let (Some(from), Some(to)) = (from, to) else {
            return Ok(false);
        };
        if !self.cis.contains_key(&from) || !self.cis.contains_key(&to) {
            return Ok(false);
        }
        relation.from_ci_id = Some(from);
        relation.to_ci_id = Some(to);

        let key = (relation.relation_name.clone(), from, to);
        let id = match relation.id {
            Some(id) => {
                let Some(previous) = self.relations.get(&id) else {
                    return Ok(false);
                };
                let previous_key = relation_key(previous);
                if previous_key.as_ref() != Some(&key) {
                    if self.relation_index.contains_key(&key) {
                        return Ok(false);
                    }
                    if let Some(old) = previous_key {
                        self.relation_index.remove(&old);
                    }
                }
                id
            }
            None => {
                if self.relation_index.contains_key(&key) {
                    return Ok(false);
                }
                self.next_relation_id += 1;
                RelationId(self.next_relation_id)
            }
        };
        relation.id = Some(id);
        self.register(&relation.ns_path);
        self.relation_index.insert(key, id);
        self.relations.insert(id, relation.detached());
        self.writes += 1;
        Ok(true)
    }

    fn destroy_ci(&mut self, id: CiId) -> Result<bool, PackSyncError> {
        let Some(ci) = self.cis.remove(&id) else {
            return Ok(false);
        };
        self.ci_index.remove(&ci.key());
        let attached: Vec<RelationId> = self
            .relations
            .iter()
            .filter(|(_, r)| r.from_ci_id == Some(id) || r.to_ci_id == Some(id))
            .map(|(rid, _)| *rid)
            .collect();
        for rid in attached {
            if let Some(key) = self.relations.remove(&rid).as_ref().and_then(relation_key) {
                self.relation_index.remove(&key);
            }
        }
        self.writes += 1;
        Ok(true)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::types::EntityState;

    fn store() -> MemoryStore {
        MemoryStore::new(SchemaRegistry::builtin())
    }

    #[test]
    fn namespace_chain_splits_segments() {
        assert_eq!(
            namespace_chain("/public/oneops/packs"),
            vec!["/public", "/public/oneops", "/public/oneops/packs"]
        );
        assert!(namespace_chain("").is_empty());
    }

    #[test]
    fn save_assigns_ids_and_registers_namespaces() {
        let mut s = store();
        let mut ci = s.build_ci("/public/g/packs", "mgmt.Pack", "tomcat");
        assert!(s.save_ci(&mut ci).unwrap());
        assert_eq!(ci.id, Some(CiId(1)));
        assert!(s.namespace_exists("/public/g").unwrap());
        assert!(s.namespace_exists("/public/g/packs").unwrap());
        assert!(!s.namespace_exists("/public/other").unwrap());
    }

    #[test]
    fn unknown_class_and_duplicate_identity_fail_validation() {
        let mut s = store();
        let mut bogus = s.build_ci("/ns", "mgmt.catalog.Unknown", "x");
        assert!(bogus.attributes.is_empty());
        assert!(!s.save_ci(&mut bogus).unwrap());

        let mut a = s.build_ci("/ns", "mgmt.Pack", "p");
        let mut b = s.build_ci("/ns", "mgmt.Pack", "p");
        assert!(s.save_ci(&mut a).unwrap());
        assert!(!s.save_ci(&mut b).unwrap());
        assert_eq!(s.ci_count(), 1);
    }

    #[test]
    fn update_in_place_keeps_id() {
        let mut s = store();
        let mut ci = s.build_ci("/ns", "mgmt.Pack", "p");
        s.save_ci(&mut ci).unwrap();
        ci.attributes.set("description", "changed");
        ci.state = EntityState::PendingDeletion;
        assert!(s.save_ci(&mut ci).unwrap());
        let stored = s.find_ci("/ns", "mgmt.Pack", "p").unwrap().unwrap();
        assert_eq!(stored.attributes.get("description"), Some("changed"));
        assert_eq!(stored.state, EntityState::PendingDeletion);
        assert_eq!(stored.id, ci.id);
    }

    #[test]
    fn relation_save_creates_embedded_endpoints() {
        let mut s = store();
        let mut platform = s.build_ci("/ns", "mgmt.catalog.Platform", "web");
        s.save_ci(&mut platform).unwrap();

        let mut rel = s.build_relation("mgmt.catalog.WatchedBy", "/ns");
        rel.from_ci_id = platform.id;
        rel.to_ci = Some(Box::new(s.build_ci("/ns", "mgmt.catalog.Monitor", "cpu")));
        assert!(s.save_relation(&mut rel).unwrap());
        assert!(rel.to_ci_id.is_some());
        assert_eq!(s.ci_count(), 2);

        let found = s
            .find_relations(&RelationFilter::in_namespace("/ns").short("WatchedBy").with_endpoints())
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].to_name(), Some("cpu"));
        assert_eq!(found[0].from_name(), Some("web"));
    }

    #[test]
    fn relation_validation() {
        let mut s = store();
        let mut a = s.build_ci("/ns", "mgmt.catalog.Platform", "a");
        let mut b = s.build_ci("/ns", "mgmt.catalog.Platform", "b");
        s.save_ci(&mut a).unwrap();
        s.save_ci(&mut b).unwrap();

        let mut missing = s.build_relation("mgmt.Requires", "/ns");
        missing.from_ci_id = a.id;
        missing.to_ci_id = Some(CiId(99));
        assert!(!s.save_relation(&mut missing).unwrap());

        let mut first = s.build_relation("mgmt.Requires", "/ns");
        first.from_ci_id = a.id;
        first.to_ci_id = b.id;
        assert!(s.save_relation(&mut first).unwrap());
        assert_eq!(first.attributes.get("constraint"), Some("1..1"));

        let mut dup = s.build_relation("mgmt.Requires", "/ns");
        dup.from_ci_id = a.id;
        dup.to_ci_id = b.id;
        assert!(!s.save_relation(&mut dup).unwrap());

        let mut unknown = s.build_relation("mgmt.Bogus", "/ns");
        unknown.from_ci_id = a.id;
        unknown.to_ci_id = b.id;
        assert!(!s.save_relation(&mut unknown).unwrap());
    }

    #[test]
    fn rejected_relation_leaves_no_endpoint_behind() {
        let mut s = store();
        let mut platform = s.build_ci("/ns", "mgmt.catalog.Platform", "web");
        s.save_ci(&mut platform).unwrap();
        let mut existing = s.build_ci("/ns", "mgmt.catalog.Monitor", "cpu");
        s.save_ci(&mut existing).unwrap();
        let (cis, writes) = (s.ci_count(), s.writes());

        // dangling source id
        let mut dangling = s.build_relation("mgmt.catalog.WatchedBy", "/ns");
        dangling.from_ci_id = Some(CiId(99));
        dangling.to_ci = Some(Box::new(s.build_ci("/ns", "mgmt.catalog.Monitor", "mem")));
        assert!(!s.save_relation(&mut dangling).unwrap());
        assert!(dangling.to_ci.as_deref().unwrap().id.is_none());

        // second endpoint collides after the first would have been created
        let mut colliding = s.build_relation("mgmt.catalog.ValueFor", "/ns");
        colliding.from_ci = Some(Box::new(s.build_ci("/ns", "mgmt.catalog.Localvar", "port")));
        colliding.to_ci = Some(Box::new(s.build_ci("/ns", "mgmt.catalog.Platform", "web")));
        assert!(!s.save_relation(&mut colliding).unwrap());

        assert_eq!(s.ci_count(), cis);
        assert_eq!(s.writes(), writes);
        assert!(s.find_ci("/ns", "mgmt.catalog.Monitor", "mem").unwrap().is_none());
        assert!(s.find_ci("/ns", "mgmt.catalog.Localvar", "port").unwrap().is_none());
    }

    #[test]
    fn filter_by_direction_and_target_class() {
        let mut s = store();
        let mut platform = s.build_ci("/ns", "mgmt.catalog.Platform", "web");
        s.save_ci(&mut platform).unwrap();
        let pid = platform.id.unwrap();

        let mut var = s.build_relation("mgmt.catalog.ValueFor", "/ns");
        var.from_ci = Some(Box::new(s.build_ci("/ns", "mgmt.catalog.Localvar", "port")));
        var.to_ci_id = Some(pid);
        s.save_relation(&mut var).unwrap();

        let mut mon = s.build_relation("mgmt.catalog.WatchedBy", "/ns");
        mon.from_ci_id = Some(pid);
        mon.to_ci = Some(Box::new(s.build_ci("/ns", "mgmt.catalog.Monitor", "cpu")));
        s.save_relation(&mut mon).unwrap();

        let inbound = s
            .find_relations(&RelationFilter::default().to_ci(pid).target_class("mgmt.catalog.Localvar"))
            .unwrap();
        assert_eq!(inbound.len(), 1);
        assert!(inbound[0].from_ci.is_none());

        let outbound = s.find_relations(&RelationFilter::default().from_ci(pid)).unwrap();
        assert_eq!(outbound.len(), 1);
        assert_eq!(outbound[0].relation_name, "mgmt.catalog.WatchedBy");
    }

    #[test]
    fn destroy_removes_attached_relations() {
        let mut s = store();
        let mut platform = s.build_ci("/ns", "mgmt.catalog.Platform", "web");
        s.save_ci(&mut platform).unwrap();
        let mut rel = s.build_relation("mgmt.catalog.WatchedBy", "/ns");
        rel.from_ci_id = platform.id;
        rel.to_ci = Some(Box::new(s.build_ci("/ns", "mgmt.catalog.Monitor", "cpu")));
        s.save_relation(&mut rel).unwrap();

        assert!(s.destroy_ci(platform.id.unwrap()).unwrap());
        assert_eq!(s.relation_count(), 0);
        assert_eq!(s.ci_count(), 1);
        assert!(!s.destroy_ci(platform.id.unwrap()).unwrap());

        // identity is free again
        let mut again = s.build_ci("/ns", "mgmt.catalog.Platform", "web");
        assert!(s.save_ci(&mut again).unwrap());
    }
}
