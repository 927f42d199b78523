//! # redb-backed Resource Store
//!
//! A local, persistent graph store on the redb embedded database. Every save
//! or destroy is one ACID write transaction; ids come from counters kept in
//! the metadata table so they survive reopening.
//!
//! A relation save writes its embedded endpoint CIs in the same transaction,
//! so a rejected relation leaves nothing behind.
//!
//! Records are postcard-encoded. Natural identities are kept in two index
//! tables so collision checks never scan:
//! - `ci_keys`: `ns \x1f class \x1f name` -> CI id
//! - `relation_keys`: `relation \x1f from \x1f to` -> relation id

use crate::schema::SchemaRegistry;
use crate::store::{CiQuery, RelationFilter, ResourceStore, namespace_chain};
use crate::types::{Ci, CiId, CiKey, PackSyncError, Relation, RelationId};
use redb::{
    Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition,
    WriteTransaction,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::path::Path;

/// Table for CIs: CiId(u64) -> serialized Ci bytes
const CIS: TableDefinition<u64, &[u8]> = TableDefinition::new("cis");

/// Table for CI identities: key string -> CiId(u64)
const CI_KEYS: TableDefinition<&str, u64> = TableDefinition::new("ci_keys");

/// Table for relations: RelationId(u64) -> serialized Relation bytes
const RELATIONS: TableDefinition<u64, &[u8]> = TableDefinition::new("relations");

/// Table for relation identities: key string -> RelationId(u64)
const RELATION_KEYS: TableDefinition<&str, u64> = TableDefinition::new("relation_keys");

/// Table for registered namespaces: path -> depth
const NAMESPACES: TableDefinition<&str, u64> = TableDefinition::new("namespaces");

/// Table for metadata: key string -> value u64
const METADATA: TableDefinition<&str, u64> = TableDefinition::new("metadata");

const NEXT_CI_ID: &str = "next_ci_id";
const NEXT_RELATION_ID: &str = "next_relation_id";

fn db_err(e: impl std::fmt::Display) -> PackSyncError {
    PackSyncError::Store(e.to_string())
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, PackSyncError> {
    postcard::to_allocvec(value).map_err(|e| PackSyncError::SerializationError(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, PackSyncError> {
    postcard::from_bytes(bytes).map_err(|e| PackSyncError::SerializationError(e.to_string()))
}

fn ci_index_key(key: &CiKey) -> String {
    format!("{}\u{1f}{}\u{1f}{}", key.ns_path, key.class_name, key.name)
}

fn relation_index_key(relation_name: &str, from: CiId, to: CiId) -> String {
    format!("{relation_name}\u{1f}{}\u{1f}{}", from.0, to.0)
}

/// A disk-backed resource store using redb.
pub struct RedbStore {
    db: Database,
    schema: SchemaRegistry,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore").finish_non_exhaustive()
    }
}

impl RedbStore {
    /// Open or create a store database at the given path.
    pub fn open(path: impl AsRef<Path>, schema: SchemaRegistry) -> Result<Self, PackSyncError> {
        let db =
            Database::create(path.as_ref()).map_err(|e| PackSyncError::IoError(e.to_string()))?;

        // Initialize tables if they don't exist
        {
            let write_txn = db.begin_write().map_err(db_err)?;
            let _ = write_txn.open_table(CIS).map_err(db_err)?;
            let _ = write_txn.open_table(CI_KEYS).map_err(db_err)?;
            let _ = write_txn.open_table(RELATIONS).map_err(db_err)?;
            let _ = write_txn.open_table(RELATION_KEYS).map_err(db_err)?;
            let _ = write_txn.open_table(NAMESPACES).map_err(db_err)?;
            let _ = write_txn.open_table(METADATA).map_err(db_err)?;
            write_txn.commit().map_err(db_err)?;
        }

        Ok(Self { db, schema })
    }

    /// Number of stored CIs.
    pub fn ci_count(&self) -> Result<u64, PackSyncError> {
        let read_txn = self.db.begin_read().map_err(db_err)?;
        let table = read_txn.open_table(CIS).map_err(db_err)?;
        table.len().map_err(db_err)
    }

    /// Number of stored relations.
    pub fn relation_count(&self) -> Result<u64, PackSyncError> {
        let read_txn = self.db.begin_read().map_err(db_err)?;
        let table = read_txn.open_table(RELATIONS).map_err(db_err)?;
        table.len().map_err(db_err)
    }

    /// Write a CI inside an open transaction.
    ///
    /// Returns `None` when the CI fails validation; the caller then drops the
    /// transaction without committing.
    fn put_ci(
        &self,
        write_txn: &WriteTransaction,
        ci: &Ci,
    ) -> Result<Option<CiId>, PackSyncError> {
        if self.schema.class(&ci.class_name).is_none() {
            return Ok(None);
        }
        let key = ci_index_key(&ci.key());

        let mut cis = write_txn.open_table(CIS).map_err(db_err)?;
        let mut keys = write_txn.open_table(CI_KEYS).map_err(db_err)?;
        let mut meta = write_txn.open_table(METADATA).map_err(db_err)?;
        let mut namespaces = write_txn.open_table(NAMESPACES).map_err(db_err)?;

        let holder = keys
            .get(key.as_str())
            .map_err(db_err)?
            .map(|v| v.value());
        let id = match ci.id {
            Some(id) => {
                let previous: Ci = match cis.get(id.0).map_err(db_err)? {
                    Some(bytes) => decode(bytes.value())?,
                    None => return Ok(None),
                };
                if holder.is_some_and(|other| other != id.0) {
                    return Ok(None);
                }
                let previous_key = ci_index_key(&previous.key());
                if previous_key != key {
                    keys.remove(previous_key.as_str()).map_err(db_err)?;
                }
                id
            }
            None => {
                if holder.is_some() {
                    return Ok(None);
                }
                let next = meta
                    .get(NEXT_CI_ID)
                    .map_err(db_err)?
                    .map(|v| v.value())
                    .unwrap_or(0)
                    + 1;
                meta.insert(NEXT_CI_ID, next).map_err(db_err)?;
                CiId(next)
            }
        };

        let stored = Ci {
            id: Some(id),
            ..ci.clone()
        };
        let bytes = encode(&stored)?;
        cis.insert(id.0, bytes.as_slice()).map_err(db_err)?;
        keys.insert(key.as_str(), id.0).map_err(db_err)?;
        for (depth, ns) in namespace_chain(&ci.ns_path).iter().enumerate() {
            namespaces
                .insert(ns.as_str(), depth as u64 + 1)
                .map_err(db_err)?;
        }
        Ok(Some(id))
    }

    /// Compact the database file.
    pub fn compact(&mut self) -> Result<(), PackSyncError> {
        self.db.compact().map_err(db_err)?;
        Ok(())
    }
}

impl ResourceStore for RedbStore {
    fn schema(&self) -> &SchemaRegistry {
        &self.schema
    }

    fn namespace_exists(&self, ns_path: &str) -> Result<bool, PackSyncError> {
        let read_txn = self.db.begin_read().map_err(db_err)?;
        let table = read_txn.open_table(NAMESPACES).map_err(db_err)?;
        Ok(table.get(ns_path).map_err(db_err)?.is_some())
    }

    fn create_namespace(&mut self, ns_path: &str) -> Result<(), PackSyncError> {
        let write_txn = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = write_txn.open_table(NAMESPACES).map_err(db_err)?;
            for (depth, ns) in namespace_chain(ns_path).iter().enumerate() {
                table.insert(ns.as_str(), depth as u64 + 1).map_err(db_err)?;
            }
        }
        write_txn.commit().map_err(db_err)?;
        Ok(())
    }

    fn find_cis(&self, query: &CiQuery) -> Result<Vec<Ci>, PackSyncError> {
        let read_txn = self.db.begin_read().map_err(db_err)?;
        let table = read_txn.open_table(CIS).map_err(db_err)?;

        let mut out = Vec::new();
        for entry in table.iter().map_err(db_err)? {
            let (_, value) = entry.map_err(db_err)?;
            let ci: Ci = decode(value.value())?;
            if query.matches(&ci) {
                out.push(ci);
            }
        }
        Ok(out)
    }

    fn find_relations(&self, filter: &RelationFilter) -> Result<Vec<Relation>, PackSyncError> {
        let read_txn = self.db.begin_read().map_err(db_err)?;
        let relations = read_txn.open_table(RELATIONS).map_err(db_err)?;
        let cis = read_txn.open_table(CIS).map_err(db_err)?;

        let mut endpoints: BTreeMap<CiId, Ci> = BTreeMap::new();
        let mut out = Vec::new();
        for entry in relations.iter().map_err(db_err)? {
            let (_, value) = entry.map_err(db_err)?;
            let relation: Relation = decode(value.value())?;
            let (Some(from_id), Some(to_id)) = (relation.from_ci_id, relation.to_ci_id) else {
                continue;
            };
            for id in [from_id, to_id] {
                if !endpoints.contains_key(&id) {
                    if let Some(bytes) = cis.get(id.0).map_err(db_err)? {
                        endpoints.insert(id, decode(bytes.value())?);
                    }
                }
            }
            let (Some(from), Some(to)) = (endpoints.get(&from_id), endpoints.get(&to_id)) else {
                continue;
            };
            if !filter.matches(&relation, from, to) {
                continue;
            }
            let mut relation = relation;
            if filter.include_endpoints {
                relation.from_ci = Some(Box::new(from.clone()));
                relation.to_ci = Some(Box::new(to.clone()));
            }
            out.push(relation);
        }
        Ok(out)
    }

    fn save_ci(&mut self, ci: &mut Ci) -> Result<bool, PackSyncError> {
        let write_txn = self.db.begin_write().map_err(db_err)?;
        let Some(id) = self.put_ci(&write_txn, ci)? else {
            return Ok(false);
        };
        write_txn.commit().map_err(db_err)?;

        // Update the caller's copy only after successful commit.
        ci.id = Some(id);
        Ok(true)
    }

    fn save_relation(&mut self, relation: &mut Relation) -> Result<bool, PackSyncError> {
        if self.schema.relation(&relation.relation_name).is_none() {
            return Ok(false);
        }

        // Embedded endpoints and the relation share one transaction: any
        // rejection drops it uncommitted and nothing is written.
        let write_txn = self.db.begin_write().map_err(db_err)?;
        let from = match relation.from_ci.as_deref() {
            Some(ci) => match self.put_ci(&write_txn, ci)? {
                Some(id) => Some(id),
                None => return Ok(false),
            },
            None => relation.from_ci_id,
        };
        let to = match relation.to_ci.as_deref() {
            Some(ci) => match self.put_ci(&write_txn, ci)? {
                Some(id) => Some(id),
                None => return Ok(false),
            },
            None => relation.to_ci_id,
        };
        let (Some(from), Some(to)) = (from, to) else {
            return Ok(false);
        };
        let key = relation_index_key(&relation.relation_name, from, to);

        let id = {
            let cis = write_txn.open_table(CIS).map_err(db_err)?;
            let mut relations = write_txn.open_table(RELATIONS).map_err(db_err)?;
            let mut keys = write_txn.open_table(RELATION_KEYS).map_err(db_err)?;
            let mut meta = write_txn.open_table(METADATA).map_err(db_err)?;
            let mut namespaces = write_txn.open_table(NAMESPACES).map_err(db_err)?;

            if cis.get(from.0).map_err(db_err)?.is_none() || cis.get(to.0).map_err(db_err)?.is_none()
            {
                return Ok(false);
            }

            let holder = keys
                .get(key.as_str())
                .map_err(db_err)?
                .map(|v| v.value());
            let id = match relation.id {
                Some(id) => {
                    let previous: Relation = match relations.get(id.0).map_err(db_err)? {
                        Some(bytes) => decode(bytes.value())?,
                        None => return Ok(false),
                    };
                    if holder.is_some_and(|other| other != id.0) {
                        return Ok(false);
                    }
                    if let (Some(f), Some(t)) = (previous.from_ci_id, previous.to_ci_id) {
                        let previous_key = relation_index_key(&previous.relation_name, f, t);
                        if previous_key != key {
                            keys.remove(previous_key.as_str()).map_err(db_err)?;
                        }
                    }
                    id
                }
                None => {
                    if holder.is_some() {
                        return Ok(false);
                    }
                    let next = meta
                        .get(NEXT_RELATION_ID)
                        .map_err(db_err)?
                        .map(|v| v.value())
                        .unwrap_or(0)
                        + 1;
                    meta.insert(NEXT_RELATION_ID, next).map_err(db_err)?;
                    RelationId(next)
                }
            };

            let stored = Relation {
                id: Some(id),
                from_ci_id: Some(from),
                to_ci_id: Some(to),
                ..relation.detached()
            };
            let bytes = encode(&stored)?;
            relations.insert(id.0, bytes.as_slice()).map_err(db_err)?;
            keys.insert(key.as_str(), id.0).map_err(db_err)?;
            for (depth, ns) in namespace_chain(&relation.ns_path).iter().enumerate() {
                namespaces
                    .insert(ns.as_str(), depth as u64 + 1)
                    .map_err(db_err)?;
            }
            id
        };
        write_txn.commit().map_err(db_err)?;

        if let Some(ci) = relation.from_ci.as_deref_mut() {
            ci.id = Some(from);
        }
        if let Some(ci) = relation.to_ci.as_deref_mut() {
            ci.id = Some(to);
        }
        relation.id = Some(id);
        relation.from_ci_id = Some(from);
        relation.to_ci_id = Some(to);
        Ok(true)
    }

    fn destroy_ci(&mut self, id: CiId) -> Result<bool, PackSyncError> {
        let write_txn = self.db.begin_write().map_err(db_err)?;
        {
            let mut cis = write_txn.open_table(CIS).map_err(db_err)?;
            let mut ci_keys = write_txn.open_table(CI_KEYS).map_err(db_err)?;
            let mut relations = write_txn.open_table(RELATIONS).map_err(db_err)?;
            let mut relation_keys = write_txn.open_table(RELATION_KEYS).map_err(db_err)?;

            let removed: Ci = match cis.remove(id.0).map_err(db_err)? {
                Some(bytes) => decode(bytes.value())?,
                None => return Ok(false),
            };
            ci_keys
                .remove(ci_index_key(&removed.key()).as_str())
                .map_err(db_err)?;

            let mut attached = Vec::new();
            for entry in relations.iter().map_err(db_err)? {
                let (rid, value) = entry.map_err(db_err)?;
                let relation: Relation = decode(value.value())?;
                if relation.from_ci_id == Some(id) || relation.to_ci_id == Some(id) {
                    attached.push((rid.value(), relation));
                }
            }
            for (rid, relation) in attached {
                relations.remove(rid).map_err(db_err)?;
                if let (Some(f), Some(t)) = (relation.from_ci_id, relation.to_ci_id) {
                    relation_keys
                        .remove(relation_index_key(&relation.relation_name, f, t).as_str())
                        .map_err(db_err)?;
                }
            }
        }
        write_txn.commit().map_err(db_err)?;
        Ok(true)
    }
}
