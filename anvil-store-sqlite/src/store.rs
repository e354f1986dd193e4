// anvil-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Provision Store
// Description: Durable ProvisionStore backed by SQLite WAL.
// Purpose: Persist provisioning entities with deterministic serialization.
// Dependencies: anvil-core, rusqlite, serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! This module implements a durable [`ProvisionStore`] using `SQLite`. Every
//! entity is stored as a canonical JSON snapshot with a recorded hash that
//! is verified on load; loads fail closed on corruption. Hardware identity
//! components live in a uniqueness-constrained index table so concurrent
//! duplicate node registration loses at commit time. Node log entries are
//! append-only rows written in the same transaction as the node snapshot,
//! and the outbox table commits atomically with the rows that enqueue it.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use anvil_core::Broker;
use anvil_core::DEFAULT_HASH_ALGORITHM;
use anvil_core::FactMap;
use anvil_core::HashAlgorithm;
use anvil_core::HwSignature;
use anvil_core::Installer;
use anvil_core::Node;
use anvil_core::NodeId;
use anvil_core::NodeLogEntry;
use anvil_core::OutboxEvent;
use anvil_core::OutboxRecord;
use anvil_core::Policy;
use anvil_core::ProvisionStore;
use anvil_core::Repo;
use anvil_core::StoreError;
use anvil_core::Tag;
use anvil_core::Timestamp;
use anvil_core::canonical_json_bytes;
use anvil_core::hash_bytes;
use anvil_core::identifiers::BrokerName;
use anvil_core::identifiers::InstallerName;
use anvil_core::identifiers::PolicyName;
use anvil_core::identifiers::RepoName;
use anvil_core::identifiers::TagName;
use rusqlite::Connection;
use rusqlite::ErrorCode;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::Transaction;
use rusqlite::params;
use rusqlite::params_from_iter;
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// `SQLite` schema version for the store.
const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Maximum canonical snapshot size accepted by the store.
pub const MAX_SNAPSHOT_BYTES: usize = 1024 * 1024;

/// Tag table name.
const TABLE_TAGS: &str = "tags";
/// Repo table name.
const TABLE_REPOS: &str = "repos";
/// Broker table name.
const TABLE_BROKERS: &str = "brokers";
/// Installer table name.
const TABLE_INSTALLERS: &str = "installers";

// ============================================================================
// SECTION: Config
// ============================================================================

/// `SQLite` journal mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteStoreMode {
    /// WAL journal mode (recommended).
    #[default]
    Wal,
    /// Delete journal mode (legacy).
    Delete,
}

impl SqliteStoreMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// `SQLite` sync mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode (safest).
    #[default]
    Full,
    /// Normal synchronous mode (balanced).
    Normal,
}

impl SqliteSyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// Configuration for the `SQLite` provision store.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteStoreConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds; store transactions never block
    /// longer than this.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// `SQLite` sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
}

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// `SQLite` store errors.
#[derive(Debug, Error)]
pub enum SqliteStoreError {
    /// Store I/O error.
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// Store corruption or hash mismatch.
    #[error("sqlite store corruption: {0}")]
    Corrupt(String),
    /// Store schema version mismatch.
    #[error("sqlite store version mismatch: {0}")]
    VersionMismatch(String),
    /// Invalid store data.
    #[error("sqlite store invalid data: {0}")]
    Invalid(String),
    /// A uniqueness constraint rejected the commit.
    #[error("sqlite store conflict: {0}")]
    Conflict(String),
}

impl From<SqliteStoreError> for StoreError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::Io(message) => Self::Io(message),
            SqliteStoreError::Db(message) => Self::Store(message),
            SqliteStoreError::Corrupt(message) => Self::Corrupt(message),
            SqliteStoreError::VersionMismatch(message) => Self::VersionMismatch(message),
            SqliteStoreError::Invalid(message) => Self::Invalid(message),
            SqliteStoreError::Conflict(message) => Self::Conflict(message),
        }
    }
}

/// Maps a rusqlite error, turning uniqueness violations into conflicts.
fn db_err(context: &str, err: &rusqlite::Error) -> SqliteStoreError {
    if matches!(err.sqlite_error_code(), Some(ErrorCode::ConstraintViolation)) {
        SqliteStoreError::Conflict(format!("{context}: {err}"))
    } else {
        SqliteStoreError::Db(format!("{context}: {err}"))
    }
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// `SQLite`-backed provision store with WAL support.
#[derive(Clone)]
pub struct SqliteProvisionStore {
    /// Shared `SQLite` connection guarded by a mutex.
    connection: Arc<Mutex<Connection>>,
}

impl SqliteProvisionStore {
    /// Opens an `SQLite`-backed provision store.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the database cannot be opened or
    /// initialized.
    pub fn new(config: SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        ensure_parent_dir(&config.path)?;
        let mut connection = open_connection(&config)?;
        initialize_schema(&mut connection)?;
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Locks the shared connection.
    fn lock(&self) -> Result<MutexGuard<'_, Connection>, SqliteStoreError> {
        self.connection.lock().map_err(|_| SqliteStoreError::Db("mutex poisoned".to_string()))
    }
}

// ============================================================================
// SECTION: Snapshot Helpers
// ============================================================================

/// Serializes a value to canonical JSON with its digest.
fn snapshot<T: Serialize>(value: &T) -> Result<(Vec<u8>, String, &'static str), SqliteStoreError> {
    let bytes =
        canonical_json_bytes(value).map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
    if bytes.len() > MAX_SNAPSHOT_BYTES {
        return Err(SqliteStoreError::Invalid(format!(
            "snapshot exceeds size limit: {} bytes (max {MAX_SNAPSHOT_BYTES})",
            bytes.len()
        )));
    }
    let digest = hash_bytes(DEFAULT_HASH_ALGORITHM, &bytes);
    Ok((bytes, digest.value, hash_algorithm_label(digest.algorithm)))
}

/// Verifies a snapshot digest and deserializes the value.
fn restore<T: DeserializeOwned>(
    context: &str,
    bytes: &[u8],
    hash: &str,
    algorithm: &str,
) -> Result<T, SqliteStoreError> {
    let algorithm = parse_hash_algorithm(algorithm)?;
    let expected = hash_bytes(algorithm, bytes);
    if expected.value != hash {
        return Err(SqliteStoreError::Corrupt(format!("hash mismatch for {context}")));
    }
    serde_json::from_slice(bytes).map_err(|err| SqliteStoreError::Invalid(err.to_string()))
}

/// Returns the canonical hash algorithm label.
const fn hash_algorithm_label(algorithm: HashAlgorithm) -> &'static str {
    match algorithm {
        HashAlgorithm::Sha256 => "sha256",
    }
}

/// Parses a hash algorithm label.
fn parse_hash_algorithm(label: &str) -> Result<HashAlgorithm, SqliteStoreError> {
    match label {
        "sha256" => Ok(HashAlgorithm::Sha256),
        other => Err(SqliteStoreError::Invalid(format!("unsupported hash algorithm: {other}"))),
    }
}

/// Returns the current unix epoch in milliseconds for row metadata.
fn unix_millis() -> i64 {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    i64::try_from(now.as_millis()).unwrap_or(i64::MAX)
}

// ============================================================================
// SECTION: Named Entity Helpers
// ============================================================================

/// Loads one named entity snapshot from a table.
fn load_named<T: DeserializeOwned>(
    conn: &Connection,
    table: &str,
    name: &str,
) -> Result<Option<T>, SqliteStoreError> {
    let row: Option<(Vec<u8>, String, String)> = conn
        .query_row(
            &format!("SELECT entity_json, entity_hash, hash_algorithm FROM {table} WHERE name = ?1"),
            params![name],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()
        .map_err(|err| db_err(table, &err))?;
    match row {
        Some((bytes, hash, algorithm)) => {
            Ok(Some(restore(&format!("{table}/{name}"), &bytes, &hash, &algorithm)?))
        }
        None => Ok(None),
    }
}

/// Lists every entity snapshot in a table ordered by name.
fn list_named<T: DeserializeOwned>(
    conn: &Connection,
    table: &str,
) -> Result<Vec<T>, SqliteStoreError> {
    let mut statement = conn
        .prepare(&format!(
            "SELECT name, entity_json, entity_hash, hash_algorithm FROM {table} ORDER BY name"
        ))
        .map_err(|err| db_err(table, &err))?;
    let rows = statement
        .query_map(params![], |row| {
            let name: String = row.get(0)?;
            let bytes: Vec<u8> = row.get(1)?;
            let hash: String = row.get(2)?;
            let algorithm: String = row.get(3)?;
            Ok((name, bytes, hash, algorithm))
        })
        .map_err(|err| db_err(table, &err))?;
    let mut out = Vec::new();
    for row in rows {
        let (name, bytes, hash, algorithm) = row.map_err(|err| db_err(table, &err))?;
        out.push(restore(&format!("{table}/{name}"), &bytes, &hash, &algorithm)?);
    }
    Ok(out)
}

/// Inserts one named entity snapshot; uniqueness violations conflict.
fn insert_named<T: Serialize>(
    conn: &Connection,
    table: &str,
    name: &str,
    value: &T,
) -> Result<(), SqliteStoreError> {
    let (bytes, hash, algorithm) = snapshot(value)?;
    conn.execute(
        &format!(
            "INSERT INTO {table} (name, entity_json, entity_hash, hash_algorithm, saved_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)"
        ),
        params![name, bytes, hash, algorithm, unix_millis()],
    )
    .map_err(|err| db_err(table, &err))?;
    Ok(())
}

/// Updates one named entity snapshot; returns false when absent.
fn update_named<T: Serialize>(
    conn: &Connection,
    table: &str,
    name: &str,
    value: &T,
) -> Result<bool, SqliteStoreError> {
    let (bytes, hash, algorithm) = snapshot(value)?;
    let changed = conn
        .execute(
            &format!(
                "UPDATE {table} SET entity_json = ?2, entity_hash = ?3, hash_algorithm = ?4, \
                 saved_at = ?5 WHERE name = ?1"
            ),
            params![name, bytes, hash, algorithm, unix_millis()],
        )
        .map_err(|err| db_err(table, &err))?;
    Ok(changed > 0)
}

/// Deletes one named entity; returns false when absent.
fn delete_named(conn: &Connection, table: &str, name: &str) -> Result<bool, SqliteStoreError> {
    let changed = conn
        .execute(&format!("DELETE FROM {table} WHERE name = ?1"), params![name])
        .map_err(|err| db_err(table, &err))?;
    Ok(changed > 0)
}

// ============================================================================
// SECTION: Node Helpers
// ============================================================================

/// Loads a node snapshot without its log.
fn load_node_row(
    conn: &Connection,
    id: i64,
) -> Result<Option<Node>, SqliteStoreError> {
    let row: Option<(Vec<u8>, String, String)> = conn
        .query_row(
            "SELECT node_json, node_hash, hash_algorithm FROM nodes WHERE id = ?1",
            params![id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()
        .map_err(|err| db_err("nodes", &err))?;
    match row {
        Some((bytes, hash, algorithm)) => {
            let node: Node = restore(&format!("node{id}"), &bytes, &hash, &algorithm)?;
            if node.id.value() != id {
                return Err(SqliteStoreError::Invalid(format!(
                    "node id mismatch between key {id} and payload {}",
                    node.id
                )));
            }
            Ok(Some(node))
        }
        None => Ok(None),
    }
}

/// Loads a node's log entries in commit order.
fn load_node_log(conn: &Connection, id: i64) -> Result<Vec<NodeLogEntry>, SqliteStoreError> {
    let mut statement = conn
        .prepare("SELECT entry_json FROM node_log WHERE node_id = ?1 ORDER BY seq ASC")
        .map_err(|err| db_err("node_log", &err))?;
    let rows = statement
        .query_map(params![id], |row| row.get::<_, Vec<u8>>(0))
        .map_err(|err| db_err("node_log", &err))?;
    let mut out = Vec::new();
    for row in rows {
        let bytes = row.map_err(|err| db_err("node_log", &err))?;
        let entry: NodeLogEntry = serde_json::from_slice(&bytes)
            .map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
        out.push(entry);
    }
    Ok(out)
}

/// Writes a node's snapshot row inside a transaction.
fn write_node_row(tx: &Transaction<'_>, node: &Node) -> Result<(), SqliteStoreError> {
    let (bytes, hash, algorithm) = snapshot(node)?;
    tx.execute(
        "UPDATE nodes SET node_json = ?2, node_hash = ?3, hash_algorithm = ?4, saved_at = ?5 \
         WHERE id = ?1",
        params![node.id.value(), bytes, hash, algorithm, unix_millis()],
    )
    .map_err(|err| db_err("nodes", &err))?;
    Ok(())
}

/// Replaces a node's hardware identity components inside a transaction.
///
/// The `node_hw.component` primary key is the commit-time uniqueness
/// constraint: overlapping identities conflict here.
fn write_node_hw(tx: &Transaction<'_>, node: &Node) -> Result<(), SqliteStoreError> {
    tx.execute("DELETE FROM node_hw WHERE node_id = ?1", params![node.id.value()])
        .map_err(|err| db_err("node_hw", &err))?;
    for component in node.hw_info.components() {
        tx.execute(
            "INSERT INTO node_hw (component, node_id) VALUES (?1, ?2)",
            params![component, node.id.value()],
        )
        .map_err(|err| db_err("node_hw", &err))?;
    }
    Ok(())
}

/// Appends the node's not-yet-persisted log entries inside a transaction.
fn append_node_log(tx: &Transaction<'_>, node: &Node) -> Result<(), SqliteStoreError> {
    let persisted: i64 = tx
        .query_row(
            "SELECT COUNT(*) FROM node_log WHERE node_id = ?1",
            params![node.id.value()],
            |row| row.get(0),
        )
        .map_err(|err| db_err("node_log", &err))?;
    let persisted = usize::try_from(persisted)
        .map_err(|_| SqliteStoreError::Corrupt("negative node log count".to_string()))?;
    if node.log.len() < persisted {
        return Err(SqliteStoreError::Invalid(format!(
            "node {} log shrank from {persisted} to {} entries; the log is append-only",
            node.id,
            node.log.len()
        )));
    }
    for (offset, entry) in node.log.iter().enumerate().skip(persisted) {
        let bytes = serde_json::to_vec(entry)
            .map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
        let seq = i64::try_from(offset)
            .map_err(|_| SqliteStoreError::Invalid("node log sequence overflow".to_string()))?;
        tx.execute(
            "INSERT INTO node_log (node_id, seq, entry_json) VALUES (?1, ?2, ?3)",
            params![node.id.value(), seq, bytes],
        )
        .map_err(|err| db_err("node_log", &err))?;
    }
    Ok(())
}

// ============================================================================
// SECTION: ProvisionStore Implementation
// ============================================================================

impl ProvisionStore for SqliteProvisionStore {
    fn node(&self, id: NodeId) -> Result<Option<Node>, StoreError> {
        let guard = self.lock().map_err(StoreError::from)?;
        let Some(mut node) = load_node_row(&guard, id.value()).map_err(StoreError::from)? else {
            return Ok(None);
        };
        node.log = load_node_log(&guard, id.value()).map_err(StoreError::from)?;
        Ok(Some(node))
    }

    fn nodes(&self) -> Result<Vec<Node>, StoreError> {
        let guard = self.lock().map_err(StoreError::from)?;
        let ids = node_ids(&guard).map_err(StoreError::from)?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(node) = load_node_row(&guard, id).map_err(StoreError::from)? {
                out.push(node);
            }
        }
        Ok(out)
    }

    fn nodes_matching(&self, signature: &HwSignature) -> Result<Vec<Node>, StoreError> {
        if signature.is_empty() {
            return Ok(Vec::new());
        }
        let guard = self.lock().map_err(StoreError::from)?;
        let count = signature.components().len();
        let placeholders = (1..=count).map(|i| format!("?{i}")).collect::<Vec<_>>().join(", ");
        let sql = format!(
            "SELECT DISTINCT node_id FROM node_hw WHERE component IN ({placeholders}) ORDER BY \
             node_id"
        );
        let ids: Vec<i64> = {
            let mut statement =
                guard.prepare(&sql).map_err(|err| StoreError::from(db_err("node_hw", &err)))?;
            let rows = statement
                .query_map(
                    params_from_iter(signature.components().iter().map(String::as_str)),
                    |row| row.get::<_, i64>(0),
                )
                .map_err(|err| StoreError::from(db_err("node_hw", &err)))?;
            let mut ids = Vec::new();
            for row in rows {
                ids.push(row.map_err(|err| StoreError::from(db_err("node_hw", &err)))?);
            }
            ids
        };
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(node) = load_node_row(&guard, id).map_err(StoreError::from)? {
                out.push(node);
            }
        }
        Ok(out)
    }

    fn create_node(&self, facts: FactMap, registered_at: Timestamp) -> Result<Node, StoreError> {
        let mut guard = self.lock().map_err(StoreError::from)?;
        let tx = guard
            .transaction()
            .map_err(|err| StoreError::from(db_err("create_node", &err)))?;
        tx.execute(
            "INSERT INTO nodes (node_json, node_hash, hash_algorithm, saved_at) VALUES (x'', '', \
             'sha256', ?1)",
            params![unix_millis()],
        )
        .map_err(|err| StoreError::from(db_err("nodes", &err)))?;
        let id = tx.last_insert_rowid();
        let node = Node::new(NodeId::new(id), facts, registered_at);
        write_node_row(&tx, &node).map_err(StoreError::from)?;
        write_node_hw(&tx, &node).map_err(StoreError::from)?;
        append_node_log(&tx, &node).map_err(StoreError::from)?;
        tx.commit().map_err(|err| StoreError::from(db_err("create_node", &err)))?;
        Ok(node)
    }

    fn save_node(&self, node: &Node) -> Result<(), StoreError> {
        let mut guard = self.lock().map_err(StoreError::from)?;
        let tx =
            guard.transaction().map_err(|err| StoreError::from(db_err("save_node", &err)))?;
        let exists: i64 = tx
            .query_row("SELECT COUNT(*) FROM nodes WHERE id = ?1", params![node.id.value()], |row| {
                row.get(0)
            })
            .map_err(|err| StoreError::from(db_err("nodes", &err)))?;
        if exists == 0 {
            return Err(StoreError::Invalid(format!("node {} does not exist", node.id)));
        }
        // Log rows first, then the snapshot: both are inside one
        // transaction, so the log never records an uncommitted mutation.
        append_node_log(&tx, node).map_err(StoreError::from)?;
        write_node_row(&tx, node).map_err(StoreError::from)?;
        write_node_hw(&tx, node).map_err(StoreError::from)?;
        tx.commit().map_err(|err| StoreError::from(db_err("save_node", &err)))?;
        Ok(())
    }

    fn delete_node(&self, id: NodeId) -> Result<bool, StoreError> {
        let guard = self.lock().map_err(StoreError::from)?;
        let changed = guard
            .execute("DELETE FROM nodes WHERE id = ?1", params![id.value()])
            .map_err(|err| StoreError::from(db_err("nodes", &err)))?;
        Ok(changed > 0)
    }

    fn tag(&self, name: &TagName) -> Result<Option<Tag>, StoreError> {
        let guard = self.lock().map_err(StoreError::from)?;
        load_named(&guard, TABLE_TAGS, name.as_str()).map_err(StoreError::from)
    }

    fn tags(&self) -> Result<Vec<Tag>, StoreError> {
        let guard = self.lock().map_err(StoreError::from)?;
        list_named(&guard, TABLE_TAGS).map_err(StoreError::from)
    }

    fn create_tag(&self, tag: &Tag) -> Result<(), StoreError> {
        let guard = self.lock().map_err(StoreError::from)?;
        insert_named(&guard, TABLE_TAGS, tag.name.as_str(), tag).map_err(StoreError::from)
    }

    fn delete_tag(&self, name: &TagName) -> Result<bool, StoreError> {
        let guard = self.lock().map_err(StoreError::from)?;
        delete_named(&guard, TABLE_TAGS, name.as_str()).map_err(StoreError::from)
    }

    fn policy(&self, name: &PolicyName) -> Result<Option<Policy>, StoreError> {
        let guard = self.lock().map_err(StoreError::from)?;
        load_named(&guard, "policies", name.as_str()).map_err(StoreError::from)
    }

    fn policies(&self) -> Result<Vec<Policy>, StoreError> {
        let guard = self.lock().map_err(StoreError::from)?;
        let mut statement = guard
            .prepare(
                "SELECT name, entity_json, entity_hash, hash_algorithm FROM policies ORDER BY \
                 rule_number ASC",
            )
            .map_err(|err| StoreError::from(db_err("policies", &err)))?;
        let rows = statement
            .query_map(params![], |row| {
                let name: String = row.get(0)?;
                let bytes: Vec<u8> = row.get(1)?;
                let hash: String = row.get(2)?;
                let algorithm: String = row.get(3)?;
                Ok((name, bytes, hash, algorithm))
            })
            .map_err(|err| StoreError::from(db_err("policies", &err)))?;
        let mut out = Vec::new();
        for row in rows {
            let (name, bytes, hash, algorithm) =
                row.map_err(|err| StoreError::from(db_err("policies", &err)))?;
            out.push(
                restore(&format!("policies/{name}"), &bytes, &hash, &algorithm)
                    .map_err(StoreError::from)?,
            );
        }
        Ok(out)
    }

    fn create_policy(&self, policy: &Policy) -> Result<(), StoreError> {
        let guard = self.lock().map_err(StoreError::from)?;
        let (bytes, hash, algorithm) = snapshot(policy).map_err(StoreError::from)?;
        guard
            .execute(
                "INSERT INTO policies (name, rule_number, entity_json, entity_hash, \
                 hash_algorithm, saved_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    policy.name.as_str(),
                    i64::from(policy.rule_number),
                    bytes,
                    hash,
                    algorithm,
                    unix_millis()
                ],
            )
            .map_err(|err| StoreError::from(db_err("policies", &err)))?;
        Ok(())
    }

    fn save_policy(&self, policy: &Policy) -> Result<(), StoreError> {
        let guard = self.lock().map_err(StoreError::from)?;
        let (bytes, hash, algorithm) = snapshot(policy).map_err(StoreError::from)?;
        let changed = guard
            .execute(
                "UPDATE policies SET entity_json = ?2, entity_hash = ?3, hash_algorithm = ?4, \
                 saved_at = ?5 WHERE name = ?1",
                params![policy.name.as_str(), bytes, hash, algorithm, unix_millis()],
            )
            .map_err(|err| StoreError::from(db_err("policies", &err)))?;
        if changed == 0 {
            return Err(StoreError::Invalid(format!("policy {} does not exist", policy.name)));
        }
        Ok(())
    }

    fn delete_policy(&self, name: &PolicyName) -> Result<bool, StoreError> {
        let guard = self.lock().map_err(StoreError::from)?;
        delete_named(&guard, "policies", name.as_str()).map_err(StoreError::from)
    }

    fn repo(&self, name: &RepoName) -> Result<Option<Repo>, StoreError> {
        let guard = self.lock().map_err(StoreError::from)?;
        load_named(&guard, TABLE_REPOS, name.as_str()).map_err(StoreError::from)
    }

    fn repos(&self) -> Result<Vec<Repo>, StoreError> {
        let guard = self.lock().map_err(StoreError::from)?;
        list_named(&guard, TABLE_REPOS).map_err(StoreError::from)
    }

    fn create_repo(
        &self,
        repo: &Repo,
        events: &[OutboxEvent],
        now: Timestamp,
    ) -> Result<(), StoreError> {
        let mut guard = self.lock().map_err(StoreError::from)?;
        let tx =
            guard.transaction().map_err(|err| StoreError::from(db_err("create_repo", &err)))?;
        {
            let (bytes, hash, algorithm) = snapshot(repo).map_err(StoreError::from)?;
            tx.execute(
                "INSERT INTO repos (name, entity_json, entity_hash, hash_algorithm, saved_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![repo.name.as_str(), bytes, hash, algorithm, unix_millis()],
            )
            .map_err(|err| StoreError::from(db_err("repos", &err)))?;
        }
        // The repo row and its background work commit together: a crash
        // can never strand an orphaned job or a never-fetched repo.
        for event in events {
            let bytes = serde_json::to_vec(event)
                .map_err(|err| StoreError::Invalid(err.to_string()))?;
            tx.execute(
                "INSERT INTO outbox (event_json, enqueued_at, completed) VALUES (?1, ?2, 0)",
                params![bytes, now.unix_millis()],
            )
            .map_err(|err| StoreError::from(db_err("outbox", &err)))?;
        }
        tx.commit().map_err(|err| StoreError::from(db_err("create_repo", &err)))?;
        Ok(())
    }

    fn save_repo(&self, repo: &Repo) -> Result<(), StoreError> {
        let guard = self.lock().map_err(StoreError::from)?;
        let changed =
            update_named(&guard, TABLE_REPOS, repo.name.as_str(), repo).map_err(StoreError::from)?;
        if !changed {
            return Err(StoreError::Invalid(format!("repo {} does not exist", repo.name)));
        }
        Ok(())
    }

    fn delete_repo(&self, name: &RepoName) -> Result<bool, StoreError> {
        let guard = self.lock().map_err(StoreError::from)?;
        delete_named(&guard, TABLE_REPOS, name.as_str()).map_err(StoreError::from)
    }

    fn broker(&self, name: &BrokerName) -> Result<Option<Broker>, StoreError> {
        let guard = self.lock().map_err(StoreError::from)?;
        load_named(&guard, TABLE_BROKERS, name.as_str()).map_err(StoreError::from)
    }

    fn brokers(&self) -> Result<Vec<Broker>, StoreError> {
        let guard = self.lock().map_err(StoreError::from)?;
        list_named(&guard, TABLE_BROKERS).map_err(StoreError::from)
    }

    fn create_broker(&self, broker: &Broker) -> Result<(), StoreError> {
        let guard = self.lock().map_err(StoreError::from)?;
        insert_named(&guard, TABLE_BROKERS, broker.name.as_str(), broker).map_err(StoreError::from)
    }

    fn delete_broker(&self, name: &BrokerName) -> Result<bool, StoreError> {
        let guard = self.lock().map_err(StoreError::from)?;
        delete_named(&guard, TABLE_BROKERS, name.as_str()).map_err(StoreError::from)
    }

    fn installer(&self, name: &InstallerName) -> Result<Option<Installer>, StoreError> {
        let guard = self.lock().map_err(StoreError::from)?;
        load_named(&guard, TABLE_INSTALLERS, name.as_str()).map_err(StoreError::from)
    }

    fn installers(&self) -> Result<Vec<Installer>, StoreError> {
        let guard = self.lock().map_err(StoreError::from)?;
        list_named(&guard, TABLE_INSTALLERS).map_err(StoreError::from)
    }

    fn create_installer(&self, installer: &Installer) -> Result<(), StoreError> {
        let guard = self.lock().map_err(StoreError::from)?;
        insert_named(&guard, TABLE_INSTALLERS, installer.name.as_str(), installer)
            .map_err(StoreError::from)
    }

    fn delete_installer(&self, name: &InstallerName) -> Result<bool, StoreError> {
        let guard = self.lock().map_err(StoreError::from)?;
        delete_named(&guard, TABLE_INSTALLERS, name.as_str()).map_err(StoreError::from)
    }

    fn claim_outbox(&self, limit: usize) -> Result<Vec<OutboxRecord>, StoreError> {
        let guard = self.lock().map_err(StoreError::from)?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut statement = guard
            .prepare(
                "SELECT id, event_json, enqueued_at FROM outbox WHERE completed = 0 ORDER BY id \
                 ASC LIMIT ?1",
            )
            .map_err(|err| StoreError::from(db_err("outbox", &err)))?;
        let rows = statement
            .query_map(params![limit], |row| {
                let id: i64 = row.get(0)?;
                let bytes: Vec<u8> = row.get(1)?;
                let enqueued_at: i64 = row.get(2)?;
                Ok((id, bytes, enqueued_at))
            })
            .map_err(|err| StoreError::from(db_err("outbox", &err)))?;
        let mut out = Vec::new();
        for row in rows {
            let (id, bytes, enqueued_at) =
                row.map_err(|err| StoreError::from(db_err("outbox", &err)))?;
            let event: OutboxEvent = serde_json::from_slice(&bytes)
                .map_err(|err| StoreError::Invalid(err.to_string()))?;
            out.push(OutboxRecord {
                id,
                event,
                enqueued_at: Timestamp::from_unix_millis(enqueued_at),
            });
        }
        Ok(out)
    }

    fn complete_outbox(&self, id: i64) -> Result<(), StoreError> {
        let guard = self.lock().map_err(StoreError::from)?;
        let changed = guard
            .execute("UPDATE outbox SET completed = 1 WHERE id = ?1", params![id])
            .map_err(|err| StoreError::from(db_err("outbox", &err)))?;
        if changed == 0 {
            return Err(StoreError::Invalid(format!("outbox event {id} does not exist")));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Connection Setup
// ============================================================================

/// Lists all node identifiers in id order.
fn node_ids(conn: &Connection) -> Result<Vec<i64>, SqliteStoreError> {
    let mut statement = conn
        .prepare("SELECT id FROM nodes ORDER BY id ASC")
        .map_err(|err| db_err("nodes", &err))?;
    let rows =
        statement.query_map(params![], |row| row.get::<_, i64>(0)).map_err(|err| db_err("nodes", &err))?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row.map_err(|err| db_err("nodes", &err))?);
    }
    Ok(out)
}

/// Ensures the parent directory for the store exists.
fn ensure_parent_dir(path: &Path) -> Result<(), SqliteStoreError> {
    let Some(parent) = path.parent() else {
        return Err(SqliteStoreError::Io("store path missing parent directory".to_string()));
    };
    std::fs::create_dir_all(parent).map_err(|err| SqliteStoreError::Io(err.to_string()))
}

/// Opens an `SQLite` connection with durable defaults.
fn open_connection(config: &SqliteStoreConfig) -> Result<Connection, SqliteStoreError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let connection = Connection::open_with_flags(&config.path, flags)
        .map_err(|err| db_err("open", &err))?;
    apply_pragmas(&connection, config)?;
    Ok(connection)
}

/// Applies `SQLite` pragmas required for durability and cascades.
fn apply_pragmas(
    connection: &Connection,
    config: &SqliteStoreConfig,
) -> Result<(), SqliteStoreError> {
    connection
        .execute_batch("PRAGMA foreign_keys = ON;")
        .map_err(|err| db_err("pragma", &err))?;
    connection
        .execute_batch(&format!("PRAGMA journal_mode = {};", config.journal_mode.pragma_value()))
        .map_err(|err| db_err("pragma", &err))?;
    connection
        .execute_batch(&format!("PRAGMA synchronous = {};", config.sync_mode.pragma_value()))
        .map_err(|err| db_err("pragma", &err))?;
    connection
        .busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms))
        .map_err(|err| db_err("pragma", &err))?;
    Ok(())
}

/// Initializes the `SQLite` schema or validates the existing version.
fn initialize_schema(connection: &mut Connection) -> Result<(), SqliteStoreError> {
    let tx = connection.transaction().map_err(|err| db_err("schema", &err))?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);")
        .map_err(|err| db_err("schema", &err))?;
    let version: Option<i64> = tx
        .query_row("SELECT version FROM store_meta LIMIT 1", params![], |row| row.get(0))
        .optional()
        .map_err(|err| db_err("schema", &err))?;
    match version {
        None => {
            tx.execute("INSERT INTO store_meta (version) VALUES (?1)", params![SCHEMA_VERSION])
                .map_err(|err| db_err("schema", &err))?;
            tx.execute_batch(
                "CREATE TABLE IF NOT EXISTS nodes (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    node_json BLOB NOT NULL,
                    node_hash TEXT NOT NULL,
                    hash_algorithm TEXT NOT NULL,
                    saved_at INTEGER NOT NULL
                );
                CREATE TABLE IF NOT EXISTS node_hw (
                    component TEXT PRIMARY KEY,
                    node_id INTEGER NOT NULL,
                    FOREIGN KEY (node_id) REFERENCES nodes(id) ON DELETE CASCADE
                );
                CREATE INDEX IF NOT EXISTS idx_node_hw_node_id ON node_hw (node_id);
                CREATE TABLE IF NOT EXISTS node_log (
                    node_id INTEGER NOT NULL,
                    seq INTEGER NOT NULL,
                    entry_json BLOB NOT NULL,
                    PRIMARY KEY (node_id, seq),
                    FOREIGN KEY (node_id) REFERENCES nodes(id) ON DELETE CASCADE
                );
                CREATE TABLE IF NOT EXISTS tags (
                    name TEXT PRIMARY KEY,
                    entity_json BLOB NOT NULL,
                    entity_hash TEXT NOT NULL,
                    hash_algorithm TEXT NOT NULL,
                    saved_at INTEGER NOT NULL
                );
                CREATE TABLE IF NOT EXISTS policies (
                    name TEXT PRIMARY KEY,
                    rule_number INTEGER NOT NULL UNIQUE,
                    entity_json BLOB NOT NULL,
                    entity_hash TEXT NOT NULL,
                    hash_algorithm TEXT NOT NULL,
                    saved_at INTEGER NOT NULL
                );
                CREATE TABLE IF NOT EXISTS repos (
                    name TEXT PRIMARY KEY,
                    entity_json BLOB NOT NULL,
                    entity_hash TEXT NOT NULL,
                    hash_algorithm TEXT NOT NULL,
                    saved_at INTEGER NOT NULL
                );
                CREATE TABLE IF NOT EXISTS brokers (
                    name TEXT PRIMARY KEY,
                    entity_json BLOB NOT NULL,
                    entity_hash TEXT NOT NULL,
                    hash_algorithm TEXT NOT NULL,
                    saved_at INTEGER NOT NULL
                );
                CREATE TABLE IF NOT EXISTS installers (
                    name TEXT PRIMARY KEY,
                    entity_json BLOB NOT NULL,
                    entity_hash TEXT NOT NULL,
                    hash_algorithm TEXT NOT NULL,
                    saved_at INTEGER NOT NULL
                );
                CREATE TABLE IF NOT EXISTS outbox (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    event_json BLOB NOT NULL,
                    enqueued_at INTEGER NOT NULL,
                    completed INTEGER NOT NULL DEFAULT 0
                );",
            )
            .map_err(|err| db_err("schema", &err))?;
        }
        Some(value) if value == SCHEMA_VERSION => {}
        Some(value) => {
            return Err(SqliteStoreError::VersionMismatch(format!(
                "unsupported schema version: {value}"
            )));
        }
    }
    tx.commit().map_err(|err| db_err("schema", &err))?;
    Ok(())
}
