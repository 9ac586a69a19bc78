//! Synchronization engine.
//!
//! The [`Engine`] owns the `SQLite` connection, the [`SchemaRegistry`] and the
//! [`IdentityRegistry`]. Everything else (handles, collections, joins) goes
//! through its `sync`, `remove` and `resolve` operations.
//!
//! # Concurrency Model
//!
//! An engine is single-threaded: it is `!Send`, and all calls on one engine
//! are sequenced by the caller. Every `sync` is visible to the next `resolve`
//! as soon as it returns, except inside a [`BatchGuard`] scope, where handle
//! writes are collected and flushed once when the scope ends.
//!
//! Cloning an `Engine` is cheap and yields another reference to the same
//! index; collections and handles hold such clones.
//!
//! # Eviction
//!
//! A row lives while some collection holds its object. Releasing the last
//! membership (removal, overwrite, or dropping the collection) deletes it.
//! Rows of objects synced directly whose objects have since been dropped are
//! swept before every `sync`, `mirror` and `resolve`.

mod batch;
mod resolve;

pub use batch::BatchGuard;

pub(crate) use batch::BatchState;

use crate::collections::IntoMirror;
use crate::config::MirageConfig;
use crate::models::{Live, Mirrorable, ObjectId, Tracked, Value};
use crate::observability::{record_operation_metrics, status_label};
use crate::storage::sqlite::{
    clear_label_sql, create_table_sql, delete_sql, open_in_memory, quote_identifier, upsert_sql,
};
use crate::storage::{IdentityRegistry, SchemaRegistry, TableSchema};
use crate::{Error, Result};
use rusqlite::{Connection, params_from_iter};
use std::any::TypeId;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Instant;
use tracing::instrument;

/// How a sync treats the stored key label.
#[derive(Debug, Clone, Copy)]
pub(crate) enum LabelUpdate<'a> {
    /// Keep whatever label the object was last synced with.
    Keep,
    /// Store this label (NULL for `None`).
    Set(Option<&'a str>),
}

struct EngineInner {
    conn: Connection,
    config: MirageConfig,
    schemas: RefCell<SchemaRegistry>,
    identities: RefCell<IdentityRegistry>,
    /// Live objects whose rows were deleted; handle writes leave them alone.
    detached: RefCell<HashMap<ObjectId, Weak<dyn Tracked>>>,
    batch: RefCell<BatchState>,
}

/// Mirrors live objects into an in-memory `SQLite` index.
///
/// # Examples
///
/// ```rust
/// use mirage::{Engine, Live, mirrorable};
///
/// struct User {
///     name: String,
///     age: i64,
/// }
///
/// mirrorable!(User { name, age });
///
/// let engine = Engine::in_memory()?;
/// let bob = Live::new(User { name: "Bob".into(), age: 25 });
/// engine.sync(&bob, None)?;
///
/// bob.borrow_mut().age = 26;
/// engine.sync(&bob, None)?;
///
/// let rows = engine.resolve("SELECT age FROM user WHERE name = 'Bob'", [])?;
/// assert_eq!(rows[0].get(0).and_then(|v| v.as_i64()), Some(26));
/// # Ok::<(), mirage::Error>(())
/// ```
#[derive(Clone)]
pub struct Engine {
    inner: Rc<EngineInner>,
}

impl Engine {
    /// Creates an engine over a fresh in-memory database with default settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn in_memory() -> Result<Self> {
        Self::with_config(MirageConfig::default())
    }

    /// Creates an engine over a fresh in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or configured.
    pub fn with_config(config: MirageConfig) -> Result<Self> {
        let conn = open_in_memory()?;
        tracing::debug!(
            table_prefix = %config.table_prefix,
            metrics = config.metrics_enabled,
            "opened mirror engine"
        );
        Ok(Self {
            inner: Rc::new(EngineInner {
                conn,
                config,
                schemas: RefCell::new(SchemaRegistry::new()),
                identities: RefCell::new(IdentityRegistry::new()),
                detached: RefCell::new(HashMap::new()),
                batch: RefCell::new(BatchState::default()),
            }),
        })
    }

    /// Returns the engine's configuration.
    #[must_use]
    pub fn config(&self) -> &MirageConfig {
        &self.inner.config
    }

    /// Returns `true` if both values refer to the same engine.
    #[must_use]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Rc::ptr_eq(&a.inner, &b.inner)
    }

    /// Raw access to the backing connection.
    ///
    /// Writes made here bypass the registries and can desynchronize the index.
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.inner.conn
    }

    /// Mirrors a collection of live objects.
    ///
    /// A `Vec<Live<T>>` becomes a [`MirroredList`](crate::MirroredList); a map
    /// (or a `Vec` of key/value pairs) becomes a
    /// [`MirroredMap`](crate::MirroredMap).
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyCollection`] for empty input, and schema or
    /// backend errors from the initial sync.
    pub fn mirror<M: IntoMirror>(&self, items: M) -> Result<M::Output> {
        self.sweep_reclaimed()?;
        items.into_mirror(self)
    }

    /// Registers a value's type and returns its table name.
    ///
    /// Registration is idempotent: once a type is known, its column set is
    /// never recomputed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Schema`] if the value exposes no attributes, uses a
    /// reserved column name, or the table cannot be created.
    #[instrument(skip(self, value), fields(type_name = T::type_name()))]
    pub fn register<T: Mirrorable>(&self, value: &T) -> Result<String> {
        let type_id = TypeId::of::<T>();
        let existing = self.inner.schemas.borrow().get(type_id).cloned();
        if let Some(schema) = existing {
            return Ok(schema.table().to_string());
        }

        let schema = self.infer_schema(type_id, T::type_name(), &value.attributes())?;
        let ddl = create_table_sql(&schema);
        self.log_statement(&ddl);
        self.inner
            .conn
            .execute_batch(&ddl)
            .map_err(|e| schema_error(&schema, &e))?;

        let table = schema.table().to_string();
        self.inner.schemas.borrow_mut().record(type_id, schema)?;
        tracing::debug!(table = %table, "registered mirrored type");
        Ok(table)
    }

    /// Upserts an object's current attribute values.
    ///
    /// Registers the type first if needed. The schema DDL and the row write
    /// run in one transaction, so a failure leaves neither behind. Repeating
    /// the call without intervening mutation leaves the row unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Schema`] if the type cannot be registered and
    /// [`Error::OperationFailed`] if the backend rejects the write.
    #[instrument(skip(self, object), fields(object_id = %object.id(), type_name = T::type_name()))]
    pub fn sync<T: Mirrorable>(&self, object: &Live<T>, key_label: Option<&str>) -> Result<()> {
        self.sweep_reclaimed()?;
        self.sync_tracked(&object.tracked(), LabelUpdate::Set(key_label))
    }

    /// Deletes an object's row from `table`.
    ///
    /// Removing a row that is already absent (or a table that was never
    /// created) is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] if the backend rejects the delete.
    #[instrument(skip(self, object), fields(object_id = %object.id()))]
    pub fn remove<T: Mirrorable>(&self, table: &str, object: &Live<T>) -> Result<()> {
        self.remove_id(table, object.id())
    }

    /// Evicts rows whose objects have been reclaimed.
    ///
    /// Runs implicitly before `sync`, `mirror` and `resolve`; calling it
    /// directly is only needed to release memory between those. Returns the
    /// number of rows removed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] if a delete fails; rows evicted
    /// before the failure stay evicted.
    #[instrument(skip(self))]
    pub fn purge_reclaimed(&self) -> Result<usize> {
        let start = Instant::now();
        let dead = self.inner.identities.borrow().reclaimed();
        let mut evicted = 0;
        let result = dead.iter().try_for_each(|(id, table)| {
            self.delete_row(table, *id)?;
            self.inner.identities.borrow_mut().remove(*id);
            evicted += 1;
            Ok(())
        });
        self.record("purge", start, &result);
        result?;

        if evicted > 0 {
            tracing::info!(evicted, "evicted reclaimed objects from the index");
        }
        Ok(evicted)
    }

    /// Table names of all registered types, sorted.
    #[must_use]
    pub fn tables(&self) -> Vec<String> {
        self.inner.schemas.borrow().tables()
    }

    /// Table name registered for `T`, if any.
    #[must_use]
    pub fn table_for<T: Mirrorable>(&self) -> Option<String> {
        self.inner
            .schemas
            .borrow()
            .get(TypeId::of::<T>())
            .map(|schema| schema.table().to_string())
    }

    /// Attribute columns registered for `T`, if any.
    #[must_use]
    pub fn columns_for<T: Mirrorable>(&self) -> Option<Vec<&'static str>> {
        self.inner
            .schemas
            .borrow()
            .get(TypeId::of::<T>())
            .map(|schema| schema.columns().to_vec())
    }

    /// Number of rows in a mirrored table.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Query`] if the table does not exist.
    pub fn row_count(&self, table: &str) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_identifier(table));
        self.inner
            .conn
            .query_row(&sql, [], |row| row.get(0))
            .map_err(|e| query_error(&sql, &e))
    }

    /// Returns `true` if the object is indexed and still alive.
    #[must_use]
    pub fn is_registered(&self, id: ObjectId) -> bool {
        self.inner.identities.borrow().is_live(id)
    }

    /// Number of collections on this engine holding the object.
    #[must_use]
    pub fn membership_count(&self, id: ObjectId) -> usize {
        self.inner.identities.borrow().members(id).unwrap_or(0)
    }

    /// Key label the object was last synced with.
    #[must_use]
    pub fn key_label(&self, id: ObjectId) -> Option<String> {
        self.inner
            .identities
            .borrow()
            .entry(id)
            .and_then(|entry| entry.key_label().map(str::to_string))
    }

    /// Syncs `object` as an element of a collection and counts the membership.
    pub(crate) fn attach(&self, object: &Rc<dyn Tracked>, label: LabelUpdate<'_>) -> Result<()> {
        self.sync_tracked(object, label)?;
        self.inner.identities.borrow_mut().join(object.object_id());
        Ok(())
    }

    /// Releases one collection membership.
    ///
    /// The row is deleted with the last membership. Otherwise a stored label
    /// equal to `label` is cleared. Returns `true` if the row is kept.
    pub(crate) fn detach(&self, table: &str, id: ObjectId, label: Option<&str>) -> Result<bool> {
        let members = self.inner.identities.borrow().members(id);
        match members {
            None => Ok(false),
            Some(0 | 1) => {
                self.remove_id(table, id)?;
                Ok(false)
            },
            Some(_) => {
                if label.is_some() && self.key_label(id).as_deref() == label {
                    self.clear_label(table, id)?;
                }
                self.inner.identities.borrow_mut().leave(id);
                Ok(true)
            },
        }
    }

    /// Drops one membership without touching the row.
    pub(crate) fn leave(&self, id: ObjectId) {
        self.inner.identities.borrow_mut().leave(id);
    }

    pub(crate) fn sync_tracked(&self, object: &Rc<dyn Tracked>, label: LabelUpdate<'_>) -> Result<()> {
        let start = Instant::now();
        let result = self.sync_inner(object, label);
        self.record("sync", start, &result);
        result
    }

    fn sync_inner(&self, object: &Rc<dyn Tracked>, label: LabelUpdate<'_>) -> Result<()> {
        let id = object.object_id();
        let type_id = object.type_key();
        let attributes = object.attributes()?;

        let existing = self.inner.schemas.borrow().get(type_id).cloned();
        let (schema, fresh) = match existing {
            Some(schema) => (schema, false),
            None => (
                self.infer_schema(type_id, object.type_name(), &attributes)?,
                true,
            ),
        };

        let key_label = match label {
            LabelUpdate::Set(label) => label.map(str::to_string),
            LabelUpdate::Keep => self.key_label(id),
        };

        let (values, extra) = schema.project(attributes);
        if !extra.is_empty() {
            tracing::debug!(
                table = schema.table(),
                ?extra,
                "ignoring attributes outside the registered schema"
            );
        }

        let mut params = Vec::with_capacity(values.len() + 2);
        params.push(Value::from(id));
        params.push(key_label.clone().map_or(Value::Null, Value::Text));
        params.extend(values);

        let tx = self
            .inner
            .conn
            .unchecked_transaction()
            .map_err(|e| operation_failed("begin_sync", &e))?;
        if fresh {
            let ddl = create_table_sql(&schema);
            self.log_statement(&ddl);
            tx.execute_batch(&ddl)
                .map_err(|e| schema_error(&schema, &e))?;
        }
        let upsert = upsert_sql(&schema);
        self.log_statement(&upsert);
        tx.execute(&upsert, params_from_iter(params.iter()))
            .map_err(|e| operation_failed("upsert", &e))?;
        tx.commit().map_err(|e| operation_failed("commit_sync", &e))?;

        if fresh {
            self.inner.schemas.borrow_mut().record(type_id, schema.clone())?;
            tracing::debug!(table = schema.table(), "registered mirrored type");
        }
        self.inner
            .identities
            .borrow_mut()
            .put(object, schema.table(), key_label);
        self.inner.detached.borrow_mut().remove(&id);
        Ok(())
    }

    pub(crate) fn remove_id(&self, table: &str, id: ObjectId) -> Result<()> {
        let start = Instant::now();
        let result = self.remove_inner(table, id);
        self.record("remove", start, &result);
        result
    }

    fn remove_inner(&self, table: &str, id: ObjectId) -> Result<()> {
        if !self.inner.schemas.borrow().has_table(table) {
            tracing::debug!(table, %id, "remove from unregistered table ignored");
            return Ok(());
        }
        self.delete_row(table, id)?;

        let mut identities = self.inner.identities.borrow_mut();
        if identities.entry(id).is_some_and(|entry| entry.table() == table)
            && let Some(entry) = identities.remove(id)
            && entry.is_alive()
        {
            self.inner
                .detached
                .borrow_mut()
                .insert(id, entry.object().clone());
        }
        drop(identities);
        self.inner.batch.borrow_mut().forget(id);
        Ok(())
    }

    fn clear_label(&self, table: &str, id: ObjectId) -> Result<()> {
        let sql = clear_label_sql(table);
        self.log_statement(&sql);
        self.inner
            .conn
            .execute(&sql, [id.as_i64()])
            .map_err(|e| operation_failed("clear_label", &e))?;
        self.inner.identities.borrow_mut().clear_key_label(id);
        Ok(())
    }

    /// Evicts reclaimed rows and forgets detached objects that are gone.
    fn sweep_reclaimed(&self) -> Result<()> {
        self.inner
            .detached
            .borrow_mut()
            .retain(|_, object| object.strong_count() > 0);
        let stale = self.inner.identities.borrow().has_reclaimed();
        if stale {
            self.purge_reclaimed()?;
        }
        Ok(())
    }

    /// Returns `true` if the object's row was deleted while it stayed alive.
    pub(crate) fn is_detached(&self, id: ObjectId) -> bool {
        self.inner.detached.borrow().contains_key(&id)
    }

    fn delete_row(&self, table: &str, id: ObjectId) -> Result<()> {
        let sql = delete_sql(table);
        self.log_statement(&sql);
        self.inner
            .conn
            .execute(&sql, [id.as_i64()])
            .map_err(|e| operation_failed("delete", &e))?;
        Ok(())
    }

    /// Infers a schema and checks its table name is free, without recording it.
    fn infer_schema(
        &self,
        type_id: TypeId,
        type_name: &'static str,
        attributes: &[(&'static str, Value)],
    ) -> Result<TableSchema> {
        let schema = TableSchema::infer(&self.inner.config.table_prefix, type_name, attributes)?;
        self.inner
            .schemas
            .borrow()
            .check_available(type_id, &schema)?;
        Ok(schema)
    }

    /// Returns `true` if the object currently has an identity entry.
    pub(crate) fn is_indexed(&self, id: ObjectId) -> bool {
        self.inner.identities.borrow().contains(id)
    }

    fn log_statement(&self, sql: &str) {
        if self.inner.config.log_statements {
            tracing::debug!(sql, "executing statement");
        }
    }

    fn record<T>(&self, operation: &'static str, start: Instant, result: &Result<T>) {
        if self.inner.config.metrics_enabled {
            record_operation_metrics(operation, start, status_label(result));
        }
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("tables", &self.tables())
            .field("identities", &self.inner.identities.borrow().len())
            .field("batching", &self.is_batching())
            .finish_non_exhaustive()
    }
}

fn operation_failed(operation: &str, err: &rusqlite::Error) -> Error {
    Error::OperationFailed {
        operation: operation.to_string(),
        cause: err.to_string(),
    }
}

fn schema_error(schema: &TableSchema, err: &rusqlite::Error) -> Error {
    Error::Schema {
        table: schema.table().to_string(),
        reason: err.to_string(),
    }
}

pub(crate) fn query_error(sql: &str, err: &rusqlite::Error) -> Error {
    Error::Query {
        sql: sql.to_string(),
        cause: err.to_string(),
    }
}
