//! Top-level database handle: owns the engine and the schema registry,
//! and is the one place that knows the difference between opening a
//! fresh store (no format-version key yet) and reopening an existing one
//! (rebuilding the registry from stored `schema(v)` rows, spec §4.3 step
//! 1). Grounded on the teacher's `kvs::ds::Datastore`, which plays the
//! same role: constructed once per process, handed out to callers as the
//! one place `Transaction`s are opened from.

use std::sync::Arc;

use tracing::{debug, instrument};

use crate::err::{Error, Result};
use crate::jsck;
use crate::kv::{Check, Engine};
use crate::layout;
use crate::registry::Registry;
use crate::schema::{Schema, SchemaVersion};
use crate::tx::Transaction;

pub struct Database {
	engine: Arc<dyn Engine>,
	registry: Arc<Registry>,
}

impl Database {
	/// Opens `engine` as a database. Writes the format-version key if it
	/// is absent (a brand-new store) and rebuilds the schema registry
	/// from every `schema(v)` row already present.
	#[instrument(skip(engine))]
	pub fn open(engine: Arc<dyn Engine>) -> Result<Self> {
		if engine.get(&layout::format_version_key())?.is_none() {
			engine.put(layout::format_version_key(), vec![layout::FORMAT_VERSION])?;
			debug!("initialized a fresh database");
		}

		let (min, max) = layout::schema_key_range();
		let mut entries = Vec::new();
		for row in engine.get_range(&min, &max, false)? {
			let (key, value) = row?;
			entries.push((layout::parse_schema_key(&key)?, value));
		}
		let registry = Registry::from_entries(entries)?;
		debug!(versions = registry.all_versions().len(), "database opened");
		Ok(Database { engine, registry: Arc::new(registry) })
	}

	pub fn registry(&self) -> &Arc<Registry> {
		&self.registry
	}

	/// Resolves `schema` to a version, registering and persisting it as a
	/// new `schema(v)` row if this is the first time this exact content
	/// has been seen (spec §4.3).
	#[instrument(skip(self, schema), fields(schema_id = %schema.schema_id()))]
	pub fn register_schema(&self, schema: Arc<Schema>, allow_register: bool) -> Result<(SchemaVersion, Arc<Schema>)> {
		let already_known = self.registry.lookup(&schema).is_some();
		let (version, schema) = self.registry.resolve(schema, allow_register)?;
		if !already_known {
			let xml = crate::schema::xml::render(&schema)?;
			self.engine.put(layout::schema_key(version), xml.into_bytes())?;
			debug!(version, "persisted new schema version");
		}
		Ok((version, schema))
	}

	/// Begins a transaction against the schema at `version`.
	pub fn begin(&self, version: SchemaVersion, read_only: bool, check: Check) -> Result<Transaction> {
		let schema = self.registry.get(version)?;
		Ok(Transaction::begin(self.engine.clone(), self.registry.clone(), schema, version, read_only, check))
	}

	/// Begins a transaction against the current (highest registered)
	/// schema version.
	pub fn begin_current(&self, read_only: bool, check: Check) -> Result<Transaction> {
		let version = self
			.registry
			.current_version()
			.ok_or_else(|| Error::CorruptDatabase("no schema has been registered yet".into()))?;
		self.begin(version, read_only, check)
	}

	/// Runs jsck in detect-only mode against this database.
	pub fn check(&self) -> Result<Vec<jsck::Issue>> {
		jsck::check(self.engine.as_ref())
	}

	/// Runs jsck in repair mode against this database.
	pub fn repair(&self) -> Result<Vec<jsck::Issue>> {
		jsck::repair(self.engine.as_ref())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::codec::{EncodingKind, Value};
	use crate::kv::MemEngine;
	use crate::schema::builder::{ObjectTypeBuilder, SchemaBuilder};
	use crate::schema::field::FieldKind;

	const WIDGET: crate::schema::StorageId = 1;
	const NAME_FIELD: crate::schema::StorageId = 10;

	fn widget_schema() -> Arc<Schema> {
		let ty = ObjectTypeBuilder::new(WIDGET, "Widget")
			.field(crate::schema::field::FieldDef {
				storage_id: NAME_FIELD,
				name: "name".into(),
				kind: FieldKind::Simple { encoding: EncodingKind::Str, nullable: false, indexed: true },
			})
			.unwrap();
		SchemaBuilder::new().object_type(ty).unwrap().lock_down()
	}

	#[test]
	fn opening_a_fresh_engine_writes_the_format_version() {
		let engine: Arc<dyn Engine> = Arc::new(MemEngine::new());
		Database::open(engine.clone()).unwrap();
		assert_eq!(engine.get(&layout::format_version_key()).unwrap(), Some(vec![layout::FORMAT_VERSION]));
	}

	#[test]
	fn schema_registration_survives_a_reopen() {
		let engine: Arc<dyn Engine> = Arc::new(MemEngine::new());
		let db = Database::open(engine.clone()).unwrap();
		let (version, _) = db.register_schema(widget_schema(), true).unwrap();

		let mut tx = db.begin(version, false, Check::None).unwrap();
		let id = tx.create(WIDGET).unwrap();
		tx.write_field(id, NAME_FIELD, Some(&Value::Str("mallet".into()))).unwrap();
		tx.commit().unwrap();

		let reopened = Database::open(engine.clone()).unwrap();
		assert_eq!(reopened.registry.current_version(), Some(version));
		let mut tx2 = reopened.begin_current(true, Check::None).unwrap();
		assert_eq!(tx2.read_field(id, NAME_FIELD).unwrap(), Some(Value::Str("mallet".into())));
		tx2.rollback();

		assert!(reopened.check().unwrap().is_empty());
	}

	#[test]
	fn repair_restores_a_manually_dropped_index_entry() {
		let engine: Arc<dyn Engine> = Arc::new(MemEngine::new());
		let db = Database::open(engine.clone()).unwrap();
		let (version, _) = db.register_schema(widget_schema(), true).unwrap();

		let mut tx = db.begin(version, false, Check::None).unwrap();
		let id = tx.create(WIDGET).unwrap();
		tx.write_field(id, NAME_FIELD, Some(&Value::Str("mallet".into()))).unwrap();
		tx.commit().unwrap();
		let _ = id;

		let (min, max) = layout::simple_index_range(NAME_FIELD);
		engine.remove_range(&min, &max).unwrap();
		assert!(!db.check().unwrap().is_empty());

		db.repair().unwrap();
		assert!(db.check().unwrap().is_empty());
	}
}
