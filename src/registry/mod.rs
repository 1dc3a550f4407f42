//! Schema version registry: a process-wide map from schema version to
//! [`Arc<Schema>`][Schema], plus the logic for resolving an incoming
//! schema to a version number — reusing one if its content already
//! matches, registering a new one otherwise.
//!
//! Read-mostly lock discipline (spec §5): many concurrent readers, one
//! exclusive writer while a new version is appended — `std::sync::RwLock`
//! rather than the teacher's `tokio::sync::RwLock` (`kvs/ds.rs`), since
//! this core's transaction model is synchronous/blocking by spec, not
//! async (see `SPEC_FULL.md` §1.1). The map itself plays the role of the
//! teacher's `Cache` (`kvs/cache.rs`): an `Arc`-valued lookup table handed
//! out by clone, never mutated in place once a version is published.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use tracing::{debug, instrument};

use crate::err::{Error, Result};
use crate::schema::fingerprint::SchemaId;
use crate::schema::{Schema, SchemaVersion};

pub struct Registry {
	versions: RwLock<BTreeMap<SchemaVersion, Arc<Schema>>>,
}

impl Registry {
	pub fn empty() -> Self {
		Registry { versions: RwLock::new(BTreeMap::new()) }
	}

	/// Rebuilds a registry from every `schema(v)` row read at database
	/// open (spec §4.3 step 1): `(version, schema xml bytes)` pairs in
	/// any order.
	#[instrument(skip_all)]
	pub fn from_entries(entries: impl IntoIterator<Item = (SchemaVersion, Vec<u8>)>) -> Result<Self> {
		let mut versions = BTreeMap::new();
		for (version, xml) in entries {
			let xml = std::str::from_utf8(&xml)
				.map_err(|e| Error::CorruptDatabase(format!("schema({version}) is not UTF-8: {e}")))?;
			let schema = crate::schema::xml::parse(xml)?.lock_down();
			versions.insert(version, schema);
		}
		debug!(count = versions.len(), "schema registry rebuilt from storage");
		Ok(Registry { versions: RwLock::new(versions) })
	}

	pub fn get(&self, version: SchemaVersion) -> Result<Arc<Schema>> {
		self.versions
			.read()
			.unwrap()
			.get(&version)
			.cloned()
			.ok_or(Error::CorruptDatabase(format!("no schema registered for version {version}")))
	}

	/// The current (highest) registered version, if any.
	pub fn current_version(&self) -> Option<SchemaVersion> {
		self.versions.read().unwrap().keys().next_back().copied()
	}

	pub fn all_versions(&self) -> Vec<(SchemaVersion, Arc<Schema>)> {
		self.versions.read().unwrap().iter().map(|(v, s)| (*v, s.clone())).collect()
	}

	fn find_by_schema_id(
		versions: &BTreeMap<SchemaVersion, Arc<Schema>>,
		schema_id: SchemaId,
	) -> Option<(SchemaVersion, Arc<Schema>)> {
		versions.iter().find(|(_, s)| s.schema_id() == schema_id).map(|(v, s)| (*v, s.clone()))
	}

	/// Looks up a version already registered for `schema`'s content.
	pub fn lookup(&self, schema: &Schema) -> Option<(SchemaVersion, Arc<Schema>)> {
		Self::find_by_schema_id(&self.versions.read().unwrap(), schema.schema_id())
	}

	/// Resolves `schema` to a version, per spec §4.3: reuse a matching
	/// version if one exists; otherwise, if `allow_register`, validate
	/// compatibility and assign + publish the next version. Persisting
	/// the `schema(v)` row itself is the caller's responsibility (it must
	/// land in the same transaction that observes this version number).
	#[instrument(skip(self, schema), fields(schema_id = %schema.schema_id()))]
	pub fn resolve(&self, schema: Arc<Schema>, allow_register: bool) -> Result<(SchemaVersion, Arc<Schema>)> {
		if let Some(found) = self.lookup(&schema) {
			debug!(version = found.0, "schema already registered, reusing version");
			return Ok(found);
		}
		if !allow_register {
			return Err(Error::SchemaMismatch {
				storage_id: crate::layout::META_STORAGE_ID,
				reason: "schema not registered and this transaction may not register new schemas".into(),
			});
		}
		let mut versions = self.versions.write().unwrap();
		// Re-check under the write lock: another writer may have raced us.
		if let Some(found) = Self::find_by_schema_id(&versions, schema.schema_id()) {
			return Ok(found);
		}
		check_compatible(&versions, &schema)?;
		let next = versions.keys().next_back().map(|v| v + 1).unwrap_or(1);
		versions.insert(next, schema.clone());
		debug!(version = next, "registered new schema version");
		Ok((next, schema))
	}
}

/// Checks that every field storage id in `candidate` agrees in kind and
/// encoding with every prior appearance of that storage id across all
/// registered versions (spec §4.3: "storage-id reuse must name the same
/// kind and encoding").
fn check_compatible(versions: &BTreeMap<SchemaVersion, Arc<Schema>>, candidate: &Schema) -> Result<()> {
	for ty in candidate.object_types() {
		for field in ty.fields.values() {
			for (_, existing_schema) in versions.iter() {
				let Ok(existing_ty) = existing_schema.object_type(ty.storage_id) else { continue };
				let Ok(existing_field) = existing_ty.field(field.storage_id) else { continue };
				if !field.is_compatible_with(existing_field) {
					return Err(Error::SchemaMismatch {
						storage_id: field.storage_id,
						reason: format!(
							"field `{}` is incompatible with its prior definition `{}` on type {}",
							field.name, existing_field.name, ty.storage_id
						),
					});
				}
			}
		}
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::codec::EncodingKind;
	use crate::schema::builder::{ObjectTypeBuilder, SchemaBuilder};
	use crate::schema::field::{FieldDef, FieldKind};

	fn schema_with_encoding(encoding: EncodingKind) -> Arc<Schema> {
		let ty = ObjectTypeBuilder::new(1, "Foo")
			.field(FieldDef {
				storage_id: 10,
				name: "name".into(),
				kind: FieldKind::Simple { encoding, nullable: false, indexed: false },
			})
			.unwrap();
		SchemaBuilder::new().object_type(ty).unwrap().lock_down()
	}

	#[test]
	fn first_registration_assigns_version_one() {
		let registry = Registry::empty();
		let (v, _) = registry.resolve(schema_with_encoding(EncodingKind::Str), true).unwrap();
		assert_eq!(v, 1);
	}

	#[test]
	fn identical_schema_reuses_version() {
		let registry = Registry::empty();
		let (v1, _) = registry.resolve(schema_with_encoding(EncodingKind::Str), true).unwrap();
		let (v2, _) = registry.resolve(schema_with_encoding(EncodingKind::Str), true).unwrap();
		assert_eq!(v1, v2);
	}

	#[test]
	fn disallowed_registration_of_unknown_schema_fails() {
		let registry = Registry::empty();
		let err = registry.resolve(schema_with_encoding(EncodingKind::Str), false).unwrap_err();
		assert!(matches!(err, Error::SchemaMismatch { .. }));
	}

	#[test]
	fn incompatible_storage_id_reuse_is_rejected() {
		let registry = Registry::empty();
		registry.resolve(schema_with_encoding(EncodingKind::Str), true).unwrap();
		let err = registry.resolve(schema_with_encoding(EncodingKind::I64), true).unwrap_err();
		assert!(matches!(err, Error::SchemaMismatch { .. }));
	}

	#[test]
	fn distinct_new_schema_gets_next_version() {
		let registry = Registry::empty();
		let (v1, _) = registry.resolve(schema_with_encoding(EncodingKind::Str), true).unwrap();
		let other = {
			let ty = ObjectTypeBuilder::new(2, "Bar")
				.field(FieldDef {
					storage_id: 20,
					name: "n".into(),
					kind: FieldKind::Counter,
				})
				.unwrap();
			SchemaBuilder::new().object_type(ty).unwrap().lock_down()
		};
		let (v2, _) = registry.resolve(other, true).unwrap();
		assert_eq!(v2, v1 + 1);
	}
}
