//! Mutable construction of a [`Schema`] prior to lock-down.
//!
//! Mirrors the teacher's pattern of building up a `DefineTableStatement`
//! / `DefineFieldStatement` tree during DDL execution and only then
//! handing callers an `Arc<...>` from the cache — here the "only then" is
//! explicit: [`SchemaBuilder::lock_down`] is the one path from mutable to
//! immutable and shareable.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::err::{Error, Result};
use crate::schema::composite::CompositeIndexDef;
use crate::schema::field::FieldDef;
use crate::schema::fingerprint::{self, SchemaId};
use crate::schema::objtype::ObjectType;
use crate::schema::{Schema, StorageId};

#[derive(Default)]
pub struct ObjectTypeBuilder {
	storage_id: StorageId,
	name: String,
	fields: BTreeMap<StorageId, FieldDef>,
	composite_indexes: BTreeMap<StorageId, CompositeIndexDef>,
}

impl ObjectTypeBuilder {
	pub fn new(storage_id: StorageId, name: impl Into<String>) -> Self {
		ObjectTypeBuilder {
			storage_id,
			name: name.into(),
			fields: BTreeMap::new(),
			composite_indexes: BTreeMap::new(),
		}
	}

	pub fn field(mut self, field: FieldDef) -> Result<Self> {
		if self.fields.insert(field.storage_id, field).is_some() {
			return Err(Error::SchemaMismatch {
				storage_id: self.storage_id,
				reason: "duplicate field storage id within one object type".into(),
			});
		}
		Ok(self)
	}

	pub fn composite_index(mut self, index: CompositeIndexDef) -> Result<Self> {
		if self.composite_indexes.insert(index.storage_id, index).is_some() {
			return Err(Error::SchemaMismatch {
				storage_id: self.storage_id,
				reason: "duplicate composite index storage id within one object type".into(),
			});
		}
		Ok(self)
	}

	fn build(self) -> Result<ObjectType> {
		let ty = ObjectType {
			storage_id: self.storage_id,
			name: self.name,
			fields: self.fields,
			composite_indexes: self.composite_indexes,
		};
		ty.validate()?;
		Ok(ty)
	}
}

#[derive(Default)]
pub struct SchemaBuilder {
	types: BTreeMap<StorageId, ObjectType>,
}

impl SchemaBuilder {
	pub fn new() -> Self {
		SchemaBuilder::default()
	}

	pub fn object_type(mut self, ty: ObjectTypeBuilder) -> Result<Self> {
		let ty = ty.build()?;
		if self.types.insert(ty.storage_id, ty).is_some() {
			return Err(Error::SchemaMismatch {
				storage_id: 0,
				reason: "duplicate object type storage id within one schema".into(),
			});
		}
		Ok(self)
	}

	/// Finalizes construction. The returned `Schema` is immutable and
	/// cheap to share (`Arc` clone); its `schema_id` is fixed the moment
	/// it locks down. The fingerprint only ever traverses `types`, so a
	/// placeholder id is enough to compute the real one.
	pub fn lock_down(self) -> Arc<Schema> {
		let unfingerprinted = Schema { types: self.types, schema_id: SchemaId([0; 16]) };
		let schema_id = fingerprint::compute(&unfingerprinted);
		Arc::new(Schema { schema_id, ..unfingerprinted })
	}
}
