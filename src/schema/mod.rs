//! Schema model: an immutable description of a database's object types,
//! their fields and composite indexes, and the lock-down transition from
//! mutable-during-construction to fully immutable and shareable.
//!
//! Storage ids — not names — are the only identifier that survives to the
//! byte layout; names exist solely for the schema XML. A [`Schema`]'s
//! [`fingerprint::SchemaId`] is a stable fingerprint of its structural
//! content, independent of the version number the registry eventually
//! assigns it (see [`crate::registry`]).

pub mod builder;
pub mod composite;
pub mod field;
pub mod fingerprint;
pub mod objtype;
pub mod xml;

use std::collections::BTreeMap;

use crate::err::{Error, Result};
use crate::schema::objtype::ObjectType;

/// A positive integer naming any of: an object type, a field, a
/// composite index, or a built-in meta key. Storage id 0 is reserved for
/// meta keys (see [`crate::layout`]).
pub type StorageId = u32;

/// A schema version number, assigned by [`crate::registry::Registry`] on
/// first use of a new schema. Monotonically increasing, starting at 1.
pub type SchemaVersion = u32;

#[derive(Clone, Debug, PartialEq)]
pub struct Schema {
	pub(crate) types: BTreeMap<StorageId, ObjectType>,
	pub(crate) schema_id: fingerprint::SchemaId,
}

impl Schema {
	pub fn schema_id(&self) -> fingerprint::SchemaId {
		self.schema_id
	}

	pub fn object_type(&self, storage_id: StorageId) -> Result<&ObjectType> {
		self.types.get(&storage_id).ok_or(Error::UnknownType(storage_id))
	}

	pub fn object_types(&self) -> impl Iterator<Item = &ObjectType> {
		self.types.values()
	}
}

#[cfg(test)]
mod tests {
	use super::builder::{ObjectTypeBuilder, SchemaBuilder};
	use super::field::{FieldDef, FieldKind};
	use crate::codec::EncodingKind;

	fn simple_schema() -> std::sync::Arc<super::Schema> {
		let ty = ObjectTypeBuilder::new(1, "Foo")
			.field(FieldDef {
				storage_id: 10,
				name: "name".into(),
				kind: FieldKind::Simple { encoding: EncodingKind::Str, nullable: false, indexed: true },
			})
			.unwrap();
		SchemaBuilder::new().object_type(ty).unwrap().lock_down()
	}

	#[test]
	fn lock_down_is_stable_under_clone() {
		let s1 = simple_schema();
		let s2 = (*s1).clone();
		let id1 = s1.schema_id();
		let id2 = super::fingerprint::compute(&s2);
		assert_eq!(id1.0, id2.0);
	}

	#[test]
	fn identical_structure_yields_identical_schema_id() {
		let a = simple_schema();
		let b = simple_schema();
		assert_eq!(a.schema_id().0, b.schema_id().0);
	}

	#[test]
	fn different_structure_yields_different_schema_id() {
		let a = simple_schema();
		let ty = ObjectTypeBuilder::new(1, "Foo")
			.field(FieldDef {
				storage_id: 10,
				name: "name".into(),
				kind: FieldKind::Simple { encoding: EncodingKind::Str, nullable: false, indexed: false },
			})
			.unwrap();
		let b = SchemaBuilder::new().object_type(ty).unwrap().lock_down();
		assert_ne!(a.schema_id().0, b.schema_id().0);
	}
}
