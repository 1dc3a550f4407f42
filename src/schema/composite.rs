//! Composite indexes: an index over an ordered tuple of simple fields of
//! one object type.

use crate::schema::StorageId;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompositeIndexDef {
	pub storage_id: StorageId,
	pub name: String,
	/// Storage ids of the indexed fields, in tuple order. Every id here
	/// must name a simple (non-collection, non-counter) field of the
	/// owning object type.
	pub fields: Vec<StorageId>,
}
