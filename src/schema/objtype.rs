use std::collections::BTreeMap;

use crate::err::{Error, Result};
use crate::schema::composite::CompositeIndexDef;
use crate::schema::field::FieldDef;
use crate::schema::StorageId;

/// One object type: its fields and composite indexes, keyed by storage id
/// so iteration order is deterministic (used by [`crate::schema::fingerprint`]).
#[derive(Clone, Debug, PartialEq)]
pub struct ObjectType {
	pub storage_id: StorageId,
	pub name: String,
	pub fields: BTreeMap<StorageId, FieldDef>,
	pub composite_indexes: BTreeMap<StorageId, CompositeIndexDef>,
}

impl ObjectType {
	pub fn field(&self, storage_id: StorageId) -> Result<&FieldDef> {
		self.fields
			.get(&storage_id)
			.ok_or(Error::UnknownField(storage_id, self.storage_id))
	}

	/// Validates that every field storage id named by a composite index
	/// exists and is a simple (non-collection, non-counter) field.
	pub(crate) fn validate(&self) -> Result<()> {
		use crate::schema::field::FieldKind;
		for ix in self.composite_indexes.values() {
			for &fd in &ix.fields {
				match self.fields.get(&fd).map(|f| &f.kind) {
					Some(FieldKind::Simple { .. }) | Some(FieldKind::Reference { .. }) => {}
					Some(_) => {
						return Err(Error::SchemaMismatch {
							storage_id: fd,
							reason: format!(
								"composite index {} may only name simple or reference fields",
								ix.name
							),
						})
					}
					None => return Err(Error::UnknownField(fd, self.storage_id)),
				}
			}
		}
		Ok(())
	}
}
