//! Upgrading one object in place from its stored schema version to a
//! newer one, per spec §4.4 "Upgrade": a field present in the old type
//! but absent from the new one is dropped (sub-keys and index entries
//! removed); a field newly present in the new type is default-initialized
//! (and indexed, if applicable); a field present in both whose
//! indexed-ness changed gets its index entries added or removed without
//! touching its stored value. The object header and version-index entry
//! are rewritten last so a reader never observes a half-upgraded object.

use tracing::instrument;

use crate::codec;
use crate::err::Result;
use crate::kv::{Snapshot, Writes};
use crate::layout;
use crate::objid::ObjId;
use crate::schema::field::FieldKind;
use crate::schema::objtype::ObjectType;
use crate::schema::SchemaVersion;
use crate::translator::{self, collection, ObjectHeader};

/// Upgrades object `id` from `old_ty`/`old_header` to `new_ty` at
/// `new_version`. `old_ty` and `new_ty` must share the same
/// `storage_id` (they are two versions of the same object type).
#[instrument(skip(view, writes, old_ty, new_ty))]
pub fn upgrade_object(
	view: &dyn Snapshot,
	writes: &mut Writes,
	old_ty: &ObjectType,
	new_ty: &ObjectType,
	id: ObjId,
	old_header: ObjectHeader,
	new_version: SchemaVersion,
) -> Result<()> {
	debug_assert_eq!(old_ty.storage_id, new_ty.storage_id);

	for (storage_id, old_field) in &old_ty.fields {
		if new_ty.fields.contains_key(storage_id) {
			continue;
		}
		match &old_field.kind {
			FieldKind::Simple { .. } | FieldKind::Reference { .. } => {
				if old_field.kind.is_indexed() {
					if let Some(old_value) = translator::read_simple_field(view, id, old_field)? {
						writes.remove_key(layout::simple_index_key(
							old_field.storage_id,
							&codec::encode(&old_value)?,
							id,
						));
					}
				}
				writes.remove_key(layout::field_key(id, old_field.storage_id));
			}
			FieldKind::Counter => {
				writes.remove_key(layout::field_key(id, old_field.storage_id));
			}
			FieldKind::Collection { .. } => {
				collection::remove_all_elements(view, writes, old_field, id)?;
			}
		}
	}

	for (storage_id, new_field) in &new_ty.fields {
		let Some(old_field) = old_ty.fields.get(storage_id) else {
			match &new_field.kind {
				FieldKind::Simple { .. } | FieldKind::Reference { .. } => {
					let default = translator::default_value(&new_field.kind);
					translator::write_simple_field(view, writes, new_ty, id, new_field, default.as_ref())?;
				}
				FieldKind::Counter => {
					writes.put(layout::field_key(id, new_field.storage_id), crate::kv::encode_counter(0));
				}
				FieldKind::Collection { .. } => {}
			}
			continue;
		};

		if old_field.kind.is_indexed() == new_field.kind.is_indexed() {
			continue;
		}
		match &new_field.kind {
			FieldKind::Simple { .. } | FieldKind::Reference { .. } => {
				let current = translator::read_simple_field(view, id, new_field)?;
				if new_field.kind.is_indexed() {
					if let Some(v) = &current {
						writes.put(
							layout::simple_index_key(new_field.storage_id, &codec::encode(v)?, id),
							Vec::new(),
						);
					}
				} else if let Some(v) = &current {
					writes.remove_key(layout::simple_index_key(new_field.storage_id, &codec::encode(v)?, id));
				}
			}
			FieldKind::Counter => {}
			FieldKind::Collection { .. } => {
				reindex_collection(view, writes, new_field, id, new_field.kind.is_indexed())?;
			}
		}
	}

	writes.remove_key(layout::version_index_key(old_header.schema_version, id));
	writes.put(layout::version_index_key(new_version, id), Vec::new());
	writes.put(layout::object_key(id), ObjectHeader { schema_version: new_version }.encode());
	Ok(())
}

fn reindex_collection(
	view: &dyn Snapshot,
	writes: &mut Writes,
	field: &crate::schema::field::FieldDef,
	id: ObjId,
	now_indexed: bool,
) -> Result<()> {
	if now_indexed {
		collection::reindex_all_elements(view, writes, field, id)
	} else {
		collection::remove_index_entries_only(view, writes, field, id)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::codec::EncodingKind;
	use crate::kv::{Engine, MemEngine};
	use crate::schema::composite::CompositeIndexDef;
	use crate::schema::field::FieldDef;
	use std::collections::BTreeMap;

	fn simple_field(storage_id: u32, nullable: bool, indexed: bool) -> FieldDef {
		FieldDef {
			storage_id,
			name: format!("f{storage_id}"),
			kind: FieldKind::Simple { encoding: EncodingKind::Str, nullable, indexed },
		}
	}

	fn object_type(fields: Vec<FieldDef>) -> ObjectType {
		let mut map = BTreeMap::new();
		for f in fields {
			map.insert(f.storage_id, f);
		}
		ObjectType {
			storage_id: 1,
			name: "Widget".into(),
			fields: map,
			composite_indexes: BTreeMap::<u32, CompositeIndexDef>::new(),
		}
	}

	#[test]
	fn dropped_field_is_removed_and_added_field_gets_default() {
		let engine = MemEngine::new();
		let old_ty = object_type(vec![simple_field(10, false, false)]);
		let new_ty = object_type(vec![simple_field(11, false, false)]);

		let mut writes = Writes::new();
		let id;
		{
			let snap = engine.snapshot();
			id = translator::create_object(&*snap, &mut writes, 1, 1).unwrap();
			translator::write_simple_field(
				&*snap,
				&mut writes,
				&old_ty,
				id,
				old_ty.field(10).unwrap(),
				Some(&crate::codec::Value::Str("x".into())),
			)
			.unwrap();
		}
		engine.mutate(writes, false).unwrap();

		let mut writes = Writes::new();
		{
			let snap = engine.snapshot();
			upgrade_object(
				&*snap,
				&mut writes,
				&old_ty,
				&new_ty,
				id,
				ObjectHeader { schema_version: 1 },
				2,
			)
			.unwrap();
		}
		engine.mutate(writes, false).unwrap();

		assert!(engine.get(&layout::field_key(id, 10)).unwrap().is_none());
		assert!(engine.get(&layout::field_key(id, 11)).unwrap().is_some());
		let header = ObjectHeader::decode(&engine.get(&layout::object_key(id)).unwrap().unwrap()).unwrap();
		assert_eq!(header.schema_version, 2);
	}
}
