//! Collection field operations: list/set/map adds, removes, and
//! position/key shifts, each decomposed to simple-field-style deltas for
//! the element (spec §4.4). List positions are fixed-width big-endian
//! `u64` suffixes so lexical key order equals list order; inserting or
//! removing at position `p` shifts every later element's suffix by one.

use crate::codec::{self, Value};
use crate::err::{Error, Result};
use crate::kv::{Snapshot, Writes};
use crate::layout;
use crate::objid::ObjId;
use crate::schema::field::{CollectionKind, FieldDef, FieldKind};

/// The order-preserving encoding a scalar [`FieldKind`] stores as, if any.
pub(crate) fn scalar_encoding(kind: &FieldKind) -> Option<codec::EncodingKind> {
	match kind {
		FieldKind::Simple { encoding, .. } => Some(*encoding),
		FieldKind::Reference { .. } => Some(codec::EncodingKind::Ref),
		_ => None,
	}
}

fn element_encoding(field: &FieldDef) -> Result<codec::EncodingKind> {
	let FieldKind::Collection { element, .. } = &field.kind else {
		return Err(Error::Codec(format!("field {} is not a collection", field.storage_id)));
	};
	scalar_encoding(element)
		.ok_or_else(|| Error::Codec(format!("field {}'s element kind is not scalar", field.storage_id)))
}

fn map_value_encoding(field: &FieldDef) -> Result<codec::EncodingKind> {
	let FieldKind::Collection { map_value, .. } = &field.kind else {
		return Err(Error::Codec(format!("field {} is not a collection", field.storage_id)));
	};
	let map_value = map_value
		.as_deref()
		.ok_or_else(|| Error::Codec(format!("field {} is not a map", field.storage_id)))?;
	scalar_encoding(map_value)
		.ok_or_else(|| Error::Codec(format!("field {}'s map value kind is not scalar", field.storage_id)))
}

fn add_index_entry(writes: &mut Writes, field: &FieldDef, id: ObjId, encoded_value: &[u8], selector: &[u8]) {
	if field.kind.is_indexed() {
		writes.put(
			layout::simple_index_key_with_selector(field.storage_id, encoded_value, id, selector),
			Vec::new(),
		);
	}
}

fn remove_index_entry(writes: &mut Writes, field: &FieldDef, id: ObjId, encoded_value: &[u8], selector: &[u8]) {
	if field.kind.is_indexed() {
		writes.remove_key(layout::simple_index_key_with_selector(
			field.storage_id,
			encoded_value,
			id,
			selector,
		));
	}
}

/// Inserts `value` into a list field at `position`, shifting every
/// existing element at or after `position` one slot later.
pub fn list_insert(
	view: &dyn Snapshot,
	writes: &mut Writes,
	field: &FieldDef,
	id: ObjId,
	position: u64,
	value: &Value,
) -> Result<()> {
	let encoding = element_encoding(field)?;
	let (min, max) = layout::field_elements_range(id, field.storage_id);
	let mut existing: Vec<(Vec<u8>, Vec<u8>)> = view.get_range(&min, &max, false)?.collect::<Result<Vec<_>>>()?;
	existing.sort_by(|a, b| a.0.cmp(&b.0));

	for (key, raw) in existing.iter().rev() {
		let pos = layout::parse_list_position(key)?;
		if pos < position {
			break;
		}
		let (elem, _) = codec::decode(raw, encoding)?;
		let encoded_elem = codec::encode(&elem)?;
		remove_index_entry(writes, field, id, &encoded_elem, &pos.to_be_bytes());
		writes.remove_key(key.clone());
		let new_pos = pos + 1;
		writes.put(layout::field_key_list_element(id, field.storage_id, new_pos), raw.clone());
		add_index_entry(writes, field, id, &encoded_elem, &new_pos.to_be_bytes());
	}

	let encoded_new = codec::encode(value)?;
	writes.put(layout::field_key_list_element(id, field.storage_id, position), encoded_new.clone());
	add_index_entry(writes, field, id, &encoded_new, &position.to_be_bytes());
	Ok(())
}

/// Removes the element at `position` from a list field, shifting every
/// later element one slot earlier.
pub fn list_remove(view: &dyn Snapshot, writes: &mut Writes, field: &FieldDef, id: ObjId, position: u64) -> Result<()> {
	let encoding = element_encoding(field)?;
	let removed_key = layout::field_key_list_element(id, field.storage_id, position);
	if let Some(raw) = view.get(&removed_key)? {
		let (elem, _) = codec::decode(&raw, encoding)?;
		let encoded_elem = codec::encode(&elem)?;
		remove_index_entry(writes, field, id, &encoded_elem, &position.to_be_bytes());
		writes.remove_key(removed_key);
	}

	let (min, max) = layout::field_elements_range(id, field.storage_id);
	let mut existing: Vec<(Vec<u8>, Vec<u8>)> = view.get_range(&min, &max, false)?.collect::<Result<Vec<_>>>()?;
	existing.sort_by(|a, b| a.0.cmp(&b.0));

	for (key, raw) in existing {
		let pos = layout::parse_list_position(&key)?;
		if pos <= position {
			continue;
		}
		let (elem, _) = codec::decode(&raw, encoding)?;
		let encoded_elem = codec::encode(&elem)?;
		remove_index_entry(writes, field, id, &encoded_elem, &pos.to_be_bytes());
		writes.remove_key(key);
		let new_pos = pos - 1;
		writes.put(layout::field_key_list_element(id, field.storage_id, new_pos), raw);
		add_index_entry(writes, field, id, &encoded_elem, &new_pos.to_be_bytes());
	}
	Ok(())
}

/// Adds `value` to a set field. Idempotent: adding an already-present
/// member is a no-op.
pub fn set_add(view: &dyn Snapshot, writes: &mut Writes, field: &FieldDef, id: ObjId, value: &Value) -> Result<()> {
	let encoded = codec::encode(value)?;
	let key = layout::field_key_set_or_map_element(id, field.storage_id, &encoded);
	if view.get(&key)?.is_some() {
		return Ok(());
	}
	writes.put(key, Vec::new());
	add_index_entry(writes, field, id, &encoded, &encoded);
	Ok(())
}

/// Removes `value` from a set field. A no-op if absent.
pub fn set_remove(view: &dyn Snapshot, writes: &mut Writes, field: &FieldDef, id: ObjId, value: &Value) -> Result<()> {
	let encoded = codec::encode(value)?;
	let key = layout::field_key_set_or_map_element(id, field.storage_id, &encoded);
	if view.get(&key)?.is_none() {
		return Ok(());
	}
	writes.remove_key(key);
	remove_index_entry(writes, field, id, &encoded, &encoded);
	Ok(())
}

/// Sets `map_key -> value` in a map field, overwriting any prior value.
pub fn map_put(
	view: &dyn Snapshot,
	writes: &mut Writes,
	field: &FieldDef,
	id: ObjId,
	map_key: &Value,
	value: &Value,
) -> Result<()> {
	let value_encoding = map_value_encoding(field)?;
	let encoded_key = codec::encode(map_key)?;
	let elem_key = layout::field_key_set_or_map_element(id, field.storage_id, &encoded_key);
	let old_raw = view.get(&elem_key)?;
	let encoded_new = codec::encode(value)?;

	if let Some(old_raw) = &old_raw {
		let (old_value, _) = codec::decode(old_raw, value_encoding)?;
		if old_value != *value {
			let encoded_old = codec::encode(&old_value)?;
			remove_index_entry(writes, field, id, &encoded_old, &encoded_key);
			add_index_entry(writes, field, id, &encoded_new, &encoded_key);
		}
	} else {
		add_index_entry(writes, field, id, &encoded_new, &encoded_key);
	}
	writes.put(elem_key, encoded_new);
	Ok(())
}

/// Removes `map_key` from a map field. A no-op if absent.
pub fn map_remove(view: &dyn Snapshot, writes: &mut Writes, field: &FieldDef, id: ObjId, map_key: &Value) -> Result<()> {
	let value_encoding = map_value_encoding(field)?;
	let encoded_key = codec::encode(map_key)?;
	let elem_key = layout::field_key_set_or_map_element(id, field.storage_id, &encoded_key);
	let Some(raw) = view.get(&elem_key)? else { return Ok(()) };
	let (value, _) = codec::decode(&raw, value_encoding)?;
	let encoded_value = codec::encode(&value)?;
	remove_index_entry(writes, field, id, &encoded_value, &encoded_key);
	writes.remove_key(elem_key);
	Ok(())
}

/// Every element currently stored for a collection field, as
/// `(full key, selector bytes, element's own order-preserving encoding)`
/// — the selector/encoding pair each index entry for that element is
/// keyed on, regardless of which [`CollectionKind`] it is.
pub(crate) fn element_entries(view: &dyn Snapshot, field: &FieldDef, id: ObjId) -> Result<Vec<(Vec<u8>, Vec<u8>, Vec<u8>)>> {
	let FieldKind::Collection { kind, .. } = &field.kind else {
		return Err(Error::Codec(format!("field {} is not a collection", field.storage_id)));
	};
	let prefix = layout::field_key(id, field.storage_id);
	let (min, max) = layout::field_elements_range(id, field.storage_id);
	let mut out = Vec::new();
	for row in view.get_range(&min, &max, false)? {
		let (key, raw) = row?;
		let selector = key[prefix.len()..].to_vec();
		let encoded_value = match kind {
			CollectionKind::List => {
				let encoding = element_encoding(field)?;
				let (elem, _) = codec::decode(&raw, encoding)?;
				codec::encode(&elem)?
			}
			CollectionKind::Set => selector.clone(),
			CollectionKind::Map => {
				let encoding = map_value_encoding(field)?;
				let (value, _) = codec::decode(&raw, encoding)?;
				codec::encode(&value)?
			}
		};
		out.push((key, selector, encoded_value));
	}
	Ok(out)
}

/// Removes every element of a collection field (and every index entry
/// it maintained), used when the owning object or the field itself is
/// deleted.
pub fn remove_all_elements(view: &dyn Snapshot, writes: &mut Writes, field: &FieldDef, id: ObjId) -> Result<()> {
	for (key, selector, encoded_value) in element_entries(view, field, id)? {
		remove_index_entry(writes, field, id, &encoded_value, &selector);
		writes.remove_key(key);
	}
	Ok(())
}

/// Adds an index entry for every element currently stored, without
/// touching the elements themselves — used when a collection field
/// transitions from unindexed to indexed across a schema upgrade. Adds
/// unconditionally: callers only invoke this once the field is already
/// indexed.
pub(crate) fn reindex_all_elements(view: &dyn Snapshot, writes: &mut Writes, field: &FieldDef, id: ObjId) -> Result<()> {
	for (_, selector, encoded_value) in element_entries(view, field, id)? {
		writes.put(
			layout::simple_index_key_with_selector(field.storage_id, &encoded_value, id, &selector),
			Vec::new(),
		);
	}
	Ok(())
}

/// Removes every index entry for a collection field without touching
/// the elements themselves — used when a collection field transitions
/// from indexed to unindexed across a schema upgrade. Removes
/// unconditionally, since by the time this runs `field.kind.is_indexed()`
/// is already false and `remove_index_entry`'s guard would no-op.
pub(crate) fn remove_index_entries_only(view: &dyn Snapshot, writes: &mut Writes, field: &FieldDef, id: ObjId) -> Result<()> {
	for (_, selector, encoded_value) in element_entries(view, field, id)? {
		writes.remove_key(layout::simple_index_key_with_selector(field.storage_id, &encoded_value, id, &selector));
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::codec::EncodingKind;
	use crate::kv::MemEngine;
	use crate::kv::Engine;

	fn list_field() -> FieldDef {
		FieldDef {
			storage_id: 50,
			name: "items".into(),
			kind: FieldKind::Collection {
				kind: CollectionKind::List,
				element: Box::new(FieldKind::Simple { encoding: EncodingKind::Str, nullable: false, indexed: false }),
				map_value: None,
				indexed: true,
			},
		}
	}

	fn set_field() -> FieldDef {
		FieldDef {
			storage_id: 51,
			name: "tags".into(),
			kind: FieldKind::Collection {
				kind: CollectionKind::Set,
				element: Box::new(FieldKind::Simple { encoding: EncodingKind::Str, nullable: false, indexed: false }),
				map_value: None,
				indexed: false,
			},
		}
	}

	fn map_field() -> FieldDef {
		FieldDef {
			storage_id: 52,
			name: "props".into(),
			kind: FieldKind::Collection {
				kind: CollectionKind::Map,
				element: Box::new(FieldKind::Simple { encoding: EncodingKind::Str, nullable: false, indexed: false }),
				map_value: Some(Box::new(FieldKind::Simple {
					encoding: EncodingKind::Str,
					nullable: false,
					indexed: false,
				})),
				indexed: false,
			},
		}
	}

	#[test]
	fn list_insert_shifts_later_elements() {
		let engine = MemEngine::new();
		let id = ObjId::random(1).unwrap();
		let field = list_field();
		let mut writes = Writes::new();
		let snap = engine.snapshot();
		list_insert(&*snap, &mut writes, &field, id, 0, &Value::Str("a".into())).unwrap();
		engine.mutate(writes, false).unwrap();

		let mut writes = Writes::new();
		let snap = engine.snapshot();
		list_insert(&*snap, &mut writes, &field, id, 0, &Value::Str("b".into())).unwrap();
		engine.mutate(writes, false).unwrap();

		let (min, max) = layout::field_elements_range(id, field.storage_id);
		let elems: Vec<(Vec<u8>, Vec<u8>)> = engine.get_range(&min, &max, false).unwrap().collect::<Result<Vec<_>>>().unwrap();
		assert_eq!(elems.len(), 2);
		assert_eq!(layout::parse_list_position(&elems[0].0).unwrap(), 0);
		assert_eq!(layout::parse_list_position(&elems[1].0).unwrap(), 1);
		assert_eq!(codec::decode(&elems[0].1, EncodingKind::Str).unwrap().0, Value::Str("b".into()));
		assert_eq!(codec::decode(&elems[1].1, EncodingKind::Str).unwrap().0, Value::Str("a".into()));
	}

	#[test]
	fn set_add_is_idempotent() {
		let engine = MemEngine::new();
		let id = ObjId::random(1).unwrap();
		let field = set_field();
		for _ in 0..2 {
			let mut writes = Writes::new();
			let snap = engine.snapshot();
			set_add(&*snap, &mut writes, &field, id, &Value::Str("x".into())).unwrap();
			engine.mutate(writes, false).unwrap();
		}
		let (min, max) = layout::field_elements_range(id, field.storage_id);
		let elems: Vec<(Vec<u8>, Vec<u8>)> = engine.get_range(&min, &max, false).unwrap().collect::<Result<Vec<_>>>().unwrap();
		assert_eq!(elems.len(), 1);
	}

	#[test]
	fn map_put_overwrites_and_remove_clears() {
		let engine = MemEngine::new();
		let id = ObjId::random(1).unwrap();
		let field = map_field();
		let mut writes = Writes::new();
		{
			let snap = engine.snapshot();
			map_put(&*snap, &mut writes, &field, id, &Value::Str("k".into()), &Value::Str("v1".into())).unwrap();
		}
		engine.mutate(writes, false).unwrap();

		let mut writes = Writes::new();
		{
			let snap = engine.snapshot();
			map_put(&*snap, &mut writes, &field, id, &Value::Str("k".into()), &Value::Str("v2".into())).unwrap();
		}
		engine.mutate(writes, false).unwrap();

		let (min, max) = layout::field_elements_range(id, field.storage_id);
		let elems: Vec<(Vec<u8>, Vec<u8>)> = engine.get_range(&min, &max, false).unwrap().collect::<Result<Vec<_>>>().unwrap();
		assert_eq!(elems.len(), 1);
		assert_eq!(codec::decode(&elems[0].1, EncodingKind::Str).unwrap().0, Value::Str("v2".into()));

		let mut writes = Writes::new();
		{
			let snap = engine.snapshot();
			map_remove(&*snap, &mut writes, &field, id, &Value::Str("k".into())).unwrap();
		}
		engine.mutate(writes, false).unwrap();
		let elems: Vec<(Vec<u8>, Vec<u8>)> = engine.get_range(&min, &max, false).unwrap().collect::<Result<Vec<_>>>().unwrap();
		assert!(elems.is_empty());
	}
}
