//! Object/KV translator: every object mutation is expressed as a
//! sequence of KV puts/removes/adjusts computed from the delta between a
//! field's pre- and post-image, per spec §4.4.
//!
//! Grounded on `doc/index.rs`'s old-vs-new-value diff driving index
//! add/remove (`build_opt_values`, `Indexable`) and `doc/field.rs`'s
//! per-field default-value handling for schema upgrade. Dispatch over
//! field kind is a single `match` on [`FieldKind`] throughout — spec §9
//! explicitly calls out a one-method-per-kind visitor as the wrong shape
//! here, since the on-disk taxonomy is a closed set of five kinds.

pub(crate) mod collection;
mod upgrade;

pub use collection::{list_insert, list_remove, map_put, map_remove, set_add, set_remove};
pub use upgrade::upgrade_object;

use std::collections::BTreeMap;

use tracing::instrument;

use crate::codec::{self, Value};
use crate::err::{Error, Result};
use crate::kv::{Snapshot, Writes};
use crate::layout;
use crate::objid::ObjId;
use crate::schema::composite::CompositeIndexDef;
use crate::schema::field::{FieldDef, FieldKind};
use crate::schema::objtype::ObjectType;
use crate::schema::{SchemaVersion, StorageId};

/// An object's on-disk primary-key value: just the schema version it was
/// last written under. Per-field presence is derived from which field
/// sub-keys exist, not recorded here (resolved Open Question, see
/// `SPEC_FULL.md` §3).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ObjectHeader {
	pub schema_version: SchemaVersion,
}

impl ObjectHeader {
	pub fn encode(&self) -> Vec<u8> {
		let mut out = Vec::new();
		crate::codec::encode_into(&Value::U64(self.schema_version as u64), &mut out).unwrap();
		out
	}

	pub fn decode(buf: &[u8]) -> Result<Self> {
		let (v, _) = codec::decode(buf, codec::EncodingKind::U64)
			.map_err(|_| Error::CorruptDatabase("malformed object header".into()))?;
		let Value::U64(version) = v else { unreachable!() };
		let schema_version = SchemaVersion::try_from(version)
			.map_err(|_| Error::CorruptDatabase("object header schema version out of range".into()))?;
		Ok(ObjectHeader { schema_version })
	}
}

/// Default value a field is initialized to when it comes into existence
/// without a caller-supplied value — on creation, or on upgrade when a
/// field is newly added to an object's type.
pub fn default_value(kind: &FieldKind) -> Option<Value> {
	match kind {
		FieldKind::Simple { nullable: true, .. } => None,
		FieldKind::Simple { encoding, nullable: false, .. } => Some(match encoding {
			codec::EncodingKind::Bool => Value::Bool(false),
			codec::EncodingKind::I64 => Value::I64(0),
			codec::EncodingKind::U64 => Value::U64(0),
			codec::EncodingKind::F64 => Value::F64(0.0),
			codec::EncodingKind::Str => Value::Str(String::new()),
			codec::EncodingKind::Bytes => Value::Bytes(Vec::new()),
			// A non-nullable Simple field is never declared with `Ref`
			// encoding in practice (references go through `Reference`,
			// which carries its own policy) — this sentinel, type id 0,
			// never names a real object type, so it can never resolve.
			codec::EncodingKind::Ref => Value::Ref(ObjId::from_bytes([0; 8])),
			codec::EncodingKind::Uuid => Value::Uuid(uuid::Uuid::nil()),
			codec::EncodingKind::Date => Value::Date(epoch()),
			codec::EncodingKind::Enum => Value::Enum(0),
		}),
		FieldKind::Reference { .. } => None,
		FieldKind::Counter | FieldKind::Collection { .. } => None,
	}
}

fn epoch() -> chrono::NaiveDate {
	chrono::NaiveDate::from_ymd_opt(1970, 1, 1).expect("1970-01-01 is a valid date")
}

/// Reads a scalar (simple or reference) field's current value. `None`
/// means either an explicit null or a field never written.
pub fn read_simple_field(view: &dyn Snapshot, id: ObjId, field: &FieldDef) -> Result<Option<Value>> {
	let key = layout::field_key(id, field.storage_id);
	let Some(raw) = view.get(&key)? else { return Ok(None) };
	let encoding = field_encoding(field)?;
	match &field.kind {
		FieldKind::Simple { nullable: false, .. } => {
			let (v, _) = codec::decode(&raw, encoding)?;
			Ok(Some(v))
		}
		_ => {
			let (v, _) = codec::decode_nullable(&raw, encoding)?;
			Ok(v)
		}
	}
}

fn field_encoding(field: &FieldDef) -> Result<codec::EncodingKind> {
	collection::scalar_encoding(&field.kind)
		.ok_or_else(|| Error::Codec(format!("field {} is not a scalar field", field.storage_id)))
}

fn encode_scalar(field: &FieldDef, value: Option<&Value>) -> Result<Vec<u8>> {
	match &field.kind {
		FieldKind::Simple { nullable: false, .. } => {
			codec::encode(value.ok_or_else(|| {
				Error::Codec(format!("field {} is non-nullable and has no value", field.storage_id))
			})?)
		}
		_ => codec::encode_nullable(value),
	}
}

/// Validates a reference field's target-type restriction and (if the
/// policy forbids it) dangling-ness.
fn validate_reference(view: &dyn Snapshot, field: &FieldDef, target: &ObjId) -> Result<()> {
	let FieldKind::Reference { policy, .. } = &field.kind else { return Ok(()) };
	if !policy.allowed_types.is_empty() {
		let target_ty = target.type_id()?;
		if !policy.allowed_types.contains(&target_ty) {
			return Err(Error::InvalidReference { target: *target });
		}
	}
	if !policy.allow_dangling {
		let exists = view.get(&layout::object_key(*target))?.is_some();
		if !exists {
			return Err(Error::DanglingReference(*target));
		}
	}
	Ok(())
}

/// Sets a simple or reference field to `new` (`None` clears it to null),
/// maintaining its own index entry and every composite index it
/// participates in. This is the single choke point every scalar field
/// mutation in this crate passes through.
#[instrument(skip(view, writes, ty), fields(field = field.storage_id))]
pub fn write_simple_field(
	view: &dyn Snapshot,
	writes: &mut Writes,
	ty: &ObjectType,
	id: ObjId,
	field: &FieldDef,
	new: Option<&Value>,
) -> Result<()> {
	if let (FieldKind::Reference { .. }, Some(Value::Ref(target))) = (&field.kind, new) {
		validate_reference(view, field, target)?;
	}

	let old = read_simple_field(view, id, field)?;
	let key = layout::field_key(id, field.storage_id);
	writes.put(key, encode_scalar(field, new)?);

	if field.kind.is_indexed() && old != new.cloned() {
		if let Some(old_v) = &old {
			writes.remove_key(layout::simple_index_key(field.storage_id, &codec::encode(old_v)?, id));
		}
		if let Some(new_v) = new {
			writes.put(layout::simple_index_key(field.storage_id, &codec::encode(new_v)?, id), Vec::new());
		}
	}

	reindex_composite_indexes(view, writes, ty, id, field.storage_id, &old, &new.cloned())?;
	Ok(())
}

/// Adjusts a counter field by `delta`. Counters are never indexed
/// (spec §4.4: "record a merge operation rather than a put").
pub fn adjust_counter(writes: &mut Writes, id: ObjId, field: &FieldDef, delta: i64) {
	writes.adjust(layout::field_key(id, field.storage_id), delta);
}

/// Recomputes, for every composite index referencing `changed_field`,
/// whether its tuple changed and applies the add/remove delta.
fn reindex_composite_indexes(
	view: &dyn Snapshot,
	writes: &mut Writes,
	ty: &ObjectType,
	id: ObjId,
	changed_field: StorageId,
	old_value: &Option<Value>,
	new_value: &Option<Value>,
) -> Result<()> {
	for ix in ty.composite_indexes.values() {
		if !ix.fields.contains(&changed_field) {
			continue;
		}
		let mut overrides = BTreeMap::new();
		overrides.insert(changed_field, old_value.clone());
		let old_tuple = composite_tuple(view, ty, ix, id, &overrides)?;
		overrides.insert(changed_field, new_value.clone());
		let new_tuple = composite_tuple(view, ty, ix, id, &overrides)?;
		if old_tuple != new_tuple {
			if let Some(t) = old_tuple {
				writes.remove_key(layout::composite_index_key(ix.storage_id, &codec::encode_tuple(&t)?, id));
			}
			if let Some(t) = new_tuple {
				writes.put(
					layout::composite_index_key(ix.storage_id, &codec::encode_tuple(&t)?, id),
					Vec::new(),
				);
			}
		}
	}
	Ok(())
}

/// The tuple a composite index currently maps to for `id`, with
/// `overrides` taking precedence over stored values (used to compute the
/// pre- and post-image around one field's mutation). `None` whenever any
/// component field is currently null — a composite index entry only
/// exists when every component is present.
pub(crate) fn composite_tuple(
	view: &dyn Snapshot,
	ty: &ObjectType,
	ix: &CompositeIndexDef,
	id: ObjId,
	overrides: &BTreeMap<StorageId, Option<Value>>,
) -> Result<Option<Vec<Value>>> {
	let mut values = Vec::with_capacity(ix.fields.len());
	for fd in &ix.fields {
		let value = match overrides.get(fd) {
			Some(v) => v.clone(),
			None => read_simple_field(view, id, ty.field(*fd)?)?,
		};
		match value {
			Some(v) => values.push(v),
			None => return Ok(None),
		}
	}
	Ok(Some(values))
}

/// Allocates a fresh [`ObjId`] for `type_id`, drawing and retrying on
/// collision (spec §4.4), and writes its header and version-index entry.
#[instrument(skip(view, writes))]
pub fn create_object(
	view: &dyn Snapshot,
	writes: &mut Writes,
	type_id: StorageId,
	schema_version: SchemaVersion,
) -> Result<ObjId> {
	let retries = *crate::cnf::OBJID_ALLOC_RETRIES;
	for _ in 0..retries {
		let id = ObjId::random(type_id)?;
		if view.get(&layout::object_key(id))?.is_none() {
			writes.put(layout::object_key(id), ObjectHeader { schema_version }.encode());
			writes.put(layout::version_index_key(schema_version, id), Vec::new());
			return Ok(id);
		}
	}
	Err(Error::CorruptDatabase(format!(
		"exhausted {retries} object id allocation attempts for type {type_id}"
	)))
}

/// Deletes an object: every field sub-key, every index entry it
/// maintained, its version-index entry, and its primary key. Does not
/// enforce reference policies on objects that referred to it — that
/// cascade is [`crate::tx::Transaction`]'s responsibility (spec §4.5).
#[instrument(skip(view, writes, ty))]
pub fn delete_object(
	view: &dyn Snapshot,
	writes: &mut Writes,
	ty: &ObjectType,
	id: ObjId,
	header: ObjectHeader,
) -> Result<()> {
	for field in ty.fields.values() {
		match &field.kind {
			FieldKind::Simple { .. } | FieldKind::Reference { .. } => {
				if field.kind.is_indexed() {
					if let Some(old) = read_simple_field(view, id, field)? {
						writes.remove_key(layout::simple_index_key(
							field.storage_id,
							&codec::encode(&old)?,
							id,
						));
					}
				}
			}
			FieldKind::Counter => {}
			FieldKind::Collection { .. } => {
				collection::remove_all_elements(view, writes, field, id)?;
			}
		}
	}
	for ix in ty.composite_indexes.values() {
		if let Some(tuple) = composite_tuple(view, ty, ix, id, &BTreeMap::new())? {
			writes.remove_key(layout::composite_index_key(ix.storage_id, &codec::encode_tuple(&tuple)?, id));
		}
	}
	writes.remove_key(layout::version_index_key(header.schema_version, id));
	let (min, max) = layout::object_fields_range(id);
	writes.remove_range(min, max);
	Ok(())
}
