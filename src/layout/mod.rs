//! Key layout: assigns key prefixes for meta-data, object data, and
//! indexes. A pure function of storage-id integers — this module knows
//! nothing about what a storage id *means* (object type, field, or
//! composite index); that interpretation belongs to [`crate::registry`]
//! and [`crate::translator`].
//!
//! Grounded on the teacher's per-prefix key layout
//! (`key::thing::Thing`, `key::index::{Prefix, PrefixIds, Bc}`), which
//! the teacher builds as a closed family of typed structs via its own
//! `#[derive(Key)]` macro (`surrealdb-derive`). This module reproduces
//! the same one-constructor-per-key-kind shape and the same
//! `prefix`/`suffix`-style range helpers (see `prefix_range` below, the
//! analogue of `Thing::prefix`/`Index::prefix_beg`/`prefix_end`), but as
//! plain free functions rather than typed structs behind a derive macro:
//! no key kind here carries any behavior beyond building or parsing a
//! `Vec<u8>`, so a wrapper struct would buy encapsulation no caller
//! needs — every caller already knows which key kind it wants by which
//! function it calls. Storage id 0 is reserved for the three meta key
//! kinds; every object type, field, and composite index storage id is
//! drawn from the same id space and is never 0 (see [`crate::registry`]).

use crate::codec::varint;
use crate::err::{Error, Result};
use crate::objid::ObjId;
use crate::schema::{SchemaVersion, StorageId};

/// Reserved for the three meta key kinds: never assigned to an object
/// type, field, or composite index.
pub const META_STORAGE_ID: StorageId = 0;

/// The one format-version value this crate knows how to read. Bumped
/// only on an incompatible on-disk layout change.
pub const FORMAT_VERSION: u8 = 1;

const SCHEMA_TAG: u8 = 0x01;
const VERSION_INDEX_TAG: u8 = 0x02;

/// Appends a sentinel `0xff` byte after `prefix`, forming a tight
/// exclusive upper bound for a `getRange(prefix, end)` scan — the same
/// trick as the teacher's `Thing::suffix`/`Ix::suffix`.
fn prefix_range(prefix: &[u8]) -> (Vec<u8>, Vec<u8>) {
	let mut end = prefix.to_vec();
	end.push(0xff);
	(prefix.to_vec(), end)
}

/// Decodes the leading storage-id varint of any non-meta key. Used by
/// the registry and jsck to classify a raw key as naming an object type,
/// a field, or a composite index, without yet knowing which.
pub fn leading_storage_id(key: &[u8]) -> Result<StorageId> {
	let (v, _) = varint::decode(key)?;
	StorageId::try_from(v).map_err(|_| Error::Codec(format!("key names out-of-range storage id {v}")))
}

/// `format-version` key: a single literal byte, `varint(0)`. Distinct
/// from every other meta key because it alone has length 1 — every
/// `schema(v)`/`object-version-index` key is `varint(0)` plus a tag byte
/// plus more.
pub fn format_version_key() -> Vec<u8> {
	vec![0x00]
}

/// `schema(v)` key: `varint(0) ‖ 0x01 ‖ varint(v)`.
pub fn schema_key(version: SchemaVersion) -> Vec<u8> {
	let mut out = vec![0x00, SCHEMA_TAG];
	varint::encode_into(version as u64, &mut out);
	out
}

/// Range covering every `schema(v)` key, for the registry's startup scan.
pub fn schema_key_range() -> (Vec<u8>, Vec<u8>) {
	prefix_range(&[0x00, SCHEMA_TAG])
}

/// Recovers `v` from a key built by [`schema_key`].
pub fn parse_schema_key(key: &[u8]) -> Result<SchemaVersion> {
	let rest = key
		.strip_prefix([0x00, SCHEMA_TAG].as_slice())
		.ok_or_else(|| Error::CorruptDatabase("not a schema(v) key".into()))?;
	let (v, _) = varint::decode(rest)?;
	SchemaVersion::try_from(v).map_err(|_| Error::CorruptDatabase("schema version out of range".into()))
}

/// `object-version-index(v, id)` key: `varint(0) ‖ 0x02 ‖ varint(v) ‖ id`.
pub fn version_index_key(version: SchemaVersion, id: ObjId) -> Vec<u8> {
	let mut out = vec![0x00, VERSION_INDEX_TAG];
	varint::encode_into(version as u64, &mut out);
	out.extend_from_slice(id.as_bytes());
	out
}

/// Range covering every `object-version-index` key, for jsck's full
/// rebuild pass.
pub fn version_index_range() -> (Vec<u8>, Vec<u8>) {
	prefix_range(&[0x00, VERSION_INDEX_TAG])
}

/// Range covering `object-version-index(v, *)`, for rebuilding one
/// version's worth of index entries.
pub fn version_index_prefix_range(version: SchemaVersion) -> (Vec<u8>, Vec<u8>) {
	let mut prefix = vec![0x00, VERSION_INDEX_TAG];
	varint::encode_into(version as u64, &mut prefix);
	prefix_range(&prefix)
}

/// Recovers `(v, id)` from a key built by [`version_index_key`].
pub fn parse_version_index_key(key: &[u8]) -> Result<(SchemaVersion, ObjId)> {
	let rest = key
		.strip_prefix([0x00, VERSION_INDEX_TAG].as_slice())
		.ok_or_else(|| Error::CorruptDatabase("not an object-version-index key".into()))?;
	let (v, n) = varint::decode(rest)?;
	let version = SchemaVersion::try_from(v)
		.map_err(|_| Error::CorruptDatabase("schema version out of range".into()))?;
	let id_bytes: [u8; ObjId::LEN] = rest
		.get(n..n + ObjId::LEN)
		.and_then(|s| s.try_into().ok())
		.ok_or_else(|| Error::CorruptDatabase("object-version-index key truncated".into()))?;
	Ok((version, ObjId::from_bytes(id_bytes)))
}

/// Object primary data key: exactly the object id's own 8 bytes, which
/// are already `varint(type-storage-id) ‖ id-tail` by construction (see
/// [`crate::objid::ObjId::compose`]) — so the primary key needs no
/// further prefixing.
pub fn object_key(id: ObjId) -> Vec<u8> {
	id.as_bytes().to_vec()
}

/// Range covering every object of `type_id`, for a full-table scan.
pub fn object_type_range(type_id: StorageId) -> (Vec<u8>, Vec<u8>) {
	let mut prefix = Vec::new();
	varint::encode_into(type_id as u64, &mut prefix);
	prefix_range(&prefix)
}

/// Field sub-key: `object-key ‖ varint(field-storage-id)`. For a scalar
/// (simple/counter/reference) field this is the complete key; a
/// collection field appends an element selector on top (see
/// [`field_key_list_element`], [`field_key_set_or_map_element`]).
pub fn field_key(id: ObjId, field_storage_id: StorageId) -> Vec<u8> {
	let mut out = object_key(id);
	varint::encode_into(field_storage_id as u64, &mut out);
	out
}

/// Range covering every field sub-key of one object — used to delete an
/// object's entire field set by prefix scan.
pub fn object_fields_range(id: ObjId) -> (Vec<u8>, Vec<u8>) {
	prefix_range(&object_key(id))
}

/// Range covering every sub-key of one collection field on one object.
pub fn field_elements_range(id: ObjId, field_storage_id: StorageId) -> (Vec<u8>, Vec<u8>) {
	prefix_range(&field_key(id, field_storage_id))
}

/// List element sub-key: field sub-key plus a fixed-width big-endian
/// `u64` position, so lexical key order equals list order (the resolved
/// Open Question on list-position encoding; see `SPEC_FULL.md` §3).
pub fn field_key_list_element(id: ObjId, field_storage_id: StorageId, position: u64) -> Vec<u8> {
	let mut out = field_key(id, field_storage_id);
	out.extend_from_slice(&position.to_be_bytes());
	out
}

/// Recovers a list element's position from a key built by
/// [`field_key_list_element`].
pub fn parse_list_position(key: &[u8]) -> Result<u64> {
	let tail: [u8; 8] = key
		.get(key.len().saturating_sub(8)..)
		.and_then(|s| s.try_into().ok())
		.ok_or_else(|| Error::CorruptDatabase("list element key truncated".into()))?;
	Ok(u64::from_be_bytes(tail))
}

/// Set/map element sub-key: field sub-key plus the element's (or map
/// key's) own order-preserving encoding, so set members and map keys
/// sort within their field in their natural order.
pub fn field_key_set_or_map_element(
	id: ObjId,
	field_storage_id: StorageId,
	encoded_element: &[u8],
) -> Vec<u8> {
	let mut out = field_key(id, field_storage_id);
	out.extend_from_slice(encoded_element);
	out
}

/// Simple-field index key: `varint(index-storage-id) ‖ encoded-value ‖
/// id`. Appending the id last makes equal-value ranges iterate in
/// id-order (spec.md §4.2 rationale).
pub fn simple_index_key(index_storage_id: StorageId, encoded_value: &[u8], id: ObjId) -> Vec<u8> {
	let mut out = Vec::new();
	varint::encode_into(index_storage_id as u64, &mut out);
	out.extend_from_slice(encoded_value);
	out.extend_from_slice(id.as_bytes());
	out
}

/// Simple-field index key for a collection element: the same key plus
/// the element's own position/key selector, so repeated occurrences of
/// one value across an object's collection each get a distinct entry.
pub fn simple_index_key_with_selector(
	index_storage_id: StorageId,
	encoded_value: &[u8],
	id: ObjId,
	selector: &[u8],
) -> Vec<u8> {
	let mut out = simple_index_key(index_storage_id, encoded_value, id);
	out.extend_from_slice(selector);
	out
}

/// Range covering every entry for one field's index, for jsck's
/// derived-key rebuild.
pub fn simple_index_range(index_storage_id: StorageId) -> (Vec<u8>, Vec<u8>) {
	let mut prefix = Vec::new();
	varint::encode_into(index_storage_id as u64, &mut prefix);
	prefix_range(&prefix)
}

/// Range covering every indexed object carrying one exact value —
/// realizes "objects having value X" lookups.
pub fn simple_index_value_range(index_storage_id: StorageId, encoded_value: &[u8]) -> (Vec<u8>, Vec<u8>) {
	let mut prefix = Vec::new();
	varint::encode_into(index_storage_id as u64, &mut prefix);
	prefix.extend_from_slice(encoded_value);
	prefix_range(&prefix)
}

/// Composite-field index key: `varint(index-storage-id) ‖
/// encoded-value-1 ‖ … ‖ encoded-value-n ‖ id`.
pub fn composite_index_key(index_storage_id: StorageId, encoded_tuple: &[u8], id: ObjId) -> Vec<u8> {
	simple_index_key(index_storage_id, encoded_tuple, id)
}

/// Range covering every entry for one composite index.
pub fn composite_index_range(index_storage_id: StorageId) -> (Vec<u8>, Vec<u8>) {
	simple_index_range(index_storage_id)
}
