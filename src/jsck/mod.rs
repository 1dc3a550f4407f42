//! Full-database consistency checker and repairer (spec §4.6).
//!
//! jsck has no direct teacher analogue — surrealdb has no standalone
//! fsck-style pass over its storage layer. It is grounded instead on the
//! teacher's range-scan idioms in `kvs/tx.rs` (paging a scan result
//! through a bound range) for how this module walks the keyspace, and on
//! `key::category::Category`/`KeyCategory` for the idea of classifying a
//! raw key by which structure it belongs to before deciding what, if
//! anything, is wrong with it.
//!
//! The check runs in two passes against one [`crate::kv::Snapshot`]:
//! primary data first (meta, then every known object type), which
//! derives the *expected* shape of every index and the object-version
//! index; then a second pass compares that expectation against what is
//! actually stored. Every divergence becomes an [`Issue`]; nothing is
//! ever written to `engine` while detecting — [`check`] only reads.
//! [`repair`] and [`report_only`] are thin callers that apply or mark
//! every issue [`check`] found.
//!
//! [`check`] reads exclusively through a [`crate::kv::Snapshot`] taken
//! once up front, so every scan in this module is a genuinely lazy,
//! droppable cursor (see `DESIGN.md`'s `kv` entry) rather than a
//! materialized `Vec` — [`crate::cnf::JSCK_SCAN_BATCH_SIZE`] bounds how
//! many rows [`for_each_row`] holds resident at once while folding a scan
//! into its accumulators, independent of how large the underlying range
//! is.

mod issue;

pub use issue::{Issue, IssueState};

use std::collections::{BTreeMap, BTreeSet};

use tracing::{info, instrument};

use crate::codec;
use crate::err::Result;
use crate::kv::Key;
use crate::kv::Value as KvValue;
use crate::kv::{Engine, Snapshot};
use crate::layout;
use crate::objid::ObjId;
use crate::registry::Registry;
use crate::schema::field::{FieldDef, FieldKind};
use crate::schema::objtype::ObjectType;
use crate::schema::StorageId;
use crate::translator::{self, collection};

/// Drains a lazy range-scan iterator through `f` in
/// [`crate::cnf::JSCK_SCAN_BATCH_SIZE`]-sized chunks, so this module never
/// holds more than one batch of a scan resident at a time regardless of
/// how large the underlying range is.
fn for_each_row(rows: impl Iterator<Item = Result<(Key, KvValue)>>, mut f: impl FnMut(Key, KvValue)) -> Result<()> {
	let batch_size = (*crate::cnf::JSCK_SCAN_BATCH_SIZE).max(1);
	let mut buf = Vec::with_capacity(batch_size);
	for row in rows {
		buf.push(row?);
		if buf.len() == batch_size {
			for (k, v) in buf.drain(..) {
				f(k, v);
			}
		}
	}
	for (k, v) in buf.drain(..) {
		f(k, v);
	}
	Ok(())
}

/// Detects every divergence between primary data and its derived
/// structures, without repairing any of them. Deterministic and
/// side-effect-free: calling this twice in a row on an unchanged
/// database yields the same issues.
#[instrument(skip(engine))]
pub fn check(engine: &dyn Engine) -> Result<Vec<Issue>> {
	let view = engine.snapshot();
	let mut issues = Vec::new();

	check_format_version(view.as_ref(), &mut issues)?;
	let registry = build_registry(view.as_ref())?;
	let (known_type_ids, known_index_ids) = known_storage_ids(&registry);

	let mut expected_version_index: BTreeSet<Vec<u8>> = BTreeSet::new();
	let mut expected_index_entries: BTreeMap<StorageId, BTreeSet<Vec<u8>>> = BTreeMap::new();

	for &type_id in &known_type_ids {
		scan_type(
			view.as_ref(),
			&registry,
			type_id,
			&mut expected_version_index,
			&mut expected_index_entries,
			&mut issues,
		)?;
	}

	diff_version_index(view.as_ref(), &expected_version_index, &mut issues)?;
	for &index_id in &known_index_ids {
		diff_index(view.as_ref(), index_id, expected_index_entries.get(&index_id), &mut issues)?;
	}
	find_stray_keys(view.as_ref(), &known_type_ids, &known_index_ids, &mut issues)?;

	info!(count = issues.len(), "jsck detected issues");
	Ok(issues)
}

/// Runs [`check`], then applies every issue's correction. Running
/// `repair` again immediately afterward finds nothing (spec §8).
#[instrument(skip(engine))]
pub fn repair(engine: &dyn Engine) -> Result<Vec<Issue>> {
	let mut issues = check(engine)?;
	for issue in &mut issues {
		issue.apply(engine)?;
	}
	Ok(issues)
}

/// Runs [`check`] and marks every issue reported, leaving `engine`
/// untouched.
pub fn report_only(engine: &dyn Engine) -> Result<Vec<Issue>> {
	let mut issues = check(engine)?;
	for issue in &mut issues {
		issue.mark_reported();
	}
	Ok(issues)
}

fn check_format_version(view: &dyn Snapshot, issues: &mut Vec<Issue>) -> Result<()> {
	let key = layout::format_version_key();
	let expected = vec![layout::FORMAT_VERSION];
	if view.get(&key)? != Some(expected.clone()) {
		issues.push(Issue::add("format-version key missing or mismatched", key, expected));
	}
	Ok(())
}

fn build_registry(view: &dyn Snapshot) -> Result<Registry> {
	let (min, max) = layout::schema_key_range();
	let mut entries = Vec::new();
	for row in view.get_range(&min, &max, false)? {
		let (key, value) = row?;
		entries.push((layout::parse_schema_key(&key)?, value));
	}
	Registry::from_entries(entries)
}

/// Every object-type storage id and every indexed field/composite-index
/// storage id named by any registered schema version, for classifying
/// raw keys by what they should belong to.
fn known_storage_ids(registry: &Registry) -> (BTreeSet<StorageId>, BTreeSet<StorageId>) {
	let mut types = BTreeSet::new();
	let mut indexes = BTreeSet::new();
	for (_, schema) in registry.all_versions() {
		for ty in schema.object_types() {
			types.insert(ty.storage_id);
			for field in ty.fields.values() {
				if field.kind.is_indexed() {
					indexes.insert(field.storage_id);
				}
			}
			for ix in ty.composite_indexes.values() {
				indexes.insert(ix.storage_id);
			}
		}
	}
	(types, indexes)
}

/// Scans every object of `type_id`, decoding each header against the
/// schema version it names and folding in the index/version-index
/// entries it should contribute. Objects whose header or type is
/// undecipherable are reported as [`Issue::unfixable`] and otherwise
/// skipped — jsck never guesses at a replacement for lost primary data.
fn scan_type(
	view: &dyn Snapshot,
	registry: &Registry,
	type_id: StorageId,
	expected_version_index: &mut BTreeSet<Vec<u8>>,
	expected_index_entries: &mut BTreeMap<StorageId, BTreeSet<Vec<u8>>>,
	issues: &mut Vec<Issue>,
) -> Result<()> {
	let (min, max) = layout::object_type_range(type_id);

	let mut headers: Vec<(ObjId, Vec<u8>)> = Vec::new();
	for_each_row(view.get_range(&min, &max, false)?, |key, raw| {
		if key.len() == ObjId::LEN {
			let bytes: [u8; ObjId::LEN] = key.as_slice().try_into().unwrap();
			headers.push((ObjId::from_bytes(bytes), raw));
		}
	})?;

	for (id, raw) in headers {
		let header = match translator::ObjectHeader::decode(&raw) {
			Ok(h) => h,
			Err(_) => {
				issues.push(Issue::unfixable(format!("object {id} has an undecodable header")));
				continue;
			}
		};
		let schema = match registry.get(header.schema_version) {
			Ok(s) => s,
			Err(_) => {
				issues.push(Issue::unfixable(format!(
					"object {id} claims unknown schema version {}",
					header.schema_version
				)));
				continue;
			}
		};
		let ty = match schema.object_type(type_id) {
			Ok(t) => t,
			Err(_) => {
				issues.push(Issue::unfixable(format!(
					"object {id} has no type definition for storage id {type_id} in schema version {}",
					header.schema_version
				)));
				continue;
			}
		};

		expected_version_index.insert(layout::version_index_key(header.schema_version, id));
		scan_fields(view, ty, id, expected_index_entries, issues)?;
		scan_composite_indexes(view, ty, id, expected_index_entries)?;
	}
	Ok(())
}

fn scan_fields(
	view: &dyn Snapshot,
	ty: &ObjectType,
	id: ObjId,
	expected_index_entries: &mut BTreeMap<StorageId, BTreeSet<Vec<u8>>>,
	issues: &mut Vec<Issue>,
) -> Result<()> {
	for field in ty.fields.values() {
		match &field.kind {
			FieldKind::Simple { .. } | FieldKind::Reference { .. } => {
				scan_scalar_field(view, field, id, expected_index_entries, issues)?;
			}
			FieldKind::Counter => {}
			FieldKind::Collection { .. } => {
				if field.kind.is_indexed() {
					for (_, selector, encoded_value) in collection::element_entries(view, field, id)? {
						let key = layout::simple_index_key_with_selector(field.storage_id, &encoded_value, id, &selector);
						expected_index_entries.entry(field.storage_id).or_default().insert(key);
					}
				}
			}
		}
	}
	Ok(())
}

fn scan_scalar_field(
	view: &dyn Snapshot,
	field: &FieldDef,
	id: ObjId,
	expected_index_entries: &mut BTreeMap<StorageId, BTreeSet<Vec<u8>>>,
	issues: &mut Vec<Issue>,
) -> Result<()> {
	let value = translator::read_simple_field(view, id, field)?;

	if let FieldKind::Reference { policy, .. } = &field.kind {
		if let Some(codec::Value::Ref(target)) = &value {
			if !policy.allow_dangling && view.get(&layout::object_key(*target))?.is_none() {
				issues.push(Issue::add(
					format!("object {id} field {} references nonexistent {target}; clearing", field.storage_id),
					layout::field_key(id, field.storage_id),
					codec::encode_nullable(None)?,
				));
			}
		}
	}

	if field.kind.is_indexed() {
		if let Some(v) = &value {
			let key = layout::simple_index_key(field.storage_id, &codec::encode(v)?, id);
			expected_index_entries.entry(field.storage_id).or_default().insert(key);
		}
	}
	Ok(())
}

fn scan_composite_indexes(
	view: &dyn Snapshot,
	ty: &ObjectType,
	id: ObjId,
	expected_index_entries: &mut BTreeMap<StorageId, BTreeSet<Vec<u8>>>,
) -> Result<()> {
	for ix in ty.composite_indexes.values() {
		if let Some(tuple) = translator::composite_tuple(view, ty, ix, id, &BTreeMap::new())? {
			let key = layout::composite_index_key(ix.storage_id, &codec::encode_tuple(&tuple)?, id);
			expected_index_entries.entry(ix.storage_id).or_default().insert(key);
		}
	}
	Ok(())
}

fn diff_version_index(view: &dyn Snapshot, expected: &BTreeSet<Vec<u8>>, issues: &mut Vec<Issue>) -> Result<()> {
	let (min, max) = layout::version_index_range();
	let actual: BTreeSet<Vec<u8>> =
		view.get_range(&min, &max, false)?.map(|r| r.map(|(k, _)| k)).collect::<Result<BTreeSet<_>>>()?;
	for key in expected.difference(&actual) {
		issues.push(Issue::add("missing object-version-index entry", key.clone(), Vec::new()));
	}
	for key in actual.difference(expected) {
		issues.push(Issue::remove("stray object-version-index entry", key.clone()));
	}
	Ok(())
}

fn diff_index(
	view: &dyn Snapshot,
	index_id: StorageId,
	expected: Option<&BTreeSet<Vec<u8>>>,
	issues: &mut Vec<Issue>,
) -> Result<()> {
	let (min, max) = layout::simple_index_range(index_id);
	let actual: BTreeSet<Vec<u8>> =
		view.get_range(&min, &max, false)?.map(|r| r.map(|(k, _)| k)).collect::<Result<BTreeSet<_>>>()?;
	let empty = BTreeSet::new();
	let expected = expected.unwrap_or(&empty);
	for key in expected.difference(&actual) {
		issues.push(Issue::add(format!("missing entry in index {index_id}"), key.clone(), Vec::new()));
	}
	for key in actual.difference(expected) {
		issues.push(Issue::remove(format!("stray entry in index {index_id}"), key.clone()));
	}
	Ok(())
}

/// Upper bound used when scanning the whole non-meta keyspace to find
/// keys under a storage id no registered schema version names. Long
/// enough to exceed any key this crate ever produces; a production
/// `Engine` with a true unbounded range query would not need this.
const STRAY_SCAN_MAX: [u8; 64] = [0xff; 64];

fn find_stray_keys(
	view: &dyn Snapshot,
	known_type_ids: &BTreeSet<StorageId>,
	known_index_ids: &BTreeSet<StorageId>,
	issues: &mut Vec<Issue>,
) -> Result<()> {
	let min = vec![0x01];
	for_each_row(view.get_range(&min, &STRAY_SCAN_MAX, false)?, |key, _| {
		let leading = match layout::leading_storage_id(&key) {
			Ok(id) => id,
			Err(_) => {
				issues.push(Issue::remove("key has an undecodable leading storage id", key.clone()));
				return;
			}
		};
		if known_type_ids.contains(&leading) || known_index_ids.contains(&leading) {
			return;
		}
		issues.push(Issue::remove(format!("stray key under unknown storage id {leading}"), key.clone()));
	})?;
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::kv::MemEngine;
	use crate::objid::ObjId;
	use crate::schema::builder::{ObjectTypeBuilder, SchemaBuilder};
	use crate::schema::field::{CollectionKind, InverseDelete, ReferencePolicy};

	const WIDGET: StorageId = 1;
	const NAME_FIELD: StorageId = 10;
	const TAGS_FIELD: StorageId = 11;

	fn schema() -> std::sync::Arc<crate::schema::Schema> {
		let ty = ObjectTypeBuilder::new(WIDGET, "Widget")
			.field(FieldDef {
				storage_id: NAME_FIELD,
				name: "name".into(),
				kind: FieldKind::Simple { encoding: codec::EncodingKind::Str, nullable: false, indexed: true },
			})
			.unwrap()
			.field(FieldDef {
				storage_id: TAGS_FIELD,
				name: "tags".into(),
				kind: FieldKind::Collection {
					kind: CollectionKind::Set,
					element: Box::new(FieldKind::Simple { encoding: codec::EncodingKind::Str, nullable: false, indexed: false }),
					map_value: None,
					indexed: true,
				},
			})
			.unwrap();
		SchemaBuilder::new().object_type(ty).unwrap().lock_down()
	}

	fn seed_engine() -> (MemEngine, ObjId) {
		let engine = MemEngine::new();
		engine.put(layout::format_version_key(), vec![layout::FORMAT_VERSION]).unwrap();
		let schema = schema();
		let xml = crate::schema::xml::render(&schema).unwrap();
		engine.put(layout::schema_key(1), xml.into_bytes()).unwrap();

		let registry = std::sync::Arc::new(Registry::empty());
		let (version, schema) = registry.resolve(schema, true).unwrap();
		let view = engine.snapshot();
		let mut writes = crate::kv::Writes::new();
		let id = translator::create_object(view.as_ref(), &mut writes, WIDGET, version).unwrap();
		let ty = schema.object_type(WIDGET).unwrap();
		translator::write_simple_field(
			view.as_ref(),
			&mut writes,
			ty,
			id,
			ty.field(NAME_FIELD).unwrap(),
			Some(&codec::Value::Str("lamp".into())),
		)
		.unwrap();
		engine.mutate(writes, false).unwrap();
		(engine, id)
	}

	#[test]
	fn clean_database_has_no_issues() {
		let (engine, _) = seed_engine();
		let issues = check(&engine).unwrap();
		assert!(issues.is_empty(), "unexpected issues: {issues:?}");
	}

	#[test]
	fn missing_format_version_is_detected_and_repaired() {
		let (engine, _) = seed_engine();
		engine.remove(&layout::format_version_key()).unwrap();

		let issues = check(&engine).unwrap();
		assert_eq!(issues.len(), 1);

		repair(&engine).unwrap();
		assert_eq!(engine.get(&layout::format_version_key()).unwrap(), Some(vec![layout::FORMAT_VERSION]));
		assert!(check(&engine).unwrap().is_empty());
	}

	#[test]
	fn stray_keys_are_each_reported_and_deleted() {
		let (engine, _) = seed_engine();
		let before: Vec<(Vec<u8>, Vec<u8>)> = engine.get_range(&[0x00], &STRAY_SCAN_MAX, false).unwrap().collect::<Result<Vec<_>>>().unwrap();

		for i in 0u32..40 {
			let mut key = Vec::new();
			codec::varint::encode_into(9_000 + i as u64, &mut key);
			key.extend_from_slice(b"stray");
			engine.put(key, Vec::new()).unwrap();
		}

		let issues = report_only(&engine).unwrap();
		assert_eq!(issues.len(), 40);
		for issue in &issues {
			assert_eq!(issue.state(), IssueState::Reported);
		}
		// report-only must not have touched storage.
		let unchanged: Vec<(Vec<u8>, Vec<u8>)> = engine.get_range(&[0x00], &STRAY_SCAN_MAX, false).unwrap().collect::<Result<Vec<_>>>().unwrap();
		assert_eq!(unchanged.len(), before.len() + 40);

		let repaired = repair(&engine).unwrap();
		assert_eq!(repaired.len(), 40);
		let after: Vec<(Vec<u8>, Vec<u8>)> = engine.get_range(&[0x00], &STRAY_SCAN_MAX, false).unwrap().collect::<Result<Vec<_>>>().unwrap();
		assert_eq!(after, before);
	}

	#[test]
	fn corrupted_simple_index_is_rebuilt_byte_identical() {
		let (engine, _) = seed_engine();
		let original: Vec<(Vec<u8>, Vec<u8>)> = engine.get_range(&[0x00], &STRAY_SCAN_MAX, false).unwrap().collect::<Result<Vec<_>>>().unwrap();

		let (min, max) = layout::simple_index_range(NAME_FIELD);
		engine.remove_range(&min, &max).unwrap();

		let issues = check(&engine).unwrap();
		assert!(!issues.is_empty());

		// A clone observing the corrupted state in report-only mode leaves it untouched.
		let clone_a = MemEngine::new();
		for row in engine.get_range(&[0x00], &STRAY_SCAN_MAX, false).unwrap() {
			let (k, v) = row.unwrap();
			clone_a.put(k, v).unwrap();
		}
		let reported = report_only(&clone_a).unwrap();
		assert_eq!(reported.len(), issues.len());
		let clone_a_after: Vec<(Vec<u8>, Vec<u8>)> = clone_a.get_range(&[0x00], &STRAY_SCAN_MAX, false).unwrap().collect::<Result<Vec<_>>>().unwrap();
		let corrupted: Vec<(Vec<u8>, Vec<u8>)> = engine.get_range(&[0x00], &STRAY_SCAN_MAX, false).unwrap().collect::<Result<Vec<_>>>().unwrap();
		assert_eq!(clone_a_after, corrupted);

		repair(&engine).unwrap();
		let restored: Vec<(Vec<u8>, Vec<u8>)> = engine.get_range(&[0x00], &STRAY_SCAN_MAX, false).unwrap().collect::<Result<Vec<_>>>().unwrap();
		assert_eq!(restored, original);
		assert!(check(&engine).unwrap().is_empty());
	}

	#[test]
	fn dangling_reference_is_cleared() {
		const GADGET: StorageId = 2;
		const OWNER_FIELD: StorageId = 20;

		let widget_ty = ObjectTypeBuilder::new(WIDGET, "Widget");
		let gadget_ty = ObjectTypeBuilder::new(GADGET, "Gadget")
			.field(FieldDef {
				storage_id: OWNER_FIELD,
				name: "owner".into(),
				kind: FieldKind::Reference {
					policy: ReferencePolicy {
						allowed_types: vec![WIDGET],
						forward_delete: false,
						inverse_delete: InverseDelete::Exception,
						allow_dangling: false,
					},
					indexed: false,
				},
			})
			.unwrap();
		let schema = SchemaBuilder::new().object_type(widget_ty).unwrap().object_type(gadget_ty).unwrap().lock_down();

		let engine = MemEngine::new();
		engine.put(layout::format_version_key(), vec![layout::FORMAT_VERSION]).unwrap();
		let xml = crate::schema::xml::render(&schema).unwrap();
		engine.put(layout::schema_key(1), xml.into_bytes()).unwrap();

		let view = engine.snapshot();
		let mut writes = crate::kv::Writes::new();
		let widget_id = translator::create_object(view.as_ref(), &mut writes, WIDGET, 1).unwrap();
		let gadget_id = translator::create_object(view.as_ref(), &mut writes, GADGET, 1).unwrap();
		translator::write_simple_field(
			view.as_ref(),
			&mut writes,
			schema.object_type(GADGET).unwrap(),
			gadget_id,
			schema.object_type(GADGET).unwrap().field(OWNER_FIELD).unwrap(),
			Some(&codec::Value::Ref(widget_id)),
		)
		.unwrap();
		engine.mutate(writes, false).unwrap();

		// Simulate external corruption: the widget vanishes without its
		// referrer's field being cleared or its version-index entry removed.
		engine.remove(&layout::object_key(widget_id)).unwrap();

		let issues = check(&engine).unwrap();
		assert_eq!(issues.len(), 2, "{issues:?}");

		repair(&engine).unwrap();
		let snap = engine.snapshot();
		let owner = translator::read_simple_field(
			snap.as_ref(),
			gadget_id,
			schema.object_type(GADGET).unwrap().field(OWNER_FIELD).unwrap(),
		)
		.unwrap();
		assert_eq!(owner, None);
		assert!(check(&engine).unwrap().is_empty());
	}
}
