//! Transactions: a snapshot-isolated view of the database with an
//! in-memory pending write set layered on top, reference-policy delete
//! cascades, on-read schema upgrade, and field-change notifications
//! (spec §4.5).
//!
//! Grounded on the teacher's `kvs::mem::Transaction` (`Drop` rolling back
//! an unclosed writable transaction per a [`Check`] policy) and
//! `kvs::tr::Check` itself. The MutableView here plays the role the
//! teacher's in-flight transaction buffer plays over `echodb`'s own MVCC
//! — layering pending puts/removes/adjusts over a read-only
//! [`crate::kv::Snapshot`] so a transaction observes its own writes.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tracing::{instrument, trace, warn};

use crate::codec::{self, Value};
use crate::err::{Error, Result};
use crate::kv::{Check, Engine, Key, Snapshot, Writes};
use crate::layout;
use crate::objid::ObjId;
use crate::registry::Registry;
use crate::schema::field::{FieldDef, FieldKind, InverseDelete};
use crate::schema::{Schema, SchemaVersion, StorageId};
use crate::translator::{self, ObjectHeader};

/// A field whose value changed as a direct or cascaded effect of one
/// mutating transaction call. Queued and handed back to the caller via
/// [`Transaction::drain_notifications`] once the mutation (including all
/// of its index updates) is fully applied — the outer object-mapping
/// layer that turns these into application callbacks is out of scope
/// here.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldChange {
	pub id: ObjId,
	pub field_storage_id: StorageId,
}

/// Read-only view of a snapshot with a transaction's pending writes
/// layered on top. `writes` is a clone of the transaction's buffer taken
/// just before the call that needs it, rather than a live borrow — this
/// sidesteps holding a borrow of `Transaction::writes` open while also
/// needing `&mut` access to it in the same call, at the cost of an
/// O(pending writes) clone per field operation. Fine for a reference
/// implementation; a perf-sensitive one would thread an append-only log
/// instead.
struct MutableView<'a> {
	base: &'a dyn Snapshot,
	writes: &'a Writes,
}

impl<'a> MutableView<'a> {
	fn new(base: &'a dyn Snapshot, writes: &'a Writes) -> Self {
		MutableView { base, writes }
	}
}

fn within(key: &[u8], min: &[u8], max: &[u8]) -> bool {
	key >= min && key < max
}

impl Snapshot for MutableView<'_> {
	fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
		let adjust_sum: i64 = self.writes.adjusts.iter().filter(|(k, _)| k.as_slice() == key).map(|(_, d)| *d).sum();
		let put_override = self.writes.puts.iter().rev().find(|(k, _)| k.as_slice() == key).map(|(_, v)| v.clone());
		let removed = self.writes.removes.iter().any(|(min, max)| within(key, min, max));

		let base = match put_override {
			Some(v) => Some(v),
			None if removed => None,
			None => self.base.get(key)?,
		};

		if adjust_sum != 0 {
			let current = crate::kv::decode_counter(base.as_deref());
			return Ok(Some(crate::kv::encode_counter(current + adjust_sum)));
		}
		Ok(base)
	}

	fn get_range<'a>(&'a self, min: &[u8], max: &[u8], reverse: bool) -> Result<Box<dyn Iterator<Item = Result<(Key, Vec<u8>)>> + 'a>> {
		// The overlay necessarily materializes: a transaction's pending
		// writes must be merged with the base snapshot's range before any
		// result can be handed back, so this can't be lazier than "collect
		// the base range, then apply pending writes on top" (see
		// `DESIGN.md`'s `kv` entry). Still returned as a boxed iterator so
		// callers (notably `jsck`) have one `get_range` contract regardless
		// of which `Snapshot` they're holding.
		let mut merged: BTreeMap<Key, Vec<u8>> =
			self.base.get_range(min, max, false)?.collect::<Result<BTreeMap<_, _>>>()?;

		for (rmin, rmax) in &self.writes.removes {
			let lo = rmin.as_slice().max(min).to_vec();
			let hi = rmax.as_slice().min(max).to_vec();
			if lo < hi {
				let doomed: Vec<Key> = merged.range(lo..hi).map(|(k, _)| k.clone()).collect();
				for k in doomed {
					merged.remove(&k);
				}
			}
		}
		for (key, value) in &self.writes.puts {
			if within(key, min, max) {
				merged.insert(key.clone(), value.clone());
			}
		}
		for (key, delta) in &self.writes.adjusts {
			if within(key, min, max) {
				let current = crate::kv::decode_counter(merged.get(key).map(|v| v.as_slice()));
				merged.insert(key.clone(), crate::kv::encode_counter(current + delta));
			}
		}

		let mut out: Vec<(Key, Vec<u8>)> = merged.into_iter().collect();
		if reverse {
			out.reverse();
		}
		Ok(Box::new(out.into_iter().map(Ok)))
	}
}

fn parse_trailing_id(key: &[u8], prefix_len: usize) -> Result<ObjId> {
	let bytes: [u8; ObjId::LEN] = key
		.get(prefix_len..prefix_len + ObjId::LEN)
		.and_then(|s| s.try_into().ok())
		.ok_or_else(|| Error::CorruptDatabase("index entry key truncated before object id".into()))?;
	Ok(ObjId::from_bytes(bytes))
}

/// A snapshot-isolated, optionally-writable transaction.
pub struct Transaction {
	engine: Arc<dyn Engine>,
	registry: Arc<Registry>,
	schema: Arc<Schema>,
	schema_version: SchemaVersion,
	snapshot: Box<dyn Snapshot>,
	writes: Writes,
	read_only: bool,
	done: bool,
	poisoned: bool,
	check: Check,
	notifications: Vec<FieldChange>,
}

impl Transaction {
	pub fn begin(
		engine: Arc<dyn Engine>,
		registry: Arc<Registry>,
		schema: Arc<Schema>,
		schema_version: SchemaVersion,
		read_only: bool,
		check: Check,
	) -> Self {
		Transaction {
			snapshot: engine.snapshot(),
			engine,
			registry,
			schema,
			schema_version,
			writes: Writes::new(),
			read_only,
			done: false,
			poisoned: false,
			check,
			notifications: Vec::new(),
		}
	}

	fn ensure_usable(&self) -> Result<()> {
		if self.poisoned {
			return Err(Error::StaleTransaction("transaction observed a conflict and is poisoned"));
		}
		if self.done {
			return Err(Error::StaleTransaction("transaction is already closed"));
		}
		Ok(())
	}

	fn ensure_writable(&self) -> Result<()> {
		self.ensure_usable()?;
		if self.read_only {
			return Err(Error::StaleTransaction("transaction is read-only"));
		}
		Ok(())
	}

	fn writes_snapshot(&self) -> Writes {
		self.writes.clone()
	}

	/// Upgrades an object in place if its stored schema version lags the
	/// transaction's, then returns its (now-current, for writable
	/// transactions) header. Read-only transactions observe the object as
	/// stored, without upgrading (spec §4.5: "All reads transparently
	/// invoke the upgrade path ... if the transaction is not read-only").
	fn ensure_upgraded(&mut self, id: ObjId) -> Result<ObjectHeader> {
		let pending = self.writes_snapshot();
		let view = MutableView::new(self.snapshot.as_ref(), &pending);
		let raw = view
			.get(&layout::object_key(id))?
			.ok_or(Error::DeletedObject(id))?;
		let header = ObjectHeader::decode(&raw)?;

		if self.read_only || header.schema_version == self.schema_version {
			return Ok(header);
		}

		let type_id = id.type_id()?;
		let old_schema = self.registry.get(header.schema_version)?;
		let old_ty = old_schema.object_type(type_id)?;
		let new_ty = self.schema.object_type(type_id)?;
		translator::upgrade_object(&view, &mut self.writes, old_ty, new_ty, id, header, self.schema_version)?;
		Ok(ObjectHeader { schema_version: self.schema_version })
	}

	pub fn exists(&self, id: ObjId) -> Result<bool> {
		let pending = self.writes_snapshot();
		let view = MutableView::new(self.snapshot.as_ref(), &pending);
		Ok(view.get(&layout::object_key(id))?.is_some())
	}

	#[instrument(skip(self))]
	pub fn create(&mut self, type_id: StorageId) -> Result<ObjId> {
		self.ensure_writable()?;
		self.schema.object_type(type_id)?;
		let pending = self.writes_snapshot();
		let view = MutableView::new(self.snapshot.as_ref(), &pending);
		translator::create_object(&view, &mut self.writes, type_id, self.schema_version)
	}

	pub fn read_field(&mut self, id: ObjId, field_storage_id: StorageId) -> Result<Option<Value>> {
		self.ensure_usable()?;
		self.ensure_upgraded(id)?;
		let type_id = id.type_id()?;
		let field = self.schema.object_type(type_id)?.field(field_storage_id)?;
		let pending = self.writes_snapshot();
		let view = MutableView::new(self.snapshot.as_ref(), &pending);
		translator::read_simple_field(&view, id, field)
	}

	pub fn write_field(&mut self, id: ObjId, field_storage_id: StorageId, value: Option<&Value>) -> Result<()> {
		self.ensure_writable()?;
		self.ensure_upgraded(id)?;
		let type_id = id.type_id()?;
		let ty = self.schema.object_type(type_id)?;
		let field = ty.field(field_storage_id)?;
		let pending = self.writes_snapshot();
		let view = MutableView::new(self.snapshot.as_ref(), &pending);
		translator::write_simple_field(&view, &mut self.writes, ty, id, field, value)?;
		self.notifications.push(FieldChange { id, field_storage_id });
		Ok(())
	}

	pub fn read_counter(&mut self, id: ObjId, field_storage_id: StorageId) -> Result<i64> {
		self.ensure_usable()?;
		self.ensure_upgraded(id)?;
		let key = layout::field_key(id, field_storage_id);
		let pending = self.writes_snapshot();
		let view = MutableView::new(self.snapshot.as_ref(), &pending);
		Ok(crate::kv::decode_counter(view.get(&key)?.as_deref()))
	}

	pub fn adjust_counter(&mut self, id: ObjId, field_storage_id: StorageId, delta: i64) -> Result<()> {
		self.ensure_writable()?;
		self.ensure_upgraded(id)?;
		let type_id = id.type_id()?;
		let field = self.schema.object_type(type_id)?.field(field_storage_id)?;
		translator::adjust_counter(&mut self.writes, id, field, delta);
		self.notifications.push(FieldChange { id, field_storage_id });
		Ok(())
	}

	fn collection_field(&mut self, id: ObjId, field_storage_id: StorageId) -> Result<(FieldDef, ObjId)> {
		self.ensure_writable()?;
		self.ensure_upgraded(id)?;
		let type_id = id.type_id()?;
		let field = self.schema.object_type(type_id)?.field(field_storage_id)?.clone();
		Ok((field, id))
	}

	pub fn list_insert(&mut self, id: ObjId, field_storage_id: StorageId, position: u64, value: &Value) -> Result<()> {
		let (field, id) = self.collection_field(id, field_storage_id)?;
		let pending = self.writes_snapshot();
		let view = MutableView::new(self.snapshot.as_ref(), &pending);
		translator::list_insert(&view, &mut self.writes, &field, id, position, value)?;
		self.notifications.push(FieldChange { id, field_storage_id });
		Ok(())
	}

	pub fn list_remove(&mut self, id: ObjId, field_storage_id: StorageId, position: u64) -> Result<()> {
		let (field, id) = self.collection_field(id, field_storage_id)?;
		let pending = self.writes_snapshot();
		let view = MutableView::new(self.snapshot.as_ref(), &pending);
		translator::list_remove(&view, &mut self.writes, &field, id, position)?;
		self.notifications.push(FieldChange { id, field_storage_id });
		Ok(())
	}

	pub fn set_add(&mut self, id: ObjId, field_storage_id: StorageId, value: &Value) -> Result<()> {
		let (field, id) = self.collection_field(id, field_storage_id)?;
		let pending = self.writes_snapshot();
		let view = MutableView::new(self.snapshot.as_ref(), &pending);
		translator::set_add(&view, &mut self.writes, &field, id, value)?;
		self.notifications.push(FieldChange { id, field_storage_id });
		Ok(())
	}

	pub fn set_remove(&mut self, id: ObjId, field_storage_id: StorageId, value: &Value) -> Result<()> {
		let (field, id) = self.collection_field(id, field_storage_id)?;
		let pending = self.writes_snapshot();
		let view = MutableView::new(self.snapshot.as_ref(), &pending);
		translator::set_remove(&view, &mut self.writes, &field, id, value)?;
		self.notifications.push(FieldChange { id, field_storage_id });
		Ok(())
	}

	pub fn map_put(&mut self, id: ObjId, field_storage_id: StorageId, key: &Value, value: &Value) -> Result<()> {
		let (field, id) = self.collection_field(id, field_storage_id)?;
		let pending = self.writes_snapshot();
		let view = MutableView::new(self.snapshot.as_ref(), &pending);
		translator::map_put(&view, &mut self.writes, &field, id, key, value)?;
		self.notifications.push(FieldChange { id, field_storage_id });
		Ok(())
	}

	pub fn map_remove(&mut self, id: ObjId, field_storage_id: StorageId, key: &Value) -> Result<()> {
		let (field, id) = self.collection_field(id, field_storage_id)?;
		let pending = self.writes_snapshot();
		let view = MutableView::new(self.snapshot.as_ref(), &pending);
		translator::map_remove(&view, &mut self.writes, &field, id, key)?;
		self.notifications.push(FieldChange { id, field_storage_id });
		Ok(())
	}

	/// Deletes `id`, applying reference-policy cascades: forward-delete
	/// fields on `id`'s own type pull their targets into the same delete;
	/// referrers elsewhere in the database (found via each indexed
	/// reference field's own index) are deleted, unreferenced, or block
	/// the whole operation per their `inverse_delete` policy (spec §4.5).
	/// Depth-first with a visited-set, so reference cycles terminate.
	///
	/// Scope: cascade/inverse-delete enforcement only covers direct
	/// (non-collection) reference fields. A reference value held inside a
	/// list/set/map is still validated at write time (dangling/type
	/// restriction) but does not participate in delete cascades — see
	/// `DESIGN.md`.
	///
	/// Atomic against its own mid-cascade failure: each worklist step
	/// buffers its effects into `self.writes`/`self.notifications`
	/// immediately, so a later step blocked by `ReferencePolicy::Exception`
	/// must not leave an earlier step's already-buffered writes behind for
	/// a subsequent `commit()` to flush. `self.writes`/`self.notifications`
	/// are checkpointed before the worklist loop and restored on any `Err`,
	/// matching spec §7's "transaction state unchanged after a caught
	/// error" invariant.
	#[instrument(skip(self))]
	pub fn delete(&mut self, id: ObjId) -> Result<()> {
		self.ensure_writable()?;
		let writes_checkpoint = self.writes.clone();
		let notifications_checkpoint = self.notifications.clone();
		let mut worklist = vec![id];
		let mut visited = HashSet::new();
		while let Some(current) = worklist.pop() {
			if !visited.insert(current) {
				continue;
			}
			if let Err(e) = self.delete_one(current, &mut worklist) {
				self.writes = writes_checkpoint;
				self.notifications = notifications_checkpoint;
				return Err(e);
			}
		}
		Ok(())
	}

	fn delete_one(&mut self, id: ObjId, worklist: &mut Vec<ObjId>) -> Result<()> {
		let header = self.ensure_upgraded(id)?;
		let type_id = id.type_id()?;

		// Collected into owned `FieldDef`s so this borrow of `self.schema`
		// ends here, before the `&mut self` call to `enforce_inverse_delete`
		// below.
		let reference_fields: Vec<FieldDef> = self
			.schema
			.object_type(type_id)?
			.fields
			.values()
			.filter(|f| matches!(f.kind, FieldKind::Reference { .. }))
			.cloned()
			.collect();

		let mut forward_targets = Vec::new();
		for field in &reference_fields {
			let FieldKind::Reference { policy, .. } = &field.kind else { unreachable!() };
			if !policy.forward_delete {
				continue;
			}
			let pending = self.writes_snapshot();
			let view = MutableView::new(self.snapshot.as_ref(), &pending);
			if let Some(Value::Ref(target)) = translator::read_simple_field(&view, id, field)? {
				forward_targets.push(target);
			}
		}
		worklist.extend(forward_targets);

		self.enforce_inverse_delete(id, worklist)?;

		let ty = self.schema.object_type(type_id)?;
		let pending = self.writes_snapshot();
		let view = MutableView::new(self.snapshot.as_ref(), &pending);
		translator::delete_object(&view, &mut self.writes, ty, id, header)?;
		Ok(())
	}

	/// For every indexed reference field in the schema, looks up referrers
	/// currently pointing at `target` and applies their field's
	/// `inverse_delete` policy.
	fn enforce_inverse_delete(&mut self, target: ObjId, worklist: &mut Vec<ObjId>) -> Result<()> {
		let encoded_target = codec::encode(&Value::Ref(target))?;
		let schema = self.schema.clone();
		for ty in schema.object_types() {
			for field in ty.fields.values() {
				let FieldKind::Reference { policy, indexed: true } = &field.kind else { continue };
				let (min, max) = layout::simple_index_value_range(field.storage_id, &encoded_target);
				let pending = self.writes_snapshot();
				let view = MutableView::new(self.snapshot.as_ref(), &pending);
				for row in view.get_range(&min, &max, false)? {
					let (key, _) = row?;
					let referrer = parse_trailing_id(&key, min.len())?;
					if referrer == target {
						continue;
					}
					match policy.inverse_delete {
						InverseDelete::Delete => worklist.push(referrer),
						InverseDelete::Unreference => {
							let referrer_type_id = referrer.type_id()?;
							let referrer_ty = self.schema.object_type(referrer_type_id)?;
							let referrer_field = referrer_ty.field(field.storage_id)?;
							let pending2 = self.writes_snapshot();
							let view2 = MutableView::new(self.snapshot.as_ref(), &pending2);
							translator::write_simple_field(&view2, &mut self.writes, referrer_ty, referrer, referrer_field, None)?;
							self.notifications.push(FieldChange { id: referrer, field_storage_id: field.storage_id });
						}
						InverseDelete::Exception => {
							return Err(Error::ReferencedObject { target, referrer });
						}
					}
				}
			}
		}
		Ok(())
	}

	/// Discards every notification queued so far, returning them to the
	/// caller. Notifications accumulate as mutating calls succeed; this
	/// crate never interprets them itself.
	pub fn drain_notifications(&mut self) -> Vec<FieldChange> {
		std::mem::take(&mut self.notifications)
	}

	/// Discards the in-memory write set and releases the snapshot.
	/// Idempotent and always succeeds (spec §5).
	pub fn rollback(&mut self) {
		self.writes = Writes::new();
		self.notifications.clear();
		self.done = true;
	}

	/// Flattens the pending write set into a [`Writes`] batch and hands it
	/// to the engine. A read-only transaction has nothing to flatten.
	/// `Error::Retry` from the engine poisons the transaction rather than
	/// closing it, matching spec §5's "every subsequent operation fails
	/// fast with StaleTransactionException".
	#[instrument(skip(self))]
	pub fn commit(&mut self) -> Result<()> {
		self.ensure_usable()?;
		if !self.read_only {
			self.writes.normalize();
			let writes = std::mem::take(&mut self.writes);
			if let Err(e) = self.engine.mutate(writes, true) {
				if matches!(e, Error::Retry) {
					self.poisoned = true;
				}
				return Err(e);
			}
		}
		self.done = true;
		Ok(())
	}
}

impl Drop for Transaction {
	fn drop(&mut self) {
		if self.done || self.read_only {
			return;
		}
		if std::thread::panicking() {
			return;
		}
		match self.check {
			Check::None => trace!("transaction dropped without commit or rollback"),
			Check::Warn => warn!("transaction dropped without commit or rollback"),
			Check::Panic => panic!("transaction dropped without commit or rollback"),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::codec::EncodingKind;
	use crate::kv::MemEngine;
	use crate::schema::builder::{ObjectTypeBuilder, SchemaBuilder};
	use crate::schema::field::ReferencePolicy;

	const WIDGET: StorageId = 1;
	const GADGET: StorageId = 2;
	const NAME_FIELD: StorageId = 10;
	const OWNER_FIELD: StorageId = 11;

	fn v1_schema() -> Arc<Schema> {
		let widget = ObjectTypeBuilder::new(WIDGET, "Widget")
			.field(FieldDef {
				storage_id: NAME_FIELD,
				name: "name".into(),
				kind: FieldKind::Simple { encoding: EncodingKind::Str, nullable: false, indexed: true },
			})
			.unwrap();
		SchemaBuilder::new().object_type(widget).unwrap().lock_down()
	}

	/// `v1_schema` plus a second indexed field on `Widget`, simulating the
	/// schema-evolution scenario (spec §8 scenario #2).
	fn v2_schema() -> Arc<Schema> {
		let widget = ObjectTypeBuilder::new(WIDGET, "Widget")
			.field(FieldDef {
				storage_id: NAME_FIELD,
				name: "name".into(),
				kind: FieldKind::Simple { encoding: EncodingKind::Str, nullable: false, indexed: true },
			})
			.unwrap()
			.field(FieldDef {
				storage_id: OWNER_FIELD,
				name: "owner".into(),
				kind: FieldKind::Simple { encoding: EncodingKind::Str, nullable: false, indexed: true },
			})
			.unwrap();
		SchemaBuilder::new().object_type(widget).unwrap().lock_down()
	}

	/// Two types linked by a reference field, used for the cascade-delete
	/// scenarios (spec §8 scenario #3): `Gadget.owner` forward-deletes its
	/// `Widget`, and a third object's `Widget`-reference field enforces
	/// `inverse_delete`.
	fn referencing_schema(inverse_delete: InverseDelete) -> Arc<Schema> {
		let widget = ObjectTypeBuilder::new(WIDGET, "Widget")
			.field(FieldDef {
				storage_id: NAME_FIELD,
				name: "name".into(),
				kind: FieldKind::Simple { encoding: EncodingKind::Str, nullable: false, indexed: true },
			})
			.unwrap();
		let gadget = ObjectTypeBuilder::new(GADGET, "Gadget")
			.field(FieldDef {
				storage_id: OWNER_FIELD,
				name: "owner".into(),
				kind: FieldKind::Reference {
					policy: ReferencePolicy {
						allowed_types: vec![WIDGET],
						forward_delete: true,
						inverse_delete,
						allow_dangling: false,
					},
					indexed: true,
				},
			})
			.unwrap();
		SchemaBuilder::new().object_type(widget).unwrap().object_type(gadget).unwrap().lock_down()
	}

	const SPROCKET: StorageId = 3;
	const HOLDER_FIELD: StorageId = 12;

	/// Three types: `Gadget.owner` forward-deletes its `Widget` (as in
	/// `referencing_schema`), and a third type, `Sprocket`, holds its own
	/// indexed, `Exception`-policy reference to that same `Widget` — so
	/// deleting a `Gadget` fully cascades one step (removing its `Widget`)
	/// before the `Sprocket` reference blocks the rest of the delete.
	fn cascade_then_exception_schema() -> Arc<Schema> {
		let widget = ObjectTypeBuilder::new(WIDGET, "Widget")
			.field(FieldDef {
				storage_id: NAME_FIELD,
				name: "name".into(),
				kind: FieldKind::Simple { encoding: EncodingKind::Str, nullable: false, indexed: true },
			})
			.unwrap();
		let gadget = ObjectTypeBuilder::new(GADGET, "Gadget")
			.field(FieldDef {
				storage_id: OWNER_FIELD,
				name: "owner".into(),
				kind: FieldKind::Reference {
					policy: ReferencePolicy {
						allowed_types: vec![WIDGET],
						forward_delete: true,
						inverse_delete: InverseDelete::Delete,
						allow_dangling: false,
					},
					indexed: true,
				},
			})
			.unwrap();
		let sprocket = ObjectTypeBuilder::new(SPROCKET, "Sprocket")
			.field(FieldDef {
				storage_id: HOLDER_FIELD,
				name: "holder".into(),
				kind: FieldKind::Reference {
					policy: ReferencePolicy {
						allowed_types: vec![WIDGET],
						forward_delete: false,
						inverse_delete: InverseDelete::Exception,
						allow_dangling: false,
					},
					indexed: true,
				},
			})
			.unwrap();
		SchemaBuilder::new()
			.object_type(widget)
			.unwrap()
			.object_type(gadget)
			.unwrap()
			.object_type(sprocket)
			.unwrap()
			.lock_down()
	}

	fn begin(
		engine: &Arc<dyn Engine>,
		registry: &Arc<Registry>,
		schema: &Arc<Schema>,
		version: SchemaVersion,
		read_only: bool,
	) -> Transaction {
		Transaction::begin(engine.clone(), registry.clone(), schema.clone(), version, read_only, Check::None)
	}

	#[test]
	fn create_and_read_round_trips_a_simple_field() {
		let engine: Arc<dyn Engine> = Arc::new(MemEngine::new());
		let schema = v1_schema();
		let registry = Arc::new(Registry::empty());
		let (version, schema) = registry.resolve(schema, true).unwrap();

		let mut tx = begin(&engine, &registry, &schema, version, false);
		let id = tx.create(WIDGET).unwrap();
		tx.write_field(id, NAME_FIELD, Some(&Value::Str("left-handed screwdriver".into()))).unwrap();
		assert_eq!(
			tx.read_field(id, NAME_FIELD).unwrap(),
			Some(Value::Str("left-handed screwdriver".into()))
		);
		tx.commit().unwrap();

		// Visible from a fresh transaction too, including its index entry.
		let mut tx2 = begin(&engine, &registry, &schema, version, true);
		assert!(tx2.exists(id).unwrap());
		assert_eq!(
			tx2.read_field(id, NAME_FIELD).unwrap(),
			Some(Value::Str("left-handed screwdriver".into()))
		);
		let encoded = codec::encode(&Value::Str("left-handed screwdriver".into())).unwrap();
		let (min, max) = layout::simple_index_value_range(NAME_FIELD, &encoded);
		let entries: Vec<_> = engine.get_range(&min, &max, false).unwrap().collect::<Result<Vec<_>>>().unwrap();
		assert_eq!(entries.len(), 1);
		tx2.rollback();
	}

	#[test]
	fn write_then_read_in_the_same_transaction_observes_the_pending_write() {
		let engine: Arc<dyn Engine> = Arc::new(MemEngine::new());
		let schema = v1_schema();
		let registry = Arc::new(Registry::empty());
		let (version, schema) = registry.resolve(schema, true).unwrap();

		let mut tx = begin(&engine, &registry, &schema, version, false);
		let id = tx.create(WIDGET).unwrap();
		assert_eq!(tx.read_field(id, NAME_FIELD).unwrap(), None);
		tx.write_field(id, NAME_FIELD, Some(&Value::Str("hammer".into()))).unwrap();
		assert_eq!(tx.read_field(id, NAME_FIELD).unwrap(), Some(Value::Str("hammer".into())));
		tx.rollback();

		// Nothing committed.
		let mut tx2 = begin(&engine, &registry, &schema, version, true);
		assert!(!tx2.exists(id).unwrap());
		tx2.rollback();
	}

	#[test]
	fn read_on_an_older_object_upgrades_it_and_populates_the_new_index() {
		let engine: Arc<dyn Engine> = Arc::new(MemEngine::new());
		let registry = Arc::new(Registry::empty());
		let (v1, s1) = registry.resolve(v1_schema(), true).unwrap();

		let mut tx = begin(&engine, &registry, &s1, v1, false);
		let id = tx.create(WIDGET).unwrap();
		tx.write_field(id, NAME_FIELD, Some(&Value::Str("wrench".into()))).unwrap();
		tx.commit().unwrap();

		let (v2, s2) = registry.resolve(v2_schema(), true).unwrap();
		assert_eq!(v2, v1 + 1);

		let mut tx2 = begin(&engine, &registry, &s2, v2, false);
		// Reading under the new schema version upgrades the object: the
		// newly added `owner` field gets its non-nullable default and, being
		// indexed, an index entry.
		assert_eq!(tx2.read_field(id, OWNER_FIELD).unwrap(), Some(Value::Str(String::new())));
		tx2.commit().unwrap();

		let encoded = codec::encode(&Value::Str(String::new())).unwrap();
		let (min, max) = layout::simple_index_value_range(OWNER_FIELD, &encoded);
		let entries: Vec<_> = engine.get_range(&min, &max, false).unwrap().collect::<Result<Vec<_>>>().unwrap();
		assert_eq!(entries.len(), 1);

		let header = ObjectHeader::decode(&engine.get(&layout::object_key(id)).unwrap().unwrap()).unwrap();
		assert_eq!(header.schema_version, v2);
	}

	#[test]
	fn deleting_a_widget_forward_deletes_its_gadget_owner() {
		let engine: Arc<dyn Engine> = Arc::new(MemEngine::new());
		let schema = referencing_schema(InverseDelete::Delete);
		let registry = Arc::new(Registry::empty());
		let (version, schema) = registry.resolve(schema, true).unwrap();

		let mut tx = begin(&engine, &registry, &schema, version, false);
		let widget = tx.create(WIDGET).unwrap();
		let gadget = tx.create(GADGET).unwrap();
		tx.write_field(gadget, OWNER_FIELD, Some(&Value::Ref(widget))).unwrap();
		tx.commit().unwrap();

		let mut tx2 = begin(&engine, &registry, &schema, version, false);
		tx2.delete(gadget).unwrap();
		tx2.commit().unwrap();

		assert!(engine.get(&layout::object_key(widget)).unwrap().is_none());
		assert!(engine.get(&layout::object_key(gadget)).unwrap().is_none());
	}

	#[test]
	fn exception_policy_blocks_delete_and_leaves_storage_unchanged() {
		let engine: Arc<dyn Engine> = Arc::new(MemEngine::new());
		let schema = referencing_schema(InverseDelete::Exception);
		let registry = Arc::new(Registry::empty());
		let (version, schema) = registry.resolve(schema, true).unwrap();

		let mut tx = begin(&engine, &registry, &schema, version, false);
		let widget = tx.create(WIDGET).unwrap();
		let gadget = tx.create(GADGET).unwrap();
		tx.write_field(gadget, OWNER_FIELD, Some(&Value::Ref(widget))).unwrap();
		tx.commit().unwrap();

		let before: Vec<(Vec<u8>, Vec<u8>)> =
			engine.get_range(&[0x00], &[0xff], false).unwrap().collect::<Result<Vec<_>>>().unwrap();

		let mut tx2 = begin(&engine, &registry, &schema, version, false);
		let err = tx2.delete(widget).unwrap_err();
		assert!(matches!(err, Error::ReferencedObject { .. }));
		tx2.rollback();

		let after: Vec<(Vec<u8>, Vec<u8>)> =
			engine.get_range(&[0x00], &[0xff], false).unwrap().collect::<Result<Vec<_>>>().unwrap();
		assert_eq!(before, after);
		assert!(engine.get(&layout::object_key(widget)).unwrap().is_some());
		assert!(engine.get(&layout::object_key(gadget)).unwrap().is_some());
	}

	#[test]
	fn delete_cascade_failure_leaves_no_partial_writes_on_commit() {
		let engine: Arc<dyn Engine> = Arc::new(MemEngine::new());
		let schema = cascade_then_exception_schema();
		let registry = Arc::new(Registry::empty());
		let (version, schema) = registry.resolve(schema, true).unwrap();

		let mut tx = begin(&engine, &registry, &schema, version, false);
		let widget = tx.create(WIDGET).unwrap();
		let gadget = tx.create(GADGET).unwrap();
		let sprocket = tx.create(SPROCKET).unwrap();
		tx.write_field(gadget, OWNER_FIELD, Some(&Value::Ref(widget))).unwrap();
		tx.write_field(sprocket, HOLDER_FIELD, Some(&Value::Ref(widget))).unwrap();
		tx.commit().unwrap();

		let before: Vec<(Vec<u8>, Vec<u8>)> =
			engine.get_range(&[0x00], &[0xff], false).unwrap().collect::<Result<Vec<_>>>().unwrap();

		// Deleting `gadget` forward-deletes `widget` first (a genuine,
		// fully-buffered cascade step) before `widget`'s own inverse-delete
		// scan finds `sprocket`'s Exception-policy reference and blocks the
		// whole call.
		let mut tx2 = begin(&engine, &registry, &schema, version, false);
		let err = tx2.delete(gadget).unwrap_err();
		match err {
			Error::ReferencedObject { target, referrer } => {
				assert_eq!(target, widget);
				assert_eq!(referrer, sprocket);
			}
			other => panic!("expected ReferencedObject, got {other:?}"),
		}
		// Committing (not rolling back) after the failed delete must not
		// flush any of the cascade's partial, already-buffered writes.
		tx2.commit().unwrap();

		let after: Vec<(Vec<u8>, Vec<u8>)> =
			engine.get_range(&[0x00], &[0xff], false).unwrap().collect::<Result<Vec<_>>>().unwrap();
		assert_eq!(before, after);
		assert!(engine.get(&layout::object_key(widget)).unwrap().is_some());
		assert!(engine.get(&layout::object_key(gadget)).unwrap().is_some());
		assert!(engine.get(&layout::object_key(sprocket)).unwrap().is_some());
	}

	#[test]
	fn unreference_policy_clears_the_referrers_field_instead_of_deleting_it() {
		let engine: Arc<dyn Engine> = Arc::new(MemEngine::new());
		let schema = referencing_schema(InverseDelete::Unreference);
		let registry = Arc::new(Registry::empty());
		let (version, schema) = registry.resolve(schema, true).unwrap();

		let mut tx = begin(&engine, &registry, &schema, version, false);
		let widget = tx.create(WIDGET).unwrap();
		let gadget = tx.create(GADGET).unwrap();
		tx.write_field(gadget, OWNER_FIELD, Some(&Value::Ref(widget))).unwrap();
		tx.commit().unwrap();

		let mut tx2 = begin(&engine, &registry, &schema, version, false);
		tx2.delete(widget).unwrap();
		tx2.commit().unwrap();

		assert!(engine.get(&layout::object_key(widget)).unwrap().is_none());
		let mut tx3 = begin(&engine, &registry, &schema, version, false);
		assert_eq!(tx3.read_field(gadget, OWNER_FIELD).unwrap(), None);
		tx3.rollback();
	}

	#[test]
	fn dropping_an_uncommitted_writable_transaction_under_check_none_rolls_back_silently() {
		let engine: Arc<dyn Engine> = Arc::new(MemEngine::new());
		let schema = v1_schema();
		let registry = Arc::new(Registry::empty());
		let (version, schema) = registry.resolve(schema, true).unwrap();

		let id = {
			let mut tx = Transaction::begin(engine.clone(), registry.clone(), schema.clone(), version, false, Check::None);
			let id = tx.create(WIDGET).unwrap();
			id
			// tx dropped here without commit or rollback.
		};
		assert!(engine.get(&layout::object_key(id)).unwrap().is_none());
	}

	#[test]
	#[should_panic]
	fn dropping_an_uncommitted_writable_transaction_under_check_panic_panics() {
		let engine: Arc<dyn Engine> = Arc::new(MemEngine::new());
		let schema = v1_schema();
		let registry = Arc::new(Registry::empty());
		let (version, schema) = registry.resolve(schema, true).unwrap();

		let mut tx = Transaction::begin(engine, registry, schema, version, false, Check::Panic);
		tx.create(WIDGET).unwrap();
	}
}
