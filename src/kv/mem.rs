//! In-memory reference [`Engine`], grounded on the teacher's `kv-mem`
//! backend (`kvs/mem/mod.rs`, an `echodb`-backed `Datastore`). `echodb`
//! itself is an external dependency the teacher treats as a pluggable
//! storage backend, not something this crate imports — here the
//! equivalent role is played directly by a `BTreeMap` guarded by an
//! `RwLock`, since this crate's own test suite is the only consumer of
//! this implementation.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use crate::err::Result;
use crate::kv::{decode_counter, encode_counter, Engine, Key, Snapshot, Value, Writes};

#[derive(Default)]
pub struct MemEngine {
	data: Arc<RwLock<BTreeMap<Key, Value>>>,
}

impl MemEngine {
	pub fn new() -> Self {
		MemEngine::default()
	}
}

impl Engine for MemEngine {
	fn get(&self, key: &[u8]) -> Result<Option<Value>> {
		Ok(self.data.read().unwrap().get(key).cloned())
	}

	/// Not as lazy as [`MemSnapshot::get_range`]: the matching sub-range is
	/// cloned out from under the read lock up front rather than walked
	/// through a live cursor, since holding a `RwLockReadGuard` for the
	/// lifetime of an arbitrarily long-lived returned iterator isn't
	/// possible with `std::sync::RwLock`. The lock is released before this
	/// returns. `Engine::get_range` (as opposed to going through a
	/// `Snapshot`) is only ever called on small, bounded ranges in this
	/// crate (`database.rs`'s startup `schema(v)` scan, and tests), so this
	/// is an accepted, documented simplification specific to this
	/// in-memory reference/test backend, not the production path spec §9's
	/// streaming contract is protecting — see `DESIGN.md`'s `kv` entry.
	fn get_range<'a>(&'a self, min: &[u8], max: &[u8], reverse: bool) -> Result<Box<dyn Iterator<Item = Result<(Key, Value)>> + 'a>> {
		let guard = self.data.read().unwrap();
		let mut rows: Vec<(Key, Value)> =
			guard.range(min.to_vec()..max.to_vec()).map(|(k, v)| (k.clone(), v.clone())).collect();
		drop(guard);
		if reverse {
			rows.reverse();
		}
		Ok(Box::new(rows.into_iter().map(Ok)))
	}

	fn put(&self, key: Key, value: Value) -> Result<()> {
		self.data.write().unwrap().insert(key, value);
		Ok(())
	}

	fn remove(&self, key: &[u8]) -> Result<()> {
		self.data.write().unwrap().remove(key);
		Ok(())
	}

	fn remove_range(&self, min: &[u8], max: &[u8]) -> Result<()> {
		let mut guard = self.data.write().unwrap();
		let doomed: Vec<Key> = guard.range(min.to_vec()..max.to_vec()).map(|(k, _)| k.clone()).collect();
		for k in doomed {
			guard.remove(&k);
		}
		Ok(())
	}

	fn adjust_counter(&self, key: &[u8], delta: i64) -> Result<()> {
		let mut guard = self.data.write().unwrap();
		let current = decode_counter(guard.get(key).map(|v| v.as_slice()));
		guard.insert(key.to_vec(), encode_counter(current + delta));
		Ok(())
	}

	fn snapshot(&self) -> Box<dyn Snapshot> {
		Box::new(MemSnapshot { data: self.data.read().unwrap().clone() })
	}

	fn mutate(&self, writes: Writes, _sync: bool) -> Result<()> {
		let mut guard = self.data.write().unwrap();
		for (key, value) in writes.puts {
			guard.insert(key, value);
		}
		for (min, max) in writes.removes {
			let doomed: Vec<Key> = guard.range(min..max).map(|(k, _)| k.clone()).collect();
			for k in doomed {
				guard.remove(&k);
			}
		}
		for (key, delta) in writes.adjusts {
			let current = decode_counter(guard.get(&key).map(|v| v.as_slice()));
			guard.insert(key, encode_counter(current + delta));
		}
		Ok(())
	}
}

/// A frozen clone of the keyspace at the moment [`MemEngine::snapshot`]
/// was called.
struct MemSnapshot {
	data: BTreeMap<Key, Value>,
}

impl Snapshot for MemSnapshot {
	fn get(&self, key: &[u8]) -> Result<Option<Value>> {
		Ok(self.data.get(key).cloned())
	}

	/// Genuinely lazy: a direct `BTreeMap::range` cursor (optionally
	/// `.rev()`, itself a `DoubleEndedIterator` over the same range, no
	/// extra collection needed), mapped into `Ok`. Nothing beyond the
	/// matching entries is ever resident, and dropping the returned
	/// iterator early releases it immediately — `MemSnapshot`'s own data is
	/// an owned, immutable clone for the snapshot's lifetime, so no lock is
	/// held either way.
	fn get_range<'a>(&'a self, min: &[u8], max: &[u8], reverse: bool) -> Result<Box<dyn Iterator<Item = Result<(Key, Value)>> + 'a>> {
		let range = self.data.range(min.to_vec()..max.to_vec());
		if reverse {
			Ok(Box::new(range.rev().map(|(k, v)| Ok((k.clone(), v.clone())))))
		} else {
			Ok(Box::new(range.map(|(k, v)| Ok((k.clone(), v.clone())))))
		}
	}
}
