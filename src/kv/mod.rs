//! The key-value engine contract this crate is layered over (spec §6),
//! plus an in-memory reference implementation used by this crate's own
//! test suite. The concrete production engine (LSM, B-tree, whatever
//! backs a real deployment) is out of scope — callers of this crate
//! supply their own [`Engine`] the way the teacher's `kvs` module
//! dispatches across `kv-mem`/`kv-rocksdb`/`kv-tikv`/etc. behind one
//! `Transaction` trait (`kvs/api.rs`).

mod mem;
mod writes;

pub use mem::MemEngine;
pub use writes::Writes;

use crate::err::Result;

pub type Key = Vec<u8>;
pub type Value = Vec<u8>;

/// Behaviour when a writable transaction is dropped without being
/// committed or rolled back. Grounded on the teacher's `kvs::tr::Check`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Check {
	#[default]
	None,
	Warn,
	Panic,
}

/// A read-only, point-in-time view of the keyspace. Obtained from
/// [`Engine::snapshot`]; a [`crate::tx::Transaction`] reads exclusively
/// through one of these, layering its in-memory write set on top.
pub trait Snapshot: Send + Sync {
	fn get(&self, key: &[u8]) -> Result<Option<Value>>;

	/// Half-open range `[min, max)`. `reverse` yields results in
	/// descending key order without changing the bound semantics.
	///
	/// Returns a lazy, droppable iterator rather than a collected `Vec`:
	/// a caller (`jsck` in particular) must be able to bound its own
	/// resident memory independently of how large the range is, and must
	/// be able to release whatever cursor the concrete engine holds by
	/// simply dropping the iterator early (spec §9). Restartable within
	/// the same snapshot since a snapshot's own view never changes after
	/// it's taken.
	fn get_range<'a>(&'a self, min: &[u8], max: &[u8], reverse: bool) -> Result<Box<dyn Iterator<Item = Result<(Key, Value)>> + 'a>>;
}

/// The ordered byte-key/byte-value store this crate is layered over.
pub trait Engine: Send + Sync {
	fn get(&self, key: &[u8]) -> Result<Option<Value>>;
	fn get_range<'a>(&'a self, min: &[u8], max: &[u8], reverse: bool) -> Result<Box<dyn Iterator<Item = Result<(Key, Value)>> + 'a>>;
	fn put(&self, key: Key, value: Value) -> Result<()>;
	fn remove(&self, key: &[u8]) -> Result<()>;
	fn remove_range(&self, min: &[u8], max: &[u8]) -> Result<()>;
	fn adjust_counter(&self, key: &[u8], delta: i64) -> Result<()>;

	/// A read-only view fixed at the moment of the call.
	fn snapshot(&self) -> Box<dyn Snapshot>;

	/// Atomically applies a batch of puts/removes/adjusts relative to
	/// other mutations. May return [`crate::err::Error::Retry`] if the
	/// engine detects an optimistic conflict; the caller must rebuild its
	/// transaction and retry from scratch.
	fn mutate(&self, writes: Writes, sync: bool) -> Result<()>;
}

/// Reads the raw 8-byte big-endian counter value stored at `key`,
/// defaulting to 0 when absent. Not an order-preserving encoding — a
/// counter is never used as a key fragment, only as a value.
pub(crate) fn decode_counter(raw: Option<&[u8]>) -> i64 {
	match raw {
		Some(bytes) if bytes.len() == 8 => i64::from_be_bytes(bytes.try_into().unwrap()),
		_ => 0,
	}
}

pub(crate) fn encode_counter(v: i64) -> Vec<u8> {
	v.to_be_bytes().to_vec()
}
