//! Object identity.
//!
//! An [`ObjId`] is a fixed-width 64-bit opaque identifier. Its encoded
//! form is the unsigned varint of the owning object type's storage id
//! followed by random tail bytes padding out to 8 bytes total; see
//! [`crate::layout`] for how this is actually laid out as a key prefix.
//! Equality and ordering are raw byte comparison of that 8-byte form,
//! which is also its `Display`/wire representation — grounded on the
//! teacher's `key::thing::Thing` struct, which likewise keys everything
//! off a raw identity value with no semantic decoding required to order
//! or compare it.

use std::fmt;

use rand::RngCore;

use crate::codec::varint;
use crate::err::{Error, Result};
use crate::schema::StorageId;

/// Fixed-width object identity: 8 raw bytes, ordered lexicographically.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjId(pub [u8; 8]);

impl ObjId {
	pub const LEN: usize = 8;

	/// Builds an id whose prefix names `type_id` and whose remaining bits
	/// are `tail` (caller-supplied, typically random).
	pub fn compose(type_id: StorageId, tail: &[u8]) -> Result<Self> {
		let mut prefix = Vec::with_capacity(9);
		varint::encode_into(type_id as u64, &mut prefix);
		if prefix.len() >= Self::LEN {
			return Err(Error::Codec(format!(
				"object type storage id {type_id} is too large to leave room for an object id tail"
			)));
		}
		let mut bytes = [0u8; Self::LEN];
		bytes[..prefix.len()].copy_from_slice(&prefix);
		let tail_len = Self::LEN - prefix.len();
		let tail = tail
			.get(..tail_len)
			.ok_or_else(|| Error::Codec("object id tail too short".into()))?;
		bytes[prefix.len()..].copy_from_slice(tail);
		Ok(ObjId(bytes))
	}

	/// Draws a fresh random id within `type_id`'s namespace.
	pub fn random(type_id: StorageId) -> Result<Self> {
		let mut prefix = Vec::with_capacity(9);
		varint::encode_into(type_id as u64, &mut prefix);
		if prefix.len() >= Self::LEN {
			return Err(Error::Codec(format!(
				"object type storage id {type_id} is too large to leave room for an object id tail"
			)));
		}
		let mut tail = vec![0u8; Self::LEN - prefix.len()];
		rand::thread_rng().fill_bytes(&mut tail);
		Self::compose(type_id, &tail)
	}

	/// Recovers the owning object type's storage id from the encoded prefix.
	pub fn type_id(&self) -> Result<StorageId> {
		let (v, _) = varint::decode(&self.0)?;
		StorageId::try_from(v)
			.map_err(|_| Error::Codec(format!("object id names an out-of-range type id {v}")))
	}

	pub fn as_bytes(&self) -> &[u8; 8] {
		&self.0
	}

	pub fn from_bytes(bytes: [u8; 8]) -> Self {
		ObjId(bytes)
	}
}

impl fmt::Display for ObjId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", hex::encode(self.0))
	}
}

impl fmt::Debug for ObjId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "ObjId({})", hex::encode(self.0))
	}
}
