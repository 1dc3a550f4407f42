//! `Writes`: the wire- and disk-stable batch handed to
//! [`crate::kv::Engine::mutate`] — three ordered collections of puts,
//! range-removes, and counter-adjusts, per spec §6.

use crate::codec::varint;
use crate::err::{Error, Result};
use crate::kv::{Key, Value};

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Writes {
	/// Ordered ascending by key.
	pub puts: Vec<(Key, Value)>,
	/// Half-open `[min, max)` ranges to delete, ordered ascending by `min`.
	pub removes: Vec<(Key, Key)>,
	/// Ordered ascending by key.
	pub adjusts: Vec<(Key, i64)>,
}

impl Writes {
	pub fn new() -> Self {
		Writes::default()
	}

	pub fn is_empty(&self) -> bool {
		self.puts.is_empty() && self.removes.is_empty() && self.adjusts.is_empty()
	}

	pub fn put(&mut self, key: Key, value: Value) {
		self.puts.push((key, value));
	}

	pub fn remove_range(&mut self, min: Key, max: Key) {
		self.removes.push((min, max));
	}

	/// Convenience for deleting exactly one key: the tightest half-open
	/// range that contains `key` and nothing greater.
	pub fn remove_key(&mut self, key: Key) {
		let mut max = key.clone();
		max.push(0x00);
		self.removes.push((key, max));
	}

	pub fn adjust(&mut self, key: Key, delta: i64) {
		self.adjusts.push((key, delta));
	}

	/// Sorts each collection ascending by key, as the wire format requires.
	pub fn normalize(&mut self) {
		self.puts.sort_by(|a, b| a.0.cmp(&b.0));
		self.removes.sort_by(|a, b| a.0.cmp(&b.0));
		self.adjusts.sort_by(|a, b| a.0.cmp(&b.0));
	}

	pub fn encode(&self) -> Vec<u8> {
		let mut out = Vec::new();
		varint::encode_into(self.puts.len() as u64, &mut out);
		for (k, v) in &self.puts {
			write_bytes(&mut out, k);
			write_bytes(&mut out, v);
		}
		varint::encode_into(self.removes.len() as u64, &mut out);
		for (min, max) in &self.removes {
			write_bytes(&mut out, min);
			write_bytes(&mut out, max);
		}
		varint::encode_into(self.adjusts.len() as u64, &mut out);
		for (k, delta) in &self.adjusts {
			write_bytes(&mut out, k);
			out.extend_from_slice(&delta.to_be_bytes());
		}
		out
	}

	pub fn decode(buf: &[u8]) -> Result<Self> {
		let mut cursor = 0;
		let mut writes = Writes::new();

		let (n_puts, consumed) = varint::decode(&buf[cursor..])?;
		cursor += consumed;
		for _ in 0..n_puts {
			let (k, consumed) = read_bytes(&buf[cursor..])?;
			cursor += consumed;
			let (v, consumed) = read_bytes(&buf[cursor..])?;
			cursor += consumed;
			writes.puts.push((k, v));
		}

		let (n_removes, consumed) = varint::decode(&buf[cursor..])?;
		cursor += consumed;
		for _ in 0..n_removes {
			let (min, consumed) = read_bytes(&buf[cursor..])?;
			cursor += consumed;
			let (max, consumed) = read_bytes(&buf[cursor..])?;
			cursor += consumed;
			writes.removes.push((min, max));
		}

		let (n_adjusts, consumed) = varint::decode(&buf[cursor..])?;
		cursor += consumed;
		for _ in 0..n_adjusts {
			let (k, consumed) = read_bytes(&buf[cursor..])?;
			cursor += consumed;
			let delta_bytes: [u8; 8] = buf
				.get(cursor..cursor + 8)
				.and_then(|s| s.try_into().ok())
				.ok_or_else(|| Error::Codec("Writes: truncated adjust delta".into()))?;
			cursor += 8;
			writes.adjusts.push((k, i64::from_be_bytes(delta_bytes)));
		}

		Ok(writes)
	}
}

fn write_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
	varint::encode_into(bytes.len() as u64, out);
	out.extend_from_slice(bytes);
}

fn read_bytes(buf: &[u8]) -> Result<(Vec<u8>, usize)> {
	let (len, consumed) = varint::decode(buf)?;
	let len = len as usize;
	let bytes = buf
		.get(consumed..consumed + len)
		.ok_or_else(|| Error::Codec("Writes: truncated length-prefixed entry".into()))?
		.to_vec();
	Ok((bytes, consumed + len))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn roundtrips_empty() {
		let writes = Writes::new();
		let enc = writes.encode();
		assert_eq!(Writes::decode(&enc).unwrap(), writes);
	}

	#[test]
	fn roundtrips_mixed() {
		let mut writes = Writes::new();
		writes.put(b"k1".to_vec(), b"v1".to_vec());
		writes.put(b"k2".to_vec(), b"v2".to_vec());
		writes.remove_range(b"a".to_vec(), b"b".to_vec());
		writes.adjust(b"counter".to_vec(), -5);
		writes.normalize();
		let enc = writes.encode();
		let dec = Writes::decode(&enc).unwrap();
		assert_eq!(dec, writes);
	}
}
