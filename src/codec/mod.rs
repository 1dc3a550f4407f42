//! Order-preserving byte codec.
//!
//! Every encoding here is order-preserving: lexicographic byte comparison
//! of the encoded form agrees with the natural ordering of the logical
//! value. This is what lets plain KV range scans realize both the
//! primary object scan and every index lookup (see [`crate::layout`]).
//! None of these functions panic on valid input, and `decode(encode(v))
//! == v` for every legal `v`.

mod bytes;
mod float;
mod signed;
mod string;
pub(crate) mod varint;

use crate::err::{Error, Result};
use crate::objid::ObjId;

fn epoch() -> chrono::NaiveDate {
	chrono::NaiveDate::from_ymd_opt(1970, 1, 1).expect("1970-01-01 is a valid date")
}

/// The encoding type of a field, as declared by its [`crate::schema`]
/// definition. Decoding a value requires knowing its `EncodingKind` up
/// front (the byte stream itself carries no type tag) — exactly like the
/// teacher's typed key structs, where a field's Rust type, not a runtime
/// discriminant, determines how its bytes are read back.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum EncodingKind {
	Bool,
	I64,
	U64,
	F64,
	Str,
	Bytes,
	Ref,
	Uuid,
	Date,
	Enum,
}

/// A decoded field value. One variant per [`EncodingKind`], plus `Null`
/// for nullable simple fields with no value set.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum Value {
	Bool(bool),
	I64(i64),
	U64(u64),
	F64(f64),
	Str(String),
	Bytes(Vec<u8>),
	Ref(ObjId),
	Uuid(uuid::Uuid),
	Date(chrono::NaiveDate),
	Enum(u32),
	Null,
}

impl Value {
	pub fn kind(&self) -> Option<EncodingKind> {
		Some(match self {
			Value::Bool(_) => EncodingKind::Bool,
			Value::I64(_) => EncodingKind::I64,
			Value::U64(_) => EncodingKind::U64,
			Value::F64(_) => EncodingKind::F64,
			Value::Str(_) => EncodingKind::Str,
			Value::Bytes(_) => EncodingKind::Bytes,
			Value::Ref(_) => EncodingKind::Ref,
			Value::Uuid(_) => EncodingKind::Uuid,
			Value::Date(_) => EncodingKind::Date,
			Value::Enum(_) => EncodingKind::Enum,
			Value::Null => return None,
		})
	}
}

/// Encodes one non-null value. Use [`encode_nullable`] for an optional
/// simple field's on-disk form.
pub fn encode(v: &Value) -> Result<Vec<u8>> {
	let mut out = Vec::new();
	encode_into(v, &mut out)?;
	Ok(out)
}

pub fn encode_into(v: &Value, out: &mut Vec<u8>) -> Result<()> {
	match v {
		Value::Bool(b) => {
			let bytes = storekey::serialize(b).map_err(|e| Error::Codec(format!("bool: {e}")))?;
			out.extend_from_slice(&bytes);
		}
		Value::I64(i) => out.extend_from_slice(&signed::encode(*i)?),
		Value::U64(u) => varint::encode_into(*u, out),
		Value::F64(f) => out.extend_from_slice(&float::encode(*f)?),
		Value::Str(s) => string::encode_into(s, out),
		Value::Bytes(b) => bytes::encode_into(b, out),
		Value::Ref(id) => out.extend_from_slice(id.as_bytes()),
		Value::Uuid(u) => out.extend_from_slice(u.as_bytes()),
		Value::Date(d) => {
			let days = d.signed_duration_since(epoch()).num_days();
			out.extend_from_slice(&signed::encode(days)?);
		}
		Value::Enum(ord) => varint::encode_into(*ord as u64, out),
		Value::Null => {
			return Err(Error::Codec(
				"Null has no direct encoding; use encode_nullable".into(),
			))
		}
	}
	Ok(())
}

/// Decodes one value of the given kind starting at `buf[0]`, returning
/// the value and the number of bytes consumed.
pub fn decode(buf: &[u8], kind: EncodingKind) -> Result<(Value, usize)> {
	Ok(match kind {
		EncodingKind::Bool => {
			let byte = buf.get(..1).ok_or_else(|| Error::Codec("bool: empty".into()))?;
			let b: bool = storekey::deserialize(byte).map_err(|e| Error::Codec(format!("bool: {e}")))?;
			(Value::Bool(b), 1)
		}
		EncodingKind::I64 => {
			let (i, n) = signed::decode(buf)?;
			(Value::I64(i), n)
		}
		EncodingKind::U64 => {
			let (u, n) = varint::decode(buf)?;
			(Value::U64(u), n)
		}
		EncodingKind::F64 => {
			let (f, n) = float::decode(buf)?;
			(Value::F64(f), n)
		}
		EncodingKind::Str => {
			let (s, n) = string::decode(buf)?;
			(Value::Str(s), n)
		}
		EncodingKind::Bytes => {
			let (b, n) = bytes::decode(buf)?;
			(Value::Bytes(b), n)
		}
		EncodingKind::Ref => {
			let raw: [u8; 8] = buf
				.get(..8)
				.and_then(|s| s.try_into().ok())
				.ok_or_else(|| Error::Codec("ref: truncated".into()))?;
			(Value::Ref(ObjId::from_bytes(raw)), 8)
		}
		EncodingKind::Uuid => {
			let raw: [u8; 16] = buf
				.get(..16)
				.and_then(|s| s.try_into().ok())
				.ok_or_else(|| Error::Codec("uuid: truncated".into()))?;
			(Value::Uuid(uuid::Uuid::from_bytes(raw)), 16)
		}
		EncodingKind::Date => {
			let (days, n) = signed::decode(buf)?;
			let d = epoch()
				.checked_add_signed(chrono::Duration::days(days))
				.ok_or_else(|| Error::Codec("date: out of range".into()))?;
			(Value::Date(d), n)
		}
		EncodingKind::Enum => {
			let (ord, n) = varint::decode(buf)?;
			(Value::Enum(ord as u32), n)
		}
	})
}

/// Encodes a nullable simple field: a leading `0x00` discriminator for
/// `None` (so NULL sorts before every non-null encoding, whose
/// discriminator is `0x01`), followed by the value's own encoding.
pub fn encode_nullable(v: Option<&Value>) -> Result<Vec<u8>> {
	let mut out = Vec::new();
	match v {
		None => out.push(0x00),
		Some(v) => {
			out.push(0x01);
			encode_into(v, &mut out)?;
		}
	}
	Ok(out)
}

pub fn decode_nullable(buf: &[u8], kind: EncodingKind) -> Result<(Option<Value>, usize)> {
	match buf.first() {
		Some(0x00) => Ok((None, 1)),
		Some(0x01) => {
			let (v, n) = decode(&buf[1..], kind)?;
			Ok((Some(v), 1 + n))
		}
		_ => Err(Error::Codec("nullable: missing discriminator byte".into())),
	}
}

/// Encodes an ordered tuple of simple-field values, for composite index
/// keys: component encodings concatenated with no separator, each
/// self-delimiting on its own.
pub fn encode_tuple(values: &[Value]) -> Result<Vec<u8>> {
	let mut out = Vec::new();
	for v in values {
		encode_into(v, &mut out)?;
	}
	Ok(out)
}

pub fn decode_tuple(buf: &[u8], kinds: &[EncodingKind]) -> Result<(Vec<Value>, usize)> {
	let mut values = Vec::with_capacity(kinds.len());
	let mut offset = 0;
	for kind in kinds {
		let (v, n) = decode(&buf[offset..], *kind)?;
		values.push(v);
		offset += n;
	}
	Ok((values, offset))
}

#[cfg(test)]
mod tests {
	use super::*;

	fn roundtrip(v: Value) {
		let kind = v.kind().unwrap();
		let enc = encode(&v).unwrap();
		let (dec, n) = decode(&enc, kind).unwrap();
		assert_eq!(dec, v);
		assert_eq!(n, enc.len());
	}

	#[test]
	fn roundtrips_every_kind() {
		roundtrip(Value::Bool(true));
		roundtrip(Value::Bool(false));
		roundtrip(Value::I64(-42));
		roundtrip(Value::U64(42));
		roundtrip(Value::F64(3.5));
		roundtrip(Value::Str("hello".into()));
		roundtrip(Value::Bytes(vec![1, 2, 3]));
		roundtrip(Value::Ref(ObjId::compose(1, &[0; 7]).unwrap()));
		roundtrip(Value::Uuid(uuid::Uuid::nil()));
		roundtrip(Value::Date(chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()));
		roundtrip(Value::Enum(7));
	}

	#[test]
	fn nullable_sorts_null_first() {
		let null = encode_nullable(None).unwrap();
		let present = encode_nullable(Some(&Value::I64(i64::MIN))).unwrap();
		assert!(null < present);
	}

	#[test]
	fn tuple_roundtrips_and_is_concatenation() {
		let values = vec![Value::Str("a".into()), Value::I64(5), Value::Bool(true)];
		let kinds = [EncodingKind::Str, EncodingKind::I64, EncodingKind::Bool];
		let enc = encode_tuple(&values).unwrap();
		let (dec, n) = decode_tuple(&enc, &kinds).unwrap();
		assert_eq!(dec, values);
		assert_eq!(n, enc.len());
	}

	#[test]
	fn tuple_preserves_order_componentwise() {
		// ("a", 1) < ("a", 2) < ("b", 0)
		let a1 = encode_tuple(&[Value::Str("a".into()), Value::I64(1)]).unwrap();
		let a2 = encode_tuple(&[Value::Str("a".into()), Value::I64(2)]).unwrap();
		let b0 = encode_tuple(&[Value::Str("b".into()), Value::I64(0)]).unwrap();
		assert!(a1 < a2);
		assert!(a2 < b0);
	}
}
