//! Order-preserving signed integer encoding, delegated to `storekey`
//! (the teacher's own dependency for this exact concern,
//! `core/Cargo.toml:146`) rather than hand-rolled sign-bit flipping.
//! `i64` is always 8 bytes wide, so `decode` slices exactly that many
//! bytes off the front of the buffer before handing them to
//! `storekey::deserialize` — no cursor-advance contract needed.

use crate::err::{Error, Result};

pub fn encode(v: i64) -> Result<[u8; 8]> {
	let bytes = storekey::serialize(&v).map_err(|e| Error::Codec(format!("signed int: {e}")))?;
	bytes
		.try_into()
		.map_err(|_| Error::Codec("signed int: unexpected encoded width".into()))
}

pub fn decode(buf: &[u8]) -> Result<(i64, usize)> {
	let bytes = buf.get(..8).ok_or_else(|| Error::Codec("signed int: truncated".into()))?;
	let v: i64 = storekey::deserialize(bytes).map_err(|e| Error::Codec(format!("signed int: {e}")))?;
	Ok((v, 8))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn roundtrips() {
		for v in [i64::MIN, -1, 0, 1, i64::MAX, -12345, 12345] {
			let enc = encode(v).unwrap();
			let (dec, n) = decode(&enc).unwrap();
			assert_eq!(dec, v);
			assert_eq!(n, 8);
		}
	}

	#[test]
	fn preserves_order() {
		let values = [i64::MIN, -1_000_000, -1, 0, 1, 1_000_000, i64::MAX];
		for w in values.windows(2) {
			assert!(encode(w[0]).unwrap() < encode(w[1]).unwrap());
		}
	}
}
