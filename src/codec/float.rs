//! Order-preserving `f64` encoding, delegated to `storekey` (the
//! teacher's own dependency for order-preserving serialization,
//! `core/Cargo.toml:146`) in place of a hand-rolled sign-bit transform.
//! `f64` is always 8 bytes wide, so `decode` slices exactly that many
//! bytes off the front of the buffer before handing them to
//! `storekey::deserialize`.

use crate::err::{Error, Result};

pub fn encode(v: f64) -> Result<[u8; 8]> {
	let bytes = storekey::serialize(&v).map_err(|e| Error::Codec(format!("float: {e}")))?;
	bytes.try_into().map_err(|_| Error::Codec("float: unexpected encoded width".into()))
}

pub fn decode(buf: &[u8]) -> Result<(f64, usize)> {
	let bytes = buf.get(..8).ok_or_else(|| Error::Codec("float: truncated".into()))?;
	let v: f64 = storekey::deserialize(bytes).map_err(|e| Error::Codec(format!("float: {e}")))?;
	Ok((v, 8))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn roundtrips() {
		for v in [0.0, -0.0, 1.0, -1.0, f64::MIN, f64::MAX, 3.14159, -2.71828] {
			let enc = encode(v).unwrap();
			let (dec, _) = decode(&enc).unwrap();
			assert_eq!(dec.to_bits(), v.to_bits());
		}
	}

	#[test]
	fn preserves_order() {
		let values = [f64::MIN, -1e10, -1.0, -0.0001, 0.0, 0.0001, 1.0, 1e10, f64::MAX];
		for w in values.windows(2) {
			assert!(encode(w[0]).unwrap() < encode(w[1]).unwrap(), "{} should sort before {}", w[0], w[1]);
		}
	}
}
