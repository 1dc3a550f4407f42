//! Order-preserving, self-delimiting string encoding: a `0x00` terminator
//! with any literal `0x00` byte inside the content escaped as `0x00 0xff`.
//! A bare `0x00` (not followed by `0xff`) always means "end of string", so
//! `"a"` sorts before `"ab"` sorts before `"b"`, and a string that is a
//! strict prefix of another always sorts first.

pub fn encode_into(s: &str, out: &mut Vec<u8>) {
	super::bytes::encode_into(s.as_bytes(), out)
}

pub fn encode(s: &str) -> Vec<u8> {
	super::bytes::encode(s.as_bytes())
}

/// Decodes a string starting at `buf[0]`, returning the string and the
/// number of bytes consumed (including the terminator).
pub fn decode(buf: &[u8]) -> crate::err::Result<(String, usize)> {
	let (content, n) = super::bytes::decode(buf)?;
	let s = String::from_utf8(content)
		.map_err(|e| crate::err::Error::Codec(format!("string: invalid utf8: {e}")))?;
	Ok((s, n))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn roundtrips() {
		for s in ["", "a", "ab", "hello world", "has\0a null byte", "\0\0\0"] {
			let enc = encode(s);
			let (dec, n) = decode(&enc).unwrap();
			assert_eq!(dec, s);
			assert_eq!(n, enc.len());
		}
	}

	#[test]
	fn preserves_order() {
		let values = ["", "a", "ab", "abc", "b", "ba"];
		for w in values.windows(2) {
			assert!(encode(w[0]) < encode(w[1]), "{:?} should sort before {:?}", w[0], w[1]);
		}
	}

	#[test]
	fn prefix_then_terminator_sorts_first() {
		// A string followed immediately by more content must sort after
		// the bare string, even when the next component starts with 0x00.
		assert!(encode("a") < encode("aa"));
	}

	#[test]
	fn is_self_delimiting_when_concatenated() {
		let mut buf = Vec::new();
		encode_into("foo", &mut buf);
		encode_into("bar", &mut buf);
		let (first, n) = decode(&buf).unwrap();
		assert_eq!(first, "foo");
		let (second, _) = decode(&buf[n..]).unwrap();
		assert_eq!(second, "bar");
	}
}
