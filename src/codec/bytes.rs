//! Order-preserving, self-delimiting raw-byte encoding. Same terminator
//! and escape scheme as `codec::string`, but without the UTF-8 round
//! trip — used directly for the `Bytes` encoding type and as the engine
//! underneath `codec::string`.

pub fn encode_into(content: &[u8], out: &mut Vec<u8>) {
	for &b in content {
		if b == 0x00 {
			out.push(0x00);
			out.push(0xff);
		} else {
			out.push(b);
		}
	}
	out.push(0x00);
}

pub fn encode(content: &[u8]) -> Vec<u8> {
	let mut out = Vec::with_capacity(content.len() + 1);
	encode_into(content, &mut out);
	out
}

/// Decodes raw bytes starting at `buf[0]`, returning the content and the
/// number of input bytes consumed (including the terminator).
pub fn decode(buf: &[u8]) -> crate::err::Result<(Vec<u8>, usize)> {
	let mut content = Vec::new();
	let mut i = 0;
	loop {
		match buf.get(i) {
			None => return Err(crate::err::Error::Codec("bytes: missing terminator".into())),
			Some(0x00) => match buf.get(i + 1) {
				Some(0xff) => {
					content.push(0x00);
					i += 2;
				}
				_ => {
					i += 1;
					break;
				}
			},
			Some(&b) => {
				content.push(b);
				i += 1;
			}
		}
	}
	Ok((content, i))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn roundtrips() {
		for v in [&b""[..], &b"abc"[..], &[0x00, 0x01, 0x00][..], &[0xff, 0xff][..]] {
			let enc = encode(v);
			let (dec, n) = decode(&enc).unwrap();
			assert_eq!(dec, v);
			assert_eq!(n, enc.len());
		}
	}

	#[test]
	fn preserves_order() {
		let values: [&[u8]; 4] = [&[], &[0x01], &[0x01, 0x00], &[0x02]];
		for w in values.windows(2) {
			assert!(encode(w[0]) < encode(w[1]));
		}
	}
}
