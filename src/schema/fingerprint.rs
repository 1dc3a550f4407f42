//! Schema id: a content hash over a canonical traversal of a schema's
//! structure, independent of the version number it is eventually
//! assigned. Two schemas with identical structure have identical schema
//! id, which is how the registry (see [`crate::registry`]) recognizes
//! "this is the same schema we already have under version N".
//!
//! `sha2` is already part of this crate's dependency stack for its
//! stability properties (not, here, for anything cryptographic) — reused
//! rather than reaching for a faster but process-seeded hasher, since the
//! fingerprint must be reproducible across implementations and runs.

use sha2::{Digest, Sha256};

use crate::schema::field::{CollectionKind, FieldKind};
use crate::schema::Schema;

/// A 128-bit fingerprint, truncated from the full SHA-256 digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SchemaId(pub [u8; 16]);

impl std::fmt::Display for SchemaId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", hex::encode(self.0))
	}
}

impl std::fmt::Debug for SchemaId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "SchemaId({})", hex::encode(self.0))
	}
}

pub fn compute(schema: &Schema) -> SchemaId {
	let mut hasher = Sha256::new();
	for ty in schema.types.values() {
		hasher.update(b"type");
		hasher.update(ty.storage_id.to_be_bytes());
		hasher.update(ty.name.as_bytes());
		for field in ty.fields.values() {
			hasher.update(b"field");
			hasher.update(field.storage_id.to_be_bytes());
			hash_kind(&mut hasher, &field.kind);
		}
		for ix in ty.composite_indexes.values() {
			hasher.update(b"index");
			hasher.update(ix.storage_id.to_be_bytes());
			for fd in &ix.fields {
				hasher.update(fd.to_be_bytes());
			}
		}
	}
	let digest = hasher.finalize();
	let mut out = [0u8; 16];
	out.copy_from_slice(&digest[..16]);
	SchemaId(out)
}

fn hash_kind(hasher: &mut Sha256, kind: &FieldKind) {
	match kind {
		FieldKind::Simple { encoding, nullable, indexed } => {
			hasher.update(b"simple");
			hasher.update([*encoding as u8, *nullable as u8, *indexed as u8]);
		}
		FieldKind::Counter => hasher.update(b"counter"),
		FieldKind::Reference { policy, indexed } => {
			hasher.update(b"reference");
			hasher.update([*indexed as u8]);
			for t in &policy.allowed_types {
				hasher.update(t.to_be_bytes());
			}
		}
		FieldKind::Collection { kind, element, map_value, indexed } => {
			hasher.update(b"collection");
			hasher.update([
				match kind {
					CollectionKind::List => 0,
					CollectionKind::Set => 1,
					CollectionKind::Map => 2,
				},
				*indexed as u8,
			]);
			hash_kind(hasher, element);
			if let Some(mv) = map_value {
				hash_kind(hasher, mv);
			}
		}
	}
}
