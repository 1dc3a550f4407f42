//! Field definitions.
//!
//! A field's [`FieldKind`] is a tagged variant carrying the per-kind
//! payload, dispatched on with a single `match` throughout the
//! translator — spec.md §9 calls out a visitor with one method per kind
//! as the wrong shape here, since the on-disk taxonomy is itself a closed
//! set of five kinds.

use crate::codec::EncodingKind;
use crate::schema::StorageId;

/// What happens to a referrer when the object it references is deleted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InverseDelete {
	/// The referrer itself is deleted (depth-first, cycle-safe cascade).
	Delete,
	/// The reference is cleared (set to null, or removed from a collection).
	Unreference,
	/// The delete is refused with `ReferencedObject`.
	Exception,
}

/// Reference-field policy, per spec.md §3 "Reference".
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReferencePolicy {
	/// Object types this reference may point at; empty means unrestricted.
	pub allowed_types: Vec<StorageId>,
	/// Deleting the object holding this field also deletes its target.
	pub forward_delete: bool,
	/// What happens to this field when its target is deleted.
	pub inverse_delete: InverseDelete,
	/// Whether the field may hold a reference to a nonexistent object.
	pub allow_dangling: bool,
}

impl Default for ReferencePolicy {
	fn default() -> Self {
		ReferencePolicy {
			allowed_types: Vec::new(),
			forward_delete: false,
			inverse_delete: InverseDelete::Exception,
			allow_dangling: false,
		}
	}
}

/// A collection field's shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CollectionKind {
	/// Ordered, integer-indexed.
	List,
	/// Sorted, unique elements.
	Set,
	/// Sorted by key.
	Map,
}

/// The tagged variant at the center of the translator's dispatch.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum FieldKind {
	/// Holds one value of `encoding`.
	Simple { encoding: EncodingKind, nullable: bool, indexed: bool },
	/// Holds one mergeable signed 64-bit integer; never indexed, never null.
	Counter,
	/// A simple field restricted to `EncodingKind::Ref`, with delete policy.
	Reference { policy: ReferencePolicy, indexed: bool },
	/// An ordered/unique/keyed collection. `element` (and, for maps,
	/// `map_value`) describe the per-element simple field; each may
	/// independently be indexed.
	Collection {
		kind: CollectionKind,
		element: Box<FieldKind>,
		/// Present only when `kind == Map`: the value field alongside
		/// `element`, which in that case is the map's key field.
		map_value: Option<Box<FieldKind>>,
		indexed: bool,
	},
}

impl FieldKind {
	/// Whether this field kind admits concurrent merge semantics rather
	/// than plain overwrite. Only counters do (spec.md invariant 5).
	pub fn is_mergeable(&self) -> bool {
		matches!(self, FieldKind::Counter)
	}

	pub fn is_indexed(&self) -> bool {
		match self {
			FieldKind::Simple { indexed, .. } => *indexed,
			FieldKind::Counter => false,
			FieldKind::Reference { indexed, .. } => *indexed,
			FieldKind::Collection { indexed, .. } => *indexed,
		}
	}
}

/// One field of an [`crate::schema::ObjectType`].
#[derive(Clone, Debug, PartialEq)]
pub struct FieldDef {
	pub storage_id: StorageId,
	pub name: String,
	pub kind: FieldKind,
}

impl FieldDef {
	/// Two field definitions sharing a storage id across schema versions
	/// are compatible iff they agree on semantic kind and, for indexed
	/// fields, on encoding — spec.md invariant 6. A field may freely
	/// change its indexed-ness, its name, or (for references) its allowed
	/// types and delete policy across versions.
	pub fn is_compatible_with(&self, other: &FieldDef) -> bool {
		use FieldKind::*;
		match (&self.kind, &other.kind) {
			(Simple { encoding: a, .. }, Simple { encoding: b, .. }) => a == b,
			(Counter, Counter) => true,
			(Reference { .. }, Reference { .. }) => true,
			(
				Collection { kind: ak, element: ae, map_value: amv, .. },
				Collection { kind: bk, element: be, map_value: bmv, .. },
			) => {
				ak == bk
					&& ae.is_compatible_kind(be)
					&& match (amv, bmv) {
						(Some(a), Some(b)) => a.is_compatible_kind(b),
						(None, None) => true,
						_ => false,
					}
			}
			_ => false,
		}
	}
}

impl FieldKind {
	fn is_compatible_kind(&self, other: &FieldKind) -> bool {
		use FieldKind::*;
		match (self, other) {
			(Simple { encoding: a, .. }, Simple { encoding: b, .. }) => a == b,
			(Reference { .. }, Reference { .. }) => true,
			_ => false,
		}
	}
}
