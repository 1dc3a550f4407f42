use thiserror::Error;

use crate::schema::StorageId;

/// The error type returned by every fallible operation in this crate.
///
/// Every fallible operation in the core returns one of these kinds; the
/// core never silently repairs a divergence it discovers during normal
/// operation. Repair is exclusively a `jsck` responsibility.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
	/// An incoming schema conflicts with a stored version sharing a storage id.
	#[error("schema mismatch on storage id {storage_id}: {reason}")]
	SchemaMismatch {
		storage_id: StorageId,
		reason: String,
	},

	/// A storage id does not name a known object type in the transaction's schema.
	#[error("unknown object type storage id {0}")]
	UnknownType(StorageId),

	/// A storage id does not name a known field in the transaction's schema.
	#[error("unknown field storage id {0} on type {1}")]
	UnknownField(StorageId, StorageId),

	/// Access to an object id with no primary key.
	#[error("object {0} does not exist")]
	DeletedObject(crate::objid::ObjId),

	/// A reference value violates its field's type restriction.
	#[error("reference to {target} is not an allowed type for this field")]
	InvalidReference { target: crate::objid::ObjId },

	/// A reference value disallows dangling and its target does not exist.
	#[error("reference to {0} is dangling and this field forbids dangling references")]
	DanglingReference(crate::objid::ObjId),

	/// Delete blocked by an inverse-delete = EXCEPTION policy.
	#[error("object {target} cannot be deleted: referenced by {referrer} with exception policy")]
	ReferencedObject {
		target: crate::objid::ObjId,
		referrer: crate::objid::ObjId,
	},

	/// The transaction is closed, poisoned, or otherwise may no longer be used.
	#[error("stale transaction: {0}")]
	StaleTransaction(&'static str),

	/// The underlying engine reported an optimistic conflict; the caller must retry.
	#[error("transaction conflict, retry required")]
	Retry,

	/// Decoding failed at the primary-key level.
	#[error("corrupt database: {0}")]
	CorruptDatabase(String),

	/// Wire-level or in-memory codec failure on a single value.
	#[error("codec error: {0}")]
	Codec(String),

	/// The schema XML document could not be parsed or did not validate.
	#[error("invalid schema document: {0}")]
	InvalidSchemaDocument(String),

	/// An opaque failure surfaced by the underlying key-value engine.
	#[error("key-value engine error: {0}")]
	Kv(String),
}

pub type Result<T> = std::result::Result<T, Error>;
