//! A typed, schema-aware object layer, secondary indexes, and a
//! consistency checker, layered on a pluggable ordered key-value store.
//!
//! The module layout mirrors the path data takes from a schema
//! definition down to raw bytes: [`schema`] describes object types and
//! fields; [`registry`] assigns them version numbers and keeps every
//! version reachable; [`codec`] and [`layout`] turn typed values and
//! storage ids into order-preserving byte keys; [`translator`] is the
//! single place object mutations become KV puts/removes/adjusts;
//! [`tx`] layers snapshot isolation, schema upgrade, and reference-policy
//! cascades on top; [`jsck`] walks the whole keyspace to find and repair
//! divergence between primary data and what it implies should exist.
//! [`database`] ties an [`kv::Engine`] and a [`registry::Registry`]
//! together into the one handle applications open transactions from.

pub mod cnf;
pub mod codec;
pub mod database;
pub mod err;
pub mod jsck;
pub mod kv;
pub mod layout;
pub mod objid;
pub mod registry;
pub mod schema;
pub mod translator;
pub mod tx;

pub use database::Database;
pub use err::{Error, Result};
