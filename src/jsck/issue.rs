//! A single divergence jsck found between primary data and a derived
//! structure, paired with the one KV operation that corrects it.
//!
//! Grounded on the teacher's `kvs/tx.rs` range-scan idioms for how a scan
//! result maps onto a corrective write, and loosely on the
//! detect/repair split of `ds::Datastore`'s own maintenance passes: jsck
//! never mutates storage while detecting, so a report-only run and a
//! repair run observe byte-identical input.

use crate::err::Result;
use crate::kv::{Engine, Key, Value};

/// Where an [`Issue`] stands in its own lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IssueState {
	/// Found, not yet acted on.
	Detected,
	/// [`Issue::apply`] ran and the KV store was corrected.
	Applied,
	/// Surfaced to the caller without being corrected.
	Reported,
}

#[derive(Clone, Debug)]
enum Op {
	Put(Key, Value),
	RemoveKey(Key),
	/// No mechanical fix exists (e.g. an undecipherable primary record);
	/// `apply` only advances the state so the repair loop's contract
	/// still holds.
	Unfixable,
}

/// One discovered divergence. `description` is meant for a human log or
/// report; `apply` is the only way to act on it.
#[derive(Clone, Debug)]
pub struct Issue {
	description: String,
	op: Op,
	state: IssueState,
}

impl Issue {
	pub(crate) fn add(description: impl Into<String>, key: Key, value: Value) -> Self {
		Issue { description: description.into(), op: Op::Put(key, value), state: IssueState::Detected }
	}

	pub(crate) fn remove(description: impl Into<String>, key: Key) -> Self {
		Issue { description: description.into(), op: Op::RemoveKey(key), state: IssueState::Detected }
	}

	pub(crate) fn unfixable(description: impl Into<String>) -> Self {
		Issue { description: description.into(), op: Op::Unfixable, state: IssueState::Detected }
	}

	pub fn description(&self) -> &str {
		&self.description
	}

	pub fn state(&self) -> IssueState {
		self.state
	}

	/// Applies this issue's corrective operation against `engine`,
	/// transitioning `Detected -> Applied`.
	pub fn apply(&mut self, engine: &dyn Engine) -> Result<()> {
		match &self.op {
			Op::Put(key, value) => engine.put(key.clone(), value.clone())?,
			Op::RemoveKey(key) => engine.remove(key)?,
			Op::Unfixable => {}
		}
		self.state = IssueState::Applied;
		Ok(())
	}

	/// Marks this issue as surfaced without repairing it.
	pub(crate) fn mark_reported(&mut self) {
		self.state = IssueState::Reported;
	}
}
