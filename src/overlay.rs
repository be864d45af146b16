// This file is part of Hookdb.

// Copyright (C) 2021 Parity Technologies (UK) Ltd.
// SPDX-License-Identifier: Apache-2.0

// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// 	http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The transactional overlay: a shadow store recording pending mutations
//! against an origin store under negative ids.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use log::warn;

use crate::store::{
	Command, IdAllocator, IndexedStore, Input, Item, Output, Seek, StoreInner,
};
use crate::{Error, Id, Result};

/// A transactional shadow over an [`IndexedStore`].
///
/// Writes allocate ids downward from `-1` and land in the shadow store. The
/// ordered index starts as a structural snapshot of the origin's index, so
/// reads see the origin as of construction plus the overlay's own writes;
/// origin writes made after construction stay invisible.
pub(crate) struct OverlayedStore<T> {
	origin: Arc<IndexedStore<T>>,
	shadow: StoreInner<T>,
	/// Whether the id represents a deletion (`true`) or an insertion
	/// (`false`) when the overlay is merged.
	dels: HashMap<Id, bool>,
	/// Whether the entry's key chain started from a key present in the
	/// origin snapshot. Decides how a missing key is treated when a
	/// tombstone is replayed: conflict if backed, no-op otherwise.
	snapshot_backed: HashMap<Id, bool>,
}

impl<T: Clone> OverlayedStore<T> {
	pub fn new(origin: Arc<IndexedStore<T>>) -> Self {
		let index = origin.clone_index();
		OverlayedStore {
			origin,
			shadow: StoreInner::with_index(IdAllocator::descending(), index),
			dels: HashMap::new(),
			snapshot_backed: HashMap::new(),
		}
	}

	fn chain_backed(&self, prior: Option<Id>) -> bool {
		match prior {
			Some(id) if id > 0 => true,
			Some(id) => self.snapshot_backed.get(&id).copied().unwrap_or(false),
			None => false,
		}
	}

	fn is_backed(&self, id: Id) -> bool {
		self.snapshot_backed.get(&id).copied().unwrap_or(false)
	}

	/// Stage an insertion under a fresh negative id.
	pub fn put(&mut self, input: Input<T>) -> Result<Output<T>> {
		let backed = self.chain_backed(self.shadow.index_id(&input.key));
		let output = self.shadow.put(input)?;
		self.dels.insert(output.id, false);
		self.snapshot_backed.insert(output.id, backed);
		Ok(output)
	}

	/// Read through the overlay.
	///
	/// Positive ids resolve against the origin, negative ids against the
	/// shadow. A key-only lookup goes through the overlay index and follows
	/// the sign of the id it finds; a positive id is read from the origin by
	/// that snapshot id, so later origin writes to the key stay invisible.
	/// The output's `deleted` flag reports a tombstone; no error is raised
	/// for it at this layer.
	pub fn get(&self, input: Input<T>) -> Result<Output<T>> {
		let mut output = if input.id > 0 {
			self.origin.exec(Command::Get, input)?
		} else if input.id < 0 {
			self.shadow.get(input)?
		} else if !input.key.is_empty() {
			let id = self.shadow.index_id(&input.key).ok_or(Error::KeyNotFound)?;
			if id > 0 {
				self.origin.exec(Command::Get, Input::with_id(id))?
			} else {
				self.shadow.get(Input::with_id(id))?
			}
		} else {
			return Err(Error::EmptyEntry);
		};
		output.deleted = self.dels.get(&output.id).copied().unwrap_or(false);
		Ok(output)
	}

	/// Stage a deletion: copy the currently visible value and synthesize a
	/// tombstone insertion carrying it. The overlay index now maps the key
	/// to the tombstone's fresh negative id.
	pub fn delete(&mut self, input: Input<T>) -> Result<Output<T>> {
		let resolved = if input.id > 0 {
			self.origin.exec(Command::Get, input)?
		} else if input.id < 0 {
			self.shadow.get(input)?
		} else if !input.key.is_empty() {
			let id = self.shadow.index_id(&input.key).ok_or(Error::KeyNotFound)?;
			if id > 0 {
				self.origin.exec(Command::Get, Input::with_id(id))?
			} else {
				self.shadow.get(Input::with_id(id))?
			}
		} else {
			return Err(Error::EmptyEntry);
		};

		let backed = resolved.id > 0 || self.is_backed(resolved.id);
		let mut output = self.shadow.put(Input::entry(resolved.key, resolved.val))?;
		self.dels.insert(output.id, true);
		self.snapshot_backed.insert(output.id, backed);
		output.deleted = true;
		Ok(output)
	}

	/// Resolve a positional probe against the overlay's ordered index.
	pub fn seek(&self, seek: &Seek) -> Option<Item> {
		self.shadow.seek(seek)
	}

	/// The value visible for an index item, or `None` when it is tombstoned.
	pub fn visible(&self, item: &Item) -> Result<Option<T>> {
		if self.dels.get(&item.id).copied().unwrap_or(false) {
			return Ok(None);
		}
		let output = if item.id > 0 {
			self.origin.exec(Command::Get, Input::with_id(item.id))?
		} else {
			self.shadow.get(Input::with_id(item.id))?
		};
		Ok(Some(output.val))
	}

	/// The mutation log: every shadow insertion in insertion order, rank 1
	/// upward (ids `-1`, `-2`, ...).
	pub fn scan(&self) -> Vec<Output<T>> {
		let mut log = Vec::new();
		let mut id = -1;
		while id != self.shadow.next_id() {
			let output = self
				.shadow
				.get(Input::with_id(id))
				.expect("shadow side tables are append-only, every allocated id is present; qed");
			log.push(Output { deleted: self.dels.get(&id).copied().unwrap_or(false), ..output });
			id -= 1;
		}
		log
	}

	/// Collapse the mutation log to at most one entry per key, keeping the
	/// most recent entry, ordered most recent first.
	pub fn dedup(log: Vec<Output<T>>) -> Vec<Output<T>> {
		let mut seen = HashSet::new();
		let mut kept = Vec::new();
		for output in log.into_iter().rev() {
			if seen.insert(output.key.clone()) {
				kept.push(output);
			}
		}
		kept
	}

	/// Replay deduped entries against the origin, returning the subset that
	/// was actually applied (in application order).
	///
	/// A tombstone whose key the origin does not hold collapses to a no-op
	/// when its chain is not snapshot-backed: the key only ever existed
	/// inside this overlay. A snapshot-backed tombstone missing from the
	/// origin is a conflict; the already-applied prefix is reversed and the
	/// error returned.
	pub fn merge(&self, name: &str, entries: &[Output<T>]) -> Result<Vec<Output<T>>> {
		let mut applied = Vec::with_capacity(entries.len());
		for output in entries {
			let result = if output.deleted {
				match self.origin.exec(Command::Delete, Input::with_key(output.key.clone())) {
					Err(Error::KeyNotFound) if !self.is_backed(output.id) => continue,
					result => result,
				}
			} else {
				self.origin.exec(
					Command::Put,
					Input::entry(output.key.clone(), output.val.clone()),
				)
			};
			match result {
				Ok(_) => applied.push(output.clone()),
				Err(error) => {
					warn!(
						target: "hookdb",
						"{} merge failed after {} of {} mutations, reversing: {}",
						name,
						applied.len(),
						entries.len(),
						error,
					);
					self.reverse_or_fatal(name, &applied);
					return Err(error);
				}
			}
		}
		Ok(applied)
	}

	/// Undo already-applied entries, most recently applied first.
	pub fn reverse(&self, applied: &[Output<T>]) -> Result<()> {
		for output in applied.iter().rev() {
			if output.deleted {
				self.origin.exec(
					Command::Put,
					Input::entry(output.key.clone(), output.val.clone()),
				)?;
			} else {
				self.origin.exec(Command::Delete, Input::with_key(output.key.clone()))?;
			}
		}
		Ok(())
	}

	/// Reverse, treating failure as fatal: a reversal that cannot complete
	/// leaves the origin inconsistent and further use is undefined.
	pub fn reverse_or_fatal(&self, name: &str, applied: &[Output<T>]) {
		if let Err(error) = self.reverse(applied) {
			panic!(
				"cannot reverse partially applied transaction: {}; the base {} store is inconsistent",
				error,
				name,
			);
		}
	}

	/// Apply the overlay to its origin: scan, dedup, replay. Returns the
	/// deduped entries in replay order together with the applied subset.
	pub fn commit_to_origin(&self, name: &str) -> Result<(Vec<Output<T>>, Vec<Output<T>>)> {
		let deduped = Self::dedup(self.scan());
		let applied = self.merge(name, &deduped)?;
		Ok((deduped, applied))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn base_with(entries: &[(&[u8], &str)]) -> Arc<IndexedStore<String>> {
		let store = Arc::new(IndexedStore::new());
		for (key, val) in entries {
			store
				.exec(Command::Put, Input::entry(key.to_vec(), val.to_string()))
				.unwrap();
		}
		store
	}

	fn get_base(store: &IndexedStore<String>, key: &[u8]) -> Result<String> {
		store.exec(Command::Get, Input::with_key(key.to_vec())).map(|o| o.val)
	}

	#[test]
	fn put_get_delete_roundtrip() {
		let origin = base_with(&[]);
		let mut overlay = OverlayedStore::new(origin);

		let output = overlay
			.put(Input::entry(b"key".to_vec(), "val".to_string()))
			.unwrap();
		assert_eq!(output.id, -1);

		let output = overlay.get(Input::with_key(b"key".to_vec())).unwrap();
		assert_eq!(output.val, "val");
		assert!(!output.deleted);

		let output = overlay.delete(Input::with_key(b"key".to_vec())).unwrap();
		assert_eq!(output.val, "val");
		assert!(output.deleted);

		// The tombstone still carries the copied value.
		let output = overlay.get(Input::with_key(b"key".to_vec())).unwrap();
		assert_eq!(output.val, "val");
		assert!(output.deleted);
	}

	#[test]
	fn reads_pass_through_to_the_origin_snapshot() {
		let origin = base_with(&[(b"color", "red")]);
		let overlay = OverlayedStore::new(origin.clone());

		let output = overlay.get(Input::with_key(b"color".to_vec())).unwrap();
		assert_eq!(output.val, "red");
		assert!(output.id > 0);

		// An origin overwrite after construction is invisible: the overlay
		// keeps reading the snapshot id.
		origin
			.exec(Command::Put, Input::entry(b"color".to_vec(), "blue".to_string()))
			.unwrap();
		let output = overlay.get(Input::with_key(b"color".to_vec())).unwrap();
		assert_eq!(output.val, "red");

		// A key inserted after construction is not in the snapshot at all.
		origin
			.exec(Command::Put, Input::entry(b"shade".to_vec(), "grey".to_string()))
			.unwrap();
		assert_eq!(
			overlay.get(Input::with_key(b"shade".to_vec())).unwrap_err(),
			Error::KeyNotFound,
		);
	}

	#[test]
	fn scan_returns_the_log_in_insertion_order() {
		let origin = base_with(&[(b"a", "1")]);
		let mut overlay = OverlayedStore::new(origin);
		overlay.put(Input::entry(b"b".to_vec(), "2".to_string())).unwrap();
		overlay.delete(Input::with_key(b"a".to_vec())).unwrap();
		overlay.put(Input::entry(b"b".to_vec(), "3".to_string())).unwrap();

		let log = overlay.scan();
		let shape: Vec<_> = log.iter().map(|o| (o.key.clone(), o.id, o.deleted)).collect();
		assert_eq!(
			shape,
			vec![
				(b"b".to_vec(), -1, false),
				(b"a".to_vec(), -2, true),
				(b"b".to_vec(), -3, false),
			],
		);
	}

	#[test]
	fn dedup_keeps_the_most_recent_entry_per_key() {
		let origin = base_with(&[]);
		let mut overlay = OverlayedStore::new(origin);
		overlay.put(Input::entry(b"k1".to_vec(), "old".to_string())).unwrap();
		overlay.put(Input::entry(b"k2".to_vec(), "other".to_string())).unwrap();
		overlay.put(Input::entry(b"k1".to_vec(), "new".to_string())).unwrap();

		let kept = OverlayedStore::dedup(overlay.scan());
		let shape: Vec<_> = kept.iter().map(|o| (o.key.clone(), o.val.clone())).collect();
		assert_eq!(
			shape,
			vec![(b"k1".to_vec(), "new".to_string()), (b"k2".to_vec(), "other".to_string())],
		);
	}

	#[test]
	fn merge_applies_the_collapsed_log() {
		let origin = base_with(&[(b"gone", "x")]);
		let mut overlay = OverlayedStore::new(origin.clone());
		overlay.put(Input::entry(b"kept".to_vec(), "v".to_string())).unwrap();
		overlay.delete(Input::with_key(b"gone".to_vec())).unwrap();

		let (deduped, applied) = overlay.commit_to_origin("value").unwrap();
		assert_eq!(deduped.len(), 2);
		assert_eq!(applied.len(), 2);
		assert_eq!(get_base(&origin, b"kept").unwrap(), "v");
		assert_eq!(get_base(&origin, b"gone").unwrap_err(), Error::KeyNotFound);
	}

	#[test]
	fn unbacked_tombstone_collapses_to_nothing() {
		let origin = base_with(&[]);
		let mut overlay = OverlayedStore::new(origin.clone());
		overlay.put(Input::entry(b"temp".to_vec(), "v".to_string())).unwrap();
		overlay.delete(Input::with_key(b"temp".to_vec())).unwrap();

		let (_, applied) = overlay.commit_to_origin("value").unwrap();
		assert!(applied.is_empty());
		assert_eq!(get_base(&origin, b"temp").unwrap_err(), Error::KeyNotFound);
	}

	#[test]
	fn backed_tombstone_conflict_reverses_the_applied_prefix() {
		let origin = base_with(&[(b"contested", "v")]);
		let mut overlay = OverlayedStore::new(origin.clone());
		overlay.delete(Input::with_key(b"contested".to_vec())).unwrap();
		overlay.put(Input::entry(b"fresh".to_vec(), "w".to_string())).unwrap();

		// A concurrent writer removes the key before the merge runs.
		origin
			.exec(Command::Delete, Input::with_key(b"contested".to_vec()))
			.unwrap();

		// Replay order is most recent first: the fresh put lands before the
		// tombstone conflicts, and must be reversed.
		assert_eq!(overlay.commit_to_origin("value").unwrap_err(), Error::KeyNotFound);
		assert_eq!(get_base(&origin, b"fresh").unwrap_err(), Error::KeyNotFound);
	}

	#[test]
	fn reverse_restores_deletions_and_removes_insertions() {
		let origin = base_with(&[(b"a", "1")]);
		let mut overlay = OverlayedStore::new(origin.clone());
		overlay.delete(Input::with_key(b"a".to_vec())).unwrap();
		overlay.put(Input::entry(b"b".to_vec(), "2".to_string())).unwrap();

		let (_, applied) = overlay.commit_to_origin("value").unwrap();
		assert_eq!(get_base(&origin, b"a").unwrap_err(), Error::KeyNotFound);
		assert_eq!(get_base(&origin, b"b").unwrap(), "2");

		overlay.reverse(&applied).unwrap();
		assert_eq!(get_base(&origin, b"a").unwrap(), "1");
		assert_eq!(get_base(&origin, b"b").unwrap_err(), Error::KeyNotFound);
	}
}
