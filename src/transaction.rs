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

//! Snapshot transactions and the commit/rollback protocol.

use std::sync::Arc;

use log::{debug, warn};
use parking_lot::RwLockWriteGuard;

use crate::db::{Database, Hook, HookDb};
use crate::overlay::OverlayedStore;
use crate::query::{PrefixCursor, QueryOptions};
use crate::store::Input;
use crate::{Error, Result, Value};

/// A snapshot transaction over a [`HookDb`].
///
/// Reads see the base store as of construction plus the transaction's own
/// writes; base writes made after construction stay invisible. `commit`
/// collapses the staged mutations to one per key and merges them atomically,
/// firing hooks for the keys that become visible; `rollback` discards the
/// overlay. Once committed or rolled back, every operation fails with
/// [`Error::ClosedTransaction`].
pub struct Transaction<'a> {
	db: &'a HookDb,
	values: OverlayedStore<Value>,
	hooks: OverlayedStore<Hook>,
	gate: Option<RwLockWriteGuard<'a, ()>>,
	closed: bool,
}

impl<'a> Transaction<'a> {
	pub(crate) fn new(db: &'a HookDb, gate: Option<RwLockWriteGuard<'a, ()>>) -> Self {
		Transaction {
			values: OverlayedStore::new(db.values.clone()),
			hooks: OverlayedStore::new(db.hooks.clone()),
			db,
			gate,
			closed: false,
		}
	}

	fn ensure_open(&self) -> Result<()> {
		if self.closed {
			Err(Error::ClosedTransaction)
		} else {
			Ok(())
		}
	}

	/// Stage `value` under `key`. Hooks do not fire until commit.
	pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
		self.ensure_open()?;
		self.values.put(Input::entry(key.to_vec(), value.to_vec()))?;
		Ok(())
	}

	/// Read through the transaction: own writes first, then the snapshot.
	///
	/// A key tombstoned by this transaction fails with [`Error::Deleted`],
	/// distinguishing "deleted by me" from "never existed".
	pub fn get(&self, key: &[u8]) -> Result<Value> {
		self.ensure_open()?;
		let output = self.values.get(Input::with_key(key.to_vec()))?;
		if output.deleted {
			return Err(Error::Deleted);
		}
		Ok(output.val)
	}

	/// Stage a deletion of `key`, returning the value it currently holds in
	/// this transaction's view.
	pub fn delete(&mut self, key: &[u8]) -> Result<Value> {
		self.ensure_open()?;
		let output = self.values.delete(Input::with_key(key.to_vec()))?;
		Ok(output.val)
	}

	/// Lazily iterate the values of all keys starting with `prefix` in this
	/// transaction's view. Tombstoned keys are skipped.
	pub fn query(&self, prefix: &[u8], options: QueryOptions) -> Result<TransactionQuery<'_, 'a>> {
		self.ensure_open()?;
		Ok(TransactionQuery {
			txn: self,
			cursor: PrefixCursor::new(prefix.to_vec(), options.reverse),
		})
	}

	/// Stage a hook registration. It reaches the base hook store at commit
	/// and does not fire for this transaction's own keys.
	pub fn append_hook<F>(&mut self, prefix: &[u8], hook: F) -> Result<()>
	where
		F: Fn(&[u8], &[u8]) -> bool + Send + Sync + 'static,
	{
		self.register_hook(prefix, Arc::new(hook))
	}

	fn register_hook(&mut self, prefix: &[u8], hook: Hook) -> Result<()> {
		self.ensure_open()?;
		self.hooks.put(Input::entry(prefix.to_vec(), hook))?;
		Ok(())
	}

	/// Stage the removal of the hook registered under `prefix`.
	pub fn remove_hook(&mut self, prefix: &[u8]) -> Result<()> {
		self.ensure_open()?;
		self.hooks.delete(Input::with_key(prefix.to_vec()))?;
		Ok(())
	}

	/// Merge the transaction into the base store.
	///
	/// The value overlay is collapsed to one mutation per key and replayed
	/// most recent first; hooks then fire for every newly visible key in
	/// that order; finally the staged hook registrations are replayed the
	/// same way. A failing phase reverses everything already applied and
	/// closes the transaction.
	pub fn commit(&mut self) -> Result<()> {
		self.ensure_open()?;
		self.closed = true;
		let _gate = match self.gate.take() {
			Some(gate) => gate,
			None => self.db.gate.write(),
		};

		let (merged, applied) = self
			.values
			.commit_to_origin("value")
			.map_err(|e| Error::Merge("value", Box::new(e)))?;
		debug!(
			target: "hookdb",
			"commit: merged {} value mutations ({} applied)",
			merged.len(),
			applied.len(),
		);

		for output in merged.iter().filter(|output| !output.deleted) {
			if let Err(e) = self.db.dispatch_hooks(&output.key, &output.val) {
				warn!(target: "hookdb", "commit: hook dispatch failed, reversing value merge: {}", e);
				self.values.reverse_or_fatal("value", &applied);
				return Err(Error::HookFailure(Box::new(e)));
			}
		}

		if let Err(e) = self.hooks.commit_to_origin("hook") {
			warn!(target: "hookdb", "commit: hook merge failed, reversing value merge: {}", e);
			self.values.reverse_or_fatal("value", &applied);
			return Err(Error::Merge("hook", Box::new(e)));
		}
		Ok(())
	}

	/// Discard every staged mutation and close the transaction.
	pub fn rollback(&mut self) -> Result<()> {
		self.ensure_open()?;
		self.closed = true;
		self.gate.take();
		Ok(())
	}
}

impl<'a> Database for Transaction<'a> {
	fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
		Transaction::put(self, key, value)
	}

	fn get(&self, key: &[u8]) -> Result<Value> {
		Transaction::get(self, key)
	}

	fn delete(&mut self, key: &[u8]) -> Result<Value> {
		Transaction::delete(self, key)
	}

	fn append_hook(&mut self, prefix: &[u8], hook: Hook) -> Result<()> {
		self.register_hook(prefix, hook)
	}

	fn remove_hook(&mut self, prefix: &[u8]) -> Result<()> {
		Transaction::remove_hook(self, prefix)
	}
}

/// A lazy prefix query over a transaction's private view.
pub struct TransactionQuery<'t, 'a> {
	txn: &'t Transaction<'a>,
	cursor: PrefixCursor,
}

impl<'t, 'a> Iterator for TransactionQuery<'t, 'a> {
	type Item = Result<Value>;

	fn next(&mut self) -> Option<Self::Item> {
		loop {
			let values = &self.txn.values;
			let item = self.cursor.advance(|seek| values.seek(seek))?;
			match values.visible(&item) {
				Ok(Some(val)) => return Some(Ok(val)),
				Ok(None) => continue,
				Err(e) => return Some(Err(e)),
			}
		}
	}
}
