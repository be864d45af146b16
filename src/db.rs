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

//! The engine: a value store and a hook store behind one reader-writer lock.

use std::sync::Arc;

use log::{debug, trace};
use parking_lot::RwLock;

use crate::query::{PrefixCursor, Query, QueryOptions};
use crate::store::{Command, IndexedStore, Input};
use crate::transaction::Transaction;
use crate::{Result, Value};

/// Callback fired for every committed key the registered prefix matches.
/// Returning `true` removes the registration.
///
/// A hook must not call back into the engine: dispatch runs under the engine
/// write lock and re-entry deadlocks. Registering hooks from inside a hook
/// is not detected.
pub type Hook = Arc<dyn Fn(&[u8], &[u8]) -> bool + Send + Sync>;

/// The operations shared by [`HookDb`] and [`Transaction`].
///
/// Callers pick the object: the engine applies every operation immediately,
/// a transaction stages them until commit.
pub trait Database {
	/// Insert `value` under `key`.
	fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()>;

	/// Fetch the value stored under `key`.
	fn get(&self, key: &[u8]) -> Result<Value>;

	/// Remove `key`, returning the value it held.
	fn delete(&mut self, key: &[u8]) -> Result<Value>;

	/// Register `hook` under `prefix`, replacing any previous registration
	/// at that prefix.
	fn append_hook(&mut self, prefix: &[u8], hook: Hook) -> Result<()>;

	/// Drop the hook registered under `prefix`.
	fn remove_hook(&mut self, prefix: &[u8]) -> Result<()>;
}

/// In-memory ordered key-value store with prefix hooks and snapshot
/// transactions.
///
/// Cloning is cheap and clones share the same underlying store.
#[derive(Clone)]
pub struct HookDb {
	pub(crate) values: Arc<IndexedStore<Value>>,
	pub(crate) hooks: Arc<IndexedStore<Hook>>,
	pub(crate) gate: Arc<RwLock<()>>,
}

impl Default for HookDb {
	fn default() -> Self {
		Self::new()
	}
}

impl HookDb {
	/// Create an empty engine.
	pub fn new() -> Self {
		HookDb {
			values: Arc::new(IndexedStore::new()),
			hooks: Arc::new(IndexedStore::new()),
			gate: Arc::new(RwLock::new(())),
		}
	}

	/// Insert `value` under `key`, then synchronously fire every hook whose
	/// prefix is a proper prefix of `key`, longest prefix first.
	pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
		let _gate = self.gate.write();
		trace!(target: "hookdb", "put {:?} ({} bytes)", key, value.len());
		self.values
			.exec(Command::Put, Input::entry(key.to_vec(), value.to_vec()))?;
		self.dispatch_hooks(key, value)
	}

	/// Fetch the value stored under `key`.
	pub fn get(&self, key: &[u8]) -> Result<Value> {
		let _gate = self.gate.read();
		let output = self.values.exec(Command::Get, Input::with_key(key.to_vec()))?;
		Ok(output.val)
	}

	/// Remove `key`, returning the value it held.
	pub fn delete(&self, key: &[u8]) -> Result<Value> {
		let _gate = self.gate.write();
		trace!(target: "hookdb", "delete {:?}", key);
		let output = self.values.exec(Command::Delete, Input::with_key(key.to_vec()))?;
		Ok(output.val)
	}

	/// Lazily iterate the values of all keys starting with `prefix`, in
	/// ascending key order (descending with [`QueryOptions::reverse`]).
	///
	/// The returned iterator holds the engine read lock until it is dropped.
	pub fn query(&self, prefix: &[u8], options: QueryOptions) -> Query<'_> {
		Query {
			_gate: self.gate.read(),
			index: self.values.ordered_index(),
			cursor: PrefixCursor::new(prefix.to_vec(), options.reverse),
		}
	}

	/// Register a hook fired for every key inserted under a proper extension
	/// of `prefix`. Re-registering at the same prefix replaces the previous
	/// hook.
	pub fn append_hook<F>(&self, prefix: &[u8], hook: F) -> Result<()>
	where
		F: Fn(&[u8], &[u8]) -> bool + Send + Sync + 'static,
	{
		self.register_hook(prefix, Arc::new(hook))
	}

	pub(crate) fn register_hook(&self, prefix: &[u8], hook: Hook) -> Result<()> {
		let _gate = self.gate.write();
		trace!(target: "hookdb", "append hook at {:?}", prefix);
		self.hooks.exec(Command::Put, Input::entry(prefix.to_vec(), hook))?;
		Ok(())
	}

	/// Drop the hook registered under `prefix`.
	pub fn remove_hook(&self, prefix: &[u8]) -> Result<()> {
		let _gate = self.gate.write();
		trace!(target: "hookdb", "remove hook at {:?}", prefix);
		self.hooks.exec(Command::Delete, Input::with_key(prefix.to_vec()))?;
		Ok(())
	}

	/// Open a snapshot transaction.
	///
	/// The engine write lock is only taken at commit; concurrent committers
	/// are not detected and the last writer wins.
	pub fn transaction(&self) -> Transaction<'_> {
		Transaction::new(self, None)
	}

	/// Open a snapshot transaction that takes the engine write lock now and
	/// holds it until commit or rollback, blocking all other work for
	/// serializable-under-contention semantics.
	pub fn transaction_with_lock(&self) -> Transaction<'_> {
		let guard = self.gate.write();
		Transaction::new(self, Some(guard))
	}

	/// Fire every hook whose prefix is a proper prefix of `key`, longest
	/// first. Must be called with the engine write lock held.
	///
	/// The ancestor scan itself is read-only over the hook index; a handler
	/// returning `true` has its entry deleted by id as part of the dispatch.
	pub(crate) fn dispatch_hooks(&self, key: &[u8], value: &[u8]) -> Result<()> {
		let index = self.hooks.ordered_index();
		for item in index.ancestors(key) {
			if item.key.len() == key.len() {
				// An exact match is not a proper prefix.
				continue;
			}
			let hook = index.hydrate(&item)?.val;
			trace!(target: "hookdb", "hook at {:?} fires for {:?}", item.key, key);
			if (hook.as_ref())(key, value) {
				debug!(target: "hookdb", "hook at {:?} removed itself", item.key);
				self.hooks.exec(Command::Delete, Input::with_id(item.id))?;
			}
		}
		Ok(())
	}
}

impl Database for HookDb {
	fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
		HookDb::put(self, key, value)
	}

	fn get(&self, key: &[u8]) -> Result<Value> {
		HookDb::get(self, key)
	}

	fn delete(&mut self, key: &[u8]) -> Result<Value> {
		HookDb::delete(self, key)
	}

	fn append_hook(&mut self, prefix: &[u8], hook: Hook) -> Result<()> {
		self.register_hook(prefix, hook)
	}

	fn remove_hook(&mut self, prefix: &[u8]) -> Result<()> {
		HookDb::remove_hook(self, prefix)
	}
}
