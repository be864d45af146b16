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

//! The indexed store: an ordered map `key -> id -> value` with stable,
//! monotonically allocated insertion ids.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

use parking_lot::RwLock;

use crate::{Error, Id, Key, Result};

/// One ordered-index entry: a key plus the id of its latest insertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Item {
	pub key: Key,
	pub id: Id,
}

/// Input of a single store command.
///
/// Lookup commands resolve their target by field priority: a non-zero `id`
/// wins over a non-empty `key`; supplying neither is an [`Error::EmptyEntry`].
#[derive(Debug, Clone)]
pub(crate) struct Input<T> {
	pub key: Key,
	pub val: Option<T>,
	pub id: Id,
}

impl<T> Input<T> {
	/// Target an entry by key.
	pub fn with_key(key: Key) -> Self {
		Input { key, val: None, id: 0 }
	}

	/// Target an entry by insertion id.
	pub fn with_id(id: Id) -> Self {
		Input { key: Key::new(), val: None, id }
	}

	/// A full key/value pair, for `put`.
	pub fn entry(key: Key, val: T) -> Self {
		Input { key, val: Some(val), id: 0 }
	}
}

/// Output of a store command: the affected entry and the id it resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Output<T> {
	pub key: Key,
	pub val: T,
	pub id: Id,
	pub deleted: bool,
}

/// A store command, executed under the store lock by `exec`/`batch_exec`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Command {
	Put,
	Get,
	Delete,
}

/// Monotonic id allocation. Base stores count up from `1`, transaction
/// overlays down from `-1`; zero is never allocated.
#[derive(Debug, Clone, Copy)]
pub(crate) struct IdAllocator {
	next: Id,
	step: i64,
}

impl IdAllocator {
	pub fn ascending() -> Self {
		IdAllocator { next: 1, step: 1 }
	}

	pub fn descending() -> Self {
		IdAllocator { next: -1, step: -1 }
	}

	/// The id the next allocation will return.
	pub fn peek(&self) -> Id {
		self.next
	}

	fn allocate(&mut self) -> Id {
		let id = self.next;
		self.next += self.step;
		id
	}
}

/// A positional probe into the ordered index.
#[derive(Debug, Clone)]
pub(crate) enum Seek {
	/// Least entry with key `>=` the bound.
	FirstAtOrAfter(Key),
	/// Least entry with key strictly greater than the bound.
	NextAfter(Key),
	/// Greatest entry with key `<=` the bound.
	LastAtOrBefore(Key),
	/// Greatest entry with key strictly less than the bound.
	PrevBefore(Key),
	/// Greatest entry in the index.
	Last,
}

/// Un-synchronized store state: the id-keyed side tables plus the ordered
/// index. [`IndexedStore`] wraps this in a lock; transaction overlays own a
/// private instance.
#[derive(Debug, Clone)]
pub(crate) struct StoreInner<T> {
	alloc: IdAllocator,
	keys: HashMap<Id, Key>,
	vals: HashMap<Id, T>,
	index: BTreeMap<Key, Id>,
}

impl<T: Clone> StoreInner<T> {
	pub fn new(alloc: IdAllocator) -> Self {
		Self::with_index(alloc, BTreeMap::new())
	}

	/// Build a store over an existing ordered index. Used by overlays, which
	/// start from a structural snapshot of their origin's index.
	pub fn with_index(alloc: IdAllocator, index: BTreeMap<Key, Id>) -> Self {
		StoreInner {
			alloc,
			keys: HashMap::new(),
			vals: HashMap::new(),
			index,
		}
	}

	pub fn apply(&mut self, cmd: Command, input: Input<T>) -> Result<Output<T>> {
		match cmd {
			Command::Put => self.put(input),
			Command::Get => self.get(input),
			Command::Delete => self.delete(input),
		}
	}

	/// Insert the pair under a freshly allocated id, replacing the index
	/// entry for the key if one exists.
	pub fn put(&mut self, input: Input<T>) -> Result<Output<T>> {
		if input.key.is_empty() {
			return Err(Error::EmptyEntry);
		}
		let val = match input.val {
			Some(val) => val,
			None => return Err(Error::EmptyEntry),
		};

		let id = self.alloc.allocate();
		self.keys.insert(id, input.key.clone());
		self.vals.insert(id, val.clone());
		// Replacing an existing key leaves the previous id's side table
		// entries in place; they stay reachable by id until deleted.
		self.index.insert(input.key.clone(), id);

		Ok(Output { key: input.key, val, id, deleted: false })
	}

	pub fn get(&self, input: Input<T>) -> Result<Output<T>> {
		if input.id != 0 {
			let key = self.keys.get(&input.id).cloned().ok_or(Error::KeyNotFound)?;
			let val = self.vals.get(&input.id).cloned().ok_or(Error::KeyNotFound)?;
			Ok(Output { key, val, id: input.id, deleted: false })
		} else if !input.key.is_empty() {
			let id = *self.index.get(&input.key).ok_or(Error::KeyNotFound)?;
			let val = self.vals.get(&id).cloned().ok_or(Error::KeyNotFound)?;
			Ok(Output { key: input.key, val, id, deleted: false })
		} else {
			Err(Error::EmptyEntry)
		}
	}

	/// Remove the entry from the ordered index and clear its side table
	/// slots, returning the value observed prior to removal.
	pub fn delete(&mut self, input: Input<T>) -> Result<Output<T>> {
		let (key, id) = if input.id != 0 {
			let key = self.keys.get(&input.id).cloned().ok_or(Error::KeyNotFound)?;
			self.index.remove(&key);
			(key, input.id)
		} else if !input.key.is_empty() {
			let id = self.index.remove(&input.key).ok_or(Error::KeyNotFound)?;
			(input.key, id)
		} else {
			return Err(Error::EmptyEntry);
		};

		self.keys.remove(&id);
		let val = self.vals.remove(&id).ok_or(Error::KeyNotFound)?;
		Ok(Output { key, val, id, deleted: true })
	}

	/// Resolve a positional probe against the ordered index.
	pub fn seek(&self, seek: &Seek) -> Option<Item> {
		let entry = match seek {
			Seek::FirstAtOrAfter(b) => self
				.index
				.range::<[u8], _>((Bound::Included(&b[..]), Bound::Unbounded))
				.next(),
			Seek::NextAfter(b) => self
				.index
				.range::<[u8], _>((Bound::Excluded(&b[..]), Bound::Unbounded))
				.next(),
			Seek::LastAtOrBefore(b) => self
				.index
				.range::<[u8], _>((Bound::Unbounded, Bound::Included(&b[..])))
				.next_back(),
			Seek::PrevBefore(b) => self
				.index
				.range::<[u8], _>((Bound::Unbounded, Bound::Excluded(&b[..])))
				.next_back(),
			Seek::Last => self.index.iter().next_back(),
		};
		entry.map(|(key, id)| Item { key: key.clone(), id: *id })
	}

	/// The id the index currently maps the key to, if any.
	pub fn index_id(&self, key: &[u8]) -> Option<Id> {
		self.index.get(key).copied()
	}

	/// The id the next insertion will be assigned.
	pub fn next_id(&self) -> Id {
		self.alloc.peek()
	}

	/// Structural snapshot of the ordered index.
	pub fn clone_index(&self) -> BTreeMap<Key, Id> {
		self.index.clone()
	}
}

/// An indexed store behind its own reader-writer lock.
///
/// The lock protects the ordered index and the id maps; the engine layers an
/// additional gate over the pair of base stores.
#[derive(Debug)]
pub(crate) struct IndexedStore<T> {
	inner: RwLock<StoreInner<T>>,
}

impl<T: Clone> IndexedStore<T> {
	pub fn new() -> Self {
		IndexedStore { inner: RwLock::new(StoreInner::new(IdAllocator::ascending())) }
	}

	/// Take the store lock and run one command. Reads share the lock;
	/// mutations take it exclusively.
	pub fn exec(&self, cmd: Command, input: Input<T>) -> Result<Output<T>> {
		match cmd {
			Command::Get => self.inner.read().get(input),
			Command::Put | Command::Delete => self.inner.write().apply(cmd, input),
		}
	}

	/// Take the store lock once and run `cmd` against every input, returning
	/// the successful outputs and the errors as two parallel sequences.
	pub fn batch_exec(
		&self,
		cmd: Command,
		inputs: Vec<Input<T>>,
	) -> (Vec<Output<T>>, Vec<Error>) {
		let mut inner = self.inner.write();
		let mut outputs = Vec::with_capacity(inputs.len());
		let mut errors = Vec::new();
		for input in inputs {
			match inner.apply(cmd, input) {
				Ok(output) => outputs.push(output),
				Err(error) => errors.push(error),
			}
		}
		(outputs, errors)
	}

	/// Read-only cursor handle over the ordered index.
	pub fn ordered_index(&self) -> OrderedIndex<'_, T> {
		OrderedIndex { store: self }
	}

	/// Structural snapshot of the ordered index, for transaction overlays.
	pub fn clone_index(&self) -> BTreeMap<Key, Id> {
		self.inner.read().clone_index()
	}
}

/// Read-only cursor access to a store's ordered index.
pub(crate) struct OrderedIndex<'a, T> {
	store: &'a IndexedStore<T>,
}

impl<'a, T: Clone> OrderedIndex<'a, T> {
	/// Resolve a positional probe under the store lock.
	pub fn seek(&self, seek: &Seek) -> Option<Item> {
		self.store.inner.read().seek(seek)
	}

	/// Fetch the entry an index item points at.
	pub fn hydrate(&self, item: &Item) -> Result<Output<T>> {
		self.store.inner.read().get(Input::with_id(item.id))
	}
}
