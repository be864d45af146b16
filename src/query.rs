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

//! Prefix range iteration and the ancestor-prefix scan.

use parking_lot::RwLockReadGuard;
use smallvec::SmallVec;

use crate::store::{Item, OrderedIndex, Seek};
use crate::{Key, Result, Value};

/// Options accepted by [`crate::HookDb::query`] and
/// [`crate::Transaction::query`].
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryOptions {
	pub(crate) reverse: bool,
}

impl QueryOptions {
	/// Iterate in descending key order.
	pub fn reverse(mut self) -> Self {
		self.reverse = true;
		self
	}
}

/// The least key strictly above every key starting with `prefix`: the prefix
/// with its last byte incremented. `None` when the prefix is empty or its
/// last byte is `0xff`; callers fall back to a walk from the greatest key.
fn prefix_upper_bound(prefix: &[u8]) -> Option<Key> {
	let last = *prefix.last()?;
	if last == 0xff {
		return None;
	}
	let mut bound = prefix.to_vec();
	*bound.last_mut().expect("prefix checked non-empty above; qed") = last + 1;
	Some(bound)
}

/// A pull-based walk over the range of keys sharing a prefix.
///
/// Each `advance` issues one positional probe against the index, so the
/// cursor holds no borrow between steps and the consumer may abandon the
/// walk at any point.
pub(crate) struct PrefixCursor {
	prefix: Key,
	reverse: bool,
	pos: Option<Key>,
	entered: bool,
	done: bool,
}

impl PrefixCursor {
	pub fn new(prefix: Key, reverse: bool) -> Self {
		PrefixCursor { prefix, reverse, pos: None, entered: false, done: false }
	}

	fn next_seek(&self) -> Seek {
		match (&self.pos, self.reverse) {
			(None, false) => Seek::FirstAtOrAfter(self.prefix.clone()),
			(Some(at), false) => Seek::NextAfter(at.clone()),
			(None, true) => match prefix_upper_bound(&self.prefix) {
				Some(bound) => Seek::LastAtOrBefore(bound),
				None => Seek::Last,
			},
			(Some(at), true) => Seek::PrevBefore(at.clone()),
		}
	}

	/// Step the walk, returning the next item inside the prefix range.
	pub fn advance<F>(&mut self, mut lookup: F) -> Option<Item>
	where
		F: FnMut(&Seek) -> Option<Item>,
	{
		while !self.done {
			let item = match lookup(&self.next_seek()) {
				Some(item) => item,
				None => {
					self.done = true;
					return None;
				}
			};
			self.pos = Some(item.key.clone());

			if item.key.starts_with(&self.prefix) {
				self.entered = true;
				return Some(item);
			}
			if self.reverse && !self.entered && item.key.as_slice() >= self.prefix.as_slice() {
				// Still in the boundary region above the prefix range; the
				// upper bound itself need not match.
				continue;
			}
			self.done = true;
		}
		None
	}
}

/// A lazy sequence of values for keys sharing a prefix.
///
/// Holds the engine read lock until dropped; drain or drop it promptly, and
/// do not write to the engine from the owning thread while it is alive.
pub struct Query<'a> {
	pub(crate) _gate: RwLockReadGuard<'a, ()>,
	pub(crate) index: OrderedIndex<'a, Value>,
	pub(crate) cursor: PrefixCursor,
}

impl<'a> Iterator for Query<'a> {
	type Item = Result<Value>;

	fn next(&mut self) -> Option<Self::Item> {
		let index = &self.index;
		let item = self.cursor.advance(|seek| index.seek(seek))?;
		Some(index.hydrate(&item).map(|output| output.val))
	}
}

impl<'a, T: Clone> OrderedIndex<'a, T> {
	/// All index entries whose key is a prefix of `key`, longest prefix
	/// first.
	///
	/// Walks the index downward from the greatest key `<= key`. Non-prefix
	/// entries sharing the first byte are skipped; the walk stops once the
	/// first byte differs, since no shorter prefix can follow below that
	/// point.
	pub fn ancestors(&self, key: &[u8]) -> SmallVec<[Item; 4]> {
		let mut found = SmallVec::new();
		if key.is_empty() {
			return found;
		}
		let mut cursor = self.seek(&Seek::LastAtOrBefore(key.to_vec()));
		while let Some(item) = cursor {
			let below = Seek::PrevBefore(item.key.clone());
			if key.starts_with(&item.key) {
				found.push(item);
			} else if item.key.first() != key.first() {
				break;
			}
			cursor = self.seek(&below);
		}
		found
	}
}
