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

//! Channel-backed subscriptions over prefix hooks.

use crossbeam_channel::{bounded, Receiver, TrySendError};
use log::warn;

use crate::db::HookDb;
use crate::{Result, Value};

/// Options for [`HookDb::subscribe`].
#[derive(Debug, Clone, Copy)]
pub struct SubscribeOptions {
	once: bool,
	buf_size: usize,
}

impl Default for SubscribeOptions {
	fn default() -> Self {
		SubscribeOptions { once: false, buf_size: 1 }
	}
}

impl SubscribeOptions {
	/// Deliver a single event, then close the subscription.
	pub fn once(mut self) -> Self {
		self.once = true;
		self
	}

	/// Size of the channel buffer between the hook and the receiver.
	/// Defaults to 1.
	pub fn buf_size(mut self, size: usize) -> Self {
		self.buf_size = size;
		self
	}
}

/// The receiving half of a prefix subscription.
///
/// The backing hook unregisters itself once this handle is dropped (on the
/// first event delivered afterwards) or, for a once-subscription, after its
/// single delivery.
pub struct Subscription {
	rx: Receiver<Value>,
}

impl Subscription {
	/// Block until the next event. `None` once the subscription is closed.
	pub fn recv(&self) -> Option<Value> {
		self.rx.recv().ok()
	}

	/// Receive without blocking. `None` when no event is buffered.
	pub fn try_recv(&self) -> Option<Value> {
		self.rx.try_recv().ok()
	}
}

impl Iterator for Subscription {
	type Item = Value;

	fn next(&mut self) -> Option<Value> {
		self.rx.recv().ok()
	}
}

impl HookDb {
	/// Register a hook at `prefix` that forwards the values of matching puts
	/// into a bounded channel, and return the receiving half.
	///
	/// An event arriving while the buffer is full is dropped rather than
	/// blocking the writer.
	pub fn subscribe(&self, prefix: &[u8], options: SubscribeOptions) -> Result<Subscription> {
		let (tx, rx) = bounded(options.buf_size);
		let once = options.once;
		self.append_hook(prefix, move |_key: &[u8], value: &[u8]| {
			match tx.try_send(value.to_vec()) {
				Ok(()) => once,
				Err(TrySendError::Full(_)) => {
					warn!(target: "hookdb", "subscription buffer full, dropping event");
					false
				}
				Err(TrySendError::Disconnected(_)) => true,
			}
		})?;
		Ok(Subscription { rx })
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn matching_puts_are_delivered_in_order() {
		let db = HookDb::new();
		let sub = db.subscribe(b"USER", SubscribeOptions::default().buf_size(8)).unwrap();

		db.put(b"USER#101", b"Taro").unwrap();
		db.put(b"GAME#201", b"minesuper").unwrap();
		db.put(b"USER#102", b"Hanako").unwrap();

		assert_eq!(sub.try_recv().unwrap(), b"Taro");
		assert_eq!(sub.try_recv().unwrap(), b"Hanako");
		assert!(sub.try_recv().is_none());
	}

	#[test]
	fn a_once_subscription_closes_after_one_event() {
		let db = HookDb::new();
		let mut sub = db.subscribe(b"USER", SubscribeOptions::default().once()).unwrap();

		db.put(b"USER#101", b"Taro").unwrap();
		db.put(b"USER#102", b"Hanako").unwrap();

		assert_eq!(sub.next().unwrap(), b"Taro");
		// The hook removed itself after the first delivery, dropping the
		// sending half: the channel is closed.
		assert!(sub.next().is_none());
	}

	#[test]
	fn a_full_buffer_drops_events_instead_of_blocking() {
		let db = HookDb::new();
		let sub = db.subscribe(b"k", SubscribeOptions::default().buf_size(1)).unwrap();

		db.put(b"k1", b"first").unwrap();
		db.put(b"k2", b"second").unwrap();

		assert_eq!(sub.try_recv().unwrap(), b"first");
		assert!(sub.try_recv().is_none());
	}

	#[test]
	fn dropping_the_subscription_unregisters_the_hook() {
		let db = HookDb::new();
		let sub = db.subscribe(b"k", SubscribeOptions::default()).unwrap();
		drop(sub);

		// The next matching put hits the disconnected channel and removes
		// the hook; the prefix is then free again.
		db.put(b"k1", b"v").unwrap();
		assert_eq!(db.remove_hook(b"k").unwrap_err(), crate::Error::KeyNotFound);
	}
}
