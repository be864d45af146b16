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

//! In-memory ordered key-value store with prefix hooks and snapshot transactions.
//!
//! Keys and values are opaque byte sequences; keys are totally ordered by
//! lexicographic byte comparison. Inserting a key synchronously fires every
//! hook registered under a proper prefix of that key, longest prefix first,
//! and a hook may remove itself by returning `true`.
//!
//! Transactions stage their writes in a private overlay layered over the base
//! store: reads see the base as of transaction start plus the transaction's
//! own writes. `commit` collapses the staged mutations to one per key and
//! merges them atomically, firing hooks for the keys that become visible;
//! `rollback` discards the overlay.
//!
//! # Example
//!
//! ```
//! use hookdb::HookDb;
//!
//! let db = HookDb::new();
//! db.append_hook(b"user:", |key: &[u8], _value: &[u8]| {
//! 	println!("new user record: {:?}", key);
//! 	false
//! }).unwrap();
//!
//! db.put(b"user:alice", b"42").unwrap();
//! assert_eq!(db.get(b"user:alice").unwrap(), b"42");
//! ```

#![warn(missing_docs)]

mod db;
mod error;
mod overlay;
mod query;
mod store;
mod subscribe;
mod transaction;

pub use db::{Database, Hook, HookDb};
pub use error::{Error, Result};
pub use query::{Query, QueryOptions};
pub use subscribe::{SubscribeOptions, Subscription};
pub use transaction::{Transaction, TransactionQuery};

/// Storage key. Must be non-empty.
pub type Key = Vec<u8>;

/// Storage value.
pub type Value = Vec<u8>;

/// Identifier of one insertion event.
///
/// Base stores allocate ids strictly increasing from `1`, transaction
/// overlays strictly decreasing from `-1`. Zero is reserved as "unspecified".
pub type Id = i64;
