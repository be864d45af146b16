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

//! Errors of the store and transaction operations.

/// Result type used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors returned by store and transaction operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
	/// The key or id does not resolve to a live entry.
	#[error("key not found")]
	KeyNotFound,
	/// Neither a non-empty key nor a non-zero id was supplied.
	#[error("entry (id, key) cannot be empty")]
	EmptyEntry,
	/// The key is tombstoned in the current transaction.
	#[error("deleted")]
	Deleted,
	/// The transaction has already been committed or rolled back.
	#[error("transaction is closed")]
	ClosedTransaction,
	/// A hook dispatched during commit failed. The value merge was reversed.
	#[error("hook dispatch: {0}")]
	HookFailure(Box<Error>),
	/// A commit replay phase failed. Already-applied mutations were reversed.
	#[error("cannot merge {0} overlay: {1}")]
	Merge(&'static str, Box<Error>),
}
