//! # Burrow Engine
//!
//! The ordered, transactional storage engine underlying BurrowDB.
//!
//! This crate provides:
//! - An [`Env`] holding named trees behind a single-writer / multi-reader
//!   transaction model
//! - Ordered trees with lexical, reverse-lexical, and native-integer key
//!   orders, plus sorted duplicate values
//! - Durability through a checksummed commit log and atomic checkpoint
//!   snapshots
//! - [`Cursor`]s for ordered iteration
//!
//! The typed layer (`burrow_core`) consumes this crate exclusively through
//! the types re-exported here.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod catalog;
mod cursor;
mod env;
mod error;
mod flags;
mod log;
mod sort;
mod tree;
mod txn;

pub use catalog::Dbi;
pub use cursor::{Cursor, Pair};
pub use env::{Env, EnvOptions, Geometry, Stat};
pub use error::{EngineError, EngineResult};
pub use flags::{PutFlags, RemoveMode};
pub use sort::SortOrder;
pub use tree::{DupOptions, PutOutcome, Tree, TreeOptions, TreeStat};
pub use txn::{RoTxn, RwTxn};
