//! # BurrowDB
//!
//! A typed, safe collection layer over the Burrow storage engine.
//!
//! A [`Database`] presents an engine environment as a set of named
//! [`Collection`]s with strict read/write transaction semantics:
//!
//! - Zero-copy [`Value`] views that cannot outlive the snapshot or
//!   transaction that produced them
//! - A change-hook pipeline on every collection, through which the
//!   secondary-[`Index`] subsystem keeps itself consistent inside the
//!   mutating transaction
//! - A [`Collatable`] order-preserving encoding so compound index keys
//!   sort correctly under the engine's plain byte comparator
//!
//! ```rust,ignore
//! use burrow_core::{CollectionTransaction, Database, DatabaseOptions};
//!
//! let db = Database::open(Path::new("my_db"), DatabaseOptions::default())?;
//! let stuff = db.collection("stuff")?;
//!
//! let txn = db.begin_transaction()?;
//! let view = CollectionTransaction::new(&stuff, &txn)?;
//! view.put("foo", "I am the value of foo")?;
//! drop(view);
//! txn.commit()?;
//!
//! let snap = db.begin_snapshot()?;
//! let view = CollectionSnapshot::new(&stuff, &snap)?;
//! assert_eq!(view.get("foo")?, "I am the value of foo");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod collatable;
mod collection;
mod crud;
mod cursor;
mod database;
mod datum;
mod error;
mod index;
mod scoped;
mod stats;
mod txn;
mod value;

pub use collatable::{Collatable, Item, Items};
pub use collection::{
    Change, ChangeHook, Collection, CollectionOptions, HookOutcome, KeySort, ValueSort,
};
pub use cursor::{Cursor, Pairs, PairsReversed};
pub use database::{Database, DatabaseOptions, DatabaseStat};
pub use datum::Datum;
pub use error::{Error, Result};
pub use index::{Emitter, Index, IndexerFn};
pub use scoped::{CollectionSnapshot, CollectionTransaction};
pub use stats::{DatabaseStats, StatsSnapshot};
pub use txn::{Snapshot, Transaction};
pub use value::Value;

pub use burrow_engine::{Geometry, PutFlags, RemoveMode, TreeStat as CollectionStat};
