//! Per-wallet transaction index over an ordered key/value store.
//!
//! The index tracks every transaction touching a wallet, the coins it owns,
//! and the historical links between them: insertion, confirmation and
//! unconfirmation across reorganizations, recursive removal of conflicting
//! spenders, balance computation, and range queries by height, time, and
//! account.

#![deny(rust_2018_idioms)]
#![deny(non_upper_case_globals)]
#![deny(non_camel_case_types)]
#![deny(non_snake_case)]
#![deny(unused_mut)]

pub mod cache;
pub mod constants;
pub mod db;
pub mod events;
pub mod lock;
pub mod model;
pub mod params;
pub mod repository;

pub use events::{Event, EventSink};
pub use model::{AddOutcome, Balance, PathInfo, RangeOpts, TxRecord};
pub use params::Params;
pub use repository::{PathResolver, ScriptVerifier, TxIndex};
