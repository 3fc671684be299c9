//! Linkability scoring for shielded-pool flows.
//!
//! Pairs shields with deshields by amount, timing and amount rarity, and finds
//! large shields withdrawn as batches of identical deshields.

pub mod batch;
pub mod config;
pub mod core;
pub mod db;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod linkability;
pub mod rarity;
pub mod signals;
pub mod units;
pub mod watch;

pub use engine::LinkabilityEngine;
pub use error::EngineError;
