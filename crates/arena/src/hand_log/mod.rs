//! Per-player hand history.
//!
//! [`HandAssembler`] turns a session's event stream into completed hands and
//! [`HandLogStore`] appends them to the player's log file.

pub mod assembler;
pub mod store;

pub use assembler::{HandAssembler, HandRecord, HandSummary, LoggedAction, PendingHand, RecordContext};
pub use store::{HandLogError, HandLogStore};
