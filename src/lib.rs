//! Receivable factoring contract
//!
//! A company issues a receivable order to its supplier, the supplier signs it
//! into a receivable, and the receivable then travels through acceptance,
//! transfer, discounting by a financial institution and final redemption.
//! [`contract::Contract`] is the transaction surface; everything below it is
//! usable on its own.

pub mod config;
pub mod contract;
pub mod entity;
pub mod error;
pub mod guard;
pub mod query;
pub mod receivable;
pub mod repository;
pub mod telemetry;
pub mod transition;
pub mod utils;

pub use contract::{Contract, Invocation, Response};
pub use error::{LedgerError, Result};
