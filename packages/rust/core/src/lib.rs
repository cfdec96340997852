//! Core pipeline logic for foodprint.
//!
//! This crate ties together ingredient decomposition, category resolution,
//! and impact aggregation into the end-to-end ledger-to-summary workflow
//! (see [`pipeline`]).

pub mod categorize;
pub mod decompose;
pub mod impact;
pub mod ledger;
pub mod pipeline;
pub mod units;
