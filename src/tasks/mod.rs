// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Task catalog, proof verdicts and the daily completion ledger.

pub mod catalog;
pub mod ledger;
pub mod proof;

pub use catalog::{CatalogError, TaskCatalog, TaskDefinition};
pub use ledger::{Reservation, ReserveOutcome, TaskLedger};
pub use proof::{ProofVerdict, DEFAULT_ACCEPTANCE_THRESHOLD};
