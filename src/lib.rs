// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Task Reward Server - Custodial Reward Settlement Service
//!
//! Users complete daily tasks; once a proof verdict is accepted, the server
//! mints the task's reward into a custodial token vault it holds for the
//! user. Each (user, task, day) is rewarded at most once.
//!
//! ## Modules
//!
//! - `api` - HTTP API handlers (Axum)
//! - `auth` - Session token authentication and roles
//! - `blockchain` - Ledger adapter trait, EVM client and finality polling
//! - `custody` - Custodial key generation and encryption at rest
//! - `provisioning` - Per-user account and vault setup
//! - `settlement` - Reward settlement engine, balances and reconciliation
//! - `storage` - Reward database (redb) and balance cache
//! - `tasks` - Task catalog, proof verdicts and the completion ledger

pub mod api;
pub mod auth;
pub mod blockchain;
pub mod config;
pub mod custody;
pub mod error;
pub mod models;
pub mod provisioning;
pub mod settlement;
pub mod state;
pub mod storage;
pub mod tasks;
