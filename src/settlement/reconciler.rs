// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Reward Reconciler
//!
//! Background task that settles rewards whose finality was not known when
//! the request returned, and frees reservations abandoned before a mint
//! was submitted.
//!
//! Every `interval` (default 30 s) it:
//! 1. Releases pending reservations older than the reservation timeout that
//!    have no transaction.
//! 2. Polls each submitted pending reward once and commits the final ones.
//!
//! Mints are never resubmitted here.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::engine::RewardSettlementEngine;

/// Default interval between reconciliation passes.
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(30);

pub struct Reconciler {
    engine: Arc<RewardSettlementEngine>,
    interval: Duration,
}

impl Reconciler {
    pub fn new(engine: Arc<RewardSettlementEngine>) -> Self {
        Self {
            engine,
            interval: DEFAULT_RECONCILE_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// ```rust,ignore
    /// tokio::spawn(reconciler.run(shutdown.clone()));
    /// ```
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Reward reconciler starting"
        );

        loop {
            if shutdown.is_cancelled() {
                info!("Reward reconciler shutting down");
                return;
            }

            self.step().await;

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {},
                _ = shutdown.cancelled() => {
                    info!("Reward reconciler shutting down");
                    return;
                }
            }
        }
    }

    async fn step(&self) {
        match self.engine.reconcile().await {
            Ok(report) => {
                if report.swept_reservations + report.confirmed + report.reverted + report.errors > 0 {
                    info!(
                        swept = report.swept_reservations,
                        confirmed = report.confirmed,
                        reverted = report.reverted,
                        still_pending = report.still_pending,
                        errors = report.errors,
                        "Reconciliation pass finished"
                    );
                }
            }
            Err(e) => warn!(error = %e, "Reconciliation pass failed"),
        }
    }
}
