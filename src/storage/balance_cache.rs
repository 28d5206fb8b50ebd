// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! LRU cache for vault balance lookups.
//!
//! Caches the last ledger reading per account address for a short TTL so
//! repeated balance views don't hit the RPC node.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;

use crate::models::TokenAmount;

struct CacheEntry {
    balance: TokenAmount,
    inserted_at: Instant,
}

/// In-process TTL + LRU cache keyed by lowercase account address.
pub struct BalanceCache {
    cache: Mutex<LruCache<String, CacheEntry>>,
    ttl: Duration,
}

impl BalanceCache {
    /// - `capacity`: Max number of addresses to cache.
    /// - `ttl`: Time-to-live for each cache entry.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            )),
            ttl,
        }
    }

    /// Returns `None` if not cached or expired.
    pub fn get(&self, address: &str) -> Option<TokenAmount> {
        let key = address.to_lowercase();
        let mut cache = self.cache.lock().ok()?;
        if let Some(entry) = cache.get(&key) {
            if entry.inserted_at.elapsed() < self.ttl {
                return Some(entry.balance);
            }
            // Expired
            cache.pop(&key);
        }
        None
    }

    pub fn put(&self, address: &str, balance: TokenAmount) {
        let key = address.to_lowercase();
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(
                key,
                CacheEntry {
                    balance,
                    inserted_at: Instant::now(),
                },
            );
        }
    }

    pub fn invalidate(&self, address: &str) {
        let key = address.to_lowercase();
        if let Ok(mut cache) = self.cache.lock() {
            cache.pop(&key);
        }
    }
}
