// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! Session tokens are issued by the identity provider and sent as
//! `Authorization: Bearer <JWT>`.
//!
//! - `sub` (or the older `uid`) is the canonical user id
//! - `role` selects [`Role::Admin`] or [`Role::Client`]
//! - Signatures are HS256 with `SESSION_JWT_SECRET`
//! - Clock skew tolerance is 60 seconds
//!
//! Every endpoint except health checks and API docs requires a token.

pub mod claims;
pub mod error;
pub mod extractor;
pub mod roles;

pub use claims::AuthenticatedUser;
pub use error::AuthError;
pub use extractor::{AdminOnly, Auth};
pub use roles::Role;
