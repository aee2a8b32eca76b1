// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Relational Edge Auth - Request Authentication & Handshake Gate
//!
//! This crate decides, per request, whether the caller is signed in, signed
//! out, or needs a handshake redirect, and lets application code enforce
//! role, permission and token-type requirements on top of that decision.
//!
//! ## Modules
//!
//! - `api` - Demo HTTP API handlers (Axum)
//! - `auth` - Authentication, handshake, protect decisions and the gate middleware
//! - `context` - Encrypted request context propagated to downstream stages
//! - `matcher` - Compiled route classifiers
//! - `options` - Static and per-request auth options

use std::future::Future;
use std::pin::Pin;

pub mod api;
pub mod auth;
pub mod config;
pub mod context;
pub mod debug;
pub mod error;
pub mod keys;
pub mod matcher;
pub mod options;
pub mod request;
pub mod state;

/// Boxed future used at trait-object seams.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
