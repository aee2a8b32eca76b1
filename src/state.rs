// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use axum::extract::FromRef;

use crate::auth::middleware::AuthGate;

/// State shared by the routes behind the gate.
#[derive(Clone)]
pub struct AppState {
    pub gate: Arc<AuthGate>,
}

impl AppState {
    pub fn new(gate: Arc<AuthGate>) -> Self {
        Self { gate }
    }
}

impl FromRef<AppState> for Arc<AuthGate> {
    fn from_ref(state: &AppState) -> Self {
        state.gate.clone()
    }
}
