// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Per-request debug record.
//!
//! When debug mode is on, the gate buffers entries while it works and emits
//! them as a single `tracing` event once the response is ready. A request
//! that fails drops its buffer without logging.

use axum::http::{
    header::{AUTHORIZATION, COOKIE, SET_COOKIE},
    HeaderMap,
};
use serde_json::{Map, Value};

use crate::auth::headers::{AUTH_SIGNATURE_HEADER, AUTH_TOKEN_HEADER};
use crate::context::REQUEST_DATA_HEADER;

const REDACTED: &str = "[redacted]";

#[derive(Debug, Default)]
pub struct DebugLog {
    enabled: bool,
    entries: Vec<(&'static str, Value)>,
}

impl DebugLog {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            entries: Vec::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Buffer an entry. `value` is only built when debug mode is on.
    pub fn record<F>(&mut self, key: &'static str, value: F)
    where
        F: FnOnce() -> Value,
    {
        if self.enabled {
            self.entries.push((key, value()));
        }
    }

    pub fn record_headers(&mut self, key: &'static str, headers: &HeaderMap) {
        self.record(key, || redacted_headers(headers));
    }

    /// Emit the buffered entries as one event.
    pub fn commit(self) {
        if !self.enabled || self.entries.is_empty() {
            return;
        }
        let record: Map<String, Value> = self
            .entries
            .into_iter()
            .map(|(key, value)| (key.to_string(), value))
            .collect();
        let record = Value::Object(record);
        tracing::info!(
            target: "auth_gate::debug",
            record = %record,
            "Auth gate debug record"
        );
    }

    #[cfg(test)]
    fn keys(&self) -> Vec<&'static str> {
        self.entries.iter().map(|(k, _)| *k).collect()
    }
}

/// Headers as JSON with credentials masked.
pub fn redacted_headers(headers: &HeaderMap) -> Value {
    let mut map = Map::new();
    for name in headers.keys() {
        let sensitive = *name == AUTHORIZATION
            || *name == COOKIE
            || *name == SET_COOKIE
            || name.as_str() == AUTH_TOKEN_HEADER
            || name.as_str() == AUTH_SIGNATURE_HEADER
            || name.as_str() == REQUEST_DATA_HEADER;
        let values: Vec<Value> = headers
            .get_all(name)
            .iter()
            .map(|v| {
                if sensitive {
                    Value::from(REDACTED)
                } else {
                    Value::from(v.to_str().unwrap_or("<binary>"))
                }
            })
            .collect();
        let value = match <[Value; 1]>::try_from(values) {
            Ok([single]) => single,
            Err(values) => Value::Array(values),
        };
        map.insert(name.as_str().to_string(), value);
    }
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn disabled_log_skips_building_entries() {
        let mut log = DebugLog::new(false);
        log.record("url", || panic!("must not be evaluated"));
        assert!(log.keys().is_empty());
        log.commit();
    }

    #[test]
    fn entries_keep_insertion_order() {
        let mut log = DebugLog::new(true);
        log.record("url", || json!("https://app.example.com/"));
        log.record("auth", || json!({"status": "signed-out"}));
        assert_eq!(log.keys(), vec!["url", "auth"]);
        log.commit();
    }

    #[test]
    fn credentials_are_redacted() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "Bearer secret".parse().unwrap());
        headers.append(SET_COOKIE, "__session=a".parse().unwrap());
        headers.append(SET_COOKIE, "__client_uat=1".parse().unwrap());
        headers.insert("x-auth-status", "signed-in".parse().unwrap());

        let value = redacted_headers(&headers);
        assert_eq!(value["authorization"], "[redacted]");
        assert_eq!(value["set-cookie"], json!(["[redacted]", "[redacted]"]));
        assert_eq!(value["x-auth-status"], "signed-in");
        assert!(!value.to_string().contains("secret"));
    }
}
