//! Request idempotency: the dispatcher records mutation results keyed by
//! `request_ref` for a short horizon; replays return the prior result
//! without re-running the side effect.

use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;

use agtmux_proto::rpc::Response;

/// How long a recorded result can be replayed (seconds).
pub const IDEMPOTENCY_HORIZON_SECS: u64 = 60;

#[derive(Debug, Default)]
pub struct IdempotencyCache {
    entries: HashMap<String, (Response, DateTime<Utc>)>,
}

impl IdempotencyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prior result for a request_ref, if still within the horizon.
    pub fn lookup(&self, request_ref: &str, now: DateTime<Utc>) -> Option<Response> {
        self.entries.get(request_ref).and_then(|(resp, at)| {
            let age = now.signed_duration_since(*at);
            (age <= TimeDelta::seconds(IDEMPOTENCY_HORIZON_SECS as i64)).then(|| resp.clone())
        })
    }

    pub fn record(&mut self, request_ref: &str, response: Response, now: DateTime<Utc>) {
        self.entries
            .insert(request_ref.to_owned(), (response, now));
    }

    /// Drop entries past the horizon.
    pub fn prune(&mut self, now: DateTime<Utc>) {
        let horizon = TimeDelta::seconds(IDEMPOTENCY_HORIZON_SECS as i64);
        self.entries
            .retain(|_, (_, at)| now.signed_duration_since(*at) <= horizon);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
