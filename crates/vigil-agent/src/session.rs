//! Per-connection state.
//!
//! A `ConnectionSession` lives on the connection task and is mutated only
//! there; spawned handlers get an immutable `SessionContext` snapshot.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::limiter::TokenBucket;

pub struct ConnectionSession {
    pub conn_id: u64,
    pub remote_addr: SocketAddr,
    pub authenticated: bool,
    pub token_id: Option<String>,
    pub scopes: Vec<String>,
    /// Commands currently executing for this connection.
    pub in_flight: Arc<AtomicU32>,
    /// One bucket per action name, created on first use.
    buckets: HashMap<String, TokenBucket>,
    rate_capacity: u32,
    rate_refill_per_sec: f64,
    pub connected_at: Instant,
    pub last_activity: Instant,
}

impl ConnectionSession {
    pub fn new(
        conn_id: u64,
        remote_addr: SocketAddr,
        rate_capacity: u32,
        rate_refill_per_sec: f64,
    ) -> Self {
        let now = Instant::now();
        Self {
            conn_id,
            remote_addr,
            authenticated: false,
            token_id: None,
            scopes: Vec::new(),
            in_flight: Arc::new(AtomicU32::new(0)),
            buckets: HashMap::new(),
            rate_capacity,
            rate_refill_per_sec,
            connected_at: now,
            last_activity: now,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Consume one rate token for `action`. Each action gets an independent
    /// bucket so a flood of one command cannot starve the others.
    pub fn consume_rate(&mut self, action: &str) -> bool {
        let capacity = self.rate_capacity;
        let refill = self.rate_refill_per_sec;
        self.buckets
            .entry(action.to_string())
            .or_insert_with(|| TokenBucket::new(capacity, refill))
            .try_consume()
    }

    /// Mark the session authenticated. Scopes are write-once; the pipeline
    /// rejects a second AUTH before calling this.
    pub fn grant(&mut self, token_id: String, scopes: Vec<String>) {
        self.authenticated = true;
        self.token_id = Some(token_id);
        self.scopes = scopes;
    }

    /// Try to admit one more in-flight command. On success the returned
    /// guard holds the slot until dropped.
    pub fn try_admit(&self, max_in_flight: u32) -> Option<InFlightGuard> {
        let counter = self.in_flight.clone();
        let mut current = counter.load(Ordering::Acquire);
        loop {
            if current >= max_in_flight {
                return None;
            }
            match counter.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(InFlightGuard { counter }),
                Err(actual) => current = actual,
            }
        }
    }

    /// Immutable view handed to spawned command handlers.
    pub fn context(&self) -> SessionContext {
        SessionContext {
            conn_id: self.conn_id,
            remote_addr: self.remote_addr,
            authenticated: self.authenticated,
            token_id: self.token_id.clone(),
            scopes: self.scopes.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionContext {
    pub conn_id: u64,
    pub remote_addr: SocketAddr,
    pub authenticated: bool,
    pub token_id: Option<String>,
    pub scopes: Vec<String>,
}

/// RAII slot in the in-flight counter. Dropping releases the slot, which
/// also covers handler panics and cancellation.
pub struct InFlightGuard {
    counter: Arc<AtomicU32>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}
