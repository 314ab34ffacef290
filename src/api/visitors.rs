//! Per-visitor routers.
//!
//! A visit is identified by a ULID handed out in a cookie. Each visit owns one
//! [`SessionRouter`] behind an async mutex that is held for the whole render
//! pass, so passes of one visitor run one at a time while different visitors
//! never contend. Visits idle longer than the TTL are dropped; nothing is
//! written anywhere.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};
use ulid::Ulid;

use crate::auth::{IdentityProvider, RetryPolicy, RouterConfig, SessionRouter};

pub type SharedRouter<P> = Arc<Mutex<SessionRouter<P>>>;

struct Visit<P> {
    router: SharedRouter<P>,
    last_seen: Instant,
}

pub struct Visitors<P> {
    provider: P,
    retry: RetryPolicy,
    config: RouterConfig,
    ttl: Duration,
    visits: Mutex<HashMap<Ulid, Visit<P>>>,
}

impl<P> std::fmt::Debug for Visitors<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Visitors")
            .field("retry", &self.retry)
            .field("config", &self.config)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl<P: IdentityProvider + Clone> Visitors<P> {
    #[must_use]
    pub fn new(provider: P, retry: RetryPolicy, config: RouterConfig, ttl: Duration) -> Self {
        Self {
            provider,
            retry,
            config,
            ttl,
            visits: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    #[must_use]
    pub fn retry(&self) -> RetryPolicy {
        self.retry
    }

    /// Router of a live visit, or a fresh one under a new id when the visitor
    /// is unknown or idle past the TTL.
    pub async fn checkout(&self, visitor: Option<Ulid>) -> (Ulid, SharedRouter<P>) {
        let now = Instant::now();
        let mut visits = self.visits.lock().await;

        if let Some(id) = visitor {
            match visits.get_mut(&id) {
                Some(visit) if now.duration_since(visit.last_seen) < self.ttl => {
                    visit.last_seen = now;
                    return (id, Arc::clone(&visit.router));
                }
                Some(_) => {
                    debug!(visitor = %id, "Visit expired");
                    visits.remove(&id);
                }
                None => {}
            }
        }

        let id = Ulid::new();
        let router = Arc::new(Mutex::new(SessionRouter::new(
            self.provider.clone(),
            self.retry,
            self.config.clone(),
        )));
        visits.insert(
            id,
            Visit {
                router: Arc::clone(&router),
                last_seen: now,
            },
        );
        info!(visitor = %id, "New visit");
        (id, router)
    }

    /// Router of a live visit; never creates one.
    pub async fn existing(&self, visitor: Ulid) -> Option<SharedRouter<P>> {
        let now = Instant::now();
        let mut visits = self.visits.lock().await;
        let visit = visits.get_mut(&visitor)?;
        if now.duration_since(visit.last_seen) >= self.ttl {
            return None;
        }
        visit.last_seen = now;
        Some(Arc::clone(&visit.router))
    }

    /// Drop idle visits and return how many were removed.
    pub async fn evict_idle(&self) -> usize {
        let now = Instant::now();
        let mut visits = self.visits.lock().await;
        let before = visits.len();
        visits.retain(|_, visit| now.duration_since(visit.last_seen) < self.ttl);
        let evicted = before - visits.len();
        if evicted > 0 {
            debug!(evicted, remaining = visits.len(), "Evicted idle visits");
        }
        evicted
    }

    pub async fn active(&self) -> usize {
        self.visits.lock().await.len()
    }
}
