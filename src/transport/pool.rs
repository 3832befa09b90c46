use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::Result;
use crate::error::{Error, TimeoutPhase};
use crate::transport::connection::Connection;
use crate::url::Origin;
use crate::util::lock_unpoisoned;

#[derive(Clone, Copy, Debug)]
pub(crate) struct PoolLimits {
    pub(crate) max_per_origin: usize,
    pub(crate) keepalive_timeout: Duration,
}

#[derive(Default)]
struct PoolEntry {
    /// Idle connections, oldest first. Reuse pops the most recent; eviction
    /// trims from the front.
    idle: Vec<Connection>,
    checked_out: usize,
    waiters: VecDeque<oneshot::Sender<()>>,
}

impl PoolEntry {
    fn evict_stale(&mut self, now: Instant, keepalive_timeout: Duration) {
        let before = self.idle.len();
        self.idle
            .retain(|connection| connection.is_healthy() && !connection.is_idle_expired(now, keepalive_timeout));
        let evicted = before - self.idle.len();
        if evicted > 0 {
            trace!(evicted, "dropped stale idle connections");
        }
    }

    fn signal_one_waiter(&mut self) {
        while let Some(waiter) = self.waiters.pop_front() {
            if waiter.send(()).is_ok() {
                break;
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.idle.is_empty() && self.checked_out == 0 && self.waiters.is_empty()
    }
}

/// Result of [`ConnectionPool::acquire`]: either an idle connection ready to
/// use, or a reserved slot the caller must fill by dialing. Either way the
/// per-origin capacity is already accounted for.
pub(crate) enum Acquired {
    Reused(PooledConnection),
    MustConnect(SlotReservation),
}

/// Per-origin bounded connection pools. The mutex guards bookkeeping only;
/// transport setup happens outside it against a reserved slot.
pub(crate) struct ConnectionPool {
    entries: Mutex<HashMap<Origin, PoolEntry>>,
}

impl ConnectionPool {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(HashMap::new()),
        })
    }

    /// Acquire protocol: evict stale idles, reuse the most recent idle,
    /// else reserve a fresh slot, else wait FIFO for a release.
    pub(crate) async fn acquire(
        self: &Arc<Self>,
        origin: &Origin,
        limits: PoolLimits,
        deadline: Option<Instant>,
    ) -> Result<Acquired> {
        loop {
            let waiter = {
                let mut entries = lock_unpoisoned(&self.entries);
                let entry = entries.entry(origin.clone()).or_default();
                entry.evict_stale(Instant::now(), limits.keepalive_timeout);

                if let Some(connection) = entry.idle.pop() {
                    entry.checked_out += 1;
                    trace!(origin = %origin, "reusing pooled connection");
                    return Ok(Acquired::Reused(PooledConnection {
                        pool: Some(Arc::clone(self)),
                        origin: origin.clone(),
                        limits,
                        connection: Some(connection),
                        reusable: false,
                    }));
                }

                if entry.checked_out < limits.max_per_origin {
                    entry.checked_out += 1;
                    return Ok(Acquired::MustConnect(SlotReservation {
                        pool: Arc::clone(self),
                        origin: origin.clone(),
                        limits,
                        armed: true,
                    }));
                }

                let (sender, receiver) = oneshot::channel();
                entry.waiters.push_back(sender);
                receiver
            };

            trace!(origin = %origin, "pool exhausted, waiting for a release");
            match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero()
                        || tokio::time::timeout(remaining, waiter).await.is_err()
                    {
                        // If a release signaled us in the same instant the
                        // deadline fired, pass the wake along instead of
                        // swallowing it.
                        let mut entries = lock_unpoisoned(&self.entries);
                        if let Some(entry) = entries.get_mut(origin) {
                            entry.signal_one_waiter();
                        }
                        return Err(Error::timeout(TimeoutPhase::Request, remaining));
                    }
                }
                None => {
                    // A dropped sender is a spurious wake; re-run the acquire
                    // protocol either way.
                    let _ = waiter.await;
                }
            }
        }
    }

    fn release(
        &self,
        origin: &Origin,
        connection: Option<Connection>,
        reusable: bool,
        limits: PoolLimits,
    ) {
        let mut entries = lock_unpoisoned(&self.entries);
        let Some(entry) = entries.get_mut(origin) else {
            return;
        };
        entry.checked_out = entry.checked_out.saturating_sub(1);

        if let Some(mut connection) = connection
            && reusable
            && connection.is_healthy()
            && entry.idle.len() < limits.max_per_origin
        {
            connection.touch();
            entry.idle.push(connection);
            debug!(origin = %origin, idle = entry.idle.len(), "connection returned to pool");
        } else {
            debug!(origin = %origin, "connection retired");
        }

        entry.signal_one_waiter();
        if entry.is_empty() {
            entries.remove(origin);
        }
    }

    /// Undoes a slot reservation whose transport setup never completed.
    fn abandon(&self, origin: &Origin, limits: PoolLimits) {
        self.release(origin, None, false, limits);
    }

    #[cfg(test)]
    pub(crate) fn idle_count(&self, origin: &Origin) -> usize {
        lock_unpoisoned(&self.entries)
            .get(origin)
            .map_or(0, |entry| entry.idle.len())
    }

    #[cfg(test)]
    pub(crate) fn checked_out(&self, origin: &Origin) -> usize {
        lock_unpoisoned(&self.entries)
            .get(origin)
            .map_or(0, |entry| entry.checked_out)
    }
}

/// A reserved right to add one connection for an origin. Dropping it without
/// completing returns the capacity and wakes a waiter, so a failed or
/// cancelled dial can never leak a slot.
pub(crate) struct SlotReservation {
    pool: Arc<ConnectionPool>,
    origin: Origin,
    limits: PoolLimits,
    armed: bool,
}

impl SlotReservation {
    pub(crate) fn complete(mut self, connection: Connection) -> PooledConnection {
        self.armed = false;
        PooledConnection {
            pool: Some(Arc::clone(&self.pool)),
            origin: self.origin.clone(),
            limits: self.limits,
            connection: Some(connection),
            reusable: false,
        }
    }
}

impl Drop for SlotReservation {
    fn drop(&mut self) {
        if self.armed {
            self.pool.abandon(&self.origin, self.limits);
        }
    }
}

/// Scoped ownership of an acquired connection. Releases back to the pool
/// exactly once, on every exit path; callers opt in to reuse only after a
/// fully-consumed keep-alive response.
pub(crate) struct PooledConnection {
    pool: Option<Arc<ConnectionPool>>,
    origin: Origin,
    limits: PoolLimits,
    connection: Option<Connection>,
    reusable: bool,
}

impl PooledConnection {
    /// A connection owned outside any pool; dropping it just closes.
    pub(crate) fn detached(connection: Connection) -> Self {
        let origin = connection.origin().clone();
        Self {
            pool: None,
            origin,
            limits: PoolLimits {
                max_per_origin: 0,
                keepalive_timeout: Duration::ZERO,
            },
            connection: Some(connection),
            reusable: false,
        }
    }

    pub(crate) fn connection(&mut self) -> &mut Connection {
        self.connection
            .as_mut()
            .expect("connection present until release")
    }

    pub(crate) fn set_reusable(&mut self, reusable: bool) {
        self.reusable = reusable;
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let connection = self.connection.take();
        match &self.pool {
            Some(pool) => pool.release(&self.origin, connection, self.reusable, self.limits),
            None => drop(connection),
        }
    }
}
