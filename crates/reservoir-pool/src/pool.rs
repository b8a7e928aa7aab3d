//! Bounded connection pool
//!
//! The pool owns every idle handle and the bookkeeping for every live one.
//! Callers check handles out with [`ResourcePool::acquire`] and hand them back
//! with [`ResourcePool::release`]. Blocked acquirers queue in FIFO order, each
//! parked on its own condition variable tied to the pool mutex, so a release
//! wakes exactly the longest-waiting caller.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::connection::{Connection, ConnectionId, ConnectionManager};
use crate::error::PoolError;

/// Configuration for a connection pool
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Connections created up front and kept by `shrink`
    pub min_size: usize,
    /// Hard cap on live connections
    pub max_size: usize,
    /// Timeout used by [`ResourcePool::acquire`]
    pub acquire_timeout: Duration,
    /// Connections unused for this long are stale
    pub max_idle: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: 5,
            max_size: 20,
            acquire_timeout: Duration::from_millis(5000),
            max_idle: Duration::from_secs(30 * 60),
        }
    }
}

impl PoolConfig {
    /// Validate pool configuration, returning an error if invalid.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.min_size > self.max_size {
            return Err(PoolError::InvalidConfiguration(format!(
                "min_size ({}) must not exceed max_size ({})",
                self.min_size, self.max_size
            )));
        }
        Ok(())
    }
}

/// Point-in-time connection counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    pub active: usize,
    pub idle: usize,
    pub total: usize,
}

/// Pool-side record of a live connection
#[derive(Debug, Clone, Copy)]
struct Slot {
    in_use: bool,
    last_used: Instant,
}

struct Waiter {
    ticket: u64,
    signal: Arc<Condvar>,
}

struct PoolState<T> {
    live: HashMap<ConnectionId, Slot>,
    idle: VecDeque<Connection<T>>,
    waiters: VecDeque<Waiter>,
    next_id: u64,
    next_ticket: u64,
    shutting_down: bool,
}

impl<T> PoolState<T> {
    fn new() -> Self {
        Self {
            live: HashMap::new(),
            idle: VecDeque::new(),
            waiters: VecDeque::new(),
            next_id: 1,
            next_ticket: 0,
            shutting_down: false,
        }
    }

    fn status(&self) -> PoolStatus {
        PoolStatus {
            active: self.live.len() - self.idle.len(),
            idle: self.idle.len(),
            total: self.live.len(),
        }
    }

    /// Signal the longest-waiting acquirer, if any
    fn wake_next(&self) {
        if let Some(waiter) = self.waiters.front() {
            waiter.signal.notify_one();
        }
    }

    fn leave_queue(&mut self, ticket: Option<u64>) {
        if let Some(ticket) = ticket {
            self.waiters.retain(|w| w.ticket != ticket);
        }
    }
}

/// Bounded pool of reusable connections
pub struct ResourcePool<M: ConnectionManager> {
    identifier: String,
    pool_id: Uuid,
    config: PoolConfig,
    manager: M,
    state: Mutex<PoolState<M::Handle>>,
}

impl<M: ConnectionManager> ResourcePool<M> {
    /// Create a pool and open `min_size` idle connections
    pub fn new(
        identifier: impl Into<String>,
        config: PoolConfig,
        manager: M,
    ) -> Result<Self, PoolError> {
        let identifier = identifier.into();
        config.validate()?;

        info!(
            "Creating connection pool: {} (min: {}, max: {})",
            identifier, config.min_size, config.max_size
        );

        let pool = Self {
            identifier,
            pool_id: Uuid::new_v4(),
            config,
            manager,
            state: Mutex::new(PoolState::new()),
        };

        {
            let mut state = pool.state.lock();
            for _ in 0..pool.config.min_size {
                let conn = pool.create_connection(&mut state, false);
                state.idle.push_back(conn);
            }
            pool.record_gauges(&state);
        }

        info!(
            "Connection pool {} created with {} connections",
            pool.identifier, pool.config.min_size
        );
        Ok(pool)
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Acquire a connection using the configured timeout
    pub fn acquire(&self) -> Result<Connection<M::Handle>, PoolError> {
        self.acquire_timeout(self.config.acquire_timeout)
    }

    /// Acquire a connection, blocking for at most `timeout`
    ///
    /// A zero timeout never blocks. Callers arriving while others are queued
    /// join the back of the queue instead of taking a freshly released handle.
    pub fn acquire_timeout(&self, timeout: Duration) -> Result<Connection<M::Handle>, PoolError> {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.state.lock();
        let mut waiter: Option<(u64, Arc<Condvar>)> = None;

        loop {
            let ticket = waiter.as_ref().map(|(t, _)| *t);

            if state.shutting_down {
                state.leave_queue(ticket);
                return Err(PoolError::ShuttingDown(self.identifier.clone()));
            }

            let my_turn = match ticket {
                Some(t) => state.waiters.front().is_some_and(|w| w.ticket == t),
                None => state.waiters.is_empty(),
            };

            if my_turn && let Some(conn) = self.checkout(&mut state) {
                state.leave_queue(ticket);
                if self.has_capacity(&state) {
                    state.wake_next();
                }
                self.record_gauges(&state);
                return Ok(conn);
            }

            let signal = match &waiter {
                Some((_, signal)) => Arc::clone(signal),
                None => {
                    if timeout.is_zero() {
                        return Err(self.timeout_error(timeout));
                    }
                    let ticket = state.next_ticket;
                    state.next_ticket += 1;
                    let signal = Arc::new(Condvar::new());
                    state.waiters.push_back(Waiter {
                        ticket,
                        signal: Arc::clone(&signal),
                    });
                    waiter = Some((ticket, Arc::clone(&signal)));
                    signal
                }
            };

            let timed_out = match deadline {
                Some(deadline) => signal.wait_until(&mut state, deadline).timed_out(),
                None => {
                    signal.wait(&mut state);
                    false
                }
            };

            if timed_out && !state.shutting_down {
                state.leave_queue(ticket);
                // Our turn may have been handed to us just as we gave up
                if self.has_capacity(&state) {
                    state.wake_next();
                }
                return Err(self.timeout_error(timeout));
            }
        }
    }

    /// Return a connection to the pool
    ///
    /// Connections this pool does not recognize (another pool's, or any
    /// connection after shutdown) are dropped with a warning.
    pub fn release(&self, mut conn: Connection<M::Handle>) {
        let mut state = self.state.lock();

        if conn.pool_id() != self.pool_id || state.shutting_down {
            warn!(
                "Ignoring release of connection ID {} not owned by pool {}",
                conn.id(),
                self.identifier
            );
            return;
        }

        let now = Instant::now();
        match state.live.get_mut(&conn.id()) {
            Some(slot) if slot.in_use => {
                slot.in_use = false;
                slot.last_used = now;
            }
            _ => {
                warn!("Attempted to release unknown connection ID: {}", conn.id());
                return;
            }
        }

        conn.mark_idle(now);
        debug!("Released connection ID: {}", conn.id());
        state.idle.push_back(conn);
        state.wake_next();
        self.record_gauges(&state);
    }

    /// Drop idle connections, oldest first, down to `min_size`
    pub fn shrink(&self) -> usize {
        let mut state = self.state.lock();
        let min = self.config.min_size;
        let mut removed = 0;

        while state.idle.len() > min && state.live.len() > min {
            let Some(conn) = state.idle.pop_front() else {
                break;
            };
            state.live.remove(&conn.id());
            debug!("Removed excess connection ID: {}", conn.id());
            removed += 1;
        }

        if removed > 0 {
            self.record_gauges(&state);
        }
        removed
    }

    /// Eagerly open up to `count` idle connections without exceeding `max_size`
    pub fn expand(&self, count: usize) -> usize {
        let mut state = self.state.lock();
        if state.shutting_down {
            return 0;
        }

        let mut created = 0;
        while created < count && state.live.len() < self.config.max_size {
            let conn = self.create_connection(&mut state, false);
            state.idle.push_back(conn);
            created += 1;
        }

        if created > 0 {
            debug!("Expanded pool {} by {} connections", self.identifier, created);
            state.wake_next();
            self.record_gauges(&state);
        }
        created
    }

    /// Whether every live connection currently passes its validity check
    ///
    /// Read-only: unhealthy connections are reported but not removed.
    pub fn health_check(&self) -> bool {
        let state = self.state.lock();
        let mut healthy = true;

        for conn in &state.idle {
            if !self.is_valid_idle(conn) {
                warn!("Unhealthy connection detected: ID {}", conn.id());
                healthy = false;
            }
        }

        for (id, slot) in state.live.iter().filter(|(_, slot)| slot.in_use) {
            if !self.is_fresh(slot.last_used) {
                warn!("Unhealthy connection detected: ID {} (in use)", id);
                healthy = false;
            }
        }

        healthy
    }

    /// Remove every idle connection that fails its validity check
    pub fn remove_stale_connections(&self) -> usize {
        let mut state = self.state.lock();
        let idle = std::mem::take(&mut state.idle);
        let mut removed = 0;

        for conn in idle {
            if self.is_valid_idle(&conn) {
                state.idle.push_back(conn);
            } else {
                info!("Removing stale connection ID: {}", conn.id());
                state.live.remove(&conn.id());
                removed += 1;
            }
        }

        if removed > 0 {
            metrics::counter!("reservoir_pool_stale_removed_total").increment(removed as u64);
            self.record_gauges(&state);
        }
        removed
    }

    pub fn active_count(&self) -> usize {
        self.status().active
    }

    pub fn idle_count(&self) -> usize {
        self.state.lock().idle.len()
    }

    pub fn total_count(&self) -> usize {
        self.state.lock().live.len()
    }

    /// All three counts from a single lock acquisition
    pub fn status(&self) -> PoolStatus {
        self.state.lock().status()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state.lock().shutting_down
    }

    /// Stop handing out connections and wake every waiter
    ///
    /// Connections still held by callers stay usable by them, but the pool
    /// forgets them; releasing one afterwards is a no-op.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        if state.shutting_down {
            return;
        }

        state.shutting_down = true;
        for waiter in &state.waiters {
            waiter.signal.notify_one();
        }
        state.idle.clear();
        state.live.clear();

        info!("Connection pool {} shut down", self.identifier);
    }

    fn create_connection(
        &self,
        state: &mut PoolState<M::Handle>,
        in_use: bool,
    ) -> Connection<M::Handle> {
        let id = ConnectionId::new(state.next_id);
        state.next_id += 1;

        debug!("Creating new connection with ID: {}", id);
        let handle = self.manager.connect(id);
        let conn = Connection::new(id, self.pool_id, handle, in_use);
        state.live.insert(
            id,
            Slot {
                in_use,
                last_used: conn.last_used(),
            },
        );

        metrics::counter!("reservoir_pool_connections_created_total").increment(1);
        conn
    }

    /// Take the first valid idle connection, or open a new one if under the cap
    fn checkout(&self, state: &mut PoolState<M::Handle>) -> Option<Connection<M::Handle>> {
        while let Some(mut conn) = state.idle.pop_front() {
            if !self.is_valid_idle(&conn) {
                warn!("Removing stale connection ID: {}", conn.id());
                state.live.remove(&conn.id());
                metrics::counter!("reservoir_pool_stale_removed_total").increment(1);
                continue;
            }

            let now = Instant::now();
            conn.mark_in_use(now);
            if let Some(slot) = state.live.get_mut(&conn.id()) {
                slot.in_use = true;
                slot.last_used = now;
            }
            debug!("Acquired connection ID: {}", conn.id());
            return Some(conn);
        }

        if state.live.len() < self.config.max_size {
            let conn = self.create_connection(state, true);
            debug!("Created and acquired new connection ID: {}", conn.id());
            return Some(conn);
        }

        None
    }

    fn has_capacity(&self, state: &PoolState<M::Handle>) -> bool {
        !state.idle.is_empty() || state.live.len() < self.config.max_size
    }

    fn is_fresh(&self, last_used: Instant) -> bool {
        last_used.elapsed() < self.config.max_idle
    }

    fn is_valid_idle(&self, conn: &Connection<M::Handle>) -> bool {
        self.is_fresh(conn.last_used()) && self.manager.probe(conn.handle())
    }

    fn timeout_error(&self, waited: Duration) -> PoolError {
        error!(
            "Connection pool {} timeout after {}ms",
            self.identifier,
            waited.as_millis()
        );
        metrics::counter!("reservoir_pool_acquire_timeouts_total").increment(1);
        PoolError::Timeout {
            identifier: self.identifier.clone(),
            waited,
        }
    }

    fn record_gauges(&self, state: &PoolState<M::Handle>) {
        let status = state.status();
        metrics::gauge!("reservoir_pool_active_connections").set(status.active as f64);
        metrics::gauge!("reservoir_pool_idle_connections").set(status.idle as f64);
    }
}

impl<M: ConnectionManager> Drop for ResourcePool<M> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
