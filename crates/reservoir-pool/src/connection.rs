//! Pooled connection handles and the connection manager seam

use std::fmt;
use std::time::{Duration, Instant};

use serde::Serialize;
use uuid::Uuid;

/// Identity of a connection, unique within the lifetime of one pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Creates and validates the handles a pool hands out
///
/// Implementations plug a real client (database driver, socket, ...) into
/// [`ResourcePool`](crate::ResourcePool). The pool calls `connect` while
/// holding its lock, so it should not block for long.
pub trait ConnectionManager: Send + Sync {
    /// Opaque handle value carried by each connection
    type Handle: Send;

    /// Open a new handle for the given connection id
    fn connect(&self, id: ConnectionId) -> Self::Handle;

    /// Validity probe for an idle handle
    ///
    /// Idle-age expiry is enforced by the pool itself; this is only the
    /// implementation-specific part of the check.
    fn probe(&self, _handle: &Self::Handle) -> bool {
        true
    }
}

/// Connection manager that simulates a backend
///
/// The handle is the connection id itself and every probe succeeds, so
/// handles only go stale by exceeding the pool's idle age.
#[derive(Debug, Clone, Default)]
pub struct SimulatedConnector;

impl ConnectionManager for SimulatedConnector {
    type Handle = u64;

    fn connect(&self, id: ConnectionId) -> u64 {
        id.get()
    }
}

/// A handle checked out of (or parked in) a pool
///
/// The in-use flag and last-used timestamp are owned by the pool; callers can
/// read them but only `acquire` and `release` change them.
///
/// A checked-out connection must be handed back with `release`. Dropping it
/// instead leaves its slot counted as in use, permanently lowering the pool's
/// capacity by one.
#[derive(Debug)]
pub struct Connection<T> {
    id: ConnectionId,
    pool: Uuid,
    in_use: bool,
    handle: T,
    last_used: Instant,
}

impl<T> Connection<T> {
    pub(crate) fn new(id: ConnectionId, pool: Uuid, handle: T, in_use: bool) -> Self {
        Self {
            id,
            pool,
            in_use,
            handle,
            last_used: Instant::now(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn is_in_use(&self) -> bool {
        self.in_use
    }

    pub fn handle(&self) -> &T {
        &self.handle
    }

    pub fn handle_mut(&mut self) -> &mut T {
        &mut self.handle
    }

    pub fn last_used(&self) -> Instant {
        self.last_used
    }

    /// Time since the connection was last acquired or released
    pub fn idle_for(&self) -> Duration {
        self.last_used.elapsed()
    }

    pub(crate) fn pool_id(&self) -> Uuid {
        self.pool
    }

    pub(crate) fn mark_in_use(&mut self, now: Instant) {
        self.in_use = true;
        self.last_used = now;
    }

    pub(crate) fn mark_idle(&mut self, now: Instant) {
        self.in_use = false;
        self.last_used = now;
    }
}
