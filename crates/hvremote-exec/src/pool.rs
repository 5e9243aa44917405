//! Bounded connection pool
//!
//! A semaphore with `max_size` permits bounds the number of connections
//! checked out at once. Borrowing waits up to the borrow timeout for a
//! permit, then reuses an idle connection or dials a new one. The returned
//! [`PooledConnection`] hands the connection back when dropped, so every
//! borrow is matched by exactly one return whether the operation succeeds,
//! fails, panics or is cancelled.
//!
//! Connections found closed when borrowed or returned are evicted instead
//! of being reused.

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};

use crate::config::ConnectionConfig;
use crate::error::ExecError;
use crate::traits::{Connection, Connector};

struct PoolInner<C: Connector> {
    connector: C,
    config: Arc<ConnectionConfig>,
    max_size: usize,
    borrow_timeout: Duration,
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<C::Connection>>,
    closed: AtomicBool,
    created: AtomicU64,
    borrowed: AtomicU64,
    returned: AtomicU64,
    evicted: AtomicU64,
}

impl<C: Connector> PoolInner<C> {
    fn idle(&self) -> std::sync::MutexGuard<'_, Vec<C::Connection>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn give_back(&self, conn: C::Connection) {
        self.returned.fetch_add(1, Ordering::AcqRel);

        if self.closed.load(Ordering::Acquire) {
            debug!("pool closed, dropping returned connection");
            return;
        }
        if conn.is_closed() {
            self.evicted.fetch_add(1, Ordering::AcqRel);
            debug!("evicting closed connection on return");
            return;
        }
        self.idle().push(conn);
    }
}

/// Bounded pool of connections to one host
pub struct Pool<C: Connector> {
    inner: Arc<PoolInner<C>>,
}

impl<C: Connector> Clone for Pool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connector> fmt::Debug for Pool<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("connector", &self.inner.connector.kind())
            .field("host", &self.inner.config.host)
            .field("stats", &self.stats())
            .finish()
    }
}

impl<C: Connector> Pool<C> {
    /// Create a pool sized by `config.pool`
    ///
    /// No connection is dialled until the first borrow or [`Pool::warm_up`].
    pub fn new(connector: C, config: Arc<ConnectionConfig>) -> Self {
        let max_size = config.pool.max_size.max(1);
        let borrow_timeout = config.pool.borrow_timeout();
        Self {
            inner: Arc::new(PoolInner {
                connector,
                config,
                max_size,
                borrow_timeout,
                permits: Arc::new(Semaphore::new(max_size)),
                idle: Mutex::new(Vec::with_capacity(max_size)),
                closed: AtomicBool::new(false),
                created: AtomicU64::new(0),
                borrowed: AtomicU64::new(0),
                returned: AtomicU64::new(0),
                evicted: AtomicU64::new(0),
            }),
        }
    }

    /// Override how long a borrow waits for a free connection
    #[must_use]
    pub fn with_borrow_timeout(self, timeout: Duration) -> Self {
        match Arc::try_unwrap(self.inner) {
            Ok(mut inner) => {
                inner.borrow_timeout = timeout;
                Self {
                    inner: Arc::new(inner),
                }
            }
            Err(inner) => Self { inner },
        }
    }

    /// Configuration connections are dialled with
    #[must_use]
    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    /// Dial connections until `min_idle` are idle
    ///
    /// # Errors
    /// Returns the first dial error; connections dialled before it stay idle
    pub async fn warm_up(&self) -> Result<(), ExecError> {
        let wanted = self.inner.config.pool.min_idle.min(self.inner.max_size);
        let missing = wanted.saturating_sub(self.inner.idle().len());

        for _ in 0..missing {
            let conn = self.dial().await?;
            self.inner.idle().push(conn);
        }

        if missing > 0 {
            info!(host = %self.inner.config.host, count = missing, "pool warmed up");
        }
        Ok(())
    }

    /// Borrow a connection
    ///
    /// # Errors
    /// Returns `ExecError::PoolExhausted` if no connection frees up within
    /// the borrow timeout, `ExecError::PoolClosed` after [`Pool::close`],
    /// or the dial error when a new connection is needed and cannot be made
    pub async fn get(&self) -> Result<PooledConnection<C>, ExecError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(ExecError::PoolClosed);
        }

        let timeout = self.inner.borrow_timeout;
        let permit =
            match tokio::time::timeout(timeout, Arc::clone(&self.inner.permits).acquire_owned())
                .await
            {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) => return Err(ExecError::PoolClosed),
                Err(_) => {
                    error!(
                        host = %self.inner.config.host,
                        max_size = self.inner.max_size,
                        timeout = ?timeout,
                        "connection pool exhausted"
                    );
                    return Err(ExecError::PoolExhausted { timeout });
                }
            };

        let conn = match self.take_idle() {
            Some(conn) => conn,
            // permit is released if dialling fails
            None => self.dial().await?,
        };

        self.inner.borrowed.fetch_add(1, Ordering::AcqRel);
        Ok(PooledConnection {
            conn: Some(conn),
            pool: Arc::clone(&self.inner),
            _permit: permit,
        })
    }

    fn take_idle(&self) -> Option<C::Connection> {
        let mut idle = self.inner.idle();
        while let Some(conn) = idle.pop() {
            if conn.is_closed() {
                self.inner.evicted.fetch_add(1, Ordering::AcqRel);
                debug!("evicting closed idle connection");
                continue;
            }
            return Some(conn);
        }
        None
    }

    async fn dial(&self) -> Result<C::Connection, ExecError> {
        let conn = self.inner.connector.connect(&self.inner.config).await?;
        self.inner.created.fetch_add(1, Ordering::AcqRel);
        debug!(connector = self.inner.connector.kind(), "dialled pooled connection");
        Ok(conn)
    }

    /// Close idle connections and refuse further borrows
    ///
    /// Connections still checked out are dropped when returned.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.permits.close();

        let idle: Vec<_> = self.inner.idle().drain(..).collect();
        for conn in idle {
            if let Err(e) = conn.close().await {
                warn!(error = %e, "failed to close pooled connection");
            }
        }
        info!(host = %self.inner.config.host, "connection pool closed");
    }

    /// Pool statistics
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let in_use = if self.inner.closed.load(Ordering::Acquire) {
            let borrowed = self.inner.borrowed.load(Ordering::Acquire);
            let returned = self.inner.returned.load(Ordering::Acquire);
            usize::try_from(borrowed.saturating_sub(returned)).unwrap_or(usize::MAX)
        } else {
            self.inner.max_size - self.inner.permits.available_permits()
        };

        PoolStats {
            capacity: self.inner.max_size,
            idle: self.inner.idle().len(),
            in_use,
            created: self.inner.created.load(Ordering::Acquire),
            borrowed: self.inner.borrowed.load(Ordering::Acquire),
            returned: self.inner.returned.load(Ordering::Acquire),
            evicted: self.inner.evicted.load(Ordering::Acquire),
        }
    }
}

/// Pool statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Maximum connections checked out at once
    pub capacity: usize,
    /// Connections waiting in the pool
    pub idle: usize,
    /// Connections (or permits) currently checked out
    pub in_use: usize,
    /// Connections dialled so far
    pub created: u64,
    /// Successful borrows so far
    pub borrowed: u64,
    /// Returns so far
    pub returned: u64,
    /// Connections dropped because they were found closed
    pub evicted: u64,
}

impl PoolStats {
    /// Borrows not yet returned
    #[must_use]
    pub fn outstanding(&self) -> u64 {
        self.borrowed.saturating_sub(self.returned)
    }
}

/// A connection borrowed from the pool
///
/// Dereferences to the connection. Dropping it returns the connection.
pub struct PooledConnection<C: Connector> {
    conn: Option<C::Connection>,
    pool: Arc<PoolInner<C>>,
    _permit: OwnedSemaphorePermit,
}

impl<C: Connector> Deref for PooledConnection<C> {
    type Target = C::Connection;

    fn deref(&self) -> &Self::Target {
        // only taken in Drop
        match &self.conn {
            Some(conn) => conn,
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl<C: Connector> fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("host", &self.pool.config.host)
            .finish_non_exhaustive()
    }
}

impl<C: Connector> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.give_back(conn);
        }
    }
}
