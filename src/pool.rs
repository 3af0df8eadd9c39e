use crate::client::ClientOptions;
use crate::connection::{Connection, Connector};
use crate::error::{QscError, Result};
use futures_util::future::BoxFuture;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::{sleep_until, Instant};

/// A connection waiting in the pool
struct IdleConnection {
    conn: Connection,
    released: Instant,
}

/// Pool of connections to one core
///
/// Connections are created on demand, reused until they reach the TTL, and
/// never reused sooner than the reuse delay after they were returned. A
/// connection is only ever lent to one operation at a time.
pub struct ConnectionPool {
    connector: Arc<dyn Connector>,
    ttl: Duration,
    reuse_delay: Duration,
    dial_timeout: Duration,
    idle: Mutex<Vec<IdleConnection>>,
}

impl ConnectionPool {
    pub fn new(connector: Arc<dyn Connector>, options: &ClientOptions) -> Self {
        Self {
            connector,
            ttl: options.ttl,
            reuse_delay: options.reuse_delay,
            dial_timeout: options.dial_timeout,
            idle: Mutex::new(Vec::new()),
        }
    }

    /// Number of connections currently waiting for reuse
    pub fn idle_count(&self) -> usize {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Borrow a connection, reusing an idle one or dialing a new one.
    ///
    /// An idle connection is only reused if its reuse delay ends before the
    /// deadline; otherwise a new connection is dialed. Without a deadline,
    /// dialing and waiting are bounded by the dial timeout.
    pub async fn acquire(&self, deadline: Option<Instant>) -> Result<PooledConnection<'_>> {
        let deadline = deadline.unwrap_or_else(|| Instant::now() + self.dial_timeout);

        if let Some(idle) = self.take_idle() {
            let ready_at = idle.released + self.reuse_delay;
            if ready_at <= deadline {
                // Lent out before waiting, so a cancelled wait drops the connection
                let conn = PooledConnection::new(self, idle.conn);
                sleep_until(ready_at).await;
                return Ok(conn);
            }

            tracing::debug!(
                "Idle connection to {} not ready before the deadline, dialing",
                idle.conn.remote_ip()
            );
            self.put_idle(idle);
        }

        let conn = self.connector.connect(deadline).await?;
        Ok(PooledConnection::new(self, conn))
    }

    /// Run `operation` with exclusive use of a connection.
    ///
    /// The connection goes back to the pool if `operation` succeeds and is
    /// closed if it fails or is cancelled.
    pub async fn with_connection<T, F>(&self, deadline: Option<Instant>, operation: F) -> Result<T>
    where
        F: for<'c> FnOnce(&'c mut Connection) -> BoxFuture<'c, Result<T>>,
    {
        let mut conn = self.acquire(deadline).await?;
        let result = operation(&mut conn).await;
        if result.is_ok() {
            conn.release();
        }
        result
    }

    /// Remove and return the longest-idle connection, closing any that would
    /// pass their TTL before their reuse delay ends
    fn take_idle(&self) -> Option<IdleConnection> {
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();

        idle.retain(|entry| {
            let ready_at = (entry.released + self.reuse_delay).max(now);
            let live = ready_at.duration_since(entry.conn.created()) < self.ttl;
            if !live {
                tracing::debug!("Closing connection to {} past its TTL", entry.conn.remote_ip());
            }
            live
        });

        let oldest = idle
            .iter()
            .enumerate()
            .min_by_key(|(_, entry)| entry.released)
            .map(|(i, _)| i)?;
        Some(idle.swap_remove(oldest))
    }

    fn put_idle(&self, entry: IdleConnection) {
        self.idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }

    fn release(&self, conn: Connection) {
        if conn.created().elapsed() >= self.ttl {
            tracing::debug!("Closing connection to {} past its TTL", conn.remote_ip());
            return;
        }

        self.put_idle(IdleConnection {
            conn,
            released: Instant::now(),
        });
    }
}

/// Exclusive loan of a pooled connection
///
/// Call [`release`](Self::release) to hand the connection back. Dropping the
/// loan any other way closes the connection.
pub struct PooledConnection<'a> {
    pool: &'a ConnectionPool,
    conn: Option<Connection>,
    keep: bool,
}

impl<'a> PooledConnection<'a> {
    fn new(pool: &'a ConnectionPool, conn: Connection) -> Self {
        Self {
            pool,
            conn: Some(conn),
            keep: false,
        }
    }

    /// Return the connection to the pool for reuse
    pub fn release(mut self) {
        self.keep = true;
    }
}

impl Deref for PooledConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("connection is held until drop")
    }
}

impl DerefMut for PooledConnection<'_> {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("connection is held until drop")
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if self.keep {
                self.pool.release(conn);
            } else {
                tracing::debug!("Discarding connection to {}", conn.remote_ip());
            }
        }
    }
}
