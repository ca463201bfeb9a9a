//! Connection pool seam.
//!
//! The exchange only needs three operations from a pool: hand out an
//! exclusively owned connection, take it back for reuse, or discard it.
//! [`TcpPool`] is the plain-TCP implementation shipped with the crate.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::util::lock_unpoisoned;

const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_MAX_IDLE_CONNECTIONS: usize = 16;
const DEFAULT_MAX_IDLE_DURATION: Duration = Duration::from_secs(10);

/// A byte stream whose blocking reads and writes can be bounded.
pub trait Transport: Read + Write + Send {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()>;
    fn set_write_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()>;
}

impl Transport for TcpStream {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, timeout)
    }

    fn set_write_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_write_timeout(self, timeout)
    }
}

/// A transport handle on loan from a pool.
#[derive(Debug)]
pub struct PooledConnection<T> {
    transport: T,
    created_at: Instant,
    last_used_at: Instant,
}

impl<T> PooledConnection<T> {
    pub fn new(transport: T) -> Self {
        let now = Instant::now();
        Self {
            transport,
            created_at: now,
            last_used_at: now,
        }
    }

    pub fn with_created_at(transport: T, created_at: Instant) -> Self {
        Self {
            transport,
            created_at,
            last_used_at: created_at,
        }
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_used_at(&self) -> Instant {
        self.last_used_at
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    fn touch(&mut self) {
        self.last_used_at = Instant::now();
    }
}

/// Source of connections for one host.
///
/// Each operation must be atomic on its own; the client calls them from many
/// threads at once.
pub trait ConnectionPool: Send + Sync {
    type Transport: Transport;

    /// Returns an exclusively owned connection, waiting at most `timeout`
    /// when one is given.
    fn acquire(&self, timeout: Option<Duration>) -> io::Result<PooledConnection<Self::Transport>>;

    /// Gives a healthy connection back for reuse.
    fn release(&self, connection: PooledConnection<Self::Transport>);

    /// Tears a connection down for good.
    fn close(&self, connection: PooledConnection<Self::Transport>);
}

pub struct TcpPoolBuilder {
    addr: String,
    dial_timeout: Duration,
    max_idle_connections: usize,
    max_idle_duration: Duration,
}

impl TcpPoolBuilder {
    pub fn dial_timeout(mut self, dial_timeout: Duration) -> Self {
        self.dial_timeout = dial_timeout.max(Duration::from_millis(1));
        self
    }

    pub fn max_idle_connections(mut self, max_idle_connections: usize) -> Self {
        self.max_idle_connections = max_idle_connections;
        self
    }

    pub fn max_idle_duration(mut self, max_idle_duration: Duration) -> Self {
        self.max_idle_duration = max_idle_duration;
        self
    }

    pub fn build(self) -> TcpPool {
        TcpPool {
            addr: self.addr,
            dial_timeout: self.dial_timeout,
            max_idle_connections: self.max_idle_connections,
            max_idle_duration: self.max_idle_duration,
            idle: Mutex::new(Vec::new()),
        }
    }
}

/// Plain TCP pool for a single `host:port`.
///
/// Idle connections are reused most-recently-released first and dropped once
/// they have sat unused longer than `max_idle_duration`.
pub struct TcpPool {
    addr: String,
    dial_timeout: Duration,
    max_idle_connections: usize,
    max_idle_duration: Duration,
    idle: Mutex<Vec<PooledConnection<TcpStream>>>,
}

impl std::fmt::Debug for TcpPool {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("TcpPool")
            .field("addr", &self.addr)
            .field("dial_timeout", &self.dial_timeout)
            .field("max_idle_connections", &self.max_idle_connections)
            .field("max_idle_duration", &self.max_idle_duration)
            .field("idle", &self.idle_count())
            .finish()
    }
}

impl TcpPool {
    pub fn builder(addr: impl Into<String>) -> TcpPoolBuilder {
        TcpPoolBuilder {
            addr: addr.into(),
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            max_idle_connections: DEFAULT_MAX_IDLE_CONNECTIONS,
            max_idle_duration: DEFAULT_MAX_IDLE_DURATION,
        }
    }

    pub fn new(addr: impl Into<String>) -> Self {
        Self::builder(addr).build()
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn idle_count(&self) -> usize {
        lock_unpoisoned(&self.idle).len()
    }

    fn take_idle(&self) -> Option<PooledConnection<TcpStream>> {
        let mut idle = lock_unpoisoned(&self.idle);
        while let Some(connection) = idle.pop() {
            if connection.last_used_at().elapsed() <= self.max_idle_duration {
                return Some(connection);
            }
            debug!(addr = %self.addr, "dropping stale idle connection");
        }
        None
    }

    fn dial(&self, timeout: Option<Duration>) -> io::Result<TcpStream> {
        let dial_timeout = timeout.map_or(self.dial_timeout, |timeout| {
            timeout.min(self.dial_timeout).max(Duration::from_millis(1))
        });
        let addrs: Vec<SocketAddr> = self.addr.to_socket_addrs()?.collect();
        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, dial_timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    return Ok(stream);
                }
                Err(error) => last_error = Some(error),
            }
        }
        Err(last_error.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no addresses resolved for {}", self.addr),
            )
        }))
    }
}

impl ConnectionPool for TcpPool {
    type Transport = TcpStream;

    fn acquire(&self, timeout: Option<Duration>) -> io::Result<PooledConnection<TcpStream>> {
        if let Some(mut connection) = self.take_idle() {
            connection.touch();
            return Ok(connection);
        }
        let stream = self.dial(timeout)?;
        debug!(addr = %self.addr, "dialed new connection");
        Ok(PooledConnection::new(stream))
    }

    fn release(&self, mut connection: PooledConnection<TcpStream>) {
        connection.touch();
        let mut idle = lock_unpoisoned(&self.idle);
        if idle.len() < self.max_idle_connections {
            idle.push(connection);
        }
    }

    fn close(&self, connection: PooledConnection<TcpStream>) {
        let _ = connection.into_transport().shutdown(std::net::Shutdown::Both);
    }
}
