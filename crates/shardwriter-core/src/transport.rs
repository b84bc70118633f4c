//! Connection boundary to the storage cluster.
//!
//! Authentication, transport establishment and the statement wire encoding
//! live behind [`ConnectionFactory`] and [`Connection`]. Every failure crossing
//! this boundary is a [`TransportError`] carrying an explicit kind.

use crate::config::ConsistencyLevel;
use crate::{Error, Result, TransportError};
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Network address of a storage node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Create an endpoint from host and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse `host` or `host:port`, using `default_port` when absent.
    ///
    /// Bracketed IPv6 literals (`[::1]:9160`) are accepted.
    pub fn parse(address: &str, default_port: u16) -> Result<Self> {
        let address = address.trim();
        if address.is_empty() {
            return Err(Error::Config("Empty endpoint address".into()));
        }

        if let Some(rest) = address.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| Error::Config(format!("Unterminated IPv6 literal: {address}")))?;
            let port = match tail.strip_prefix(':') {
                Some(port) => parse_port(port, address)?,
                None if tail.is_empty() => default_port,
                None => return Err(Error::Config(format!("Invalid endpoint: {address}"))),
            };
            return Ok(Self::new(host, port));
        }

        match address.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') => {
                Ok(Self::new(host, parse_port(port, address)?))
            }
            // bare IPv6 without brackets
            Some(_) => Ok(Self::new(address, default_port)),
            None => Ok(Self::new(address, default_port)),
        }
    }

    /// Host name or address.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port.
    pub fn port(&self) -> u16 {
        self.port
    }
}

fn parse_port(port: &str, address: &str) -> Result<u16> {
    port.parse()
        .map_err(|_| Error::Config(format!("Invalid port in endpoint {address}")))
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Process-unique identity of one established connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw value, for logging.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Server-assigned handle of a prepared statement.
///
/// Only meaningful on the connection that prepared it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PreparedId(pub i32);

/// Raw partition key description as stored in cluster metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyLayoutDescriptor {
    /// Key validator type descriptor, e.g. `...CompositeType(UTF8Type,Int32Type)`
    pub key_validator: String,
    /// JSON list of partition key column names
    pub key_aliases: String,
}

/// An authenticated connection to one storage node.
#[async_trait]
pub trait Connection: Send {
    /// Parse a statement server-side and return its handle.
    async fn prepare(&mut self, statement: &str) -> std::result::Result<PreparedId, TransportError>;

    /// Execute a prepared statement with bound values.
    async fn execute(
        &mut self,
        statement: PreparedId,
        values: &[Bytes],
        consistency: ConsistencyLevel,
    ) -> std::result::Result<(), TransportError>;

    /// Fetch the partition key layout of a table.
    async fn describe_key_layout(
        &mut self,
        keyspace: &str,
        table: &str,
    ) -> std::result::Result<KeyLayoutDescriptor, TransportError>;

    /// Close the underlying transport. Must be safe to call once per connection.
    async fn close(&mut self);
}

/// Opens authenticated connections.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    /// Connect and authenticate against an endpoint.
    async fn connect(
        &self,
        endpoint: &Endpoint,
    ) -> std::result::Result<Box<dyn Connection>, TransportError>;
}

/// A connection tagged with its identity and endpoint.
pub struct ActiveConnection {
    id: ConnectionId,
    endpoint: Endpoint,
    inner: Box<dyn Connection>,
}

impl ActiveConnection {
    /// Open a new connection through the factory.
    pub async fn open(
        factory: &dyn ConnectionFactory,
        endpoint: &Endpoint,
    ) -> std::result::Result<Self, TransportError> {
        let inner = factory.connect(endpoint).await?;
        let connection = Self::new(endpoint.clone(), inner);
        debug!(
            endpoint = %endpoint,
            connection_id = connection.id.as_u64(),
            "Connection established"
        );
        Ok(connection)
    }

    pub(crate) fn new(endpoint: Endpoint, inner: Box<dyn Connection>) -> Self {
        Self {
            id: ConnectionId::next(),
            endpoint,
            inner,
        }
    }

    /// Identity of this connection.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Endpoint this connection is bound to.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub async fn prepare(
        &mut self,
        statement: &str,
    ) -> std::result::Result<PreparedId, TransportError> {
        self.inner.prepare(statement).await
    }

    pub async fn execute(
        &mut self,
        statement: PreparedId,
        values: &[Bytes],
        consistency: ConsistencyLevel,
    ) -> std::result::Result<(), TransportError> {
        self.inner.execute(statement, values, consistency).await
    }

    pub async fn describe_key_layout(
        &mut self,
        keyspace: &str,
        table: &str,
    ) -> std::result::Result<KeyLayoutDescriptor, TransportError> {
        self.inner.describe_key_layout(keyspace, table).await
    }

    /// Close the connection, consuming it.
    pub async fn close(mut self) {
        self.inner.close().await;
        debug!(
            endpoint = %self.endpoint,
            connection_id = self.id.as_u64(),
            "Connection closed"
        );
    }
}

impl fmt::Debug for ActiveConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveConnection")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_parse() {
        let ep = Endpoint::parse("10.0.0.1", 9160).unwrap();
        assert_eq!(ep, Endpoint::new("10.0.0.1", 9160));

        let ep = Endpoint::parse("node-a:9042", 9160).unwrap();
        assert_eq!(ep.host(), "node-a");
        assert_eq!(ep.port(), 9042);
        assert_eq!(ep.to_string(), "node-a:9042");
    }

    #[test]
    fn test_endpoint_parse_ipv6() {
        let ep = Endpoint::parse("[::1]:9042", 9160).unwrap();
        assert_eq!(ep.host(), "::1");
        assert_eq!(ep.port(), 9042);
        assert_eq!(ep.to_string(), "[::1]:9042");

        let ep = Endpoint::parse("::1", 9160).unwrap();
        assert_eq!(ep.port(), 9160);

        let ep = Endpoint::parse("[fe80::1]", 9160).unwrap();
        assert_eq!(ep.host(), "fe80::1");
        assert_eq!(ep.port(), 9160);
    }

    #[test]
    fn test_endpoint_parse_errors() {
        assert!(Endpoint::parse("", 9160).is_err());
        assert!(Endpoint::parse("host:notaport", 9160).is_err());
        assert!(Endpoint::parse("host:70000", 9160).is_err());
        assert!(Endpoint::parse("[::1", 9160).is_err());
    }

    #[test]
    fn test_connection_ids_are_unique() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert_ne!(a, b);
        assert!(b > a);
    }
}
