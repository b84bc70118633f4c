//! Token ring lookup.
//!
//! Maps a row key to the [`PartitionRange`] owning it and to that range's
//! ordered replica candidates. The router consults the ring once per newly
//! observed range.

use crate::config::RingConfig;
use crate::row_key::RowKey;
use crate::transport::Endpoint;
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Position on the hashed key space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Token(pub i64);

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Contiguous slice `(start, end]` of the token space.
///
/// A range whose start is not below its end wraps around the top of the
/// token space; `start == end` covers the whole ring.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartitionRange {
    start: Token,
    end: Token,
}

impl PartitionRange {
    pub fn new(start: Token, end: Token) -> Self {
        Self { start, end }
    }

    pub fn start(&self) -> Token {
        self.start
    }

    pub fn end(&self) -> Token {
        self.end
    }

    pub fn is_wrapping(&self) -> bool {
        self.start >= self.end
    }

    /// Whether the range owns `token`.
    pub fn contains(&self, token: Token) -> bool {
        if self.start == self.end {
            true
        } else if self.start < self.end {
            token > self.start && token <= self.end
        } else {
            token > self.start || token <= self.end
        }
    }
}

impl fmt::Display for PartitionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}]", self.start, self.end)
    }
}

/// Hashes row keys onto the token space.
pub trait Partitioner: Send + Sync {
    fn token(&self, key: &RowKey) -> Token;
}

/// CRC32 based partitioner spreading keys over the full `i64` space.
#[derive(Debug, Clone, Copy, Default)]
pub struct Crc32Partitioner;

impl Partitioner for Crc32Partitioner {
    fn token(&self, key: &RowKey) -> Token {
        let hash = crc32fast::hash(key.as_bytes()) as i64;
        Token((hash - (1 << 31)) << 32)
    }
}

/// Resolves keys to ranges and ranges to replica candidates.
pub trait RingLookup: Send + Sync {
    /// The range owning `key`.
    fn range_for(&self, key: &RowKey) -> Result<PartitionRange>;

    /// Candidate endpoints of `range`, in preference order.
    fn endpoints(&self, range: &PartitionRange) -> Result<Vec<Endpoint>>;

    /// Any endpoint of the ring, used for one-off metadata lookups.
    fn any_endpoint(&self) -> Option<Endpoint> {
        None
    }
}

/// Fixed ring description.
pub struct StaticRing {
    partitioner: Arc<dyn Partitioner>,
    // keyed by range end
    ranges: BTreeMap<Token, (PartitionRange, Vec<Endpoint>)>,
}

impl StaticRing {
    /// Build a ring from ranges and their replicas.
    ///
    /// Range ends must be distinct and each range needs at least one endpoint.
    pub fn new(
        partitioner: Arc<dyn Partitioner>,
        ranges: Vec<(PartitionRange, Vec<Endpoint>)>,
    ) -> Result<Self> {
        if ranges.is_empty() {
            return Err(Error::Config("Token ring has no ranges".into()));
        }

        let mut by_end = BTreeMap::new();
        for (range, endpoints) in ranges {
            if endpoints.is_empty() {
                return Err(Error::Config(format!("Range {range} has no endpoints")));
            }
            let end = range.end();
            if by_end.insert(end, (range, endpoints)).is_some() {
                return Err(Error::Config(format!(
                    "Two ranges end at token {end}"
                )));
            }
        }

        Ok(Self {
            partitioner,
            ranges: by_end,
        })
    }

    /// Build from configuration, resolving endpoints with `default_port`.
    pub fn from_config(
        config: &RingConfig,
        partitioner: Arc<dyn Partitioner>,
        default_port: u16,
    ) -> Result<Self> {
        let ranges = config
            .ranges
            .iter()
            .map(|r| {
                let endpoints = r
                    .endpoints
                    .iter()
                    .map(|e| Endpoint::parse(e, default_port))
                    .collect::<Result<Vec<_>>>()?;
                Ok((PartitionRange::new(Token(r.start), Token(r.end)), endpoints))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(partitioner, ranges)
    }

    /// Token of a key under this ring's partitioner.
    pub fn token(&self, key: &RowKey) -> Token {
        self.partitioner.token(key)
    }

    /// Number of ranges.
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

impl RingLookup for StaticRing {
    fn range_for(&self, key: &RowKey) -> Result<PartitionRange> {
        let token = self.token(key);
        // first range ending at or after the token, else the wrapping one
        let candidate = self
            .ranges
            .range(token..)
            .next()
            .or_else(|| self.ranges.iter().next())
            .map(|(_, (range, _))| range);

        match candidate {
            Some(range) if range.contains(token) => Ok(range.clone()),
            _ => Err(Error::Ring(format!("No range owns token {token}"))),
        }
    }

    fn endpoints(&self, range: &PartitionRange) -> Result<Vec<Endpoint>> {
        match self.ranges.get(&range.end()) {
            Some((known, endpoints)) if known == range => Ok(endpoints.clone()),
            _ => Err(Error::Ring(format!("Unknown range {range}"))),
        }
    }

    fn any_endpoint(&self) -> Option<Endpoint> {
        self.ranges
            .values()
            .next()
            .and_then(|(_, endpoints)| endpoints.first().cloned())
    }
}

impl fmt::Debug for StaticRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticRing")
            .field("ranges", &self.ranges.values().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Uses the first key byte as the token.
    struct FirstByte;

    impl Partitioner for FirstByte {
        fn token(&self, key: &RowKey) -> Token {
            Token(key.as_bytes().first().copied().unwrap_or(0) as i64)
        }
    }

    fn ep(host: &str) -> Endpoint {
        Endpoint::new(host, 9160)
    }

    fn ring() -> StaticRing {
        StaticRing::new(
            Arc::new(FirstByte),
            vec![
                (PartitionRange::new(Token(100), Token(10)), vec![ep("c")]),
                (PartitionRange::new(Token(10), Token(100)), vec![ep("a"), ep("b")]),
            ],
        )
        .unwrap()
    }

    fn key(first: u8) -> RowKey {
        RowKey::new(vec![first, 0xAA])
    }

    #[test]
    fn test_range_contains() {
        let range = PartitionRange::new(Token(10), Token(100));
        assert!(!range.contains(Token(10)));
        assert!(range.contains(Token(11)));
        assert!(range.contains(Token(100)));
        assert!(!range.contains(Token(101)));

        let wrapping = PartitionRange::new(Token(100), Token(10));
        assert!(wrapping.is_wrapping());
        assert!(wrapping.contains(Token(101)));
        assert!(wrapping.contains(Token(i64::MIN)));
        assert!(wrapping.contains(Token(10)));
        assert!(!wrapping.contains(Token(50)));

        let full = PartitionRange::new(Token(5), Token(5));
        assert!(full.contains(Token(i64::MAX)));
    }

    #[test]
    fn test_range_for() {
        let ring = ring();
        assert_eq!(
            ring.range_for(&key(50)).unwrap(),
            PartitionRange::new(Token(10), Token(100))
        );
        assert_eq!(
            ring.range_for(&key(100)).unwrap(),
            PartitionRange::new(Token(10), Token(100))
        );
        assert_eq!(
            ring.range_for(&key(200)).unwrap(),
            PartitionRange::new(Token(100), Token(10))
        );
        assert_eq!(
            ring.range_for(&key(3)).unwrap(),
            PartitionRange::new(Token(100), Token(10))
        );
    }

    #[test]
    fn test_endpoints() {
        let ring = ring();
        let range = ring.range_for(&key(50)).unwrap();
        assert_eq!(ring.endpoints(&range).unwrap(), vec![ep("a"), ep("b")]);

        let unknown = PartitionRange::new(Token(0), Token(100));
        assert!(ring.endpoints(&unknown).is_err());
        assert_eq!(ring.any_endpoint(), Some(ep("c")));
    }

    #[test]
    fn test_gap_in_ring() {
        let ring = StaticRing::new(
            Arc::new(FirstByte),
            vec![(PartitionRange::new(Token(10), Token(20)), vec![ep("a")])],
        )
        .unwrap();
        assert!(ring.range_for(&key(15)).is_ok());
        assert!(matches!(ring.range_for(&key(50)), Err(Error::Ring(_))));
    }

    #[test]
    fn test_invalid_rings() {
        assert!(StaticRing::new(Arc::new(FirstByte), vec![]).is_err());
        assert!(StaticRing::new(
            Arc::new(FirstByte),
            vec![(PartitionRange::new(Token(0), Token(1)), vec![])]
        )
        .is_err());
        assert!(StaticRing::new(
            Arc::new(FirstByte),
            vec![
                (PartitionRange::new(Token(0), Token(1)), vec![ep("a")]),
                (PartitionRange::new(Token(-5), Token(1)), vec![ep("b")]),
            ]
        )
        .is_err());
    }

    #[test]
    fn test_from_config() {
        use crate::config::RangeConfig;

        let config = RingConfig {
            ranges: vec![RangeConfig {
                start: 0,
                end: 0,
                endpoints: vec!["a".into(), "b:9042".into()],
            }],
        };
        let ring = StaticRing::from_config(&config, Arc::new(Crc32Partitioner), 9160).unwrap();
        let range = ring.range_for(&key(1)).unwrap();
        assert_eq!(
            ring.endpoints(&range).unwrap(),
            vec![ep("a"), Endpoint::new("b", 9042)]
        );
    }

    #[test]
    fn test_crc32_partitioner_is_stable() {
        let p = Crc32Partitioner;
        let a = p.token(&RowKey::new(&b"user-1"[..]));
        let b = p.token(&RowKey::new(&b"user-1"[..]));
        let c = p.token(&RowKey::new(&b"user-2"[..]));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
