//! Route command implementation.

use anyhow::{anyhow, bail, Context, Result};
use bytes::Bytes;
use shardwriter_core::ring::{Crc32Partitioner, RingLookup, StaticRing};
use shardwriter_core::row_key::{KeyLayout, RowKeyBuilder};
use shardwriter_core::Config;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::debug;

/// Print where a record with the given key columns would be written.
pub fn run(config: &Config, pairs: &[String]) -> Result<()> {
    let layout = config
        .output
        .key_layout
        .as_ref()
        .ok_or_else(|| anyhow!("Config error: route needs [output.key_layout]"))?;
    let layout = KeyLayout::parse(&layout.validator, layout.columns.clone())?;

    if config.ring.ranges.is_empty() {
        bail!("Config error: route needs at least one [[ring.ranges]] entry");
    }
    let ring = StaticRing::from_config(
        &config.ring,
        Arc::new(Crc32Partitioner),
        config.output.rpc_port,
    )?;

    let keys = parse_pairs(pairs)?;
    let row_key = RowKeyBuilder::new(layout).build(&keys)?;
    let token = ring.token(&row_key);
    let range = ring.range_for(&row_key)?;
    let endpoints = ring.endpoints(&range)?;
    debug!(token = %token, range = %range, "Key routed");

    println!("row key:    {}", hex(row_key.as_bytes()));
    println!("token:      {token}");
    println!("range:      {range}");
    for (i, endpoint) in endpoints.iter().enumerate() {
        println!("candidate {}: {endpoint}", i + 1);
    }
    Ok(())
}

/// Parse `name=value` and `name:type=value` arguments.
fn parse_pairs(pairs: &[String]) -> Result<HashMap<String, Bytes>> {
    let mut keys = HashMap::with_capacity(pairs.len());

    for pair in pairs {
        let (name, value) = pair
            .split_once('=')
            .with_context(|| format!("Expected name=value, got {pair:?}"))?;

        let (name, bytes) = match name.split_once(':') {
            Some((name, "i32")) => (
                name,
                Bytes::copy_from_slice(&value.parse::<i32>().with_context(|| format!("Invalid i32 for {name}"))?.to_be_bytes()),
            ),
            Some((name, "i64")) => (
                name,
                Bytes::copy_from_slice(&value.parse::<i64>().with_context(|| format!("Invalid i64 for {name}"))?.to_be_bytes()),
            ),
            Some((_, other)) => bail!("Unsupported key type {other:?} (use i32 or i64)"),
            None => (name, Bytes::copy_from_slice(value.as_bytes())),
        };

        if keys.insert(name.to_string(), bytes).is_some() {
            bail!("Key column {name} given twice");
        }
    }

    Ok(keys)
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2 + 2);
    out.push_str("0x");
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_pairs() {
        let keys = parse_pairs(&args(&["region=eu", "id:i32=7", "ts:i64=1"])).unwrap();
        assert_eq!(keys["region"], Bytes::from_static(b"eu"));
        assert_eq!(keys["id"], Bytes::from_static(&[0, 0, 0, 7]));
        assert_eq!(keys["ts"].len(), 8);
    }

    #[test]
    fn test_parse_pairs_errors() {
        assert!(parse_pairs(&args(&["noequals"])).is_err());
        assert!(parse_pairs(&args(&["id:i32=abc"])).is_err());
        assert!(parse_pairs(&args(&["id:f32=1.0"])).is_err());
        assert!(parse_pairs(&args(&["id=1", "id=2"])).is_err());
    }

    #[test]
    fn test_hex() {
        assert_eq!(hex(&[0, 2, 0xab]), "0x0002ab");
    }

    #[test]
    fn test_route_single_range() {
        let config: Config = toml::from_str(
            r#"
            [output]
            endpoints = ["a"]
            keyspace = "ks"
            table = "t"
            statement = "INSERT INTO ks.t (id) VALUES (?)"

            [output.key_layout]
            validator = "UTF8Type"
            columns = ["id"]

            [[ring.ranges]]
            start = 0
            end = 0
            endpoints = ["a", "b"]
            "#,
        )
        .unwrap();

        assert!(run(&config, &args(&["id=user-1"])).is_ok());
        assert!(run(&config, &args(&["other=x"])).is_err());
    }
}
