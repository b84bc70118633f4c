//! Validate command implementation.

use anyhow::Result;
use shardwriter_core::ring::{Crc32Partitioner, StaticRing};
use shardwriter_core::row_key::KeyLayout;
use shardwriter_core::Config;
use std::sync::Arc;
use tracing::info;

/// Check a loaded configuration beyond what parsing guarantees.
pub fn run(config: &Config) -> Result<()> {
    config.validate()?;

    let output = &config.output;
    match &output.key_layout {
        Some(layout) => {
            let layout = KeyLayout::parse(&layout.validator, layout.columns.clone())?;
            info!(
                columns = ?layout.columns(),
                composite = layout.is_composite(),
                "Key layout is valid"
            );
        }
        None => info!("No key layout configured, it will be discovered from the cluster"),
    }

    if !config.ring.ranges.is_empty() {
        let ring = StaticRing::from_config(&config.ring, Arc::new(Crc32Partitioner), output.rpc_port)?;
        info!(ranges = ring.len(), "Token ring is valid");
    }

    println!(
        "Configuration is valid: {}.{} via {} seed endpoint(s), consistency {}, batch threshold {}",
        output.keyspace,
        output.table,
        output.endpoints.len(),
        output.consistency_level,
        output.batch_threshold
    );
    Ok(())
}
