use std::time::Duration;

use anyhow::{bail, Context, Result};

/// Parse a duration flag of the form `30s`, `5m` or `1h`.
pub fn parse_duration(value: &str) -> Result<Duration> {
    let value = value.trim();
    if value.len() < 2 {
        bail!("invalid duration: {}", value);
    }
    let (count, unit) = value.split_at(value.len() - 1);
    let count: u64 = count
        .parse()
        .with_context(|| format!("invalid duration: {}", value))?;
    let seconds = match unit {
        "s" => count,
        "m" => count * 60,
        "h" => count * 3600,
        _ => bail!("invalid duration unit in {}: expected s, m or h", value),
    };
    Ok(Duration::from_secs(seconds))
}
