use anyhow::{bail, Result};

/// Backend endpoints are plain `host:port` pairs.
pub fn validate_hostport(hostport: &str) -> Result<()> {
    if hostport.is_empty() {
        bail!("host:port is empty");
    }
    if hostport.split(':').count() != 2 {
        bail!("host:port invalid: {}", hostport);
    }
    Ok(())
}
