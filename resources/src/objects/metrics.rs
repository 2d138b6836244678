use serde::{Deserialize, Serialize};

/// Summary statistics over one window of samples of a single dimension.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
pub struct Percentiles {
    /// Average over the collected sample.
    pub mean: u64,
    /// Max seen over the collected sample.
    pub max: u64,
    /// 90th percentile over the collected sample.
    pub ninety: u64,
}

/// A resource envelope. Cpu in milli-cores, memory in bytes.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
pub struct Resource {
    pub cpu: u64,
    pub memory: u64,
}

/// Static headroom of a node. Cpu in milli-cores, memory in bytes.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capacity {
    pub cpu: u64,
    pub memory: u64,
}

/// Usage percentiles derived from one collection window.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    /// False when the window could not be measured.
    pub valid: bool,
    /// Mean, max and 90p cpu rate in milli-cores. Integers to avoid floats on the wire.
    pub cpu: Percentiles,
    /// Mean, max and 90p memory working set in bytes.
    pub memory: Percentiles,
}
