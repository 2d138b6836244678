//! Reduction of raw per-second samples into usage percentiles.

use resources::objects::metrics::Percentiles;

use crate::node::RawSample;

const SECONDS_TO_MILLISECONDS: i64 = 1000;
/// Sample pairs spaced closer than this are timing noise.
const MIN_SAMPLE_SPACING_NS: i64 = 10_000_000;

/// 90th percentile of the samples, rounded down to an integer.
pub fn ninety_percentile(samples: &mut [u64]) -> u64 {
    let count = samples.len();
    if count == 0 {
        return 0;
    }
    samples.sort_unstable();
    let n = 0.9 * (count as f64 + 1.0);
    let index = n.floor() as usize;
    let frac = n - n.floor();
    // count >= 1 puts index in 1..=count.
    let mut percentile = samples[index - 1] as f64;
    if index < count {
        percentile += frac * (samples[index] - samples[index - 1]) as f64;
    }
    percentile as u64
}

/// Fold one more sample into a running average.
pub fn add_to_mean(mean: f64, value: u64, count: u64) -> f64 {
    if count < 1 {
        return 0.0;
    }
    let count = count as f64;
    (mean * (count - 1.0) + value as f64) / count
}

/// Reduce a raw sample sequence to `(cpu, memory)` percentiles.
///
/// Memory working-set sizes are used as-is. Cpu usage arrives as a cumulative
/// nanosecond counter, so rates are first differences over wall time, in
/// milli-cores; the first sample only establishes the baseline. A negative
/// difference means the counter reset and that pair is dropped.
pub fn reduce(stats: &[RawSample]) -> (Percentiles, Percentiles) {
    let mut cpu = Percentiles::default();
    let mut memory = Percentiles::default();
    let mut cpu_samples: Vec<u64> = Vec::with_capacity(stats.len().saturating_sub(1));
    let mut memory_samples: Vec<u64> = Vec::with_capacity(stats.len());
    let mut baseline: Option<(i64, chrono::DateTime<chrono::Utc>)> = None;
    let mut cpu_mean = 0.0;
    let mut memory_mean = 0.0;

    for stat in stats {
        let mut elapsed = 0;
        if let Some((_, last_time)) = baseline {
            elapsed = (stat.timestamp - last_time)
                .num_nanoseconds()
                .unwrap_or(i64::MAX);
            if elapsed < MIN_SAMPLE_SPACING_NS {
                tracing::debug!("Elapsed time too small: {} ns", elapsed);
                continue;
            }
        }

        let working_set = stat.memory.working_set;
        memory.max = memory.max.max(working_set);
        memory_samples.push(working_set);
        memory_mean = add_to_mean(memory_mean, working_set, memory_samples.len() as u64);

        let cpu_ns = stat.cpu.usage.total as i64;
        let last_cpu = match baseline {
            Some((last_cpu, _)) => last_cpu,
            None => {
                baseline = Some((cpu_ns, stat.timestamp));
                continue;
            },
        };
        baseline = Some((cpu_ns, stat.timestamp));
        let rate = (cpu_ns - last_cpu) * SECONDS_TO_MILLISECONDS / elapsed;
        if rate < 0 {
            tracing::debug!("Discarding negative cpu rate: {} milli-cores", rate);
            continue;
        }
        let rate = rate as u64;
        cpu.max = cpu.max.max(rate);
        cpu_samples.push(rate);
        cpu_mean = add_to_mean(cpu_mean, rate, cpu_samples.len() as u64);
    }

    cpu.mean = cpu_mean as u64;
    memory.mean = memory_mean as u64;
    cpu.ninety = ninety_percentile(&mut cpu_samples);
    memory.ninety = ninety_percentile(&mut memory_samples);
    (cpu, memory)
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::*;
    use crate::node::{CpuSample, CpuUsage, MemorySample, RawSample};

    fn sample(offset_ms: i64, cpu_total_ns: u64, working_set: u64) -> RawSample {
        RawSample {
            timestamp: Utc.timestamp(1_650_000_000, 0) + Duration::milliseconds(offset_ms),
            cpu: CpuSample {
                usage: CpuUsage {
                    total: cpu_total_ns,
                },
            },
            memory: MemorySample {
                working_set,
            },
        }
    }

    #[test]
    fn empty_input_yields_zero_percentiles() {
        let (cpu, memory) = reduce(&[]);
        assert_eq!(cpu, Percentiles::default());
        assert_eq!(memory, Percentiles::default());
    }

    #[test]
    fn single_sample_populates_memory_only() {
        let (cpu, memory) = reduce(&[sample(0, 5_000_000, 4096)]);
        assert_eq!(cpu, Percentiles::default());
        assert_eq!(
            memory,
            Percentiles {
                mean: 4096,
                max: 4096,
                ninety: 4096,
            }
        );
    }

    #[test]
    fn ninety_percentile_interpolates() {
        // n = 0.9 * 11 = 9.9 over ten samples: 90 + 0.9 * 10 = 99.
        let mut samples = vec![40, 10, 100, 20, 50, 90, 30, 60, 70, 80];
        assert_eq!(ninety_percentile(&mut samples), 99);
    }

    #[test]
    fn constant_rate_trace_collapses_to_the_rate() {
        // 250 milli-cores burns 250e6 cpu-ns per second.
        let rate = 250u64;
        let stats: Vec<_> = (0..60)
            .map(|i| sample(i * 1000, i as u64 * rate * 1_000_000, 1024))
            .collect();
        let (cpu, _) = reduce(&stats);
        assert_eq!(cpu.mean, rate);
        assert_eq!(cpu.max, rate);
        assert_eq!(cpu.ninety, rate);
    }

    #[test]
    fn close_samples_are_dropped() {
        let stats = vec![
            sample(0, 0, 100),
            // 5ms after the previous sample: timing noise.
            sample(5, 1_000_000_000, 7000),
            sample(1000, 400_000_000, 200),
        ];
        let (cpu, memory) = reduce(&stats);
        assert_eq!(memory.max, 200);
        assert_eq!(memory.mean, 150);
        // One usable pair: 400e6 ns over 1s = 400 milli-cores.
        assert_eq!(cpu.max, 400);
        assert_eq!(cpu.ninety, 400);
    }

    #[test]
    fn counter_reset_is_discarded() {
        let stats = vec![
            sample(0, 100_000_000, 1),
            sample(1000, 50_000_000, 1),
            sample(2000, 150_000_000, 1),
        ];
        let (cpu, _) = reduce(&stats);
        // The negative pair is dropped; the reset value becomes the new
        // baseline, leaving one 100 milli-core sample.
        assert_eq!(cpu.mean, 100);
        assert_eq!(cpu.max, 100);
        assert_eq!(cpu.ninety, 100);
    }

    #[test]
    fn mean_never_exceeds_ninety_nor_max() {
        let stats: Vec<_> = (0..30)
            .map(|i| {
                sample(
                    i * 1000,
                    (i * i) as u64 * 10_000_000,
                    (100 + i * 7) as u64,
                )
            })
            .collect();
        let (cpu, memory) = reduce(&stats);
        assert!(cpu.mean <= cpu.ninety && cpu.ninety <= cpu.max);
        assert!(memory.mean <= memory.ninety && memory.ninety <= memory.max);
    }
}
