//! Thermal sampling and CPU frequency governor control.
//!
//! The sampler runs on a background worker, reads the SoC temperature at a
//! fixed interval and publishes it with a throttled flag. Nothing here blocks
//! the data path: stages only read the atomics in [`ThermalState`].

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::constants::timeouts::SAMPLER_POLL;
use crate::stats::PipelineStats;

/// Source of temperature readings.
pub trait ThermalSensor: Send + Sync {
    /// Current temperature in degrees Celsius.
    fn read_celsius(&self) -> io::Result<f32>;
}

/// Linux thermal zone exposing millidegrees Celsius.
#[derive(Debug, Clone)]
pub struct SysfsThermalSensor {
    path: PathBuf,
}

impl SysfsThermalSensor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ThermalSensor for SysfsThermalSensor {
    fn read_celsius(&self) -> io::Result<f32> {
        let raw = fs::read_to_string(&self.path)?;
        let millis: i64 = raw
            .trim()
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(millis as f32 / 1000.0)
    }
}

/// Sensor returning a settable value, for simulation and tests.
#[derive(Debug)]
pub struct FixedSensor(AtomicU32);

impl FixedSensor {
    pub fn new(celsius: f32) -> Self {
        Self(AtomicU32::new(celsius.to_bits()))
    }

    pub fn set(&self, celsius: f32) {
        self.0.store(celsius.to_bits(), Ordering::Relaxed);
    }
}

impl ThermalSensor for FixedSensor {
    fn read_celsius(&self) -> io::Result<f32> {
        Ok(f32::from_bits(self.0.load(Ordering::Relaxed)))
    }
}

/// Latest thermal reading, shared with every stage.
#[derive(Debug)]
pub struct ThermalState {
    temperature_bits: AtomicU32,
    has_reading: AtomicBool,
    throttled: AtomicBool,
    samples: AtomicU64,
}

impl Default for ThermalState {
    fn default() -> Self {
        Self {
            temperature_bits: AtomicU32::new(0),
            has_reading: AtomicBool::new(false),
            throttled: AtomicBool::new(false),
            samples: AtomicU64::new(0),
        }
    }
}

impl ThermalState {
    /// Last sampled temperature, `None` before the first successful read.
    pub fn temperature(&self) -> Option<f32> {
        self.has_reading
            .load(Ordering::Acquire)
            .then(|| f32::from_bits(self.temperature_bits.load(Ordering::Relaxed)))
    }

    /// Whether the last sample was above the threshold.
    pub fn is_throttled(&self) -> bool {
        self.throttled.load(Ordering::Relaxed)
    }

    /// Number of successful samples.
    pub fn samples(&self) -> u64 {
        self.samples.load(Ordering::Relaxed)
    }

    /// Store a reading and return whether the throttled flag changed.
    pub fn record(&self, celsius: f32, threshold: f32) -> bool {
        self.temperature_bits.store(celsius.to_bits(), Ordering::Relaxed);
        self.has_reading.store(true, Ordering::Release);
        self.samples.fetch_add(1, Ordering::Relaxed);
        let throttled = celsius > threshold;
        self.throttled.swap(throttled, Ordering::Relaxed) != throttled
    }

    /// Forget the reading, e.g. between runs.
    pub fn clear(&self) {
        self.has_reading.store(false, Ordering::Release);
        self.throttled.store(false, Ordering::Relaxed);
    }
}

/// Periodic temperature sampler.
pub struct ThermalSampler {
    sensor: Arc<dyn ThermalSensor>,
    state: Arc<ThermalState>,
    stats: Arc<PipelineStats>,
    threshold: f32,
    interval: Duration,
}

impl ThermalSampler {
    pub fn new(
        sensor: Arc<dyn ThermalSensor>,
        state: Arc<ThermalState>,
        stats: Arc<PipelineStats>,
        threshold: f32,
        interval: Duration,
    ) -> Self {
        Self {
            sensor,
            state,
            stats,
            threshold,
            interval,
        }
    }

    /// Take one sample.
    pub fn sample(&self) {
        match self.sensor.read_celsius() {
            Ok(celsius) => {
                if self.state.record(celsius, self.threshold) {
                    if self.state.is_throttled() {
                        warn!(
                            "Temperature {:.1}°C above threshold {:.1}°C, throttling",
                            celsius, self.threshold
                        );
                    } else {
                        info!("Temperature back to {:.1}°C, throttling cleared", celsius);
                    }
                }
                let snapshot = self.stats.snapshot();
                debug!(
                    "Thermal sample {:.1}°C, cpu {:.1}%, throughput {:.2}KB/s",
                    celsius, snapshot.cpu_utilization, snapshot.throughput_kbps
                );
            }
            Err(e) => debug!("Temperature read failed: {}", e),
        }
    }

    /// Sample until `stop` is set, checking it every few tens of milliseconds.
    pub fn run(self, stop: &AtomicBool) {
        let mut next = Instant::now();
        while !stop.load(Ordering::Acquire) {
            if Instant::now() >= next {
                self.sample();
                next = Instant::now() + self.interval;
            }
            std::thread::sleep(SAMPLER_POLL.min(self.interval));
        }
    }
}

/// Switches every CPU's frequency governor and restores the previous ones.
pub struct CpuGovernor {
    root: PathBuf,
    saved: Mutex<Vec<(PathBuf, String)>>,
}

impl CpuGovernor {
    /// Governor control rooted at a sysfs CPU directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            saved: Mutex::new(Vec::new()),
        }
    }

    fn governor_files(&self) -> io::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let is_cpu = name
                .strip_prefix("cpu")
                .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()));
            if !is_cpu {
                continue;
            }
            let path = entry.path().join("cpufreq").join("scaling_governor");
            if path.is_file() {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Write `governor` to every CPU, remembering the old values.
    ///
    /// Returns the number of CPUs switched. CPUs whose node is not writable are
    /// skipped.
    pub fn switch_to(&self, governor: &str) -> io::Result<usize> {
        let mut saved = self.saved.lock();
        let mut switched = 0;
        for path in self.governor_files()? {
            let previous = fs::read_to_string(&path)?.trim().to_string();
            match fs::write(&path, governor) {
                Ok(()) => {
                    saved.push((path, previous));
                    switched += 1;
                }
                Err(e) => debug!("Cannot set governor at {}: {}", path.display(), e),
            }
        }
        info!("CPU governor set to '{}' on {} cpus", governor, switched);
        Ok(switched)
    }

    /// Put back whatever [`CpuGovernor::switch_to`] replaced.
    pub fn restore(&self) {
        let mut saved = self.saved.lock();
        for (path, previous) in saved.drain(..) {
            if let Err(e) = fs::write(&path, &previous) {
                warn!("Failed to restore governor at {}: {}", path.display(), e);
            }
        }
    }

    /// Root directory this instance manages.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sysfs_sensor_reads_millidegrees() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("temp");
        fs::write(&path, "54321\n").unwrap();
        let sensor = SysfsThermalSensor::new(&path);
        assert!((sensor.read_celsius().unwrap() - 54.321).abs() < 1e-3);

        fs::write(&path, "garbage").unwrap();
        assert!(sensor.read_celsius().is_err());
    }

    #[test]
    fn test_throttle_transitions() {
        let state = ThermalState::default();
        assert_eq!(state.temperature(), None);

        assert!(!state.record(70.0, 80.0));
        assert!(!state.is_throttled());
        assert!(state.record(85.0, 80.0));
        assert!(state.is_throttled());
        assert!(!state.record(86.0, 80.0));
        assert!(state.record(79.0, 80.0));
        assert_eq!(state.temperature(), Some(79.0));
        assert_eq!(state.samples(), 4);
    }

    #[test]
    fn test_sampler_stops_on_flag() {
        let sensor = Arc::new(FixedSensor::new(90.0));
        let state = Arc::new(ThermalState::default());
        let sampler = ThermalSampler::new(
            sensor,
            Arc::clone(&state),
            Arc::new(PipelineStats::new()),
            80.0,
            Duration::from_millis(5),
        );
        let stop = Arc::new(AtomicBool::new(false));
        let stop_clone = Arc::clone(&stop);
        let handle = std::thread::spawn(move || sampler.run(&stop_clone));

        let deadline = Instant::now() + Duration::from_secs(5);
        while state.samples() == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        stop.store(true, Ordering::Release);
        handle.join().unwrap();

        assert!(state.is_throttled());
        assert_eq!(state.temperature(), Some(90.0));
    }

    #[test]
    fn test_governor_switch_and_restore() {
        let dir = TempDir::new().unwrap();
        for cpu in ["cpu0", "cpu1"] {
            let freq = dir.path().join(cpu).join("cpufreq");
            fs::create_dir_all(&freq).unwrap();
            fs::write(freq.join("scaling_governor"), "ondemand\n").unwrap();
        }
        fs::create_dir_all(dir.path().join("cpufreq")).unwrap();

        let governor = CpuGovernor::new(dir.path());
        assert_eq!(governor.switch_to("performance").unwrap(), 2);
        let node = dir.path().join("cpu1/cpufreq/scaling_governor");
        assert_eq!(fs::read_to_string(&node).unwrap(), "performance");

        governor.restore();
        assert_eq!(fs::read_to_string(&node).unwrap(), "ondemand");
    }

    #[test]
    fn test_governor_missing_root() {
        let governor = CpuGovernor::new("/nonexistent/cpu/root");
        assert!(governor.switch_to("performance").is_err());
    }
}
