//! CPU affinity management for pipeline workers.
//!
//! Each stage gets a set of cores sized from the machine's topology; workers of
//! that stage are pinned round-robin within the set. Pinning is best effort:
//! where the OS does not support it, workers simply run unpinned.

use core_affinity::{self, CoreId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use tracing::{debug, info, warn};

use crate::error::{ProcessorError, Result};

/// Pipeline roles used for core assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    /// Channel readers
    Ingest,
    /// Format detection, extraction, validation, checksum
    Parse,
    /// 2-bit packing and metadata
    Encode,
    /// Write-behind cache producers
    Store,
    /// Flush task and thermal sampler
    Background,
}

/// Where a new worker should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Next core of the stage's set.
    Stage(StageKind),
    /// A specific core index, as given in channel configuration.
    Core(usize),
    /// Leave scheduling to the OS.
    Unpinned,
}

/// CPU core set for thread affinity
#[derive(Debug)]
pub struct CpuSet {
    cores: Vec<CoreId>,
    current_index: AtomicUsize,
}

impl CpuSet {
    /// Create a new CPU set from core IDs
    pub fn new(cores: Vec<CoreId>) -> Self {
        Self {
            cores,
            current_index: AtomicUsize::new(0),
        }
    }

    /// Get the next core in round-robin fashion
    pub fn next_core(&self) -> Option<CoreId> {
        if self.cores.is_empty() {
            return None;
        }

        let index = self.current_index.fetch_add(1, Ordering::Relaxed);
        Some(self.cores[index % self.cores.len()])
    }

    /// Get all cores in this set
    pub fn cores(&self) -> &[CoreId] {
        &self.cores
    }

    /// Get the number of cores in this set
    pub fn len(&self) -> usize {
        self.cores.len()
    }

    /// Check if the set is empty
    pub fn is_empty(&self) -> bool {
        self.cores.is_empty()
    }
}

/// CPU affinity manager for pipeline workers.
pub struct AffinityManager {
    available_cores: Vec<CoreId>,
    stage_cores: HashMap<StageKind, CpuSet>,
    affinity_supported: bool,
}

impl AffinityManager {
    /// Create a manager for the cores the OS reports.
    pub fn new() -> Self {
        Self::with_cores(core_affinity::get_core_ids().unwrap_or_default())
    }

    /// Create a manager over an explicit core list.
    pub fn with_cores(available_cores: Vec<CoreId>) -> Self {
        let affinity_supported = !available_cores.is_empty();

        if affinity_supported {
            info!(
                "CPU affinity manager initialized with {} cores",
                available_cores.len()
            );
        } else {
            warn!("CPU affinity not supported on this platform");
        }

        let mut manager = Self {
            available_cores,
            stage_cores: HashMap::new(),
            affinity_supported,
        };
        manager.auto_assign_cores();
        manager
    }

    /// Manager that never pins.
    pub fn disabled() -> Self {
        Self {
            available_cores: Vec::new(),
            stage_cores: HashMap::new(),
            affinity_supported: false,
        }
    }

    fn auto_assign_cores(&mut self) {
        let cores = &self.available_cores;
        let total = cores.len();
        if total == 0 {
            return;
        }

        let set = |range: std::ops::Range<usize>| CpuSet::new(cores[range].to_vec());
        let single = |i: usize| CpuSet::new(vec![cores[i % total]]);

        let assignments = match total {
            1..=2 => vec![
                (StageKind::Ingest, set(0..total)),
                (StageKind::Parse, set(0..total)),
                (StageKind::Encode, set(0..total)),
                (StageKind::Store, set(0..total)),
                (StageKind::Background, set(0..total)),
            ],
            3..=4 => {
                // One core per stage on a quad-core board; storage shares with
                // ingest when there are only three
                vec![
                    (StageKind::Ingest, single(0)),
                    (StageKind::Parse, single(1)),
                    (StageKind::Encode, single(2)),
                    (StageKind::Store, single(3)),
                    (StageKind::Background, single(total - 1)),
                ]
            }
            _ => {
                let quarter = total / 4;
                vec![
                    (StageKind::Ingest, set(0..quarter)),
                    (StageKind::Parse, set(quarter..2 * quarter)),
                    (StageKind::Encode, set(2 * quarter..3 * quarter)),
                    (StageKind::Store, set(3 * quarter..total)),
                    (StageKind::Background, single(total - 1)),
                ]
            }
        };

        for (stage, cpu_set) in assignments {
            debug!(
                "Assigned {:?} workers to {} cores: {:?}",
                stage,
                cpu_set.len(),
                cpu_set.cores()
            );
            self.stage_cores.insert(stage, cpu_set);
        }
    }

    /// Pin the calling thread to core `core_index`.
    ///
    /// Returns false and leaves the thread unpinned when the index is out of
    /// range or the OS refuses.
    pub fn pin(&self, core_index: usize) -> bool {
        if !self.affinity_supported {
            return false;
        }
        match self.available_cores.get(core_index) {
            Some(core) => self.pin_core(*core),
            None => {
                warn!(
                    "Core index {} out of range ({} cores available)",
                    core_index,
                    self.available_cores.len()
                );
                false
            }
        }
    }

    /// Pin the calling thread to the next core assigned to `stage`.
    pub fn pin_stage(&self, stage: StageKind) -> bool {
        if !self.affinity_supported {
            return false;
        }
        match self.stage_cores.get(&stage).and_then(CpuSet::next_core) {
            Some(core) => self.pin_core(core),
            None => false,
        }
    }

    /// Apply a placement to the calling thread.
    pub fn apply(&self, placement: Placement) -> bool {
        match placement {
            Placement::Stage(stage) => self.pin_stage(stage),
            Placement::Core(index) => self.pin(index),
            Placement::Unpinned => false,
        }
    }

    fn pin_core(&self, core: CoreId) -> bool {
        let pinned = core_affinity::set_for_current(core);
        if pinned {
            debug!("Pinned {:?} to core {}", thread::current().name(), core.id);
        } else {
            debug!("Failed to pin {:?} to core {}", thread::current().name(), core.id);
        }
        pinned
    }

    /// Spawn a named thread that applies `placement` before running `f`.
    pub fn spawn_with_affinity<F, T>(
        self: &std::sync::Arc<Self>,
        name: String,
        placement: Placement,
        f: F,
    ) -> Result<thread::JoinHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let manager = std::sync::Arc::clone(self);
        thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                manager.apply(placement);
                f()
            })
            .map_err(|source| ProcessorError::Spawn { name, source })
    }

    /// Number of cores assigned to `stage`, at least one.
    pub fn recommended_thread_count(&self, stage: StageKind) -> usize {
        self.stage_cores.get(&stage).map_or(1, |set| set.len().max(1))
    }

    /// Cores visible to the manager.
    pub fn core_count(&self) -> usize {
        self.available_cores.len()
    }

    /// Check if CPU affinity is supported on this system
    pub fn is_affinity_supported(&self) -> bool {
        self.affinity_supported
    }
}

impl Default for AffinityManager {
    fn default() -> Self {
        Self::new()
    }
}
