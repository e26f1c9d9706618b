use std::collections::{HashMap, VecDeque};
use std::io::{self, Read};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{BoxedChannel, ChannelSource};
use crate::config::ChannelConfig;

enum Chunk {
    Data(Vec<u8>),
    Error(io::ErrorKind),
}

type ChunkQueue = Arc<Mutex<VecDeque<Chunk>>>;

/// In-memory channels for tests and replay.
///
/// Each registered device delivers its queued chunks one per read. An empty
/// queue reads as `Ok(0)`; more chunks can be pushed while the processor runs.
#[derive(Default)]
pub struct MemoryChannelSource {
    devices: Mutex<HashMap<String, ChunkQueue>>,
}

impl MemoryChannelSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn queue(&self, device: &str) -> ChunkQueue {
        Arc::clone(self.devices.lock().entry(device.to_string()).or_default())
    }

    /// Register `device` without data.
    pub fn add_device(&self, device: &str) {
        self.queue(device);
    }

    /// Queue one chunk for `device`, registering it if needed.
    pub fn push(&self, device: &str, bytes: impl Into<Vec<u8>>) {
        self.queue(device).lock().push_back(Chunk::Data(bytes.into()));
    }

    /// Queue a read failure of the given kind.
    pub fn push_error(&self, device: &str, kind: io::ErrorKind) {
        self.queue(device).lock().push_back(Chunk::Error(kind));
    }

    /// Chunks not yet read from `device`.
    pub fn pending(&self, device: &str) -> usize {
        self.devices.lock().get(device).map_or(0, |q| q.lock().len())
    }
}

impl ChannelSource for MemoryChannelSource {
    fn open(&self, config: &ChannelConfig) -> io::Result<BoxedChannel> {
        let queue = self.devices.lock().get(&config.device).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no in-memory device '{}'", config.device),
            )
        })?;
        Ok(Box::new(MemoryChannel { queue }))
    }
}

struct MemoryChannel {
    queue: ChunkQueue,
}

impl Read for MemoryChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut queue = self.queue.lock();
        match queue.pop_front() {
            None => Ok(0),
            Some(Chunk::Error(kind)) => Err(io::Error::new(kind, "injected read failure")),
            Some(Chunk::Data(mut data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    queue.push_front(Chunk::Data(data.split_off(n)));
                }
                Ok(n)
            }
        }
    }
}
