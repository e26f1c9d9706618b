//! Input channels.
//!
//! A [`ChannelSource`] turns a [`ChannelConfig`] into a byte stream. The
//! Ingest stage owns the opened stream and treats `Ok(0)`, timeouts and
//! `WouldBlock` as "nothing available yet" rather than end of input.

mod file;
mod memory;
#[cfg(feature = "serial")]
mod serial;

pub use file::FileChannelSource;
pub use memory::MemoryChannelSource;
#[cfg(feature = "serial")]
pub use serial::SerialChannelSource;

use std::io::{self, Read};

use crate::config::{ChannelConfig, ChannelKind};

/// An opened channel.
pub type BoxedChannel = Box<dyn Read + Send>;

/// Opens channels for the processor.
pub trait ChannelSource: Send + Sync {
    /// Open the device described by `config`.
    fn open(&self, config: &ChannelConfig) -> io::Result<BoxedChannel>;
}

/// Whether a read error just means no data is ready.
pub fn is_idle_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// Opens each channel according to its configured [`ChannelKind`].
#[derive(Debug, Default, Clone, Copy)]
pub struct DeviceChannelSource;

impl ChannelSource for DeviceChannelSource {
    fn open(&self, config: &ChannelConfig) -> io::Result<BoxedChannel> {
        match config.kind {
            ChannelKind::File => FileChannelSource.open(config),
            #[cfg(feature = "serial")]
            ChannelKind::Serial => SerialChannelSource.open(config),
            #[cfg(not(feature = "serial"))]
            ChannelKind::Serial => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "built without serial port support",
            )),
        }
    }
}
