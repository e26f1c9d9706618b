use std::fs::File;
use std::io;

use tracing::debug;

use super::{BoxedChannel, ChannelSource};
use crate::config::ChannelConfig;

/// Reads a device node, FIFO or capture file as a plain byte stream.
///
/// Line settings in the configuration are ignored; the device is expected to
/// be configured already (e.g. with `stty`).
#[derive(Debug, Default, Clone, Copy)]
pub struct FileChannelSource;

impl ChannelSource for FileChannelSource {
    fn open(&self, config: &ChannelConfig) -> io::Result<BoxedChannel> {
        let file = File::open(&config.device)?;
        debug!("Opened {} as a byte stream", config.device);
        Ok(Box::new(file))
    }
}
