use std::io;

use serialport::{DataBits, FlowControl, StopBits};
use tracing::info;

use super::{BoxedChannel, ChannelSource};
use crate::config::{ChannelConfig, Parity};
use crate::constants::timeouts::SERIAL_READ_TIMEOUT;

/// Opens serial lines with the configured baud rate and framing.
///
/// Reads time out after a few milliseconds so the Ingest worker can observe
/// cancellation; a timeout is reported as `TimedOut` and treated as idle.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialChannelSource;

fn data_bits(bits: u8) -> io::Result<DataBits> {
    match bits {
        5 => Ok(DataBits::Five),
        6 => Ok(DataBits::Six),
        7 => Ok(DataBits::Seven),
        8 => Ok(DataBits::Eight),
        other => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("unsupported data bits {}", other),
        )),
    }
}

fn stop_bits(bits: u8) -> io::Result<StopBits> {
    match bits {
        1 => Ok(StopBits::One),
        2 => Ok(StopBits::Two),
        other => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("unsupported stop bits {}", other),
        )),
    }
}

fn parity(parity: Parity) -> serialport::Parity {
    match parity {
        Parity::None => serialport::Parity::None,
        Parity::Even => serialport::Parity::Even,
        Parity::Odd => serialport::Parity::Odd,
    }
}

impl ChannelSource for SerialChannelSource {
    fn open(&self, config: &ChannelConfig) -> io::Result<BoxedChannel> {
        let port = serialport::new(&config.device, config.baud_rate)
            .data_bits(data_bits(config.data_bits)?)
            .stop_bits(stop_bits(config.stop_bits)?)
            .parity(parity(config.parity))
            .flow_control(FlowControl::None)
            .timeout(SERIAL_READ_TIMEOUT)
            .open()?;

        info!(
            "Opened serial port {} at {} baud ({}{:?}{})",
            config.device, config.baud_rate, config.data_bits, config.parity, config.stop_bits
        );
        Ok(Box::new(port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_framing_conversions() {
        assert_eq!(data_bits(7).unwrap(), DataBits::Seven);
        assert!(data_bits(9).is_err());
        assert_eq!(stop_bits(2).unwrap(), StopBits::Two);
        assert!(stop_bits(0).is_err());
        assert_eq!(parity(Parity::Odd), serialport::Parity::Odd);
    }

    #[test]
    fn test_missing_port_fails_to_open() {
        let config = ChannelConfig::new("/dev/does-not-exist-dna");
        assert!(SerialChannelSource.open(&config).is_err());
    }
}
