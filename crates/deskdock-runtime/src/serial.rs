//! Serial port links
//!
//! [`SerialPortProvider`] finds the peripheral by its USB vendor/product id and opens it
//! with `serialport`. The port handle is cloned so the reader and writer halves can be
//! locked independently.

use deskdock_core::{SerialConfig, TransportError};
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, SerialPortType, StopBits};
use std::io::{self, Read, Write};
use tracing::{debug, info};

use crate::link::{DeviceProvider, LinkPair, LinkReader, LinkWriter};

// ----------------------------------------------------------------------------
// Port Listing
// ----------------------------------------------------------------------------

/// One serial port as reported by the OS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSummary {
    pub name: String,
    /// `(vid, pid)` for USB ports
    pub usb_ids: Option<(u16, u16)>,
    pub product: Option<String>,
}

/// Every serial port currently visible to the OS
pub fn list_ports() -> Result<Vec<PortSummary>, TransportError> {
    let ports = serialport::available_ports().map_err(|e| TransportError::OpenFailed {
        port: "<enumerate>".to_string(),
        reason: e.to_string(),
    })?;

    Ok(ports
        .into_iter()
        .map(|port| match port.port_type {
            SerialPortType::UsbPort(info) => PortSummary {
                name: port.port_name,
                usb_ids: Some((info.vid, info.pid)),
                product: info.product,
            },
            _ => PortSummary {
                name: port.port_name,
                usb_ids: None,
                product: None,
            },
        })
        .collect())
}

// ----------------------------------------------------------------------------
// Serial Port Provider
// ----------------------------------------------------------------------------

/// Opens the peripheral through the OS serial driver
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialPortProvider;

impl SerialPortProvider {
    pub fn new() -> Self {
        Self
    }
}

impl DeviceProvider for SerialPortProvider {
    fn discover(&self, vendor_id: u16, product_id: u16) -> Result<Option<String>, TransportError> {
        let found = list_ports()?
            .into_iter()
            .find(|port| port.usb_ids == Some((vendor_id, product_id)))
            .map(|port| port.name);

        if let Some(name) = &found {
            debug!("Found device {:04x}:{:04x} on {}", vendor_id, product_id, name);
        }
        Ok(found)
    }

    fn open(&self, port: &str, config: &SerialConfig) -> Result<LinkPair, TransportError> {
        let open_failed = |e: serialport::Error| TransportError::OpenFailed {
            port: port.to_string(),
            reason: e.to_string(),
        };

        let reader = serialport::new(port, config.baud_rate)
            .timeout(config.read_timeout())
            .data_bits(DataBits::Eight)
            .stop_bits(StopBits::One)
            .parity(Parity::None)
            .flow_control(FlowControl::None)
            .open()
            .map_err(open_failed)?;
        let writer = reader.try_clone().map_err(open_failed)?;

        info!("Opened {} at {} baud", port, config.baud_rate);
        Ok(LinkPair {
            port: port.to_string(),
            reader: Box::new(SerialReader { port: reader }),
            writer: Box::new(SerialWriter { port: writer }),
        })
    }
}

// ----------------------------------------------------------------------------
// Link Halves
// ----------------------------------------------------------------------------

struct SerialReader {
    port: Box<dyn SerialPort>,
}

impl LinkReader for SerialReader {
    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn bytes_available(&mut self) -> io::Result<usize> {
        Ok(self.port.bytes_to_read().map_err(io::Error::from)? as usize)
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.port
            .clear(ClearBuffer::Input)
            .map_err(io::Error::from)
    }
}

struct SerialWriter {
    port: Box<dyn SerialPort>,
}

impl LinkWriter for SerialWriter {
    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.port.write_all(bytes)
    }

    fn flush_output(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}
