//! Serial-port discovery of SPORTident card-reader stations.

use serialport::{SerialPortInfo, SerialPortType};
use tracing::{debug, info};

use super::device::{CardReaderDevice, DeviceDiscovery};
use crate::error::DeviceError;

const READER_MARKER: &str = "sportident";

/// A serial port that looks like a card-reader station.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderPort {
    pub port_name: String,
    pub serial_number: Option<String>,
    pub product: Option<String>,
}

/// Opens a station on a given serial port.
pub trait ReaderDriver: Send {
    fn open(&self, port_name: &str) -> Result<Box<dyn CardReaderDevice>, DeviceError>;
}

/// List serial ports whose USB product or manufacturer mentions SPORTident.
pub fn reader_ports() -> Result<Vec<ReaderPort>, DeviceError> {
    Ok(serialport::available_ports()?
        .iter()
        .filter_map(reader_port)
        .collect())
}

fn reader_port(info: &SerialPortInfo) -> Option<ReaderPort> {
    let SerialPortType::UsbPort(usb) = &info.port_type else {
        return None;
    };
    is_reader(usb.product.as_deref(), usb.manufacturer.as_deref()).then(|| ReaderPort {
        port_name: info.port_name.clone(),
        serial_number: usb.serial_number.clone(),
        product: usb.product.clone(),
    })
}

fn is_reader(product: Option<&str>, manufacturer: Option<&str>) -> bool {
    [product, manufacturer]
        .into_iter()
        .flatten()
        .any(|name| name.to_lowercase().contains(READER_MARKER))
}

fn serial_matches(port: &ReaderPort, wanted: Option<&str>) -> bool {
    wanted.is_none_or(|wanted| port.serial_number.as_deref() == Some(wanted))
}

/// Discovers the first matching station on a USB serial port.
pub struct SerialDiscovery<D> {
    driver: D,
    serial_number: Option<String>,
}

impl<D: ReaderDriver> SerialDiscovery<D> {
    /// Discover any station, or only the one with `serial_number`.
    pub fn new(driver: D, serial_number: Option<String>) -> Self {
        Self {
            driver,
            serial_number,
        }
    }

    pub fn serial_number(&self) -> Option<&str> {
        self.serial_number.as_deref()
    }
}

impl<D: ReaderDriver> DeviceDiscovery for SerialDiscovery<D> {
    fn discover(&mut self) -> Result<Box<dyn CardReaderDevice>, DeviceError> {
        let mut last_error = None;
        for port in reader_ports()? {
            if !serial_matches(&port, self.serial_number.as_deref()) {
                info!(
                    port = %port.port_name,
                    serial_number = ?port.serial_number,
                    "reader found, but serial number does not match"
                );
                continue;
            }
            match self.driver.open(&port.port_name) {
                Ok(device) => {
                    info!(port = %port.port_name, "card reader connected");
                    return Ok(device);
                }
                Err(e) => {
                    debug!(port = %port.port_name, error = %e, "cannot open reader port");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| match &self.serial_number {
            Some(serial) => DeviceError::NotFound(format!("no reader with serial number {serial}")),
            None => DeviceError::NotFound("no SPORTident port attached".into()),
        }))
    }
}
