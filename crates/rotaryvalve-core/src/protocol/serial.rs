//! Serial port discovery
//!
//! Valves enumerate as USB CDC devices behind a bridge with fixed vendor and
//! product ids. Ports are classified by those ids and listed valves first.

use serde::{Deserialize, Serialize};
use serialport::{SerialPortInfo, SerialPortType};
use tracing::{debug, warn};

/// USB vendor ID reported by the valve's serial bridge
pub const VALVE_USB_VID: u16 = 0x03eb;

/// USB product ID reported by the valve's serial bridge
pub const VALVE_USB_PID: u16 = 0x2404;

/// How a serial port relates to the valve's USB bridge
///
/// Variants are declared in listing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PortKind {
    /// USB port with the valve's vendor and product ids
    Valve,
    /// USB port belonging to some other device
    OtherUsb,
    /// Port without USB metadata (PCI, Bluetooth, virtual or unknown)
    NonUsb,
}

/// Information about an available serial port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortInfo {
    /// Port address (e.g., "/dev/ttyACM0" or "COM3")
    pub address: String,

    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,

    /// USB product ID (if USB device)
    pub pid: Option<u16>,

    /// Manufacturer name (if available)
    pub manufacturer: Option<String>,

    /// Product name (if available)
    pub product: Option<String>,

    /// Serial number (if available)
    pub serial_number: Option<String>,
}

impl PortInfo {
    /// Classify the port by its USB ids
    pub fn kind(&self) -> PortKind {
        match (self.vid, self.pid) {
            (Some(VALVE_USB_VID), Some(VALVE_USB_PID)) => PortKind::Valve,
            (Some(_), _) | (_, Some(_)) => PortKind::OtherUsb,
            (None, None) => PortKind::NonUsb,
        }
    }

    /// Whether the USB ids match the valve's serial bridge
    pub fn is_rotary_valve(&self) -> bool {
        self.kind() == PortKind::Valve
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let mut port = PortInfo {
            address: info.port_name,
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            serial_number: None,
        };
        if let SerialPortType::UsbPort(usb) = info.port_type {
            port.vid = Some(usb.vid);
            port.pid = Some(usb.pid);
            port.manufacturer = usb.manufacturer;
            port.product = usb.product;
            port.serial_number = usb.serial_number;
        }
        port
    }
}

/// Split an address into its text stem and trailing unit number
///
/// `/dev/ttyACM10` gives `("/dev/ttyACM", Some(10))`, `COM3` gives
/// `("COM", Some(3))`, so units sort numerically within a device family.
fn address_key(address: &str) -> (&str, Option<u64>) {
    let stem = address.trim_end_matches(|c: char| c.is_ascii_digit());
    let unit = address[stem.len()..].parse().ok();
    (stem, unit)
}

/// Order ports valves first, then by address, and optionally keep only valves
fn arrange(ports: impl IntoIterator<Item = PortInfo>, valves_only: bool) -> Vec<PortInfo> {
    let mut ports: Vec<PortInfo> = ports
        .into_iter()
        .filter(|p| !valves_only || p.is_rotary_valve())
        .collect();

    ports.sort_by(|a, b| {
        a.kind()
            .cmp(&b.kind())
            .then_with(|| address_key(&a.address).cmp(&address_key(&b.address)))
    });
    // Some platforms report the same device more than once
    ports.dedup_by(|a, b| a.address == b.address);
    ports
}

fn enumerate() -> Vec<PortInfo> {
    match serialport::available_ports() {
        Ok(ports) => {
            debug!(count = ports.len(), "enumerated serial ports");
            ports.into_iter().map(PortInfo::from).collect()
        }
        Err(e) => {
            warn!("serial port enumeration failed: {}", e);
            Vec::new()
        }
    }
}

/// List every serial port on this host, valves first
pub fn list_ports() -> Vec<PortInfo> {
    arrange(enumerate(), false)
}

/// List the ports whose USB ids identify a rotary valve
///
/// Ports without USB metadata cannot be identified and are left out; use
/// [`list_ports`] to probe them.
pub fn list_valve_ports() -> Vec<PortInfo> {
    arrange(enumerate(), true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn port(address: &str, ids: Option<(u16, u16)>) -> PortInfo {
        PortInfo {
            address: address.to_string(),
            vid: ids.map(|(vid, _)| vid),
            pid: ids.map(|(_, pid)| pid),
            manufacturer: None,
            product: None,
            serial_number: None,
        }
    }

    fn addresses(ports: Vec<PortInfo>) -> Vec<String> {
        ports.into_iter().map(|p| p.address).collect()
    }

    const VALVE: Option<(u16, u16)> = Some((VALVE_USB_VID, VALVE_USB_PID));
    const FTDI: Option<(u16, u16)> = Some((0x0403, 0x6001));

    fn host_ports() -> Vec<PortInfo> {
        vec![
            port("/dev/ttyS0", None),
            port("/dev/ttyUSB0", FTDI),
            port("/dev/ttyACM10", VALVE),
            port("/dev/ttyACM2", VALVE),
            port("/dev/ttyACM1", None),
            port("/dev/ttyACM2", VALVE),
        ]
    }

    #[test]
    fn test_port_kind() {
        assert_eq!(port("/dev/ttyACM0", VALVE).kind(), PortKind::Valve);
        assert_eq!(port("/dev/ttyUSB0", FTDI).kind(), PortKind::OtherUsb);
        assert_eq!(
            port("/dev/ttyACM0", Some((VALVE_USB_VID, 0x6001))).kind(),
            PortKind::OtherUsb
        );
        assert_eq!(port("/dev/ttyS0", None).kind(), PortKind::NonUsb);
        assert!(!port("/dev/ttyS0", None).is_rotary_valve());
    }

    #[test]
    fn test_address_key_orders_units_numerically() {
        assert_eq!(address_key("/dev/ttyACM10"), ("/dev/ttyACM", Some(10)));
        assert_eq!(address_key("COM3"), ("COM", Some(3)));
        assert_eq!(address_key("/dev/cu.usbmodem"), ("/dev/cu.usbmodem", None));
        assert!(address_key("COM9") < address_key("COM10"));
    }

    #[test]
    fn test_full_listing_keeps_unidentified_ports() {
        assert_eq!(
            addresses(arrange(host_ports(), false)),
            vec![
                "/dev/ttyACM2",
                "/dev/ttyACM10",
                "/dev/ttyUSB0",
                "/dev/ttyACM1",
                "/dev/ttyS0",
            ]
        );
    }

    #[test]
    fn test_valve_listing_drops_ports_without_matching_ids() {
        assert_eq!(
            addresses(arrange(host_ports(), true)),
            vec!["/dev/ttyACM2", "/dev/ttyACM10"]
        );
    }

    #[test]
    fn test_list_ports_on_this_host() {
        // Host dependent; only the invariants are checked
        let ports = list_ports();
        let valves = list_valve_ports();
        assert!(valves.iter().all(PortInfo::is_rotary_valve));
        assert!(valves.len() <= ports.len());
    }
}
