//! Raw HCI socket backend.
//!
//! This backend uses raw Linux HCI sockets to scan for BLE advertisements
//! without requiring the BlueZ daemon. It requires CAP_NET_RAW and
//! CAP_NET_ADMIN capabilities or root privileges.
//!
//! Scanning is active so that scan responses carrying the local name are
//! received. Names are remembered per address and attached to later reports
//! from the same device, which usually carry only manufacturer data.

use super::{
    MANUFACTURER_DATA_TYPE, SOURCE_CHANNEL_BUFFER_SIZE, ScanError, ScanHandle, SourceResult,
};
use crate::advertisement::{AdvertisementEvent, NO_RSSI};
use libc::{AF_BLUETOOTH, SOCK_CLOEXEC, SOCK_RAW, c_int, c_void, sockaddr, socklen_t};
use log::debug;
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;

// HCI protocol constants
const BTPROTO_HCI: c_int = 1;
const SOL_HCI: c_int = 0;
const HCI_FILTER: c_int = 2;
const HCI_CHANNEL_RAW: u16 = 0;

// HCI packet types
const HCI_COMMAND_PKT: u8 = 0x01;
const HCI_EVENT_PKT: u8 = 0x04;

// HCI events
const EVT_LE_META_EVENT: u8 = 0x3E;

// LE Meta event sub-events
const EVT_LE_ADVERTISING_REPORT: u8 = 0x02;

// HCI commands
const OGF_LE_CTL: u16 = 0x08;
const OCF_LE_SET_SCAN_PARAMETERS: u16 = 0x000B;
const OCF_LE_SET_SCAN_ENABLE: u16 = 0x000C;

// Scan types
const LE_SCAN_ACTIVE: u8 = 0x01;

// Own address type
const LE_PUBLIC_ADDRESS: u8 = 0x00;

// Filter policy
const FILTER_POLICY_ACCEPT_ALL: u8 = 0x00;

// AD types
const AD_TYPE_SHORTENED_LOCAL_NAME: u8 = 0x08;
const AD_TYPE_COMPLETE_LOCAL_NAME: u8 = 0x09;

/// RSSI value meaning "not available" in advertising reports.
const HCI_RSSI_UNAVAILABLE: i8 = 127;

/// Names remembered before the cache is flushed; random addresses rotate.
const NAME_CACHE_CAPACITY: usize = 1024;

/// HCI device to scan on (hci0).
const HCI_DEV_ID: u16 = 0;

/// HCI socket address structure
#[repr(C)]
struct SockaddrHci {
    hci_family: u16,
    hci_dev: u16,
    hci_channel: u16,
}

/// HCI filter structure for raw sockets
#[repr(C)]
struct HciFilter {
    type_mask: u32,
    event_mask: [u32; 2],
    opcode: u16,
}

impl HciFilter {
    fn new() -> Self {
        Self {
            type_mask: 0,
            event_mask: [0, 0],
            opcode: 0,
        }
    }

    fn set_ptype(&mut self, ptype: u8) {
        self.type_mask |= 1 << (ptype as u32);
    }

    fn set_event(&mut self, event: u8) {
        let bit = event as usize;
        self.event_mask[bit / 32] |= 1 << (bit % 32);
    }
}

/// One advertising report, before the name cache is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
struct AdvertisingReport {
    address: [u8; 6],
    name: Option<String>,
    rssi: i32,
    manufacturer_data: BTreeMap<u16, Vec<u8>>,
}

/// Format an address as colon-separated uppercase hex, most significant first.
fn format_address(address: &[u8; 6]) -> String {
    address
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// Create an HCI command packet
fn hci_command_packet(ogf: u16, ocf: u16, params: &[u8]) -> Vec<u8> {
    let opcode = (ogf << 10) | ocf;
    let mut packet = Vec::with_capacity(4 + params.len());
    packet.push(HCI_COMMAND_PKT);
    packet.extend_from_slice(&opcode.to_le_bytes());
    packet.push(params.len() as u8);
    packet.extend_from_slice(params);
    packet
}

/// LE Set Scan Parameters: scan type, interval and window (0.625 ms units,
/// little-endian), own address type, filter policy.
fn scan_parameters(scan_type: u8, interval: u16, window: u16) -> Vec<u8> {
    let mut params = vec![scan_type];
    params.extend_from_slice(&interval.to_le_bytes());
    params.extend_from_slice(&window.to_le_bytes());
    params.push(LE_PUBLIC_ADDRESS);
    params.push(FILTER_POLICY_ACCEPT_ALL);
    params
}

/// Map a negative libc return value to a Bluetooth error.
fn check(ret: isize, action: &str) -> Result<usize, ScanError> {
    if ret < 0 {
        return Err(ScanError::Bluetooth(format!(
            "Failed to {action}: {}",
            io::Error::last_os_error()
        )));
    }
    Ok(ret as usize)
}

/// Open a raw HCI socket bound to `dev_id`
fn open_hci_socket(dev_id: u16) -> Result<OwnedFd, ScanError> {
    // SOCK_NONBLOCK is required for AsyncFd to work properly
    let fd = unsafe {
        libc::socket(
            AF_BLUETOOTH,
            SOCK_RAW | SOCK_CLOEXEC | libc::SOCK_NONBLOCK,
            BTPROTO_HCI,
        )
    };
    check(fd as isize, "create HCI socket")?;
    let fd = unsafe { OwnedFd::from_raw_fd(fd) };

    let addr = SockaddrHci {
        hci_family: AF_BLUETOOTH as u16,
        hci_dev: dev_id,
        hci_channel: HCI_CHANNEL_RAW,
    };
    let ret = unsafe {
        libc::bind(
            fd.as_raw_fd(),
            &addr as *const SockaddrHci as *const sockaddr,
            mem::size_of::<SockaddrHci>() as socklen_t,
        )
    };
    check(ret as isize, "bind HCI socket")?;

    Ok(fd)
}

/// Only pass LE meta events to this socket
fn set_hci_filter(fd: &OwnedFd) -> Result<(), ScanError> {
    let mut filter = HciFilter::new();
    filter.set_ptype(HCI_EVENT_PKT);
    filter.set_event(EVT_LE_META_EVENT);

    let ret = unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            SOL_HCI,
            HCI_FILTER,
            &filter as *const HciFilter as *const c_void,
            mem::size_of::<HciFilter>() as socklen_t,
        )
    };
    check(ret as isize, "set HCI filter")?;

    Ok(())
}

fn send_hci_command(fd: &OwnedFd, ocf: u16, params: &[u8]) -> Result<(), ScanError> {
    let packet = hci_command_packet(OGF_LE_CTL, ocf, params);
    let ret = unsafe {
        libc::write(
            fd.as_raw_fd(),
            packet.as_ptr() as *const c_void,
            packet.len(),
        )
    };
    check(ret, "send HCI command")?;
    Ok(())
}

/// Configure and enable active LE scanning, 10 ms interval and window
fn configure_le_scan(fd: &OwnedFd) -> Result<(), ScanError> {
    send_hci_command(
        fd,
        OCF_LE_SET_SCAN_PARAMETERS,
        &scan_parameters(LE_SCAN_ACTIVE, 0x0010, 0x0010),
    )?;

    // Enable, don't filter duplicates: every advertisement is an RSSI sample
    send_hci_command(fd, OCF_LE_SET_SCAN_ENABLE, &[0x01, 0x00])
}

/// Walk the AD structures of an advertisement, collecting the local name
/// and every manufacturer-specific entry.
fn parse_ad_structures(ad_data: &[u8]) -> (Option<String>, BTreeMap<u16, Vec<u8>>) {
    let mut name = None;
    let mut manufacturer_data = BTreeMap::new();

    let mut offset = 0;
    while offset + 2 <= ad_data.len() {
        let len = ad_data[offset] as usize;
        if len == 0 || offset + 1 + len > ad_data.len() {
            break;
        }

        let ad_type = ad_data[offset + 1];
        let value = &ad_data[offset + 2..offset + 1 + len];

        match ad_type {
            MANUFACTURER_DATA_TYPE if value.len() >= 2 => {
                let company_id = u16::from_le_bytes([value[0], value[1]]);
                manufacturer_data.insert(company_id, value[2..].to_vec());
            }
            AD_TYPE_COMPLETE_LOCAL_NAME => {
                name = Some(String::from_utf8_lossy(value).into_owned());
            }
            AD_TYPE_SHORTENED_LOCAL_NAME if name.is_none() => {
                name = Some(String::from_utf8_lossy(value).into_owned());
            }
            _ => {}
        }

        offset += 1 + len;
    }

    (name, manufacturer_data)
}

/// Parse the first report of an LE advertising report event.
///
/// `data` is the full HCI packet: packet type, event code, parameter length,
/// sub-event, then the report list.
fn parse_advertising_report(data: &[u8]) -> Option<AdvertisingReport> {
    let report = data.get(4..)?;

    // num_reports(1) + event_type(1) + addr_type(1) + address(6) + data_len(1)
    if report.len() < 10 || report[0] == 0 {
        return None;
    }

    // HCI sends the address least significant byte first
    let mut address = [0u8; 6];
    address.copy_from_slice(&report[3..9]);
    address.reverse();

    let data_len = report[9] as usize;
    let ad_data = report.get(10..10 + data_len)?;
    let rssi = *report.get(10 + data_len)? as i8;

    let (name, manufacturer_data) = parse_ad_structures(ad_data);

    Some(AdvertisingReport {
        address,
        name,
        rssi: if rssi == HCI_RSSI_UNAVAILABLE {
            NO_RSSI
        } else {
            i32::from(rssi)
        },
        manufacturer_data,
    })
}

/// Attach the cached name to a report, updating the cache when the report
/// carries one itself.
fn to_event(report: AdvertisingReport, names: &mut HashMap<[u8; 6], String>) -> AdvertisementEvent {
    let name = match report.name {
        Some(name) => {
            if names.len() >= NAME_CACHE_CAPACITY && !names.contains_key(&report.address) {
                debug!("name cache full, clearing {} entries", names.len());
                names.clear();
            }
            names.insert(report.address, name.clone());
            name
        }
        None => names.get(&report.address).cloned().unwrap_or_default(),
    };

    AdvertisementEvent {
        address: format_address(&report.address),
        name,
        rssi: report.rssi,
        manufacturer_data: report.manufacturer_data,
    }
}

/// Start scanning using raw HCI sockets.
///
/// # Requirements
/// - CAP_NET_RAW and CAP_NET_ADMIN capabilities or root privileges
/// - An available HCI device (hci0)
pub async fn start_scan() -> Result<ScanHandle, ScanError> {
    let fd = open_hci_socket(HCI_DEV_ID)?;
    set_hci_filter(&fd)?;

    // Commands go out on a separate socket
    let cmd_fd = open_hci_socket(HCI_DEV_ID)?;
    configure_le_scan(&cmd_fd)?;

    let (tx, rx) = mpsc::channel::<SourceResult>(SOURCE_CHANNEL_BUFFER_SIZE);

    let async_fd = AsyncFd::new(fd)
        .map_err(|e| ScanError::Bluetooth(format!("Failed to create async fd: {}", e)))?;

    tokio::spawn(async move {
        let _cmd_fd = cmd_fd; // Keep command socket alive
        let mut buf = [0u8; 258]; // Max HCI event size
        let mut names = HashMap::new();

        loop {
            let mut guard = match async_fd.readable().await {
                Ok(guard) => guard,
                Err(e) => {
                    let _ = tx
                        .send(Err(ScanError::Bluetooth(format!("HCI socket failed: {e}"))))
                        .await;
                    return;
                }
            };

            // Drain all available packets before waiting again
            loop {
                let n = match guard.try_io(|inner| {
                    let ret = unsafe {
                        libc::read(
                            inner.as_raw_fd(),
                            buf.as_mut_ptr() as *mut c_void,
                            buf.len(),
                        )
                    };
                    if ret < 0 {
                        Err(io::Error::last_os_error())
                    } else {
                        Ok(ret as usize)
                    }
                }) {
                    Ok(Ok(n)) if n > 0 => n,
                    Ok(Ok(_)) => break,
                    Ok(Err(e)) => {
                        let _ = tx
                            .send(Err(ScanError::Bluetooth(format!("HCI read failed: {e}"))))
                            .await;
                        return;
                    }
                    Err(_would_block) => break,
                };

                if n >= 4
                    && buf[0] == HCI_EVENT_PKT
                    && buf[1] == EVT_LE_META_EVENT
                    && buf[3] == EVT_LE_ADVERTISING_REPORT
                    && let Some(report) = parse_advertising_report(&buf[..n])
                {
                    let event = to_event(report, &mut names);
                    if tx.send(Ok(event.into())).await.is_err() {
                        return;
                    }
                }
            }
        }
    });

    Ok(ScanHandle {
        events: rx,
        gatt_requests: None,
    })
}
