//! Shared fixtures for the interface integration tests.

#![allow(dead_code)]

use netif::drivers::sim::{SimHandle, SimMac};
use netif::{BufferLease, DeviceConfig, IfNbr, Interface, IsrKind, NoBsp};

pub const HW_ADDR: [u8; 6] = [0x02, 0x00, 0x5e, 0x10, 0x00, 0x01];

/// Default template with a fixed unicast address.
pub fn config() -> DeviceConfig {
    DeviceConfig {
        hw_addr: Some(HW_ADDR),
        ..DeviceConfig::default()
    }
}

/// An initialized interface over a simulated MAC.
pub fn sim_iface(cfg: DeviceConfig) -> (Interface, SimHandle) {
    let (mac, sim) = SimMac::new();
    let iface = Interface::new(IfNbr(0), cfg, Box::new(mac), Box::new(NoBsp));
    iface.init().expect("init");
    (iface, sim)
}

/// A running interface over a simulated MAC.
pub fn running(cfg: DeviceConfig) -> (Interface, SimHandle) {
    let (iface, sim) = sim_iface(cfg);
    iface.start().expect("start");
    (iface, sim)
}

/// A frame addressed to `HW_ADDR`, payload filled with `tag`.
pub fn frame(tag: u8, len: usize) -> Vec<u8> {
    let mut f = vec![tag; len];
    f[..6].copy_from_slice(&HW_ADDR);
    f
}

/// Inject one frame and service the receive interrupt.
pub fn deliver(iface: &Interface, sim: &SimHandle, tag: u8) {
    assert!(sim.inject(&frame(tag, 64)), "frame overran the MAC");
    iface.isr_handler(IsrKind::Rx);
}

/// A transmit lease holding `len` octets of `tag`.
pub fn tx_lease(iface: &Interface, tag: u8, len: usize) -> BufferLease {
    let mut lease = iface.acquire_tx(len).expect("tx buffer");
    lease.as_mut_slice()[..len].fill(tag);
    lease
}

/// Tag octet of a received or sent frame.
pub fn tag_of(data: &[u8]) -> u8 {
    data[6]
}
