// Example: frames through a loopback interface
//
// Registers a loopback device, sends a few frames through the transmit
// coordinator and reads them back from the receive coordinator. A loopback
// device raises no interrupts, so the task polls.

use netif::drivers::loopback::LoopbackDriver;
use netif::{DeviceConfig, NetError, NoBsp, Registry};

fn main() -> Result<(), NetError> {
    let mut registry = Registry::new();
    let nbr = registry.add(
        DeviceConfig::default(),
        Box::new(LoopbackDriver::new()),
        Box::new(NoBsp),
    )?;
    registry.start(nbr)?;
    let iface = registry.get(nbr)?;

    for (i, len) in [60usize, 128, 1514].into_iter().enumerate() {
        let mut lease = iface.acquire_tx(len)?;
        let frame = &mut lease.as_mut_slice()[..len];
        frame[..6].copy_from_slice(&iface.hw_addr());
        frame[6..].fill(i as u8);
        iface.transmit(lease).map_err(|refused| refused.reason)?;
    }

    iface.poll()?;
    let received = iface.dispatch_rx(|lease| {
        println!("rx {} octets, tag {}", lease.len(), lease.as_slice()[6]);
    })?;

    let stats = iface.stats();
    println!(
        "{} frames looped back, {} sent, {} completed, {} buffers outstanding",
        received,
        stats.tx_frames,
        stats.tx_completed,
        stats.pool.outstanding()
    );

    registry.stop_all()
}
