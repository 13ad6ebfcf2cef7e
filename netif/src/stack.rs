// smoltcp network stack integration
// Adapts an `Interface` to smoltcp's `phy::Device`. Received leases are
// handed to the stack without copying; transmit frames are built directly in
// pool areas.

use alloc::vec;

use log::debug;
use smoltcp::iface::Config;
use smoltcp::phy::{Device, DeviceCapabilities, Medium, RxToken, TxToken};
use smoltcp::time::Instant;
use smoltcp::wire::{EthernetAddress, HardwareAddress};

use crate::buf::BufferLease;
use crate::config::ETHER_HDR_LEN;
use crate::iface::Interface;

/// smoltcp device over one running interface.
pub struct IfDevice<'a> {
    iface: &'a Interface,
}

impl<'a> IfDevice<'a> {
    pub fn new(iface: &'a Interface) -> Self {
        Self { iface }
    }

    pub fn ethernet_addr(&self) -> EthernetAddress {
        EthernetAddress(self.iface.hw_addr())
    }
}

/// RX token owning one received lease
pub struct IfRxToken {
    lease: BufferLease,
}

impl RxToken for IfRxToken {
    fn consume<R, F>(mut self, f: F) -> R
    where
        F: FnOnce(&mut [u8]) -> R,
    {
        let len = self.lease.len();
        f(&mut self.lease.as_mut_slice()[..len])
    }
}

/// TX token
pub struct IfTxToken<'a> {
    iface: &'a Interface,
}

impl TxToken for IfTxToken<'_> {
    fn consume<R, F>(self, len: usize, f: F) -> R
    where
        F: FnOnce(&mut [u8]) -> R,
    {
        let mut lease = match self.iface.acquire_tx(len) {
            Ok(lease) => lease,
            Err(e) => {
                // smoltcp has no way to take the frame back; build it and
                // let it go.
                debug!("stack: tx frame of {} octets dropped: {}", len, e);
                let mut scratch = vec![0u8; len];
                return f(&mut scratch);
            }
        };
        let result = f(&mut lease.as_mut_slice()[..len]);
        if let Err(refused) = self.iface.transmit(lease) {
            debug!("stack: tx refused: {}", refused);
        }
        result
    }
}

impl Device for IfDevice<'_> {
    type RxToken<'a> = IfRxToken where Self: 'a;
    type TxToken<'a> = IfTxToken<'a> where Self: 'a;

    fn receive(&mut self, _timestamp: Instant) -> Option<(Self::RxToken<'_>, Self::TxToken<'_>)> {
        match self.iface.receive() {
            Ok(Some(lease)) => Some((IfRxToken { lease }, IfTxToken { iface: self.iface })),
            Ok(None) => None,
            Err(_) => None,
        }
    }

    fn transmit(&mut self, _timestamp: Instant) -> Option<Self::TxToken<'_>> {
        if self.iface.is_running() && self.iface.tx_capacity() > 0 {
            Some(IfTxToken { iface: self.iface })
        } else {
            None
        }
    }

    fn capabilities(&self) -> DeviceCapabilities {
        let mut caps = DeviceCapabilities::default();
        caps.max_transmission_unit = self.iface.mtu() + ETHER_HDR_LEN;
        caps.max_burst_size = Some(1);
        caps.medium = Medium::Ethernet;
        caps
    }
}

/// Create a smoltcp interface bound to `iface`'s hardware address.
pub fn stack_interface(iface: &Interface, now: Instant) -> smoltcp::iface::Interface {
    let mut device = IfDevice::new(iface);
    let config = Config::new(HardwareAddress::Ethernet(device.ethernet_addr()));
    smoltcp::iface::Interface::new(config, &mut device, now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceConfig;
    use crate::drivers::loopback::{LoopbackDriver, LOOPBACK_HW_ADDR};
    use crate::drivers::NoBsp;
    use crate::registry::IfNbr;
    use alloc::boxed::Box;

    fn running_loopback() -> Interface {
        let iface = Interface::new(
            IfNbr(0),
            DeviceConfig::default(),
            Box::new(LoopbackDriver::new()),
            Box::new(NoBsp),
        );
        iface.init().unwrap();
        iface.start().unwrap();
        iface
    }

    #[test]
    fn test_capabilities_follow_mtu() {
        let iface = running_loopback();
        let dev = IfDevice::new(&iface);
        assert_eq!(dev.capabilities().max_transmission_unit, 1514);
        iface.set_mtu(1000).unwrap();
        assert_eq!(dev.capabilities().max_transmission_unit, 1014);
        assert_eq!(dev.ethernet_addr(), EthernetAddress(LOOPBACK_HW_ADDR));
    }

    #[test]
    fn test_tokens_round_trip_through_loopback() {
        let iface = running_loopback();
        let mut dev = IfDevice::new(&iface);
        let now = Instant::from_millis(0);

        let tx = dev.transmit(now).unwrap();
        tx.consume(64, |buf| buf.fill(0x5A));
        assert!(dev.receive(now).is_none());

        iface.poll().unwrap();
        let (rx, _tx) = dev.receive(now).unwrap();
        let seen = rx.consume(|buf| (buf.len(), buf[0]));
        assert_eq!(seen, (64, 0x5A));
        assert_eq!(iface.pool().unwrap().stats().tx_small.available, 5);
    }

    #[test]
    fn test_no_tx_token_when_stopped() {
        let iface = running_loopback();
        iface.stop().unwrap();
        let mut dev = IfDevice::new(&iface);
        assert!(dev.transmit(Instant::from_millis(0)).is_none());
    }

    #[test]
    fn test_stack_interface_uses_hw_addr() {
        let iface = running_loopback();
        let stack = stack_interface(&iface, Instant::from_millis(0));
        assert_eq!(
            stack.hardware_addr(),
            HardwareAddress::Ethernet(EthernetAddress(LOOPBACK_HW_ADDR))
        );
    }
}
