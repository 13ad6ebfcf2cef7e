// Interrupt handling for network interfaces

use log::warn;

use crate::drivers::IsrKind;
use crate::registry::{IfNbr, Registry};

/// Common interrupt entry.
///
/// The board's vector stub calls this with the interface number bound to
/// the vector and, when the controller has separate vectors, the source.
/// Shared vectors pass [`IsrKind::Unknown`]. Nothing is returned: an
/// interrupt for an unknown interface is logged and dropped.
///
/// Acknowledging the interrupt controller itself remains the stub's job.
pub fn isr_handler(registry: &Registry, nbr: IfNbr, kind: IsrKind) {
    match registry.get(nbr) {
        Ok(iface) => iface.isr_handler(kind),
        Err(_) => warn!("isr: {:?} interrupt for unknown interface {}", kind, nbr.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceConfig;
    use crate::drivers::sim::SimMac;
    use crate::drivers::NoBsp;
    use alloc::boxed::Box;

    #[test]
    fn test_routes_to_interface() {
        let mut reg = Registry::new();
        let (mac, sim) = SimMac::new();
        let cfg = DeviceConfig {
            hw_addr: Some([0x02, 0, 0, 0, 0, 1]),
            ..DeviceConfig::default()
        };
        let nbr = reg.add(cfg, Box::new(mac), Box::new(NoBsp)).unwrap();
        reg.start(nbr).unwrap();

        sim.inject(&[0xAB; 64]);
        isr_handler(&reg, nbr, IsrKind::Rx);
        // Unknown interfaces are ignored.
        isr_handler(&reg, IfNbr(7), IsrKind::Rx);

        let iface = reg.get(nbr).unwrap();
        assert_eq!(iface.rx_pending(), 1);
        let frame = iface.receive().unwrap().unwrap();
        assert_eq!(frame.as_slice(), &[0xAB; 64][..]);
        assert_eq!(iface.stats().isr_count, 1);
    }
}
