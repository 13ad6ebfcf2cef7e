// Simulated DMA MAC
// A descriptor-ring Ethernet controller with a clause 22 PHY behind an MDIO
// bus. The "wire" side is driven through a `SimHandle`: frames are injected,
// transmissions completed and faults armed from task context, as a test
// bench or a host-side bring-up would.

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;

use log::{debug, error, trace};
use spin::Mutex;

use crate::config::DeviceConfig;
use crate::drivers::{
    DmaBuf, Driver, IoCtl, IoCtlReply, IsrEvents, IsrKind, RxBuf, TxFrame, MAX_TX_RETIRED,
};
use crate::error::{DevError, MgmtError};
use crate::link::{mii, Duplex, LinkSpeed, LinkState};

/// MDIO address of the simulated PHY.
pub const SIM_PHY_ADDR: u8 = 1;
/// Frames the receive FIFO holds while no descriptor is posted.
pub const SIM_RX_FIFO_DEPTH: usize = 2;

const IRQ_RX: u32 = 1 << 0;
const IRQ_RX_OVERRUN: u32 = 1 << 1;
const IRQ_TX: u32 = 1 << 2;
const IRQ_PHY: u32 = 1 << 3;

enum RxOutcome {
    Frame(Vec<u8>),
    Error,
}

struct RxDone {
    addr: u64,
    outcome: RxOutcome,
}

struct SimWire {
    running: bool,
    rx_irq_enabled: bool,
    irq_status: u32,

    posted: VecDeque<u64>,
    rx_done: VecDeque<RxDone>,
    fifo: VecDeque<RxOutcome>,
    rx_posts: u32,
    overruns: u32,

    tx_slots: usize,
    tx_hw: VecDeque<(u64, Vec<u8>)>,
    tx_done: usize,
    tx_done_addrs: VecDeque<u64>,
    report_addrs: bool,
    overreport: usize,
    sent: Vec<Vec<u8>>,

    mdio: [u16; 32],
    mdio_timeout: bool,
    applied_link: Option<LinkState>,
    fail_link_update: bool,
    fail_start: bool,

    /// Octet lanes of the DMA bus are crossed.
    bus_swapped: bool,
    /// The driver corrects crossed lanes.
    swap_octets: bool,

    stored_addr: Option<[u8; 6]>,
    programmed_addr: Option<[u8; 6]>,
    multicast: Vec<[u8; 6]>,
}

impl SimWire {
    fn new() -> Self {
        Self {
            running: false,
            rx_irq_enabled: false,
            irq_status: 0,
            posted: VecDeque::new(),
            rx_done: VecDeque::new(),
            fifo: VecDeque::new(),
            rx_posts: 0,
            overruns: 0,
            tx_slots: 0,
            tx_hw: VecDeque::new(),
            tx_done: 0,
            tx_done_addrs: VecDeque::new(),
            report_addrs: false,
            overreport: 0,
            sent: Vec::new(),
            mdio: [0; 32],
            mdio_timeout: false,
            applied_link: None,
            fail_link_update: false,
            fail_start: false,
            bus_swapped: false,
            swap_octets: false,
            stored_addr: None,
            programmed_addr: None,
            multicast: Vec::new(),
        }
    }

    /// Land one arrival in the oldest posted descriptor, or the FIFO.
    fn arrive(&mut self, outcome: RxOutcome) -> bool {
        if !self.running {
            return false;
        }
        match self.posted.pop_front() {
            Some(addr) => {
                self.rx_done.push_back(RxDone { addr, outcome });
                self.irq_status |= IRQ_RX;
                true
            }
            None if self.fifo.len() < SIM_RX_FIFO_DEPTH => {
                self.fifo.push_back(outcome);
                true
            }
            None => {
                self.overruns += 1;
                self.irq_status |= IRQ_RX_OVERRUN;
                false
            }
        }
    }

    /// Whether data crosses the bus with its octet pairs swapped.
    fn lanes_crossed(&self) -> bool {
        self.bus_swapped != self.swap_octets
    }

    fn link_from_mdio(&self) -> LinkState {
        let bmsr = self.mdio[mii::BMSR as usize];
        if bmsr & mii::BMSR_LINK_UP == 0 {
            return LinkState::DOWN;
        }
        let bmcr = self.mdio[mii::BMCR as usize];
        let speed = if bmcr & mii::BMCR_SPEED_1000 != 0 {
            LinkSpeed::Mbps1000
        } else if bmcr & mii::BMCR_SPEED_100 != 0 {
            LinkSpeed::Mbps100
        } else {
            LinkSpeed::Mbps10
        };
        let duplex = if bmcr & mii::BMCR_FULL_DUPLEX != 0 {
            Duplex::Full
        } else {
            Duplex::Half
        };
        LinkState::new(speed, duplex)
    }
}

/// The device side of the simulation, bound to an interface.
pub struct SimMac {
    wire: Arc<Mutex<SimWire>>,
}

/// The wire side of the simulation.
#[derive(Clone)]
pub struct SimHandle {
    wire: Arc<Mutex<SimWire>>,
}

impl SimMac {
    /// Create a device and the handle that drives its wire.
    pub fn new() -> (Self, SimHandle) {
        let wire = Arc::new(Mutex::new(SimWire::new()));
        (
            Self {
                wire: Arc::clone(&wire),
            },
            SimHandle { wire },
        )
    }
}

impl Driver for SimMac {
    fn init(&mut self, cfg: &DeviceConfig) -> Result<(), DevError> {
        let mut wire = self.wire.lock();
        if wire.tx_slots == 0 {
            wire.tx_slots = cfg.tx_desc_count;
        }
        wire.swap_octets = cfg.swap_octets();
        wire.running = false;
        wire.irq_status = 0;
        Ok(())
    }

    fn start(&mut self, hw_addr: &[u8; 6]) -> Result<(), DevError> {
        let mut wire = self.wire.lock();
        if wire.fail_start {
            return Err(DevError::HardwareNotReady);
        }
        wire.programmed_addr = Some(*hw_addr);
        wire.irq_status = 0;
        wire.rx_irq_enabled = true;
        wire.running = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DevError> {
        let mut wire = self.wire.lock();
        wire.running = false;
        wire.rx_irq_enabled = false;
        wire.irq_status = 0;
        wire.posted.clear();
        wire.rx_done.clear();
        wire.fifo.clear();
        // Frames still in the engine are abandoned, as on a real reset.
        wire.tx_hw.clear();
        wire.tx_done = 0;
        wire.tx_done_addrs.clear();
        Ok(())
    }

    fn rx_post(&mut self, buf: DmaBuf) {
        let mut wire = self.wire.lock();
        wire.rx_posts += 1;
        wire.posted.push_back(buf.addr);
        // A frame waiting in the FIFO takes the new descriptor at once.
        if let Some(outcome) = wire.fifo.pop_front() {
            if let Some(addr) = wire.posted.pop_front() {
                wire.rx_done.push_back(RxDone { addr, outcome });
                wire.irq_status |= IRQ_RX;
            }
        }
    }

    fn receive(&mut self, buf: RxBuf<'_>) -> Result<Option<usize>, DevError> {
        let mut wire = self.wire.lock();
        let Some(done) = wire.rx_done.pop_front() else {
            return Ok(None);
        };
        if done.addr != buf.addr {
            error!(
                "sim: descriptor order broken, completed {:#x} but oldest posted is {:#x}",
                done.addr, buf.addr
            );
            return Err(DevError::Fault);
        }
        match done.outcome {
            RxOutcome::Frame(frame) if frame.len() <= buf.data.len() => {
                let data = &mut buf.data[..frame.len()];
                data.copy_from_slice(&frame);
                if wire.lanes_crossed() {
                    swap_pairs(data);
                }
                Ok(Some(frame.len()))
            }
            RxOutcome::Frame(frame) => {
                debug!("sim: {} octet frame truncated", frame.len());
                Err(DevError::Fault)
            }
            RxOutcome::Error => Err(DevError::Fault),
        }
    }

    fn transmit(&mut self, frame: TxFrame<'_>) -> Result<(), DevError> {
        let mut wire = self.wire.lock();
        if !wire.running {
            return Err(DevError::HardwareNotReady);
        }
        if wire.tx_hw.len() >= wire.tx_slots {
            return Err(DevError::Busy);
        }
        trace!("sim: tx {:#x} len {}", frame.addr, frame.len());
        let mut data = frame.data().to_vec();
        if wire.lanes_crossed() {
            swap_pairs(&mut data);
        }
        wire.tx_hw.push_back((frame.addr, data));
        Ok(())
    }

    fn interrupt_service(&mut self, _kind: IsrKind) -> IsrEvents {
        let mut wire = self.wire.lock();
        let mut events = IsrEvents::default();
        let mut status = core::mem::take(&mut wire.irq_status);

        if status & IRQ_RX != 0 && !wire.rx_irq_enabled {
            // Masked sources stay latched.
            wire.irq_status |= IRQ_RX;
            status &= !IRQ_RX;
        }
        events.rx_ready = status & IRQ_RX != 0 && !wire.rx_done.is_empty();
        events.rx_overrun = status & IRQ_RX_OVERRUN != 0;
        events.link_changed = status & IRQ_PHY != 0;

        if status & IRQ_TX != 0 {
            if wire.report_addrs {
                while events.tx_retired.len() < MAX_TX_RETIRED {
                    let Some(addr) = wire.tx_done_addrs.pop_front() else {
                        break;
                    };
                    // Bounded by the loop condition.
                    let _ = events.tx_retired.push(addr);
                }
                if !wire.tx_done_addrs.is_empty() {
                    wire.irq_status |= IRQ_TX;
                }
            }
            events.tx_completed = core::mem::take(&mut wire.tx_done) + core::mem::take(&mut wire.overreport);
        }
        events
    }

    fn set_rx_interrupts(&mut self, enable: bool) {
        self.wire.lock().rx_irq_enabled = enable;
    }

    fn io_control(&mut self, req: IoCtl) -> Result<IoCtlReply, DevError> {
        let mut wire = self.wire.lock();
        match req {
            IoCtl::LinkStateGet => Ok(IoCtlReply::Link(wire.link_from_mdio())),
            IoCtl::LinkStateUpdate(state) => {
                if wire.fail_link_update {
                    return Err(DevError::Fault);
                }
                wire.applied_link = Some(state);
                Ok(IoCtlReply::None)
            }
        }
    }

    fn hw_addr(&self) -> Option<[u8; 6]> {
        self.wire.lock().stored_addr
    }

    fn mgmt_read(&mut self, phy_addr: u8, reg: u8) -> Result<u16, MgmtError> {
        let wire = self.wire.lock();
        if wire.mdio_timeout {
            return Err(MgmtError::Timeout);
        }
        if phy_addr != SIM_PHY_ADDR {
            // Nothing drives the bus: reads float high.
            return Ok(0xFFFF);
        }
        wire.mdio
            .get(reg as usize)
            .copied()
            .ok_or(MgmtError::InvalidRegister)
    }

    fn mgmt_write(&mut self, phy_addr: u8, reg: u8, value: u16) -> Result<(), MgmtError> {
        let mut wire = self.wire.lock();
        if wire.mdio_timeout {
            return Err(MgmtError::Timeout);
        }
        if phy_addr != SIM_PHY_ADDR {
            return Ok(());
        }
        *wire
            .mdio
            .get_mut(reg as usize)
            .ok_or(MgmtError::InvalidRegister)? = value;
        Ok(())
    }

    fn multicast_add(&mut self, addr: &[u8; 6]) -> Result<(), DevError> {
        let mut wire = self.wire.lock();
        if !wire.multicast.contains(addr) {
            wire.multicast.push(*addr);
        }
        Ok(())
    }

    fn multicast_remove(&mut self, addr: &[u8; 6]) -> Result<(), DevError> {
        self.wire.lock().multicast.retain(|a| a != addr);
        Ok(())
    }
}

fn swap_pairs(data: &mut [u8]) {
    for pair in data.chunks_exact_mut(2) {
        pair.swap(0, 1);
    }
}

impl SimHandle {
    /// Deliver a frame from the wire. Returns `false` on overrun.
    pub fn inject(&self, frame: &[u8]) -> bool {
        self.wire.lock().arrive(RxOutcome::Frame(frame.to_vec()))
    }

    /// Deliver a frame that fails its checksum.
    pub fn inject_error(&self) -> bool {
        self.wire.lock().arrive(RxOutcome::Error)
    }

    /// Complete up to `n` of the oldest queued transmissions.
    pub fn complete_tx(&self, n: usize) -> usize {
        let mut wire = self.wire.lock();
        let mut done = 0;
        while done < n {
            let Some((addr, frame)) = wire.tx_hw.pop_front() else {
                break;
            };
            wire.sent.push(frame);
            if wire.report_addrs {
                wire.tx_done_addrs.push_back(addr);
            } else {
                wire.tx_done += 1;
            }
            done += 1;
        }
        if done > 0 {
            wire.irq_status |= IRQ_TX;
        }
        done
    }

    /// Report completions by buffer address instead of by count.
    pub fn report_by_addr(&self, enable: bool) {
        self.wire.lock().report_addrs = enable;
    }

    /// Add `n` phantom completions to the next transmit interrupt.
    pub fn overreport(&self, n: usize) {
        let mut wire = self.wire.lock();
        wire.overreport += n;
        wire.irq_status |= IRQ_TX;
    }

    /// Raise a transmit-complete interrupt for an address never queued.
    pub fn complete_unknown(&self, addr: u64) {
        let mut wire = self.wire.lock();
        wire.tx_done_addrs.push_back(addr);
        wire.irq_status |= IRQ_TX;
    }

    /// Hardware transmit slots. Takes effect from the next `init`.
    pub fn set_tx_slots(&self, n: usize) {
        self.wire.lock().tx_slots = n;
    }

    /// Frames completed on the wire, oldest first.
    pub fn take_sent(&self) -> Vec<Vec<u8>> {
        core::mem::take(&mut self.wire.lock().sent)
    }

    /// Transmissions queued in the engine and not yet completed.
    pub fn tx_pending(&self) -> usize {
        self.wire.lock().tx_hw.len()
    }

    /// Receive descriptors currently owned by the engine.
    pub fn rx_posted(&self) -> usize {
        self.wire.lock().posted.len()
    }

    /// Total receive descriptor posts since creation.
    pub fn rx_posts(&self) -> u32 {
        self.wire.lock().rx_posts
    }

    pub fn overruns(&self) -> u32 {
        self.wire.lock().overruns
    }

    pub fn rx_irq_enabled(&self) -> bool {
        self.wire.lock().rx_irq_enabled
    }

    pub fn is_running(&self) -> bool {
        self.wire.lock().running
    }

    /// Set the PHY registers for `state` and raise a PHY interrupt.
    pub fn set_link(&self, state: LinkState) {
        let mut wire = self.wire.lock();
        let mut bmcr = 0;
        match state.speed {
            LinkSpeed::Mbps1000 => bmcr |= mii::BMCR_SPEED_1000,
            LinkSpeed::Mbps100 => bmcr |= mii::BMCR_SPEED_100,
            LinkSpeed::Mbps10 | LinkSpeed::Unknown => {}
        }
        if state.duplex == Duplex::Full {
            bmcr |= mii::BMCR_FULL_DUPLEX;
        }
        wire.mdio[mii::BMCR as usize] = bmcr;
        wire.mdio[mii::BMSR as usize] = if state.is_up() {
            mii::BMSR_LINK_UP | mii::BMSR_AN_COMPLETE
        } else {
            0
        };
        wire.irq_status |= IRQ_PHY;
    }

    /// Last link state the MAC was told to apply.
    pub fn applied_link(&self) -> Option<LinkState> {
        self.wire.lock().applied_link
    }

    pub fn set_mdio_timeout(&self, fail: bool) {
        self.wire.lock().mdio_timeout = fail;
    }

    pub fn fail_link_update(&self, fail: bool) {
        self.wire.lock().fail_link_update = fail;
    }

    pub fn fail_start(&self, fail: bool) {
        self.wire.lock().fail_start = fail;
    }

    /// Cross the octet lanes of the DMA bus, as a big-endian bus bridge
    /// would.
    pub fn set_bus_swapped(&self, swapped: bool) {
        self.wire.lock().bus_swapped = swapped;
    }

    /// Address the device reports as stored in its EEPROM.
    pub fn set_stored_addr(&self, addr: Option<[u8; 6]>) {
        self.wire.lock().stored_addr = addr;
    }

    /// Unicast address programmed by the last `start`.
    pub fn programmed_addr(&self) -> Option<[u8; 6]> {
        self.wire.lock().programmed_addr
    }

    pub fn multicast(&self) -> Vec<[u8; 6]> {
        self.wire.lock().multicast.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started() -> (SimMac, SimHandle) {
        let (mut mac, sim) = SimMac::new();
        mac.init(&DeviceConfig::default()).unwrap();
        mac.start(&[0x02, 0, 0, 0, 0, 9]).unwrap();
        (mac, sim)
    }

    #[test]
    fn test_rx_completes_in_post_order() {
        let (mut mac, sim) = started();
        mac.rx_post(DmaBuf { addr: 0x100, len: 64 });
        mac.rx_post(DmaBuf { addr: 0x200, len: 64 });
        assert!(sim.inject(&[1; 20]));
        assert!(sim.inject(&[2; 30]));

        let ev = mac.interrupt_service(IsrKind::Rx);
        assert!(ev.rx_ready);

        let mut data = [0u8; 64];
        let got = mac.receive(RxBuf { addr: 0x100, data: &mut data });
        assert_eq!(got, Ok(Some(20)));
        // Out-of-order retirement is a fault.
        assert_eq!(
            mac.receive(RxBuf { addr: 0x300, data: &mut data }),
            Err(DevError::Fault)
        );
        assert_eq!(mac.receive(RxBuf { addr: 0x200, data: &mut data }), Ok(None));
    }

    #[test]
    fn test_fifo_then_overrun() {
        let (mut mac, sim) = started();
        for _ in 0..SIM_RX_FIFO_DEPTH {
            assert!(sim.inject(&[0; 60]));
        }
        assert!(!sim.inject(&[0; 60]));
        assert_eq!(sim.overruns(), 1);
        assert!(mac.interrupt_service(IsrKind::Unknown).rx_overrun);

        // A post drains the FIFO head immediately.
        mac.rx_post(DmaBuf { addr: 0x40, len: 64 });
        assert_eq!(sim.rx_posted(), 0);
        let mut data = [0u8; 64];
        assert_eq!(mac.receive(RxBuf { addr: 0x40, data: &mut data }), Ok(Some(60)));
    }

    #[test]
    fn test_tx_slots_and_completion() {
        let (mut mac, sim) = started();
        let area = [9u8; 60];
        for i in 0..4 {
            mac.transmit(TxFrame { addr: i, ix_offset: 0, area: &area }).unwrap();
        }
        assert_eq!(
            mac.transmit(TxFrame { addr: 9, ix_offset: 0, area: &area }),
            Err(DevError::Busy)
        );
        assert_eq!(sim.complete_tx(3), 3);
        sim.overreport(2);
        let ev = mac.interrupt_service(IsrKind::TxComplete);
        assert_eq!(ev.tx_completed, 5);
        assert_eq!(sim.take_sent().len(), 3);
        assert_eq!(sim.tx_pending(), 1);
    }

    #[test]
    fn test_address_completion() {
        let (mut mac, sim) = started();
        sim.report_by_addr(true);
        let area = [0u8; 60];
        mac.transmit(TxFrame { addr: 0xA0, ix_offset: 0, area: &area }).unwrap();
        mac.transmit(TxFrame { addr: 0xB0, ix_offset: 0, area: &area }).unwrap();
        sim.complete_tx(2);
        let ev = mac.interrupt_service(IsrKind::TxComplete);
        assert_eq!(ev.tx_completed, 0);
        assert_eq!(&ev.tx_retired[..], &[0xA0, 0xB0]);
    }

    #[test]
    fn test_masked_rx_stays_latched() {
        let (mut mac, sim) = started();
        mac.rx_post(DmaBuf { addr: 0x10, len: 64 });
        mac.set_rx_interrupts(false);
        sim.inject(&[0; 60]);
        assert!(!mac.interrupt_service(IsrKind::Unknown).rx_ready);
        mac.set_rx_interrupts(true);
        assert!(mac.interrupt_service(IsrKind::Unknown).rx_ready);
    }

    #[test]
    fn test_mdio_and_link() {
        let (mut mac, sim) = started();
        sim.set_link(LinkState::new(LinkSpeed::Mbps100, Duplex::Full));
        assert!(mac.interrupt_service(IsrKind::Phy).link_changed);
        let bmsr = mac.mgmt_read(SIM_PHY_ADDR, mii::BMSR).unwrap();
        assert_ne!(bmsr & mii::BMSR_LINK_UP, 0);
        assert_eq!(mac.mgmt_read(7, mii::BMSR), Ok(0xFFFF));
        assert_eq!(mac.mgmt_read(SIM_PHY_ADDR, 40), Err(MgmtError::InvalidRegister));
        sim.set_mdio_timeout(true);
        assert_eq!(mac.mgmt_read(SIM_PHY_ADDR, mii::BMSR), Err(MgmtError::Timeout));

        assert_eq!(
            mac.io_control(IoCtl::LinkStateGet),
            Ok(IoCtlReply::Link(LinkState::new(LinkSpeed::Mbps100, Duplex::Full)))
        );
        sim.fail_link_update(true);
        assert_eq!(
            mac.io_control(IoCtl::LinkStateUpdate(LinkState::DOWN)),
            Err(DevError::Fault)
        );
    }
}
