//! Interface state machine.
//!
//! An [`Interface`] binds one device configuration to one driver and owns
//! the buffer pool and descriptor rings that service it:
//!
//! ```text
//! Uninitialized --init--> Initialized --start--> Running
//!                              ^                    |
//!                              +-------stop---------+
//! ```
//!
//! Lifecycle calls come from task context only. Interrupt context reads the
//! state word and services events only while `Running`. Everything the two
//! contexts share lives in one `Core` behind a critical section.

mod link;
mod rx;
mod tx;

pub use link::IfMgmtBus;

use alloc::boxed::Box;
use core::cell::RefCell;
use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use critical_section::Mutex;
use log::{debug, info, warn};

use crate::buf::{BufClass, BufPurpose, BufferLease, BufferPool};
use crate::config::{DeviceConfig, ETHER_FRAME_MIN, ETHER_HDR_LEN};
use crate::drivers::{Bsp, DmaBuf, Driver, IsrKind};
use crate::error::{MgmtError, NetError};
use crate::link::{LinkState, LinkStatus, LinkSubscriber};
use crate::registry::IfNbr;
use crate::ring::DescriptorRing;
use crate::signal::CountingSignal;
use crate::stats::IfStats;

/// Link callbacks an interface can hold.
pub const MAX_LINK_SUBSCRIBERS: usize = 4;

/// Smallest MTU `set_mtu` accepts.
pub const MTU_MIN: usize = ETHER_FRAME_MIN - ETHER_HDR_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IfState {
    Uninitialized = 0,
    Initialized = 1,
    Running = 2,
}

impl IfState {
    fn from_u8(v: u8) -> Self {
        match v {
            2 => IfState::Running,
            1 => IfState::Initialized,
            _ => IfState::Uninitialized,
        }
    }
}

/// Rings that exist only between Start and Stop.
struct Rings {
    /// Areas owned by the receive engine, in posting order.
    rx_posted: DescriptorRing<BufferLease>,
    /// Filled areas awaiting the stack.
    rx_ready: DescriptorRing<BufferLease>,
    /// Areas owned by the transmit engine, in issue order.
    tx_inflight: DescriptorRing<BufferLease>,
}

impl Rings {
    fn drain(&mut self) -> usize {
        // Each entry's lease returns to the pool as it drops.
        self.tx_inflight.drain().count()
            + self.rx_posted.drain().count()
            + self.rx_ready.drain().count()
    }
}

/// Hand `count` fresh receive areas to the device.
fn prime_rx(
    driver: &mut dyn Driver,
    pool: &BufferPool,
    posted: &mut DescriptorRing<BufferLease>,
    count: usize,
) -> Result<(), NetError> {
    for _ in 0..count {
        let lease = pool.acquire(BufClass::Large, BufPurpose::Rx)?;
        driver.rx_post(DmaBuf::of(&lease));
        if posted.push(lease, 0).is_err() {
            return Err(NetError::InvalidState);
        }
    }
    Ok(())
}

/// State shared between task and interrupt context.
struct Core {
    driver: Box<dyn Driver>,
    bsp: Box<dyn Bsp>,
    pool: Option<BufferPool>,
    rings: Option<Rings>,
    rx_throttled: bool,
    link: LinkState,
    stats: IfStats,
}

/// Task-context-only parameters.
struct Params {
    mtu: usize,
    hw_addr: [u8; 6],
}

/// One network interface.
pub struct Interface {
    nbr: IfNbr,
    cfg: DeviceConfig,
    state: AtomicU8,
    core: Mutex<RefCell<Core>>,
    rx_signal: CountingSignal,
    tx_signal: CountingSignal,
    link_event: AtomicBool,
    params: spin::Mutex<Params>,
    subscribers: spin::Mutex<heapless::Vec<LinkSubscriber, MAX_LINK_SUBSCRIBERS>>,
}

impl Interface {
    /// Bind a configuration, a driver and board support. Nothing is touched
    /// until [`Interface::init`].
    pub fn new(nbr: IfNbr, cfg: DeviceConfig, driver: Box<dyn Driver>, bsp: Box<dyn Bsp>) -> Self {
        let hw_addr = cfg.hw_addr.unwrap_or([0; 6]);
        Self {
            nbr,
            cfg,
            state: AtomicU8::new(IfState::Uninitialized as u8),
            core: Mutex::new(RefCell::new(Core {
                driver,
                bsp,
                pool: None,
                rings: None,
                rx_throttled: false,
                link: LinkState::DOWN,
                stats: IfStats::default(),
            })),
            rx_signal: CountingSignal::new(),
            tx_signal: CountingSignal::new(),
            link_event: AtomicBool::new(false),
            params: spin::Mutex::new(Params { mtu: 0, hw_addr }),
            subscribers: spin::Mutex::new(heapless::Vec::new()),
        }
    }

    pub fn nbr(&self) -> IfNbr {
        self.nbr
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.cfg
    }

    pub fn state(&self) -> IfState {
        IfState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        self.state() == IfState::Running
    }

    fn set_state(&self, state: IfState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Run `f` on the shared core with interrupts masked.
    fn with_core<R>(&self, f: impl FnOnce(&mut Core) -> R) -> R {
        critical_section::with(|cs| f(&mut self.core.borrow_ref_mut(cs)))
    }

    /// Validate the configuration, bring up the board and the device, and
    /// allocate the buffer pool.
    ///
    /// Configuration errors are reported here and nowhere else.
    pub fn init(&self) -> Result<(), NetError> {
        if self.state() != IfState::Uninitialized {
            return Err(NetError::InvalidState);
        }
        self.cfg.validate()?;

        let hw_addr = self.with_core(|core| -> Result<[u8; 6], NetError> {
            core.bsp.cfg_clk()?;
            core.bsp.cfg_gpio()?;
            core.bsp.cfg_int()?;
            core.driver.init(&self.cfg)?;

            let hw_addr = self
                .cfg
                .hw_addr
                .or_else(|| core.driver.hw_addr())
                .ok_or(NetError::InvalidAddress)?;
            if !is_unicast(&hw_addr) {
                return Err(NetError::InvalidAddress);
            }

            core.pool = Some(BufferPool::new(&self.cfg.pool_config())?);
            Ok(hw_addr)
        })?;

        {
            let mut params = self.params.lock();
            params.hw_addr = hw_addr;
            params.mtu = self.cfg.mtu_max();
        }
        self.set_state(IfState::Initialized);
        info!(
            "netif {}: initialized, hw addr {}, mtu {}",
            self.nbr.0,
            HwAddr(&hw_addr),
            self.cfg.mtu_max()
        );
        Ok(())
    }

    /// Prime the receive engine and enable the device.
    ///
    /// A failure part way leaves the interface `Initialized` with every
    /// buffer back in the pool.
    pub fn start(&self) -> Result<(), NetError> {
        match self.state() {
            IfState::Uninitialized => return Err(NetError::NotInitialized),
            IfState::Running => return Err(NetError::InvalidState),
            IfState::Initialized => {}
        }
        let hw_addr = self.params.lock().hw_addr;

        let started = self.with_core(|core| -> Result<(), NetError> {
            let pool = core.pool.clone().ok_or(NetError::NotInitialized)?;
            let ring = |n: usize| DescriptorRing::new(n).map_err(|_| NetError::InvalidState);
            let mut rings = Rings {
                rx_posted: ring(self.cfg.rx_desc_count + 1)?,
                rx_ready: ring(self.cfg.rx_queue_size)?,
                tx_inflight: ring(self.cfg.tx_desc_count + 1)?,
            };

            let enabled = prime_rx(
                &mut *core.driver,
                &pool,
                &mut rings.rx_posted,
                self.cfg.rx_desc_count,
            )
            .and_then(|()| core.driver.start(&hw_addr).map_err(NetError::from));
            if let Err(e) = enabled {
                // The device may hold primed descriptors: quiesce it before
                // the areas go back to the pool.
                if let Err(stop_err) = core.driver.stop() {
                    debug!("netif {}: stop after failed start: {}", self.nbr.0, stop_err);
                }
                drop(rings);
                return Err(e);
            }

            core.rings = Some(rings);
            core.rx_throttled = false;
            core.link = LinkState::DOWN;
            self.rx_signal.reset();
            self.tx_signal.set(self.cfg.tx_desc_count);
            Ok(())
        });

        if let Err(e) = started {
            warn!("netif {}: start failed: {}", self.nbr.0, e);
            return Err(e);
        }

        self.link_event.store(false, Ordering::Release);
        self.set_state(IfState::Running);
        info!("netif {}: running", self.nbr.0);
        Ok(())
    }

    /// Disable the device and reclaim every area it or the rings hold.
    ///
    /// Safe to call repeatedly and after a failed start. Leases already
    /// handed to the stack stay valid and return to the pool when dropped.
    pub fn stop(&self) -> Result<(), NetError> {
        let was = self.state();
        if was == IfState::Uninitialized {
            return Err(NetError::NotInitialized);
        }
        // Interrupt context stops servicing from here on.
        self.set_state(IfState::Initialized);

        let (reclaimed, link_was_up) = self.with_core(|core| {
            core.driver.set_rx_interrupts(false);
            if let Err(e) = core.driver.stop() {
                warn!("netif {}: device stop reported {}", self.nbr.0, e);
            }
            let reclaimed = match core.rings.take() {
                Some(mut rings) => {
                    core.stats.rx_ring_high_water = rings.rx_ready.high_water();
                    core.stats.tx_ring_high_water = rings.tx_inflight.high_water();
                    rings.drain()
                }
                None => 0,
            };
            core.rx_throttled = false;
            self.rx_signal.reset();
            self.tx_signal.reset();
            let link_was_up = core.link.is_up();
            core.link = LinkState::DOWN;
            (reclaimed, link_was_up)
        });

        self.link_event.store(false, Ordering::Release);

        if was == IfState::Running {
            info!("netif {}: stopped, {} buffers reclaimed", self.nbr.0, reclaimed);
        }
        if link_was_up {
            self.notify_link(LinkStatus::Down);
        }
        Ok(())
    }

    /// Interrupt entry for this interface.
    ///
    /// Never fails: events the interface cannot act on are counted.
    pub fn isr_handler(&self, kind: IsrKind) {
        let running = self.is_running();
        self.with_core(|core| {
            core.stats.isr_count = core.stats.isr_count.wrapping_add(1);
            if !running || core.rings.is_none() {
                core.stats.isr_ignored = core.stats.isr_ignored.wrapping_add(1);
                return;
            }
            let events = core.driver.interrupt_service(kind);
            if events.rx_overrun {
                core.stats.rx_overruns = core.stats.rx_overruns.wrapping_add(1);
            }
            if events.link_changed {
                self.link_event.store(true, Ordering::Release);
            }

            let mut retired = 0;
            if events.tx_completed > 0 {
                retired += core.retire_tx(events.tx_completed);
            }
            for addr in events.tx_retired.iter() {
                retired += core.dealloc_tx(*addr);
            }
            self.tx_signal.post_n(retired);

            if events.rx_ready || kind == IsrKind::Rx {
                let queued = core.harvest_rx();
                self.rx_signal.post_n(queued);
            }
        });
    }

    /// Run one interrupt-service pass from task context, for back ends that
    /// raise no interrupts.
    pub fn poll(&self) -> Result<(), NetError> {
        if !self.is_running() {
            return Err(NetError::NotRunning);
        }
        self.isr_handler(IsrKind::Unknown);
        Ok(())
    }

    /// Counter snapshot.
    pub fn stats(&self) -> IfStats {
        self.with_core(|core| {
            let mut stats = core.stats;
            if let Some(rings) = core.rings.as_ref() {
                stats.rx_ring_high_water = rings.rx_ready.high_water();
                stats.tx_ring_high_water = rings.tx_inflight.high_water();
            }
            if let Some(pool) = core.pool.as_ref() {
                stats.pool = pool.stats();
            }
            stats
        })
    }

    /// Handle to the interface pool, once initialized.
    pub fn pool(&self) -> Option<BufferPool> {
        self.with_core(|core| core.pool.clone())
    }

    /// "Frame ready" tokens not yet consumed by [`Interface::receive`].
    pub fn rx_pending(&self) -> usize {
        self.rx_signal.pending()
    }

    /// Free transmit descriptors.
    pub fn tx_capacity(&self) -> usize {
        self.tx_signal.pending()
    }

    /// Receive descriptors and transmit descriptors currently owned by the
    /// device.
    pub fn hw_owned(&self) -> (usize, usize) {
        self.with_core(|core| match core.rings.as_ref() {
            Some(r) => (r.rx_posted.len(), r.tx_inflight.len()),
            None => (0, 0),
        })
    }

    pub fn mtu(&self) -> usize {
        self.params.lock().mtu
    }

    /// Set the MTU, bounded by what the transmit buffers can carry.
    pub fn set_mtu(&self, mtu: usize) -> Result<(), NetError> {
        if self.state() == IfState::Uninitialized {
            return Err(NetError::NotInitialized);
        }
        if !(MTU_MIN..=self.cfg.mtu_max()).contains(&mtu) {
            return Err(NetError::InvalidMtu(mtu));
        }
        self.params.lock().mtu = mtu;
        debug!("netif {}: mtu {}", self.nbr.0, mtu);
        Ok(())
    }

    pub fn hw_addr(&self) -> [u8; 6] {
        self.params.lock().hw_addr
    }

    /// Change the unicast address. Applied by the next `start`.
    pub fn set_hw_addr(&self, addr: [u8; 6]) -> Result<(), NetError> {
        match self.state() {
            IfState::Uninitialized => return Err(NetError::NotInitialized),
            IfState::Running => return Err(NetError::InvalidState),
            IfState::Initialized => {}
        }
        if !is_unicast(&addr) {
            return Err(NetError::InvalidAddress);
        }
        self.params.lock().hw_addr = addr;
        info!("netif {}: hw addr {}", self.nbr.0, HwAddr(&addr));
        Ok(())
    }

    pub fn multicast_add(&self, addr: &[u8; 6]) -> Result<(), NetError> {
        self.check_multicast(addr)?;
        self.with_core(|core| core.driver.multicast_add(addr))?;
        Ok(())
    }

    pub fn multicast_remove(&self, addr: &[u8; 6]) -> Result<(), NetError> {
        self.check_multicast(addr)?;
        self.with_core(|core| core.driver.multicast_remove(addr))?;
        Ok(())
    }

    fn check_multicast(&self, addr: &[u8; 6]) -> Result<(), NetError> {
        if self.state() == IfState::Uninitialized {
            return Err(NetError::NotInitialized);
        }
        if addr[0] & 0x01 == 0 {
            return Err(NetError::InvalidAddress);
        }
        Ok(())
    }

    pub fn mgmt_read(&self, phy_addr: u8, reg: u8) -> Result<u16, NetError> {
        if self.state() == IfState::Uninitialized {
            return Err(NetError::NotInitialized);
        }
        self.with_core(|core| core.driver.mgmt_read(phy_addr, reg))
            .map_err(NetError::from)
    }

    pub fn mgmt_write(&self, phy_addr: u8, reg: u8, value: u16) -> Result<(), NetError> {
        if self.state() == IfState::Uninitialized {
            return Err(NetError::NotInitialized);
        }
        self.with_core(|core| core.driver.mgmt_write(phy_addr, reg, value))
            .map_err(NetError::from)
    }

    fn mgmt_read_raw(&self, phy_addr: u8, reg: u8) -> Result<u16, MgmtError> {
        self.with_core(|core| core.driver.mgmt_read(phy_addr, reg))
    }

    fn mgmt_write_raw(&self, phy_addr: u8, reg: u8, value: u16) -> Result<(), MgmtError> {
        self.with_core(|core| core.driver.mgmt_write(phy_addr, reg, value))
    }
}

impl core::fmt::Debug for Interface {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Interface")
            .field("nbr", &self.nbr)
            .field("state", &self.state())
            .finish()
    }
}

fn is_unicast(addr: &[u8; 6]) -> bool {
    addr[0] & 0x01 == 0 && addr.iter().any(|&b| b != 0)
}

struct HwAddr<'a>(&'a [u8; 6]);

impl core::fmt::Display for HwAddr<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let a = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            a[0], a[1], a[2], a[3], a[4], a[5]
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::loopback::{LoopbackDriver, LOOPBACK_HW_ADDR};
    use crate::drivers::NoBsp;
    use crate::error::{ConfigError, DevError};

    fn loopback(cfg: DeviceConfig) -> Interface {
        Interface::new(IfNbr(0), cfg, Box::new(LoopbackDriver::new()), Box::new(NoBsp))
    }

    struct FailingBsp;

    impl Bsp for FailingBsp {
        fn cfg_gpio(&mut self) -> Result<(), DevError> {
            Err(DevError::HardwareNotReady)
        }
    }

    #[test]
    fn test_lifecycle_transitions() {
        let iface = loopback(DeviceConfig::default());
        assert_eq!(iface.state(), IfState::Uninitialized);
        assert_eq!(iface.start(), Err(NetError::NotInitialized));
        assert_eq!(iface.stop(), Err(NetError::NotInitialized));

        iface.init().unwrap();
        assert_eq!(iface.state(), IfState::Initialized);
        assert_eq!(iface.init(), Err(NetError::InvalidState));
        assert_eq!(iface.hw_addr(), LOOPBACK_HW_ADDR);

        iface.start().unwrap();
        assert!(iface.is_running());
        assert_eq!(iface.start(), Err(NetError::InvalidState));
        assert_eq!(iface.tx_capacity(), 4);
        assert_eq!(iface.hw_owned(), (4, 0));

        iface.stop().unwrap();
        assert_eq!(iface.state(), IfState::Initialized);
        assert_eq!(iface.hw_owned(), (0, 0));
        assert_eq!(iface.pool().unwrap().outstanding(), 0);

        // Restart after stop.
        iface.start().unwrap();
        iface.stop().unwrap();
    }

    #[test]
    fn test_init_rejects_bad_config() {
        let cfg = DeviceConfig {
            rx_buf_align: 3,
            ..DeviceConfig::default()
        };
        let iface = loopback(cfg);
        assert!(matches!(
            iface.init(),
            Err(NetError::Config(ConfigError::InvalidAlignment { .. }))
        ));
        assert_eq!(iface.state(), IfState::Uninitialized);
    }

    #[test]
    fn test_init_reports_bsp_failure() {
        let iface = Interface::new(
            IfNbr(1),
            DeviceConfig::default(),
            Box::new(LoopbackDriver::new()),
            Box::new(FailingBsp),
        );
        assert_eq!(
            iface.init(),
            Err(NetError::Device(DevError::HardwareNotReady))
        );
        assert_eq!(iface.state(), IfState::Uninitialized);
    }

    #[test]
    fn test_configured_addr_must_be_unicast() {
        let cfg = DeviceConfig {
            hw_addr: Some([0x01, 0, 0x5e, 0, 0, 1]),
            ..DeviceConfig::default()
        };
        assert_eq!(loopback(cfg).init(), Err(NetError::InvalidAddress));
    }

    #[test]
    fn test_mtu_bounds() {
        let iface = loopback(DeviceConfig::default());
        assert_eq!(iface.set_mtu(1000), Err(NetError::NotInitialized));
        iface.init().unwrap();
        assert_eq!(iface.mtu(), 1500);
        assert_eq!(iface.set_mtu(1501), Err(NetError::InvalidMtu(1501)));
        assert_eq!(iface.set_mtu(10), Err(NetError::InvalidMtu(10)));
        iface.set_mtu(576).unwrap();
        assert_eq!(iface.mtu(), 576);
    }

    #[test]
    fn test_hw_addr_only_changes_while_stopped() {
        let iface = loopback(DeviceConfig::default());
        iface.init().unwrap();
        assert_eq!(iface.set_hw_addr([0; 6]), Err(NetError::InvalidAddress));
        iface.set_hw_addr([0x02, 1, 2, 3, 4, 5]).unwrap();
        iface.start().unwrap();
        assert_eq!(
            iface.set_hw_addr([0x02, 9, 9, 9, 9, 9]),
            Err(NetError::InvalidState)
        );
        assert_eq!(iface.hw_addr(), [0x02, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_multicast_requires_group_bit() {
        let iface = loopback(DeviceConfig::default());
        iface.init().unwrap();
        assert_eq!(
            iface.multicast_add(&[0x02, 0, 0, 0, 0, 1]),
            Err(NetError::InvalidAddress)
        );
        iface.multicast_add(&[0x01, 0, 0x5e, 0, 0, 1]).unwrap();
        iface.multicast_remove(&[0x01, 0, 0x5e, 0, 0, 1]).unwrap();
    }

    #[test]
    fn test_isr_ignored_unless_running() {
        let iface = loopback(DeviceConfig::default());
        iface.isr_handler(IsrKind::Rx);
        iface.init().unwrap();
        iface.isr_handler(IsrKind::Unknown);
        let stats = iface.stats();
        assert_eq!(stats.isr_count, 2);
        assert_eq!(stats.isr_ignored, 2);
        assert_eq!(iface.poll(), Err(NetError::NotRunning));
    }

    #[test]
    fn test_isr_counters_wrap() {
        let iface = loopback(DeviceConfig::default());
        iface.with_core(|core| {
            core.stats.isr_count = u32::MAX;
            core.stats.isr_ignored = u32::MAX;
        });
        iface.isr_handler(IsrKind::Rx);
        let stats = iface.stats();
        assert_eq!((stats.isr_count, stats.isr_ignored), (0, 0));
    }

    #[test]
    fn test_loopback_mgmt_bus_unsupported() {
        let iface = loopback(DeviceConfig::default());
        iface.init().unwrap();
        assert_eq!(
            iface.mgmt_read(0, 1),
            Err(NetError::Mgmt(MgmtError::NotSupported))
        );
    }
}
