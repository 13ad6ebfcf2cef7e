// Link-state relay

use core::sync::atomic::Ordering;

use log::{debug, info, warn};

use super::{IfState, Interface};
use crate::drivers::{IoCtl, IoCtlReply};
use crate::error::{MgmtError, NetError};
use crate::link::{LinkState, LinkStatus, LinkSubscriber, MgmtBus, Phy};

impl Interface {
    /// Link state as the MAC reports it, or the last relayed state when the
    /// device cannot say.
    pub fn link_state(&self) -> LinkState {
        if self.state() == IfState::Uninitialized {
            return LinkState::DOWN;
        }
        self.with_core(|core| match core.driver.io_control(IoCtl::LinkStateGet) {
            Ok(IoCtlReply::Link(state)) => state,
            Ok(IoCtlReply::None) => core.link,
            Err(e) => {
                debug!("netif {}: link query failed: {}", self.nbr.0, e);
                core.link
            }
        })
    }

    /// Relay a PHY-side link change to the MAC.
    ///
    /// Best effort: a device that fails to apply the new state is logged and
    /// counted, and the interface carries on with the state recorded.
    /// Subscribers hear about up/down transitions after the relay.
    pub fn update_link_state(&self, state: LinkState) {
        if self.state() == IfState::Uninitialized {
            debug!("netif {}: link update before init ignored", self.nbr.0);
            return;
        }
        let transition = self.with_core(|core| {
            let old = core.link;
            core.link = state;
            if let Err(e) = core.driver.io_control(IoCtl::LinkStateUpdate(state)) {
                core.stats.link_relay_failures = core.stats.link_relay_failures.wrapping_add(1);
                warn!("netif {}: link relay failed: {}", self.nbr.0, e);
            }
            if old.status() != state.status() {
                core.stats.link_changes = core.stats.link_changes.wrapping_add(1);
                Some(state.status())
            } else {
                None
            }
        });

        if let Some(status) = transition {
            info!(
                "netif {}: link {:?}, {} Mbps {:?} duplex",
                self.nbr.0,
                status,
                state.speed.mbps(),
                state.duplex
            );
            self.notify_link(status);
        }
    }

    /// Read `phy` over this interface's management bus and relay what it
    /// reports.
    ///
    /// Management-bus errors, timeouts included, are returned for the
    /// caller to retry; nothing is relayed in that case.
    pub fn poll_link(&self, phy: &mut dyn Phy) -> Result<LinkState, NetError> {
        if self.state() == IfState::Uninitialized {
            return Err(NetError::NotInitialized);
        }
        self.link_event.store(false, Ordering::Release);
        let state = phy.link_state(&mut self.mgmt_bus())?;
        self.update_link_state(state);
        Ok(state)
    }

    /// Whether a PHY interrupt arrived since the last `poll_link`.
    pub fn link_event_pending(&self) -> bool {
        self.link_event.load(Ordering::Acquire)
    }

    pub fn subscribe_link(&self, cb: LinkSubscriber) -> Result<(), NetError> {
        let mut subs = self.subscribers.lock();
        if subs.iter().any(|s| *s as usize == cb as usize) {
            return Ok(());
        }
        subs.push(cb).map_err(|_| NetError::TableFull)
    }

    pub fn unsubscribe_link(&self, cb: LinkSubscriber) -> Result<(), NetError> {
        let mut subs = self.subscribers.lock();
        let ix = subs
            .iter()
            .position(|s| *s as usize == cb as usize)
            .ok_or(NetError::NotSubscribed)?;
        subs.swap_remove(ix);
        Ok(())
    }

    /// Call every subscriber. Runs in task context, with no lock held.
    pub(super) fn notify_link(&self, status: LinkStatus) {
        let subs = self.subscribers.lock().clone();
        for cb in subs.iter() {
            cb(self.nbr, status);
        }
    }

    /// This interface's management bus, for PHY drivers.
    pub fn mgmt_bus(&self) -> IfMgmtBus<'_> {
        IfMgmtBus { iface: self }
    }
}

/// [`MgmtBus`] over an interface's driver.
pub struct IfMgmtBus<'a> {
    iface: &'a Interface,
}

impl MgmtBus for IfMgmtBus<'_> {
    fn read(&mut self, phy_addr: u8, reg: u8) -> Result<u16, MgmtError> {
        self.iface.mgmt_read_raw(phy_addr, reg)
    }

    fn write(&mut self, phy_addr: u8, reg: u8, value: u16) -> Result<(), MgmtError> {
        self.iface.mgmt_write_raw(phy_addr, reg, value)
    }
}
