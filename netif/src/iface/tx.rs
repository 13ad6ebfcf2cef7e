// Transmit coordinator

use log::{trace, warn};

use super::{Core, Interface};
use crate::buf::{BufPurpose, BufferLease};
use crate::drivers::TxFrame;
use crate::error::{DevError, NetError, TxRefused};

impl Core {
    /// Retire the `n` oldest in-flight transmissions, releasing their areas.
    ///
    /// Completions beyond what is in flight are counted and otherwise
    /// ignored. Returns the number actually retired.
    pub(super) fn retire_tx(&mut self, n: usize) -> usize {
        let Some(rings) = self.rings.as_mut() else {
            self.stats.tx_dealloc_unknown = self.stats.tx_dealloc_unknown.wrapping_add(n as u32);
            return 0;
        };
        let mut retired = 0;
        while retired < n {
            match rings.tx_inflight.pop() {
                Some(entry) => {
                    trace!("tx: retired {:#x}", entry.item.dma_addr());
                    drop(entry);
                    retired += 1;
                }
                None => break,
            }
        }
        let extra = n - retired;
        if extra > 0 {
            self.stats.tx_dealloc_unknown = self.stats.tx_dealloc_unknown.wrapping_add(extra as u32);
            warn!("tx: {} completions beyond in-flight ignored", extra);
        }
        self.stats.tx_completed = self.stats.tx_completed.wrapping_add(retired as u32);
        retired
    }

    /// Retire the in-flight transmission whose area starts at `addr`, and
    /// every older one with it. An unknown address is counted and ignored.
    pub(super) fn dealloc_tx(&mut self, addr: u64) -> usize {
        let found = self
            .rings
            .as_ref()
            .and_then(|r| r.tx_inflight.position(|e| e.item.dma_addr() == addr));
        match found {
            Some(ix) => self.retire_tx(ix + 1),
            None => {
                self.stats.tx_dealloc_unknown = self.stats.tx_dealloc_unknown.wrapping_add(1);
                warn!("tx: dealloc of unknown area {:#x} ignored", addr);
                0
            }
        }
    }
}

impl Interface {
    /// Queue one frame for transmission.
    ///
    /// Never blocks. A refusal hands the lease back inside [`TxRefused`]:
    /// `Busy` when every transmit descriptor is in flight, which the caller
    /// answers by waiting for [`Interface::tx_capacity`] to rise, and
    /// `ForeignBuffer` for an area from another interface's pool.
    pub fn transmit(&self, lease: BufferLease) -> Result<(), TxRefused> {
        if !self.is_running() {
            return Err(TxRefused::new(NetError::NotRunning, lease));
        }
        if lease.is_empty() {
            let max = lease.capacity();
            return Err(TxRefused::new(NetError::InvalidLength { len: 0, max }, lease));
        }

        let sent = self.with_core(|core| {
            if !core.pool.as_ref().is_some_and(|p| p.owns(&lease)) {
                return Err((NetError::ForeignBuffer, lease));
            }
            let Some(rings) = core.rings.as_mut() else {
                return Err((NetError::NotRunning, lease));
            };
            if rings.tx_inflight.is_full() {
                core.stats.tx_busy = core.stats.tx_busy.wrapping_add(1);
                return Err((NetError::Busy, lease));
            }
            match core.driver.transmit(TxFrame::of(&lease)) {
                Ok(()) => {}
                Err(DevError::Busy) => {
                    core.stats.tx_busy = core.stats.tx_busy.wrapping_add(1);
                    return Err((NetError::Busy, lease));
                }
                Err(e) => return Err((NetError::Device(e), lease)),
            }
            let len = lease.len();
            if let Err(back) = rings.tx_inflight.push(lease, len) {
                // Unreachable after the fullness check; the device keeps
                // a descriptor for an area we no longer track.
                return Err((NetError::Busy, back.item));
            }
            core.stats.tx_frames = core.stats.tx_frames.wrapping_add(1);
            let _ = self.tx_signal.try_wait();
            Ok(len)
        });

        match sent {
            Ok(len) => {
                trace!("netif {}: tx {} octets", self.nbr.0, len);
                Ok(())
            }
            Err((reason, lease)) => Err(TxRefused::new(reason, lease)),
        }
    }

    /// Post a transmit area back by address, as a device deallocation task
    /// does.
    ///
    /// Retires the matching in-flight entry and everything issued before
    /// it. Returns `false`, and changes nothing, when `addr` is not in
    /// flight; duplicate and stale posts are expected.
    pub fn tx_dealloc(&self, addr: u64) -> bool {
        self.with_core(|core| {
            let retired = core.dealloc_tx(addr);
            self.tx_signal.post_n(retired);
            retired > 0
        })
    }

    /// Take a transmit area sized for a `len` octet frame.
    ///
    /// The small class is used when the frame fits. The lease length is set
    /// to `len`.
    pub fn acquire_tx(&self, len: usize) -> Result<BufferLease, NetError> {
        let pool = self.pool().ok_or(NetError::NotInitialized)?;
        pool.acquire_for(len, BufPurpose::Tx)
    }
}
