// Receive coordinator

use log::{debug, trace, warn};

use super::{Core, Interface};
use crate::buf::{BufClass, BufPurpose, BufferLease};
use crate::drivers::{DmaBuf, Driver, RxBuf};
use crate::error::NetError;
use crate::ring::DescriptorRing;

impl Core {
    /// Move completed receive descriptors onto the ready ring.
    ///
    /// Every completed descriptor is retired, and every retired descriptor
    /// slot is refilled at once: with a fresh area when the pool has one,
    /// otherwise with the same area, discarding its frame. Stops early and
    /// masks receive interrupts when the ready ring is full.
    ///
    /// Returns the number of frames newly queued.
    pub(super) fn harvest_rx(&mut self) -> usize {
        let Core {
            driver,
            pool,
            rings,
            rx_throttled,
            stats,
            ..
        } = self;
        let (Some(pool), Some(rings)) = (pool.as_ref(), rings.as_mut()) else {
            return 0;
        };

        let mut queued = 0;
        loop {
            if rings.rx_ready.is_full() {
                if !*rx_throttled {
                    driver.set_rx_interrupts(false);
                    *rx_throttled = true;
                    stats.rx_throttled = stats.rx_throttled.wrapping_add(1);
                    debug!("rx: ready ring full, reception throttled");
                }
                break;
            }

            let Some(head) = rings.rx_posted.peek_mut() else {
                break;
            };
            let capacity = head.item.capacity();
            let addr = head.item.dma_addr();
            let outcome = driver.receive(RxBuf {
                addr,
                data: head.item.as_mut_slice(),
            });

            let len = match outcome {
                Ok(None) => break,
                Ok(Some(len)) if len <= capacity => len,
                Ok(Some(len)) => {
                    stats.rx_errors = stats.rx_errors.wrapping_add(1);
                    warn!("rx: device reported {} octets in a {} octet area", len, capacity);
                    repost_head(&mut **driver, &mut rings.rx_posted);
                    continue;
                }
                Err(e) => {
                    stats.rx_errors = stats.rx_errors.wrapping_add(1);
                    debug!("rx: descriptor {:#x} completed with {}", addr, e);
                    repost_head(&mut **driver, &mut rings.rx_posted);
                    continue;
                }
            };

            match pool.acquire(BufClass::Large, BufPurpose::Rx) {
                Ok(fresh) => {
                    let Some(filled) = rings.rx_posted.pop() else {
                        break;
                    };
                    driver.rx_post(DmaBuf::of(&fresh));
                    // A slot was just vacated.
                    let _ = rings.rx_posted.push(fresh, 0);

                    let mut lease = filled.item;
                    if lease.set_len(len).is_err() {
                        // Checked against capacity above.
                        continue;
                    }
                    if let Err(lost) = rings.rx_ready.push(lease, len) {
                        // Fullness was checked at the top of the loop.
                        drop(lost);
                        stats.rx_dropped = stats.rx_dropped.wrapping_add(1);
                        continue;
                    }
                    trace!("rx: queued {} octets from {:#x}", len, addr);
                    stats.rx_frames = stats.rx_frames.wrapping_add(1);
                    queued += 1;
                }
                Err(_) => {
                    stats.rx_dropped = stats.rx_dropped.wrapping_add(1);
                    warn!("rx: pool exhausted, frame from {:#x} dropped", addr);
                    repost_head(&mut **driver, &mut rings.rx_posted);
                }
            }
        }
        stats.rx_signals = stats.rx_signals.wrapping_add(queued as u32);
        queued
    }
}

/// Give the oldest posted area straight back to the device, discarding
/// whatever it holds.
fn repost_head(driver: &mut dyn Driver, posted: &mut DescriptorRing<BufferLease>) {
    if let Some(entry) = posted.pop() {
        driver.rx_post(DmaBuf::of(&entry.item));
        let _ = posted.push(entry.item, 0);
    }
}

impl Interface {
    /// Take the oldest received frame.
    ///
    /// # Returns
    /// * `Ok(Some(lease))` - A frame; `lease.len()` is its length
    /// * `Ok(None)` - Nothing is queued
    /// * `Err(NetError::NotRunning)` - The interface is stopped
    ///
    /// Consumes one "frame ready" token per frame returned. When reception
    /// was throttled and the ready ring now has room, reception is
    /// re-enabled and the device drained again.
    pub fn receive(&self) -> Result<Option<BufferLease>, NetError> {
        if !self.is_running() {
            return Err(NetError::NotRunning);
        }
        let lease = self.with_core(|core| {
            let rings = core.rings.as_mut()?;
            let lease = rings.rx_ready.pop().map(|e| e.item);
            if lease.is_some() {
                let _ = self.rx_signal.try_wait();
            }

            if core.rx_throttled && !rings.rx_ready.is_full() {
                core.rx_throttled = false;
                core.driver.set_rx_interrupts(true);
                debug!("rx: reception re-enabled");
                let requeued = core.harvest_rx();
                self.rx_signal.post_n(requeued);
            }
            lease
        });
        Ok(lease)
    }

    /// Hand every queued frame to `f`, oldest first.
    ///
    /// Returns the number of frames dispatched.
    pub fn dispatch_rx<F>(&self, mut f: F) -> Result<usize, NetError>
    where
        F: FnMut(BufferLease),
    {
        let mut n = 0;
        while let Some(lease) = self.receive()? {
            f(lease);
            n += 1;
        }
        Ok(n)
    }
}
