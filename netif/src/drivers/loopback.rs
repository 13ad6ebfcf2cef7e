// Loopback back end
// Every transmitted frame is queued for reception on the same interface.
// There is no interrupt line and no management bus; drive it with
// `Interface::poll`.

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use log::{debug, trace};

use crate::config::DeviceConfig;
use crate::drivers::{DmaBuf, Driver, IoCtl, IoCtlReply, IsrEvents, IsrKind, RxBuf, TxFrame};
use crate::error::DevError;
use crate::link::{Duplex, LinkSpeed, LinkState};

/// Frames held between transmit and receive before new ones are dropped.
const LOOPBACK_QUEUE_MAX: usize = 32;
const LOOPBACK_MULTICAST_MAX: usize = 8;

/// Locally administered address used when the configuration supplies none.
pub const LOOPBACK_HW_ADDR: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x01];

pub struct LoopbackDriver {
    running: bool,
    /// Receive descriptors currently owned by the "device".
    posted: usize,
    frames: VecDeque<Vec<u8>>,
    tx_done: usize,
    dropped: u32,
    multicast: heapless::Vec<[u8; 6], LOOPBACK_MULTICAST_MAX>,
}

impl LoopbackDriver {
    pub fn new() -> Self {
        Self {
            running: false,
            posted: 0,
            frames: VecDeque::new(),
            tx_done: 0,
            dropped: 0,
            multicast: heapless::Vec::new(),
        }
    }

    /// Frames lost because the loop queue was full.
    pub fn dropped(&self) -> u32 {
        self.dropped
    }
}

impl Default for LoopbackDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver for LoopbackDriver {
    fn init(&mut self, _cfg: &DeviceConfig) -> Result<(), DevError> {
        self.running = false;
        self.frames.clear();
        Ok(())
    }

    fn start(&mut self, _hw_addr: &[u8; 6]) -> Result<(), DevError> {
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DevError> {
        self.running = false;
        self.posted = 0;
        self.tx_done = 0;
        self.frames.clear();
        Ok(())
    }

    fn rx_post(&mut self, _buf: DmaBuf) {
        self.posted += 1;
    }

    fn receive(&mut self, buf: RxBuf<'_>) -> Result<Option<usize>, DevError> {
        if self.posted == 0 {
            return Ok(None);
        }
        let Some(frame) = self.frames.pop_front() else {
            return Ok(None);
        };
        self.posted -= 1;
        if frame.len() > buf.data.len() {
            debug!("loopback: {} octet frame exceeds receive area", frame.len());
            return Err(DevError::Fault);
        }
        buf.data[..frame.len()].copy_from_slice(&frame);
        Ok(Some(frame.len()))
    }

    fn transmit(&mut self, frame: TxFrame<'_>) -> Result<(), DevError> {
        if !self.running {
            return Err(DevError::HardwareNotReady);
        }
        if self.frames.len() >= LOOPBACK_QUEUE_MAX {
            // The send itself completes; only the looped copy is lost.
            self.dropped += 1;
        } else {
            self.frames.push_back(frame.data().to_vec());
        }
        self.tx_done += 1;
        trace!("loopback: queued {} octets", frame.len());
        Ok(())
    }

    fn interrupt_service(&mut self, _kind: IsrKind) -> IsrEvents {
        IsrEvents {
            rx_ready: !self.frames.is_empty() && self.posted > 0,
            tx_completed: core::mem::take(&mut self.tx_done),
            ..IsrEvents::default()
        }
    }

    fn io_control(&mut self, req: IoCtl) -> Result<IoCtlReply, DevError> {
        match req {
            IoCtl::LinkStateGet => Ok(IoCtlReply::Link(if self.running {
                LinkState::new(LinkSpeed::Mbps1000, Duplex::Full)
            } else {
                LinkState::DOWN
            })),
            IoCtl::LinkStateUpdate(_) => Ok(IoCtlReply::None),
        }
    }

    fn hw_addr(&self) -> Option<[u8; 6]> {
        Some(LOOPBACK_HW_ADDR)
    }

    fn multicast_add(&mut self, addr: &[u8; 6]) -> Result<(), DevError> {
        if self.multicast.contains(addr) {
            return Ok(());
        }
        self.multicast.push(*addr).map_err(|_| DevError::Busy)
    }

    fn multicast_remove(&mut self, addr: &[u8; 6]) -> Result<(), DevError> {
        self.multicast.retain(|a| a != addr);
        Ok(())
    }
}
