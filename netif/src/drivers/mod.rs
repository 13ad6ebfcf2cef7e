// Driver capability table and bundled back ends

pub mod interrupts;
pub mod loopback;
pub mod sim;

use crate::buf::BufferLease;
use crate::config::DeviceConfig;
use crate::error::{DevError, MgmtError};
use crate::link::LinkState;

/// Most address-carrying completions a back end reports per service pass.
pub const MAX_TX_RETIRED: usize = 16;

/// Interrupt source, as identified by the board-support vector stub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsrKind {
    Rx,
    RxOverrun,
    TxComplete,
    TxReady,
    Phy,
    /// Shared vector or polled service: the back end reads its own status.
    Unknown,
}

/// A buffer area handed to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaBuf {
    /// Bus address of the area start, headroom included.
    pub addr: u64,
    /// Area length, headroom included.
    pub len: usize,
}

impl DmaBuf {
    pub fn of(lease: &BufferLease) -> Self {
        Self {
            addr: lease.dma_addr(),
            len: lease.area().len(),
        }
    }
}

/// Destination of the oldest posted receive descriptor.
#[derive(Debug)]
pub struct RxBuf<'a> {
    /// Address the descriptor was posted with.
    pub addr: u64,
    /// Data region after the index offset.
    pub data: &'a mut [u8],
}

/// A frame handed to the device for transmission.
#[derive(Debug, Clone, Copy)]
pub struct TxFrame<'a> {
    pub addr: u64,
    pub ix_offset: usize,
    /// Headroom followed by the frame.
    pub area: &'a [u8],
}

impl<'a> TxFrame<'a> {
    pub fn of(lease: &'a BufferLease) -> Self {
        let off = lease.ix_offset();
        Self {
            addr: lease.dma_addr(),
            ix_offset: off,
            area: &lease.area()[..off + lease.len()],
        }
    }

    /// The frame itself.
    pub fn data(&self) -> &'a [u8] {
        let area: &'a [u8] = self.area;
        &area[self.ix_offset..]
    }

    pub fn len(&self) -> usize {
        self.area.len() - self.ix_offset
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What one interrupt-service pass found.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IsrEvents {
    /// At least one receive descriptor was completed.
    pub rx_ready: bool,
    pub rx_overrun: bool,
    /// Transmit descriptors completed, oldest first.
    pub tx_completed: usize,
    /// Completed transmit areas, for devices that report by address.
    pub tx_retired: heapless::Vec<u64, MAX_TX_RETIRED>,
    pub link_changed: bool,
}

/// Out-of-band control requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoCtl {
    /// Report the link state as the MAC sees it.
    LinkStateGet,
    /// Reprogram speed and duplex dependent settings.
    LinkStateUpdate(LinkState),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoCtlReply {
    None,
    Link(LinkState),
}

/// Driver capability table.
///
/// Every hardware back end implements this trait; the interface layer only
/// ever calls through it. Calls arrive with the interface critical section
/// held, so implementations must not block.
///
/// Receive descriptors are posted with [`Driver::rx_post`] and retired in
/// posting order by [`Driver::receive`]. Transmit descriptors complete in
/// issue order.
pub trait Driver: Send {
    /// Bring the device to a quiescent, configured state.
    fn init(&mut self, cfg: &DeviceConfig) -> Result<(), DevError>;

    /// Program the address filter, unmask interrupts and enable the
    /// receiver and transmitter.
    ///
    /// # Arguments
    /// * `hw_addr` - The unicast address to accept
    fn start(&mut self, hw_addr: &[u8; 6]) -> Result<(), DevError>;

    /// Mask interrupts and disable the receiver and transmitter.
    ///
    /// Must be safe after a failed or partial `start`. Posted descriptors
    /// are forgotten; the interface reclaims their buffers itself.
    fn stop(&mut self) -> Result<(), DevError>;

    /// Hand one empty area to the receive engine.
    fn rx_post(&mut self, buf: DmaBuf);

    /// Retire the oldest completed receive descriptor.
    ///
    /// # Returns
    /// * `Ok(Some(len))` - A frame of `len` octets is in `buf.data`
    /// * `Ok(None)` - No descriptor has completed
    /// * `Err(DevError)` - The descriptor completed with an error and is retired
    fn receive(&mut self, buf: RxBuf<'_>) -> Result<Option<usize>, DevError>;

    /// Queue one frame on a free transmit descriptor.
    ///
    /// # Returns
    /// * `Ok(())` - The engine owns the area until completion
    /// * `Err(DevError::Busy)` - No free hardware slot
    fn transmit(&mut self, frame: TxFrame<'_>) -> Result<(), DevError>;

    /// Acknowledge pending interrupt sources and report what they meant.
    fn interrupt_service(&mut self, kind: IsrKind) -> IsrEvents;

    /// Mask or unmask receive interrupts. Used for backpressure.
    fn set_rx_interrupts(&mut self, _enable: bool) {}

    fn io_control(&mut self, req: IoCtl) -> Result<IoCtlReply, DevError>;

    /// Address stored in the device, if any.
    fn hw_addr(&self) -> Option<[u8; 6]> {
        None
    }

    fn mgmt_read(&mut self, _phy_addr: u8, _reg: u8) -> Result<u16, MgmtError> {
        Err(MgmtError::NotSupported)
    }

    fn mgmt_write(&mut self, _phy_addr: u8, _reg: u8, _value: u16) -> Result<(), MgmtError> {
        Err(MgmtError::NotSupported)
    }

    fn multicast_add(&mut self, _addr: &[u8; 6]) -> Result<(), DevError> {
        Ok(())
    }

    fn multicast_remove(&mut self, _addr: &[u8; 6]) -> Result<(), DevError> {
        Ok(())
    }
}

/// Board-support operations called once during `Init`.
pub trait Bsp: Send {
    fn cfg_clk(&mut self) -> Result<(), DevError> {
        Ok(())
    }

    fn cfg_gpio(&mut self) -> Result<(), DevError> {
        Ok(())
    }

    fn cfg_int(&mut self) -> Result<(), DevError> {
        Ok(())
    }
}

/// Board support for devices that need none.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoBsp;

impl Bsp for NoBsp {}
