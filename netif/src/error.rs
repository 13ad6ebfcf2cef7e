// Error types for network interface operations

use thiserror::Error;

use crate::buf::BufferLease;

/// Task-context result of an interface operation.
///
/// Interrupt context never produces one of these: it counts and throttles
/// instead (see `iface::rx`).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NetError {
    #[error("Interface not initialized")]
    NotInitialized,

    #[error("Interface not running")]
    NotRunning,

    #[error("Invalid lifecycle state for operation")]
    InvalidState,

    #[error("Buffer pool exhausted")]
    Exhausted,

    #[error("No free transmit descriptor")]
    Busy,

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Device error: {0}")]
    Device(#[from] DevError),

    #[error("Management bus error: {0}")]
    Mgmt(#[from] MgmtError),

    #[error("Invalid interface number: {0}")]
    InvalidInterface(u8),

    #[error("Invalid hardware address")]
    InvalidAddress,

    #[error("Buffer belongs to another pool")]
    ForeignBuffer,

    #[error("Invalid length: {len} (max {max})")]
    InvalidLength { len: usize, max: usize },

    #[error("Invalid MTU: {0}")]
    InvalidMtu(usize),

    #[error("Table full")]
    TableFull,

    #[error("Callback not subscribed")]
    NotSubscribed,
}

/// Configuration errors, detected at `Init` and fatal to bring-up.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{purpose} buffer alignment {align} is not a non-zero power of two")]
    InvalidAlignment { purpose: &'static str, align: usize },

    #[error("No large receive buffers configured")]
    NoRxBuffers,

    #[error("No transmit buffers configured")]
    NoTxBuffers,

    #[error("{class} buffer size {size} below minimum {min}")]
    BufferTooSmall {
        class: &'static str,
        size: usize,
        min: usize,
    },

    #[error("Large transmit buffers ({large}) smaller than small ones ({small})")]
    TxLargeSmallerThanSmall { large: usize, small: usize },

    #[error("{purpose} index offset {offset} does not fit buffer of {size} octets")]
    InvalidOffset {
        purpose: &'static str,
        offset: usize,
        size: usize,
    },

    #[error("Invalid {purpose} descriptor count {count}")]
    InvalidDescriptorCount { purpose: &'static str, count: usize },

    #[error("Receive buffers ({bufs}) must outnumber receive descriptors ({descs})")]
    RxDescriptorsExceedBuffers { bufs: usize, descs: usize },

    #[error("Receive queue capacity {0} below 2")]
    RxQueueTooSmall(usize),

    #[error("Buffer pool allocation failed")]
    AllocFailed,
}

/// Errors reported by a hardware back end through the capability table.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DevError {
    #[error("No free hardware slot")]
    Busy,

    #[error("Operation not supported by device")]
    NotSupported,

    #[error("Hardware not ready")]
    HardwareNotReady,

    #[error("Device fault")]
    Fault,
}

/// Management-bus (MDIO) outcomes other than success.
///
/// A timeout is expected traffic; the PHY layer decides whether to retry.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MgmtError {
    #[error("Management bus timeout")]
    Timeout,

    #[error("Management bus not supported")]
    NotSupported,

    #[error("Invalid PHY address or register")]
    InvalidRegister,
}

/// A transmit the interface could not accept.
///
/// The lease travels back to the caller so that a refusal never drops
/// or duplicates a buffer.
#[derive(Debug, Error)]
#[error("Transmit refused: {reason}")]
pub struct TxRefused {
    pub reason: NetError,
    pub lease: BufferLease,
}

impl TxRefused {
    pub(crate) fn new(reason: NetError, lease: BufferLease) -> Self {
        Self { reason, lease }
    }

    /// Take the buffer back, discarding the reason.
    pub fn into_lease(self) -> BufferLease {
        self.lease
    }
}
