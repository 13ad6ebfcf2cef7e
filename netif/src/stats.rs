// Per-interface statistics

use crate::buf::PoolStats;

/// Interface counters.
///
/// Resource exhaustion is only ever visible here: dropped frames and refused
/// transmits are counted, never raised.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IfStats {
    /// Frames queued for the stack.
    pub rx_frames: u32,
    /// Frames discarded because no replacement buffer was available.
    pub rx_dropped: u32,
    /// Descriptors the device completed with an error.
    pub rx_errors: u32,
    /// FIFO overruns reported by the device.
    pub rx_overruns: u32,
    /// Times reception was disabled because the ready ring was full.
    pub rx_throttled: u32,
    /// "Frame ready" posts.
    pub rx_signals: u32,

    pub tx_frames: u32,
    /// Transmits refused for lack of a free descriptor.
    pub tx_busy: u32,
    pub tx_completed: u32,
    /// Completions or deallocation posts that matched nothing in flight.
    pub tx_dealloc_unknown: u32,

    pub link_changes: u32,
    /// Link-state updates the device failed to apply.
    pub link_relay_failures: u32,

    pub isr_count: u32,
    /// Interrupts taken while the interface was not running.
    pub isr_ignored: u32,

    pub rx_ring_high_water: usize,
    pub tx_ring_high_water: usize,

    pub pool: PoolStats,
}

impl IfStats {
    /// Frames lost on the receive side for any reason.
    pub fn rx_lost(&self) -> u32 {
        self.rx_dropped
            .saturating_add(self.rx_errors)
            .saturating_add(self.rx_overruns)
    }
}
