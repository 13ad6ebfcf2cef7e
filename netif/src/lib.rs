#![cfg_attr(not(test), no_std)]

// Network interface layer
// Buffer pools, descriptor rings and the interrupt/task handshake that move
// frames between network devices and a protocol stack.

extern crate alloc;

pub mod buf;
pub mod config;
pub mod drivers;
pub mod error;
pub mod iface;
pub mod link;
pub mod registry;
pub mod ring;
pub mod signal;
#[cfg(feature = "smoltcp")]
pub mod stack;
pub mod stats;

// Re-export commonly used types
pub use buf::{BufClass, BufPurpose, BufferLease, BufferPool, PoolStats};
pub use config::{parse_hw_addr, DeviceConfig};
pub use drivers::{Bsp, Driver, IoCtl, IoCtlReply, IsrEvents, IsrKind, NoBsp};
pub use error::{ConfigError, DevError, MgmtError, NetError, TxRefused};
pub use iface::{IfState, Interface};
pub use link::{Duplex, LinkSpeed, LinkState, LinkStatus, MgmtBus, Phy};
pub use registry::{IfNbr, Registry};
pub use ring::{DescriptorRing, RingEntry, RingError};
pub use signal::CountingSignal;
#[cfg(feature = "smoltcp")]
pub use stack::{stack_interface, IfDevice};
pub use stats::IfStats;
