//! Buffer pool and exclusive buffer leases.
//!
//! Each interface owns one pool with three partitions: large receive, large
//! transmit and small transmit data areas. A partition is a single aligned
//! allocation carved into fixed-stride areas; a free list of area indices is
//! the only state shared with interrupt context and is touched inside a
//! critical section.
//!
//! A [`BufferLease`] is the sole handle to one area. It is moved, never
//! copied, between hardware rings, interrupt handlers and the protocol stack,
//! and it returns its area to the free list when dropped. Releasing an area
//! twice is therefore not expressible.

use alloc::alloc::{alloc_zeroed, dealloc, Layout};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::cell::RefCell;
use core::fmt;
use core::ptr::NonNull;

use critical_section::Mutex;

use crate::error::{ConfigError, NetError};

/// Buffer size class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufClass {
    Small,
    Large,
}

/// Direction a buffer is acquired for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufPurpose {
    Rx,
    Tx,
}

/// Layout of one pool partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassConfig {
    pub class: BufClass,
    pub purpose: BufPurpose,
    /// Usable data octets after the index offset.
    pub size: usize,
    pub count: usize,
    pub align: usize,
    /// Octets reserved at the start of every area for a device header.
    pub ix_offset: usize,
}

/// Layout of a whole pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub rx_large: ClassConfig,
    pub tx_large: ClassConfig,
    pub tx_small: ClassConfig,
}

/// Counters for one partition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassStats {
    pub capacity: usize,
    pub available: usize,
    pub high_water: usize,
    pub exhausted: u32,
}

/// Snapshot of all partitions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub rx_large: ClassStats,
    pub tx_large: ClassStats,
    pub tx_small: ClassStats,
}

impl PoolStats {
    /// Leases currently held outside the pool.
    pub fn outstanding(&self) -> usize {
        [self.rx_large, self.tx_large, self.tx_small]
            .iter()
            .map(|c| c.capacity - c.available)
            .sum()
    }
}

const PART_RX_LARGE: usize = 0;
const PART_TX_LARGE: usize = 1;
const PART_TX_SMALL: usize = 2;

fn part_index(class: BufClass, purpose: BufPurpose) -> Option<usize> {
    match (class, purpose) {
        (BufClass::Large, BufPurpose::Rx) => Some(PART_RX_LARGE),
        (BufClass::Large, BufPurpose::Tx) => Some(PART_TX_LARGE),
        (BufClass::Small, BufPurpose::Tx) => Some(PART_TX_SMALL),
        (BufClass::Small, BufPurpose::Rx) => None,
    }
}

struct FreeList {
    free: Vec<u32>,
    high_water: usize,
    exhausted: u32,
}

struct Partition {
    cfg: ClassConfig,
    base: NonNull<u8>,
    stride: usize,
    layout: Option<Layout>,
    free: Mutex<RefCell<FreeList>>,
}

// The region is only reached through leases, and a given index is held by
// at most one lease at a time.
unsafe impl Send for Partition {}
unsafe impl Sync for Partition {}

impl Partition {
    fn new(cfg: ClassConfig) -> Result<Self, ConfigError> {
        if cfg.align == 0 || !cfg.align.is_power_of_two() {
            let purpose = match cfg.purpose {
                BufPurpose::Rx => "receive",
                BufPurpose::Tx => "transmit",
            };
            return Err(ConfigError::InvalidAlignment {
                purpose,
                align: cfg.align,
            });
        }
        if cfg.count > u32::MAX as usize {
            return Err(ConfigError::AllocFailed);
        }

        let area = cfg
            .ix_offset
            .checked_add(cfg.size)
            .ok_or(ConfigError::AllocFailed)?;
        let stride = area
            .checked_add(cfg.align - 1)
            .ok_or(ConfigError::AllocFailed)?
            & !(cfg.align - 1);

        let (base, layout) = if cfg.count == 0 || stride == 0 {
            (NonNull::dangling(), None)
        } else {
            let total = stride
                .checked_mul(cfg.count)
                .ok_or(ConfigError::AllocFailed)?;
            let layout =
                Layout::from_size_align(total, cfg.align).map_err(|_| ConfigError::AllocFailed)?;
            // SAFETY: layout has a non-zero size.
            let ptr = unsafe { alloc_zeroed(layout) };
            (NonNull::new(ptr).ok_or(ConfigError::AllocFailed)?, Some(layout))
        };

        // Reversed so that areas are handed out in address order.
        let free = (0..cfg.count as u32).rev().collect();

        Ok(Self {
            cfg,
            base,
            stride,
            layout,
            free: Mutex::new(RefCell::new(FreeList {
                free,
                high_water: 0,
                exhausted: 0,
            })),
        })
    }

    fn take(&self) -> Option<u32> {
        critical_section::with(|cs| {
            let mut list = self.free.borrow(cs).borrow_mut();
            match list.free.pop() {
                Some(index) => {
                    let outstanding = self.cfg.count - list.free.len();
                    if outstanding > list.high_water {
                        list.high_water = outstanding;
                    }
                    Some(index)
                }
                None => {
                    list.exhausted = list.exhausted.wrapping_add(1);
                    None
                }
            }
        })
    }

    fn put(&self, index: u32) {
        critical_section::with(|cs| {
            let mut list = self.free.borrow(cs).borrow_mut();
            debug_assert!(!list.free.contains(&index), "buffer area released twice");
            list.free.push(index);
        })
    }

    fn stats(&self) -> ClassStats {
        critical_section::with(|cs| {
            let list = self.free.borrow(cs).borrow();
            ClassStats {
                capacity: self.cfg.count,
                available: list.free.len(),
                high_water: list.high_water,
                exhausted: list.exhausted,
            }
        })
    }

    fn area_len(&self) -> usize {
        self.cfg.ix_offset + self.cfg.size
    }

    fn area_ptr(&self, index: u32) -> *mut u8 {
        // SAFETY: index < count, so the offset stays inside the allocation.
        unsafe { self.base.as_ptr().add(index as usize * self.stride) }
    }
}

impl Drop for Partition {
    fn drop(&mut self) {
        if let Some(layout) = self.layout {
            // SAFETY: allocated in `new` with this exact layout.
            unsafe { dealloc(self.base.as_ptr(), layout) };
        }
    }
}

struct PoolShared {
    parts: [Partition; 3],
}

/// Fixed-size buffer data areas for one interface.
///
/// Cloning is cheap and yields another handle to the same areas.
#[derive(Clone)]
pub struct BufferPool {
    shared: Arc<PoolShared>,
}

impl BufferPool {
    /// Allocate every partition up front.
    pub fn new(cfg: &PoolConfig) -> Result<Self, ConfigError> {
        let parts = [
            Partition::new(cfg.rx_large)?,
            Partition::new(cfg.tx_large)?,
            Partition::new(cfg.tx_small)?,
        ];
        Ok(Self {
            shared: Arc::new(PoolShared { parts }),
        })
    }

    /// Take an area of the given class. Never blocks.
    ///
    /// `Exhausted` is a backpressure signal: the caller drops the frame or
    /// refuses the transmit, it is not a failure of the interface.
    pub fn acquire(&self, class: BufClass, purpose: BufPurpose) -> Result<BufferLease, NetError> {
        let part = part_index(class, purpose).ok_or(NetError::Exhausted)?;
        let index = self.shared.parts[part].take().ok_or(NetError::Exhausted)?;
        Ok(BufferLease {
            pool: Arc::clone(&self.shared),
            part: part as u8,
            index,
            len: 0,
        })
    }

    /// Take the smallest area that holds `len` data octets.
    ///
    /// Falls back to the large class when the small one is exhausted.
    pub fn acquire_for(&self, len: usize, purpose: BufPurpose) -> Result<BufferLease, NetError> {
        let max = self.max_len(purpose);
        if len > max {
            return Err(NetError::InvalidLength { len, max });
        }
        let small = &self.shared.parts[PART_TX_SMALL].cfg;
        let fits_small = purpose == BufPurpose::Tx && small.count > 0 && len <= small.size;
        let mut lease = if fits_small {
            self.acquire(BufClass::Small, purpose)
                .or_else(|_| self.acquire(BufClass::Large, purpose))?
        } else {
            self.acquire(BufClass::Large, purpose)?
        };
        lease.len = len;
        Ok(lease)
    }

    /// Return an area to the pool. Equivalent to dropping the lease.
    pub fn release(&self, lease: BufferLease) {
        drop(lease);
    }

    /// Largest data length any partition of this purpose can hold.
    pub fn max_len(&self, purpose: BufPurpose) -> usize {
        self.shared
            .parts
            .iter()
            .filter(|p| p.cfg.purpose == purpose && p.cfg.count > 0)
            .map(|p| p.cfg.size)
            .max()
            .unwrap_or(0)
    }

    pub fn capacity(&self, class: BufClass, purpose: BufPurpose) -> usize {
        part_index(class, purpose)
            .map(|p| self.shared.parts[p].cfg.count)
            .unwrap_or(0)
    }

    pub fn available(&self, class: BufClass, purpose: BufPurpose) -> usize {
        part_index(class, purpose)
            .map(|p| self.shared.parts[p].stats().available)
            .unwrap_or(0)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            rx_large: self.shared.parts[PART_RX_LARGE].stats(),
            tx_large: self.shared.parts[PART_TX_LARGE].stats(),
            tx_small: self.shared.parts[PART_TX_SMALL].stats(),
        }
    }

    /// Leases currently held outside the pool.
    pub fn outstanding(&self) -> usize {
        self.stats().outstanding()
    }

    /// Whether `lease` was handed out by this pool.
    pub fn owns(&self, lease: &BufferLease) -> bool {
        Arc::ptr_eq(&self.shared, &lease.pool)
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("stats", &self.stats())
            .finish()
    }
}

/// Exclusive handle to one buffer data area.
///
/// Layout of an area: `ix_offset` octets of device headroom followed by
/// `capacity()` data octets. The DMA address is the start of the area.
pub struct BufferLease {
    pool: Arc<PoolShared>,
    part: u8,
    index: u32,
    len: usize,
}

impl BufferLease {
    fn partition(&self) -> &Partition {
        &self.pool.parts[self.part as usize]
    }

    pub fn class(&self) -> BufClass {
        self.partition().cfg.class
    }

    pub fn purpose(&self) -> BufPurpose {
        self.partition().cfg.purpose
    }

    /// Data octets available after the index offset.
    pub fn capacity(&self) -> usize {
        self.partition().cfg.size
    }

    pub fn ix_offset(&self) -> usize {
        self.partition().cfg.ix_offset
    }

    pub fn align(&self) -> usize {
        self.partition().cfg.align
    }

    /// Occupied data length.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn set_len(&mut self, len: usize) -> Result<(), NetError> {
        let max = self.capacity();
        if len > max {
            return Err(NetError::InvalidLength { len, max });
        }
        self.len = len;
        Ok(())
    }

    /// Occupied data.
    pub fn as_slice(&self) -> &[u8] {
        let off = self.ix_offset();
        &self.area()[off..off + self.len]
    }

    /// Whole data region, regardless of the occupied length.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        let off = self.ix_offset();
        &mut self.area_mut()[off..]
    }

    /// Device headroom ahead of the data.
    pub fn headroom_mut(&mut self) -> &mut [u8] {
        let off = self.ix_offset();
        &mut self.area_mut()[..off]
    }

    /// Headroom and data, as the device sees it.
    pub fn area(&self) -> &[u8] {
        let part = self.partition();
        // SAFETY: this lease is the only holder of `index`, and the area
        // lies inside the partition allocation.
        unsafe { core::slice::from_raw_parts(part.area_ptr(self.index), part.area_len()) }
    }

    pub fn area_mut(&mut self) -> &mut [u8] {
        let part = self.partition();
        // SAFETY: as in `area`, and `&mut self` makes the borrow unique.
        unsafe { core::slice::from_raw_parts_mut(part.area_ptr(self.index), part.area_len()) }
    }

    /// Bus address of the area start.
    ///
    /// Identity mapping is assumed between virtual and bus addresses.
    pub fn dma_addr(&self) -> u64 {
        self.partition().area_ptr(self.index) as usize as u64
    }
}

impl Drop for BufferLease {
    fn drop(&mut self) {
        self.pool.parts[self.part as usize].put(self.index);
    }
}

impl fmt::Debug for BufferLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferLease")
            .field("class", &self.class())
            .field("purpose", &self.purpose())
            .field("index", &self.index)
            .field("len", &self.len)
            .field("capacity", &self.capacity())
            .finish()
    }
}
