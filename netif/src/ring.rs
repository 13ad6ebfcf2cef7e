//! Fixed-capacity descriptor ring.
//!
//! An arena of `N` slots addressed by index with one read cursor, one write
//! cursor and a live count. At most `N - 1` entries are live: the spare slot
//! keeps "empty" and "full" distinct. All cursor arithmetic lives here; the
//! coordinators only ever call the commit operations.
//!
//! The ring itself is not synchronized. Rings touched from interrupt context
//! sit behind the interface critical section.

use alloc::boxed::Box;
use alloc::vec::Vec;

use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RingError {
    #[error("Ring full")]
    Full,

    #[error("Ring empty")]
    Empty,

    #[error("Write slot committed before being filled")]
    SlotNotFilled,

    #[error("Ring capacity {0} below 2")]
    InvalidCapacity(usize),
}

/// A buffer reference and the number of octets it carries.
#[derive(Debug)]
pub struct RingEntry<T> {
    pub item: T,
    pub len: usize,
}

impl<T> RingEntry<T> {
    pub fn new(item: T, len: usize) -> Self {
        Self { item, len }
    }
}

/// One arena slot.
#[derive(Debug)]
pub struct Slot<T> {
    entry: Option<RingEntry<T>>,
}

impl<T> Slot<T> {
    /// Place an entry in the slot, returning any uncommitted predecessor.
    pub fn fill(&mut self, item: T, len: usize) -> Option<RingEntry<T>> {
        self.entry.replace(RingEntry::new(item, len))
    }

    pub fn entry(&self) -> Option<&RingEntry<T>> {
        self.entry.as_ref()
    }

    pub fn entry_mut(&mut self) -> Option<&mut RingEntry<T>> {
        self.entry.as_mut()
    }

    pub fn is_filled(&self) -> bool {
        self.entry.is_some()
    }
}

/// Circular queue of in-flight buffer references.
#[derive(Debug)]
pub struct DescriptorRing<T> {
    slots: Box<[Slot<T>]>,
    wr: usize,
    rd: usize,
    count: usize,
    high_water: usize,
}

impl<T> DescriptorRing<T> {
    /// Create a ring of `capacity` slots, `capacity - 1` of them usable.
    pub fn new(capacity: usize) -> Result<Self, RingError> {
        if capacity < 2 {
            return Err(RingError::InvalidCapacity(capacity));
        }
        let slots: Vec<Slot<T>> = (0..capacity).map(|_| Slot { entry: None }).collect();
        Ok(Self {
            slots: slots.into_boxed_slice(),
            wr: 0,
            rd: 0,
            count: 0,
            high_water: 0,
        })
    }

    /// Slot count, including the reserved one.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Entries the ring can hold at once.
    pub fn usable(&self) -> usize {
        self.slots.len() - 1
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_full(&self) -> bool {
        self.count == self.usable()
    }

    /// Most entries ever live at once.
    pub fn high_water(&self) -> usize {
        self.high_water
    }

    fn next(&self, ix: usize) -> usize {
        if ix + 1 == self.slots.len() {
            0
        } else {
            ix + 1
        }
    }

    /// The slot under the write cursor.
    pub fn write_slot(&mut self) -> Result<&mut Slot<T>, RingError> {
        if self.is_full() {
            return Err(RingError::Full);
        }
        Ok(&mut self.slots[self.wr])
    }

    /// Publish the filled write slot and advance the write cursor.
    pub fn commit_write(&mut self) -> Result<(), RingError> {
        if self.is_full() {
            return Err(RingError::Full);
        }
        if !self.slots[self.wr].is_filled() {
            return Err(RingError::SlotNotFilled);
        }
        self.wr = self.next(self.wr);
        self.count += 1;
        if self.count > self.high_water {
            self.high_water = self.count;
        }
        Ok(())
    }

    /// The oldest published slot.
    pub fn read_slot(&self) -> Result<&Slot<T>, RingError> {
        if self.is_empty() {
            return Err(RingError::Empty);
        }
        Ok(&self.slots[self.rd])
    }

    pub fn read_slot_mut(&mut self) -> Result<&mut Slot<T>, RingError> {
        if self.is_empty() {
            return Err(RingError::Empty);
        }
        Ok(&mut self.slots[self.rd])
    }

    /// Take the oldest entry out and advance the read cursor.
    pub fn commit_read(&mut self) -> Result<RingEntry<T>, RingError> {
        if self.is_empty() {
            return Err(RingError::Empty);
        }
        let entry = self.slots[self.rd]
            .entry
            .take()
            .ok_or(RingError::SlotNotFilled)?;
        self.rd = self.next(self.rd);
        self.count -= 1;
        Ok(entry)
    }

    /// Fill and commit in one step. A full ring hands the entry back.
    pub fn push(&mut self, item: T, len: usize) -> Result<(), RingEntry<T>> {
        let slot = match self.write_slot() {
            Ok(slot) => slot,
            Err(_) => return Err(RingEntry::new(item, len)),
        };
        // Vacant whenever the ring is consistent.
        let _ = slot.fill(item, len);
        let _ = self.commit_write();
        Ok(())
    }

    pub fn pop(&mut self) -> Option<RingEntry<T>> {
        self.commit_read().ok()
    }

    pub fn peek(&self) -> Option<&RingEntry<T>> {
        self.read_slot().ok().and_then(Slot::entry)
    }

    pub fn peek_mut(&mut self) -> Option<&mut RingEntry<T>> {
        self.read_slot_mut().ok().and_then(Slot::entry_mut)
    }

    /// Live entries, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &RingEntry<T>> + '_ {
        let cap = self.slots.len();
        (0..self.count).filter_map(move |i| self.slots[(self.rd + i) % cap].entry())
    }

    /// Distance from the read cursor of the first entry matching `pred`.
    pub fn position<P>(&self, mut pred: P) -> Option<usize>
    where
        P: FnMut(&RingEntry<T>) -> bool,
    {
        self.iter().position(|e| pred(e))
    }

    /// Remove every live entry, oldest first.
    pub fn drain(&mut self) -> Drain<'_, T> {
        Drain { ring: self }
    }

    /// Drop every entry, including an uncommitted write, and zero the
    /// cursors. The high-water mark is kept.
    pub fn reset(&mut self) {
        for slot in self.slots.iter_mut() {
            slot.entry = None;
        }
        self.wr = 0;
        self.rd = 0;
        self.count = 0;
    }
}

/// Iterator returned by [`DescriptorRing::drain`].
pub struct Drain<'a, T> {
    ring: &'a mut DescriptorRing<T>,
}

impl<T> Iterator for Drain<'_, T> {
    type Item = RingEntry<T>;

    fn next(&mut self) -> Option<Self::Item> {
        self.ring.pop()
    }
}
