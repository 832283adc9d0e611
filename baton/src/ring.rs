//! Slot storage shared by the write and read sides of a ring buffer.
//!
//! [`Slots`] is a cell view over caller-supplied storage. It owns no memory:
//! it reinterprets an exclusive borrow of `[T]` as a shared slice of cells so
//! that a writer and a reader can touch *different* slots through `&self` at
//! the same time.
//!
//! # Safety
//!
//! The slot accessors are unsafe because the caller must uphold the
//! occupancy protocol:
//! - a slot is written only while it is free, by the single holder of the
//!   write-side lock
//! - a slot is read only while it is occupied, by the single holder of the
//!   read-side lock
//! - occupancy changes are published through an atomic counter with
//!   Release/Acquire ordering, after the slot access they describe

use std::cell::UnsafeCell;

/// A single storage slot with interior mutability.
///
/// `repr(transparent)` over `UnsafeCell<T>`, which in turn has the same
/// in-memory representation as `T`. This is what makes the slice cast in
/// [`Slots::new`] valid.
#[repr(transparent)]
pub(crate) struct SlotCell<T>(UnsafeCell<T>);

// SAFETY: SlotCell is Sync because the occupancy protocol guarantees that a
// slot is either being written (by the write side) or read (by the read
// side), never both. The occupancy counter provides the happens-before edge
// between the write of a slot and its later read.
unsafe impl<T: Send> Sync for SlotCell<T> {}

/// Fixed-length run of slots borrowed from the caller for `'a`.
pub(crate) struct Slots<'a, T> {
    cells: &'a [SlotCell<T>],
}

impl<'a, T: Copy> Slots<'a, T> {
    /// Takes logical control of `storage` for `'a`.
    pub(crate) fn new(storage: &'a mut [T]) -> Self {
        let ptr = storage as *mut [T] as *const [SlotCell<T>];

        // SAFETY:
        // - SlotCell<T> has the same layout as T, so the slice metadata
        //   (length) carries over unchanged
        // - the exclusive borrow is consumed here, so nothing else can
        //   observe the storage while the cells are alive
        let cells = unsafe { &*ptr };
        Self { cells }
    }

    /// Number of slots, i.e. the ring capacity.
    #[inline]
    pub(crate) const fn len(&self) -> usize {
        self.cells.len()
    }

    /// Advances a cursor to the next slot, wrapping to 0 at capacity.
    ///
    /// Equivalent to `(cursor + 1) % len` without the division.
    #[inline]
    pub(crate) const fn bump_cursor(&self, cursor: usize) -> usize {
        let next = cursor + 1;
        if next == self.len() { 0 } else { next }
    }

    /// Stores `value` in slot `index`.
    ///
    /// # Safety
    ///
    /// Caller must hold the write side and know slot `index` is free.
    #[inline]
    pub(crate) unsafe fn write(&self, index: usize, value: T) {
        // SAFETY: Caller guarantees exclusive access to this free slot.
        unsafe { self.cells[index].0.get().write(value) }
    }

    /// Copies the value out of slot `index`.
    ///
    /// The slot keeps its bits; `T: Copy` means there is nothing to drop or
    /// move out.
    ///
    /// # Safety
    ///
    /// Caller must hold the read side and know slot `index` is occupied.
    #[inline]
    pub(crate) unsafe fn read(&self, index: usize) -> T {
        // SAFETY: Caller guarantees the slot is occupied and no writer is
        // touching it.
        unsafe { self.cells[index].0.get().read() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bump_cursor_wraps() {
        let mut storage = [0u8; 3];
        let slots = Slots::new(&mut storage);

        assert_eq!(slots.bump_cursor(0), 1);
        assert_eq!(slots.bump_cursor(1), 2);
        assert_eq!(slots.bump_cursor(2), 0);
    }

    #[test]
    fn test_single_slot_always_wraps_to_zero() {
        let mut storage = [0u8; 1];
        let slots = Slots::new(&mut storage);

        assert_eq!(slots.len(), 1);
        assert_eq!(slots.bump_cursor(0), 0);
    }

    #[test]
    fn test_write_then_read() {
        let mut storage = [0u32; 4];
        let slots = Slots::new(&mut storage);

        unsafe {
            slots.write(0, 10);
            slots.write(3, 40);
            assert_eq!(slots.read(0), 10);
            assert_eq!(slots.read(3), 40);
            // Reads copy, so a slot can be read again until overwritten.
            assert_eq!(slots.read(0), 10);
        }
    }

    #[test]
    fn test_writes_land_in_caller_storage() {
        let mut storage = [0u64; 2];
        {
            let slots = Slots::new(&mut storage);
            unsafe {
                slots.write(1, 7);
            }
        }
        assert_eq!(storage, [0, 7]);
    }
}
