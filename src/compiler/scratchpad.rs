//! Scratchpad booking.
//!
//! Kernels never allocate. At plan time they book named, aligned regions in
//! a `Registrar`; at execution time a `Grantor` resolves those names inside
//! one caller-owned byte buffer of `Registrar::size()` bytes.

use crate::compiler::conf::ConvConf;

/// Alignment of every booked region (one cache line).
pub const SCRATCHPAD_ALIGNMENT: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScratchpadKey {
    /// Output scales padded to whole channel blocks.
    ConvAdjustedScales,
}

/// A booked region: offset is relative to the aligned buffer start.
#[derive(Debug, Clone, Copy)]
struct Slot {
    key: ScratchpadKey,
    offset: usize,
    size: usize,
}

#[inline]
fn align_up(x: usize, align: usize) -> usize {
    (x + align - 1) & !(align - 1)
}

#[derive(Debug, Clone, Default)]
pub struct Registrar {
    slots: Vec<Slot>,
    end: usize,
    max_alignment: usize,
}

impl Registrar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Book `size` bytes under `key`. Re-booking a key is a planning bug.
    pub fn book(&mut self, key: ScratchpadKey, size: usize, alignment: usize) {
        assert!(alignment.is_power_of_two(), "alignment {alignment} is not a power of two");
        assert!(self.slots.iter().all(|s| s.key != key), "{key:?} booked twice");
        if size == 0 {
            return;
        }
        let offset = align_up(self.end, alignment);
        self.slots.push(Slot { key, offset, size });
        self.end = offset + size;
        self.max_alignment = self.max_alignment.max(alignment);
    }

    /// Bytes the caller must provide, including slack to align the base.
    pub fn size(&self) -> usize {
        if self.slots.is_empty() {
            0
        } else {
            self.end + self.max_alignment - 1
        }
    }

    pub fn is_booked(&self, key: ScratchpadKey) -> bool {
        self.slots.iter().any(|s| s.key == key)
    }

    /// Bind the booking to a buffer.
    pub fn grantor<'a>(&'a self, buf: &'a mut [u8]) -> Grantor<'a> {
        assert!(buf.len() >= self.size(), "scratchpad of {} bytes < {} booked", buf.len(), self.size());
        let base = if self.slots.is_empty() {
            0
        } else {
            let addr = buf.as_ptr() as usize;
            align_up(addr, self.max_alignment) - addr
        };
        Grantor { registrar: self, buf, base }
    }
}

/// Resolves booked keys inside a concrete buffer.
pub struct Grantor<'a> {
    registrar: &'a Registrar,
    buf: &'a mut [u8],
    base: usize,
}

impl<'a> Grantor<'a> {
    pub fn get(&mut self, key: ScratchpadKey) -> Option<&mut [u8]> {
        let slot = self.registrar.slots.iter().find(|s| s.key == key)?;
        let start = self.base + slot.offset;
        Some(&mut self.buf[start..start + slot.size])
    }

    /// Typed view of a region booked with at least `align_of::<T>()`.
    pub fn get_as<T: bytemuck::Pod>(&mut self, key: ScratchpadKey) -> Option<&mut [T]> {
        self.get(key).map(bytemuck::cast_slice_mut)
    }
}

/// Book everything a kernel with configuration `conf` needs.
pub fn init_scratchpad(registrar: &mut Registrar, conf: &ConvConf) {
    registrar.book(
        ScratchpadKey::ConvAdjustedScales,
        conf.adjusted_scales_len() * std::mem::size_of::<f32>(),
        SCRATCHPAD_ALIGNMENT,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_registrar() {
        let r = Registrar::new();
        assert_eq!(r.size(), 0);
        let mut buf: [u8; 0] = [];
        let mut g = r.grantor(&mut buf);
        assert!(g.get(ScratchpadKey::ConvAdjustedScales).is_none());
    }

    #[test]
    fn test_grant_is_aligned() {
        let mut r = Registrar::new();
        r.book(ScratchpadKey::ConvAdjustedScales, 17 * 4, SCRATCHPAD_ALIGNMENT);
        assert!(r.is_booked(ScratchpadKey::ConvAdjustedScales));
        // Misalign the buffer start on purpose.
        let mut storage = vec![0u8; r.size() + 3];
        let mut g = r.grantor(&mut storage[3..]);
        let scales = g.get_as::<f32>(ScratchpadKey::ConvAdjustedScales).unwrap();
        assert_eq!(scales.len(), 17);
        assert_eq!(scales.as_ptr() as usize % SCRATCHPAD_ALIGNMENT, 0);
    }

    #[test]
    #[should_panic(expected = "booked twice")]
    fn test_double_booking_panics() {
        let mut r = Registrar::new();
        r.book(ScratchpadKey::ConvAdjustedScales, 64, 64);
        r.book(ScratchpadKey::ConvAdjustedScales, 64, 64);
    }
}
