//! Bounds-checked views over a runtime's linear memory.
//!
//! A [`MemoryView`] borrows the memory bytes for as long as it lives. It is
//! obtained from [`crate::Runtime::memory`] or, inside a host callback, from
//! [`crate::CallFrame::memory`]. Because the borrow ties up the runtime (or
//! the dispatch frame), the view cannot outlive the next call into the engine,
//! which is the only point where memory may grow or move.
//!
//! Every access takes a guest offset and validates `offset + len` against the
//! length captured when the view was acquired. Guest offsets are never turned
//! into host pointers without that check.

use std::ops::Range;

use wasm_bridge_common::RuntimeError;

/// A borrowed window over linear memory.
#[derive(Debug)]
pub struct MemoryView<'a> {
    data: &'a mut [u8],
}

impl<'a> MemoryView<'a> {
    pub(crate) fn new(data: &'a mut [u8]) -> Self {
        Self { data }
    }

    /// Memory length in bytes at acquisition time.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the memory has zero pages.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The whole memory as a byte slice.
    pub fn as_slice(&self) -> &[u8] {
        self.data
    }

    /// Translate a guest `offset` and `len` into a checked range.
    fn range(&self, offset: usize, len: usize) -> Result<Range<usize>, RuntimeError> {
        let out_of_bounds = || RuntimeError::MemoryOutOfBounds {
            offset,
            len,
            memory_len: self.data.len(),
        };
        let end = offset.checked_add(len).ok_or_else(out_of_bounds)?;
        if end > self.data.len() {
            return Err(out_of_bounds());
        }
        Ok(offset..end)
    }

    /// Borrow `len` bytes starting at `offset`.
    pub fn read(&self, offset: usize, len: usize) -> Result<&[u8], RuntimeError> {
        let range = self.range(offset, len)?;
        Ok(&self.data[range])
    }

    /// Mutably borrow `len` bytes starting at `offset`.
    pub fn read_mut(&mut self, offset: usize, len: usize) -> Result<&mut [u8], RuntimeError> {
        let range = self.range(offset, len)?;
        Ok(&mut self.data[range])
    }

    /// Copy `bytes` into memory at `offset`.
    pub fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<(), RuntimeError> {
        self.read_mut(offset, bytes.len())?.copy_from_slice(bytes);
        Ok(())
    }

    /// Decode `len` bytes at `offset` as UTF-8.
    pub fn read_str(&self, offset: usize, len: usize) -> Result<&str, RuntimeError> {
        let bytes = self.read(offset, len)?;
        std::str::from_utf8(bytes).map_err(|e| {
            RuntimeError::type_mismatch(format!("invalid UTF-8 at offset {offset}: {e}"))
        })
    }

    /// Decode a NUL-terminated UTF-8 string starting at `offset`.
    pub fn read_cstr(&self, offset: usize) -> Result<&str, RuntimeError> {
        let tail = self.read(offset, self.data.len().saturating_sub(offset))?;
        let len = tail
            .iter()
            .position(|&b| b == 0)
            .ok_or(RuntimeError::MemoryOutOfBounds {
                offset,
                len: tail.len() + 1,
                memory_len: self.data.len(),
            })?;
        self.read_str(offset, len)
    }

    fn read_array<const N: usize>(&self, offset: usize) -> Result<[u8; N], RuntimeError> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(self.read(offset, N)?);
        Ok(buf)
    }

    pub fn read_u8(&self, offset: usize) -> Result<u8, RuntimeError> {
        Ok(self.read_array::<1>(offset)?[0])
    }

    pub fn read_u32(&self, offset: usize) -> Result<u32, RuntimeError> {
        self.read_array(offset).map(u32::from_le_bytes)
    }

    pub fn read_i32(&self, offset: usize) -> Result<i32, RuntimeError> {
        self.read_array(offset).map(i32::from_le_bytes)
    }

    pub fn read_u64(&self, offset: usize) -> Result<u64, RuntimeError> {
        self.read_array(offset).map(u64::from_le_bytes)
    }

    pub fn read_i64(&self, offset: usize) -> Result<i64, RuntimeError> {
        self.read_array(offset).map(i64::from_le_bytes)
    }

    pub fn read_f32(&self, offset: usize) -> Result<f32, RuntimeError> {
        self.read_array(offset).map(f32::from_le_bytes)
    }

    pub fn read_f64(&self, offset: usize) -> Result<f64, RuntimeError> {
        self.read_array(offset).map(f64::from_le_bytes)
    }

    pub fn write_u8(&mut self, offset: usize, value: u8) -> Result<(), RuntimeError> {
        self.write(offset, &[value])
    }

    pub fn write_u32(&mut self, offset: usize, value: u32) -> Result<(), RuntimeError> {
        self.write(offset, &value.to_le_bytes())
    }

    pub fn write_i32(&mut self, offset: usize, value: i32) -> Result<(), RuntimeError> {
        self.write(offset, &value.to_le_bytes())
    }

    pub fn write_u64(&mut self, offset: usize, value: u64) -> Result<(), RuntimeError> {
        self.write(offset, &value.to_le_bytes())
    }

    pub fn write_i64(&mut self, offset: usize, value: i64) -> Result<(), RuntimeError> {
        self.write(offset, &value.to_le_bytes())
    }

    pub fn write_f32(&mut self, offset: usize, value: f32) -> Result<(), RuntimeError> {
        self.write(offset, &value.to_le_bytes())
    }

    pub fn write_f64(&mut self, offset: usize, value: f64) -> Result<(), RuntimeError> {
        self.write(offset, &value.to_le_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_write_numbers() {
        let mut buf = vec![0u8; 64];
        let mut view = MemoryView::new(&mut buf);

        view.write_i32(0, -5).unwrap();
        view.write_u64(8, u64::MAX - 1).unwrap();
        view.write_f32(16, 1.25).unwrap();
        view.write_f64(24, -0.5).unwrap();
        view.write_u8(63, 0xAB).unwrap();

        assert_eq!(view.read_i32(0).unwrap(), -5);
        assert_eq!(view.read_u32(0).unwrap(), (-5i32) as u32);
        assert_eq!(view.read_u64(8).unwrap(), u64::MAX - 1);
        assert_eq!(view.read_f32(16).unwrap(), 1.25);
        assert_eq!(view.read_f64(24).unwrap(), -0.5);
        assert_eq!(view.read_u8(63).unwrap(), 0xAB);
    }

    #[test]
    fn test_little_endian_layout() {
        let mut buf = vec![0u8; 8];
        let mut view = MemoryView::new(&mut buf);
        view.write_u32(0, 0x0403_0201).unwrap();
        assert_eq!(view.read(0, 4).unwrap(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_bounds_checked() {
        let mut buf = vec![0u8; 16];
        let mut view = MemoryView::new(&mut buf);

        assert!(view.read(16, 0).is_ok());
        assert!(matches!(
            view.read(15, 2),
            Err(RuntimeError::MemoryOutOfBounds {
                offset: 15,
                len: 2,
                memory_len: 16
            })
        ));
        assert!(view.read_u64(12).is_err());
        assert!(view.write_u32(13, 1).is_err());
        assert!(view.read(usize::MAX, 2).is_err());
    }

    #[test]
    fn test_strings() {
        let mut buf = vec![0u8; 32];
        let mut view = MemoryView::new(&mut buf);
        view.write(4, b"hello\0").unwrap();

        assert_eq!(view.read_str(4, 5).unwrap(), "hello");
        assert_eq!(view.read_cstr(4).unwrap(), "hello");

        view.write(10, &[0xFF, 0xFE]).unwrap();
        assert!(view.read_str(10, 2).unwrap_err().is_type());
    }

    #[test]
    fn test_cstr_without_terminator() {
        let mut buf = vec![b'a'; 8];
        let view = MemoryView::new(&mut buf);
        assert!(matches!(
            view.read_cstr(2),
            Err(RuntimeError::MemoryOutOfBounds { .. })
        ));
    }
}
