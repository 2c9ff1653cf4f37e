//! Bounds-checked little-endian reads at fixed offsets.

use oracle_sync_types::Address;

use crate::error::LayoutError;

/// Read-only view over raw account bytes.
///
/// Every accessor takes an absolute offset and fails with
/// [`LayoutError::OutOfBounds`] instead of reading past the end of the buffer.
#[derive(Debug, Clone, Copy)]
pub struct AccountReader<'a> {
    data: &'a [u8],
}

impl<'a> AccountReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Fail unless the buffer holds at least `min` bytes.
    pub fn require(&self, min: usize) -> Result<(), LayoutError> {
        self.bytes(0, min).map(|_| ())
    }

    pub fn bytes(&self, offset: usize, len: usize) -> Result<&'a [u8], LayoutError> {
        let end = offset.checked_add(len).ok_or(LayoutError::OutOfBounds {
            offset,
            len,
            available: self.data.len(),
        })?;
        self.data.get(offset..end).ok_or(LayoutError::OutOfBounds {
            offset,
            len,
            available: self.data.len(),
        })
    }

    pub fn array<const N: usize>(&self, offset: usize) -> Result<[u8; N], LayoutError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(offset, N)?);
        Ok(out)
    }

    pub fn u8(&self, offset: usize) -> Result<u8, LayoutError> {
        Ok(self.array::<1>(offset)?[0])
    }

    pub fn u32(&self, offset: usize) -> Result<u32, LayoutError> {
        self.array(offset).map(u32::from_le_bytes)
    }

    pub fn i32(&self, offset: usize) -> Result<i32, LayoutError> {
        self.array(offset).map(i32::from_le_bytes)
    }

    pub fn u64(&self, offset: usize) -> Result<u64, LayoutError> {
        self.array(offset).map(u64::from_le_bytes)
    }

    pub fn i64(&self, offset: usize) -> Result<i64, LayoutError> {
        self.array(offset).map(i64::from_le_bytes)
    }

    pub fn i128(&self, offset: usize) -> Result<i128, LayoutError> {
        self.array(offset).map(i128::from_le_bytes)
    }

    pub fn address(&self, offset: usize) -> Result<Address, LayoutError> {
        self.array(offset).map(Address::new)
    }

    /// Fixed-width, NUL-padded UTF-8 label.
    pub fn label(&self, offset: usize, len: usize) -> Result<String, LayoutError> {
        let raw = self.bytes(offset, len)?;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
    }
}
