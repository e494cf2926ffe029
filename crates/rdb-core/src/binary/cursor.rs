//! Bounds-checked little-endian reader over a borrowed byte slice.
//!
//! The DWARF decoders walk their sections with [`Cursor`]; LEB128 values are
//! read with [`gimli::leb128`]. A read that would run past the end of the
//! slice fails with [`DebuggerError::UnexpectedEof`] and leaves the position
//! unchanged.

use gimli::{EndianSlice, LittleEndian};

use crate::error::{DebuggerError, Result};

type LebDecoder<'a, T> = fn(&mut EndianSlice<'a, LittleEndian>) -> gimli::Result<T>;

/// Read position over a byte slice.
#[derive(Debug, Clone)]
pub struct Cursor<'a>
{
    data: &'a [u8],
    position: usize,
}

impl<'a> Cursor<'a>
{
    /// Start reading at offset 0.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self
    {
        Self { data, position: 0 }
    }

    /// Start reading at `offset`; fails if the offset is past the end.
    pub fn at(data: &'a [u8], offset: usize) -> Result<Self>
    {
        let mut cursor = Self::new(data);
        cursor.seek(offset)?;
        Ok(cursor)
    }

    /// Current offset from the start of the slice.
    #[must_use]
    pub fn position(&self) -> usize
    {
        self.position
    }

    /// Bytes left to read.
    #[must_use]
    pub fn remaining(&self) -> usize
    {
        self.data.len() - self.position
    }

    /// Whether the cursor reached the end of the slice.
    #[must_use]
    pub fn is_empty(&self) -> bool
    {
        self.remaining() == 0
    }

    /// Move to an absolute offset. The end of the slice is a valid position.
    pub fn seek(&mut self, offset: usize) -> Result<()>
    {
        if offset > self.data.len() {
            return Err(DebuggerError::UnexpectedEof {
                offset,
                needed: 0,
            });
        }
        self.position = offset;
        Ok(())
    }

    /// Advance by `count` bytes.
    pub fn skip(&mut self, count: usize) -> Result<()>
    {
        self.read_bytes(count).map(|_| ())
    }

    /// Borrow the next `count` bytes.
    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8]>
    {
        let end = self
            .position
            .checked_add(count)
            .filter(|end| *end <= self.data.len())
            .ok_or(DebuggerError::UnexpectedEof {
                offset: self.position,
                needed: count,
            })?;
        let bytes = &self.data[self.position..end];
        self.position = end;
        Ok(bytes)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]>
    {
        let bytes = self.read_bytes(N)?;
        let mut array = [0u8; N];
        array.copy_from_slice(bytes);
        Ok(array)
    }

    pub fn read_u8(&mut self) -> Result<u8>
    {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8>
    {
        Ok(i8::from_le_bytes(self.read_array()?))
    }

    pub fn read_u16(&mut self) -> Result<u16>
    {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32>
    {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64>
    {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    /// Read a null-terminated string, consuming the terminator.
    ///
    /// The returned slice excludes the terminator. Missing terminator is an
    /// EOF error.
    pub fn read_cstr(&mut self) -> Result<&'a [u8]>
    {
        let rest = &self.data[self.position..];
        let length = rest
            .iter()
            .position(|byte| *byte == 0)
            .ok_or(DebuggerError::UnexpectedEof {
                offset: self.position,
                needed: rest.len() + 1,
            })?;
        let bytes = &rest[..length];
        self.position += length + 1;
        Ok(bytes)
    }

    /// Read an unsigned LEB128 value.
    pub fn read_uleb128(&mut self) -> Result<u64>
    {
        self.read_leb128(gimli::leb128::read::unsigned)
    }

    /// Read a signed LEB128 value.
    pub fn read_sleb128(&mut self) -> Result<i64>
    {
        self.read_leb128(gimli::leb128::read::signed)
    }

    fn read_leb128<T>(&mut self, decode: LebDecoder<'a, T>) -> Result<T>
    {
        let data: &'a [u8] = self.data;
        let mut reader = EndianSlice::new(&data[self.position..], LittleEndian);
        let value = decode(&mut reader).map_err(|err| match err {
            gimli::Error::UnexpectedEof(_) => DebuggerError::UnexpectedEof {
                offset: self.position,
                needed: self.remaining() + 1,
            },
            other => DebuggerError::Dwarf(other),
        })?;
        self.position = self.data.len() - reader.len();
        Ok(value)
    }
}

/// Decode a null-terminated string at `offset` inside a string table.
pub fn string_at(table: &[u8], offset: usize) -> Result<&[u8]>
{
    Cursor::at(table, offset)?.read_cstr()
}
