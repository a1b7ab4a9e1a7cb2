#[macro_use]
pub mod error;

pub(crate) mod leb;
pub mod pool;
pub mod item;
pub mod section;
pub mod encoded_values;
pub mod annotations;
pub mod opcodes;
pub mod instructions;
pub mod instruction_list;
pub mod try_block;
pub mod debug_info;
pub mod code_item;
pub mod def;
pub mod def_array;
pub mod class_data;
pub mod hidden_api;
pub mod class_def;
pub mod classes;

pub use crate::dex::error::{DexError, ErrorKind};
pub use crate::dex::classes::{DexClasses, DexLayout};
pub use crate::dex::class_def::ClassDef;
pub use crate::dex::class_data::ClassData;
pub use crate::dex::item::Item;
pub use crate::dex::pool::DexPools;

use crate::dex::leb::{decode_sleb128, decode_uleb128, decode_uleb128p1, encode_sleb128, encode_uleb128, encode_uleb128p1};
use serde::{Deserialize, Serialize};

/// Knobs for reading and writing; the defaults match what a dex toolchain emits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DexOptions
{
    /// Reject code items whose alignment padding is not zero.
    pub strict_padding: bool,
    /// Check static initial values against their field types on refresh.
    pub validate_static_values: bool,
    /// Drop annotations directories that no longer hold anything.
    pub prune_empty_directories: bool,
}

impl Default for DexOptions
{
    fn default() -> Self
    {
        DexOptions {
            strict_padding: false,
            validate_static_values: true,
            prune_empty_directories: true,
        }
    }
}

// Basic type reading and writing
pub(crate) fn read_u1(bytes: &[u8], ix: &mut usize) -> Result<u8, DexError>
{
    if bytes.len() < *ix + 1
    {
        fail!("Unexpected end of stream reading u1 at index {}", *ix);
    }
    let result = bytes[*ix];
    *ix += 1;
    Ok(result)
}

pub(crate) fn read_u2(bytes: &[u8], ix: &mut usize) -> Result<u16, DexError>
{
    if bytes.len() < *ix + 2
    {
        fail!("Unexpected end of stream reading u2 at index {}", *ix);
    }
    let result = ((bytes[*ix + 1] as u16) << 8) | (bytes[*ix] as u16);
    *ix += 2;
    Ok(result)
}

pub(crate) fn read_u4(bytes: &[u8], ix: &mut usize) -> Result<u32, DexError>
{
    if bytes.len() < *ix + 4
    {
        fail!("Unexpected end of stream reading u4 at index {}", *ix);
    }
    let result =
        ((bytes[*ix + 3] as u32) << 24) | ((bytes[*ix + 2] as u32) << 16) | ((bytes[*ix + 1] as u32) << 8) | (bytes[*ix] as u32);
    *ix += 4;
    Ok(result)
}

pub(crate) fn read_uleb128(bytes: &[u8], ix: &mut usize) -> Result<u32, DexError>
{
    match decode_uleb128(bytes.get(*ix..).unwrap_or(&[]))
    {
        Some((val, size)) => {
            *ix += size;
            Ok(val)
        }
        None => fail!("Malformed uleb128 at index {}", *ix),
    }
}

pub(crate) fn read_sleb128(bytes: &[u8], ix: &mut usize) -> Result<i32, DexError>
{
    match decode_sleb128(bytes.get(*ix..).unwrap_or(&[]))
    {
        Some((val, size)) => {
            *ix += size;
            Ok(val)
        }
        None => fail!("Malformed sleb128 at index {}", *ix),
    }
}

pub(crate) fn read_uleb128p1(bytes: &[u8], ix: &mut usize) -> Result<i32, DexError>
{
    match decode_uleb128p1(bytes.get(*ix..).unwrap_or(&[]))
    {
        Some((val, size)) => {
            *ix += size;
            Ok(val)
        }
        None => fail!("Malformed uleb128p1 at index {}", *ix),
    }
}

pub(crate) fn read_x(bytes: &[u8], ix: &mut usize, length: usize) -> Result<Vec<u8>, DexError>
{
    if bytes.len() >= *ix && bytes.len() - *ix >= length
    {
        let v = bytes[*ix..*ix + length].to_vec();
        *ix += length;
        Ok(v)
    }
    else
    {
        fail!("Buffer too short for a {} byte read at index {}", length, *ix)
    }
}

pub(crate) fn write_u1(buffer: &mut Vec<u8>, val: u8) -> usize
{
    buffer.push(val);
    1
}

pub(crate) fn write_u2(buffer: &mut Vec<u8>, val: u16) -> usize
{
    buffer.extend_from_slice(&val.to_le_bytes());
    2
}

pub(crate) fn write_u4(buffer: &mut Vec<u8>, val: u32) -> usize
{
    buffer.extend_from_slice(&val.to_le_bytes());
    4
}

/// Overwrites a u4 already emitted at `pos`.
pub(crate) fn patch_u4(buffer: &mut [u8], pos: usize, val: u32)
{
    buffer[pos..pos + 4].copy_from_slice(&val.to_le_bytes());
}

pub(crate) fn write_uleb128(buffer: &mut Vec<u8>, val: u32) -> usize
{
    let encoded = encode_uleb128(val);
    let c = encoded.len();
    buffer.extend(encoded);
    c
}

pub(crate) fn write_sleb128(buffer: &mut Vec<u8>, val: i32) -> usize
{
    let encoded = encode_sleb128(val);
    let c = encoded.len();
    buffer.extend(encoded);
    c
}

pub(crate) fn write_uleb128p1(buffer: &mut Vec<u8>, val: i32) -> usize
{
    let encoded = encode_uleb128p1(val);
    let c = encoded.len();
    buffer.extend(encoded);
    c
}

pub(crate) fn write_x(buffer: &mut Vec<u8>, val: &[u8]) -> usize
{
    buffer.extend_from_slice(val);
    val.len()
}

/// Zero-fills `buffer` up to the next multiple of `alignment`, returning the bytes added.
pub(crate) fn write_align(buffer: &mut Vec<u8>, alignment: usize) -> usize
{
    let pad = (alignment - buffer.len() % alignment) % alignment;
    buffer.resize(buffer.len() + pad, 0);
    pad
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_reads_advance() {
        let bytes = [0x34, 0x12, 0x78, 0x56, 0x34, 0x12, 0xE5, 0x8E, 0x26, 0x7F];
        let mut ix = 0;
        assert_eq!(read_u2(&bytes, &mut ix).unwrap(), 0x1234);
        assert_eq!(read_u4(&bytes, &mut ix).unwrap(), 0x12345678);
        assert_eq!(read_uleb128(&bytes, &mut ix).unwrap(), 624485);
        assert_eq!(read_sleb128(&bytes, &mut ix).unwrap(), -1);
        assert_eq!(ix, bytes.len());
        assert!(read_u1(&bytes, &mut ix).is_err());
        assert!(read_uleb128(&bytes, &mut ix).is_err());
    }

    #[test]
    fn align_pads_with_zero() {
        let mut buf = vec![1, 2, 3];
        assert_eq!(write_align(&mut buf, 4), 1);
        assert_eq!(buf, vec![1, 2, 3, 0]);
        assert_eq!(write_align(&mut buf, 4), 0);
    }

    #[test]
    fn options_default() {
        let o = DexOptions::default();
        assert!(!o.strict_padding);
        assert!(o.validate_static_values);
    }
}
