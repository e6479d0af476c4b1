//! Bounds-checked access to guest linear memory.
//!
//! The guest owns every linear-memory address; the host touches only the
//! regions an argument or a registered buffer names, and only through the
//! helpers here. Reads and writes clamp to the declared capacity and to
//! the memory's current size; nothing ever reads or writes past either.

use eea_core::{EeaError, Result};
use wasmtime::{AsContext, AsContextMut, Memory};

/// Read exactly `len` bytes at `ptr`, failing on any out-of-bounds access.
pub fn read_bytes(memory: &Memory, ctx: impl AsContext, ptr: u32, len: u32) -> Result<Vec<u8>> {
    let data = memory.data(&ctx);
    let start = ptr as usize;
    let end = start
        .checked_add(len as usize)
        .ok_or(EeaError::MemoryAccess { offset: ptr, len })?;
    data.get(start..end)
        .map(<[u8]>::to_vec)
        .ok_or(EeaError::MemoryAccess { offset: ptr, len })
}

/// Read up to `min(len, cap)` bytes at `ptr`, clamped to memory bounds.
pub fn read_bytes_clamped(
    memory: &Memory,
    ctx: impl AsContext,
    ptr: u32,
    len: u32,
    cap: usize,
) -> Vec<u8> {
    let data = memory.data(&ctx);
    let start = (ptr as usize).min(data.len());
    let want = (len as usize).min(cap);
    let end = start.saturating_add(want).min(data.len());
    data[start..end].to_vec()
}

/// Read a clamped byte range as a lossily-decoded string.
pub fn read_str_clamped(
    memory: &Memory,
    ctx: impl AsContext,
    ptr: u32,
    len: u32,
    cap: usize,
) -> String {
    String::from_utf8_lossy(&read_bytes_clamped(memory, ctx, ptr, len, cap)).into_owned()
}

/// Read one byte at `ptr`.
pub fn read_u8(memory: &Memory, ctx: impl AsContext, ptr: u32) -> Option<u8> {
    memory.data(&ctx).get(ptr as usize).copied()
}

/// Write `bytes` at `ptr`, truncating to `cap` and to memory bounds.
/// Returns the number of bytes actually written.
pub fn write_clamped(
    memory: &Memory,
    mut ctx: impl AsContextMut,
    ptr: u32,
    cap: u32,
    bytes: &[u8],
) -> usize {
    let data = memory.data_mut(&mut ctx);
    let start = (ptr as usize).min(data.len());
    let n = bytes.len().min(cap as usize).min(data.len() - start);
    data[start..start + n].copy_from_slice(&bytes[..n]);
    n
}

/// Write one byte at `ptr`. Returns false when out of bounds.
pub fn write_u8(memory: &Memory, mut ctx: impl AsContextMut, ptr: u32, value: u8) -> bool {
    match memory.data_mut(&mut ctx).get_mut(ptr as usize) {
        Some(cell) => {
            *cell = value;
            true
        }
        None => false,
    }
}

/// Write a little-endian u64 at `ptr`. Returns false when the full eight
/// bytes do not fit.
pub fn write_u64_le(memory: &Memory, ctx: impl AsContextMut, ptr: u32, value: u64) -> bool {
    let bytes = value.to_le_bytes();
    write_clamped(memory, ctx, ptr, bytes.len() as u32, &bytes) == bytes.len()
}

/// Write a little-endian i32 at `ptr`. Returns false when it does not fit.
pub fn write_i32_le(memory: &Memory, ctx: impl AsContextMut, ptr: u32, value: i32) -> bool {
    let bytes = value.to_le_bytes();
    write_clamped(memory, ctx, ptr, bytes.len() as u32, &bytes) == bytes.len()
}
