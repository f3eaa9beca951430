//! Background-value sparse codec.
//!
//! Tiles are allocated zero-filled and never eagerly filled with their
//! background. To make a fresh buffer read back as background, stored values
//! are shifted: background is stored as `0.0`, and a true `0.0` is stored as
//! [`SENTINEL`]. Mostly-background tiles are then mostly zero bytes, which zstd
//! shrinks to almost nothing on disk.
//!
//! The codec is inactive when the background is `0.0`. When it is active, a
//! legitimate value equal to [`SENTINEL`] reads back as `0.0`.

/// Stored in place of a true zero when the background is non-zero.
pub const SENTINEL: f32 = -500_000.0;

/// Map a caller value to its stored form.
#[inline]
pub fn encode(value: f32, background: f32) -> f32 {
    if background == 0.0 {
        value
    } else if value == 0.0 {
        SENTINEL
    } else if value == background {
        0.0
    } else {
        value
    }
}

/// Map a stored value back to what the caller wrote.
#[inline]
pub fn decode(stored: f32, background: f32) -> f32 {
    if background == 0.0 {
        stored
    } else if stored == 0.0 {
        background
    } else if stored == SENTINEL {
        0.0
    } else {
        stored
    }
}

/// Encode a slice in place.
pub fn encode_slice(values: &mut [f32], background: f32) {
    if background == 0.0 {
        return;
    }
    for v in values.iter_mut() {
        *v = encode(*v, background);
    }
}
