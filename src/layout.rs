// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Binary layout primitives for the format-1 field stream.
//!
//! # File Layout
//!
//! ```text
//! Offset  Size        Field
//! 0       1           version tag (currently always 1)
//! 1       ...         field records, packed back to back
//! ...     ...         zero fill up to the next page multiple
//! ```
//!
//! # Field Record (packed, little-endian)
//!
//! ```text
//! Offset              Size        Field
//! 0                   2           label_sz
//! 2                   label_sz    label (raw UTF-8)
//! 2+label_sz          2           type_sz
//! 4+label_sz          type_sz     type signature (ASCII)
//! 4+label_sz+type_sz  1           buf_idx (0/1, or 255 = unbuffered)
//! +1                  p or 2*p    payload slot(s)
//! ```
//!
//! Records carry no alignment padding: every multi-byte integer in the
//! stream is stored little-endian and may sit at any byte offset. The
//! first byte after the last record is zero, which doubles as the
//! end-of-records marker for forward scans.

/// Format version tag written at offset 0 of every mapping.
pub const FORMAT_VERSION: u8 = 1;

/// Index-byte value marking a single-slot (unbuffered) field.
///
/// Any other index value (0 or 1) names the *write* slot of a
/// double-buffered field; the stable value lives in the other slot.
pub const UNBUFFERED: u8 = 255;

/// Width of the `label_sz` and `type_sz` length prefixes.
pub const LEN_PREFIX: usize = 2;

/// Width of the version tag at the head of the mapping.
pub const VERSION_BYTES: usize = 1;

/// Largest slot width the parser will accept for an `Ns` signature.
///
/// Capacities are declared as `u16`, so anything above this is garbage.
pub const MAX_STRING_CAPACITY: usize = u16::MAX as usize;

/// Slot width in bytes for a type signature, or `None` if unrecognized.
///
/// Fixed-width signatures follow the conventional encoding (`b`/`B` one
/// byte, `h`/`H` two, `i`/`I`/`f` four, `q`/`Q`/`d` eight, `?` one);
/// `Ns` is a string slot of capacity `N`. 64-bit integers are always
/// `q`/`Q`, never `l`/`L`.
#[must_use]
pub fn signature_width(sig: &str) -> Option<usize> {
    match sig {
        "b" | "B" | "?" => Some(1),
        "h" | "H" => Some(2),
        "i" | "I" | "f" => Some(4),
        "q" | "Q" | "d" => Some(8),
        _ => sig
            .strip_suffix('s')
            .and_then(|n| n.parse::<usize>().ok())
            .filter(|&n| n > 0 && n <= MAX_STRING_CAPACITY),
    }
}

/// Total byte footprint of one field record.
#[must_use]
pub fn record_size(label_len: usize, sig_len: usize, slot_width: usize, buffered: bool) -> usize {
    let slots = if buffered { 2 } else { 1 };
    LEN_PREFIX + label_len + LEN_PREFIX + sig_len + 1 + slot_width * slots
}

/// Append a record header (everything up to the payload) to `out`.
///
/// Returns the number of bytes appended, which is also the payload
/// offset relative to the start of the record.
pub fn encode_header(out: &mut Vec<u8>, label: &str, sig: &str, buf_idx: u8) -> usize {
    let start = out.len();
    out.extend_from_slice(&(label.len() as u16).to_le_bytes());
    out.extend_from_slice(label.as_bytes());
    out.extend_from_slice(&(sig.len() as u16).to_le_bytes());
    out.extend_from_slice(sig.as_bytes());
    out.push(buf_idx);
    out.len() - start
}
