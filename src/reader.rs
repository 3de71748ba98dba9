// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Version-gated streaming parser for published metric files.
//!
//! The reader walks a byte stream positioned at offset 0 of a mapping or
//! file and yields `(label, value)` pairs. It is deliberately tolerant:
//!
//! - a zero `label_sz` or a clean EOF ends the stream (that zero byte is
//!   the canonical end-of-records marker),
//! - labels and strings decode lossily (invalid UTF-8 is replaced, never
//!   raised),
//! - a truncated frame or an unrecognized type signature aborts iteration
//!   without invalidating anything already yielded; the cause is kept in
//!   [`StatsReader::abort_reason`].
//!
//! For double-buffered fields the index byte names the *write* slot, so
//! the reader decodes the slot at `p * (buf_idx ^ 1)`. The reader never
//! assumes the stream length is a page multiple.

use crate::fields::{self, Value};
use crate::layout::{self, FORMAT_VERSION, UNBUFFERED};
use crate::{Error, Result};
use std::fs::File;
use std::io::{self, BufReader, Cursor, Read};
use std::path::Path;

/// One decoded field.
#[derive(Debug, Clone, PartialEq)]
pub struct Stat {
    pub label: String,
    pub value: Value,
}

/// Streaming metric parser over any byte source.
#[derive(Debug)]
pub struct StatsReader<R> {
    src: R,
    done: bool,
    abort: Option<Error>,
}

impl StatsReader<BufReader<File>> {
    /// Open a metrics file read-only.
    ///
    /// # Errors
    ///
    /// [`Error::Open`] if the file cannot be opened, or any error
    /// [`StatsReader::new`] reports for the version byte.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path).map_err(Error::Open)?;
        Self::new(BufReader::new(file))
    }
}

impl StatsReader<Cursor<Vec<u8>>> {
    /// Parse an in-memory copy of a mapping.
    ///
    /// # Errors
    ///
    /// Same version-gate errors as [`StatsReader::new`].
    pub fn from_bytes(data: impl Into<Vec<u8>>) -> Result<Self> {
        Self::new(Cursor::new(data.into()))
    }
}

impl<R: Read> StatsReader<R> {
    /// Wrap a byte source positioned at offset 0 and check the version
    /// tag.
    ///
    /// # Errors
    ///
    /// [`Error::UnsupportedVersion`] for an unrecognized tag,
    /// [`Error::TruncatedFrame`] for an empty stream, [`Error::Read`] for
    /// any other I/O failure.
    pub fn new(mut src: R) -> Result<Self> {
        let mut version = [0u8; 1];
        src.read_exact(&mut version).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                Error::TruncatedFrame
            } else {
                Error::Read(e)
            }
        })?;
        if version[0] != FORMAT_VERSION {
            return Err(Error::UnsupportedVersion(version[0]));
        }
        Ok(Self {
            src,
            done: false,
            abort: None,
        })
    }

    /// Why iteration stopped early, if it did.
    #[must_use]
    pub fn abort_reason(&self) -> Option<&Error> {
        self.abort.as_ref()
    }

    fn abort(&mut self, reason: Error) -> Option<Stat> {
        log::debug!("[MM] frame parse aborted: {reason}");
        self.abort = Some(reason);
        self.done = true;
        None
    }

    /// Read exactly `n` bytes; `Ok(None)` on a short read.
    fn take(&mut self, n: usize) -> io::Result<Option<Vec<u8>>> {
        let mut buf = vec![0u8; n];
        match self.src.read_exact(&mut buf) {
            Ok(()) => Ok(Some(buf)),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn next_stat(&mut self) -> Option<Stat> {
        // A short read here is a clean end of stream, as is label_sz == 0
        // (the zero fill after the last record).
        let raw_label_sz = match self.take(2) {
            Ok(Some(b)) => b,
            Ok(None) => {
                self.done = true;
                return None;
            }
            Err(e) => return self.abort(Error::Read(e)),
        };
        let label_sz = u16::from_le_bytes([raw_label_sz[0], raw_label_sz[1]]);
        if label_sz == 0 {
            self.done = true;
            return None;
        }

        let label = match self.take(usize::from(label_sz)) {
            Ok(Some(b)) => String::from_utf8_lossy(&b).into_owned(),
            Ok(None) => return self.abort(Error::TruncatedFrame),
            Err(e) => return self.abort(Error::Read(e)),
        };

        let type_sz = match self.take(2) {
            Ok(Some(b)) => u16::from_le_bytes([b[0], b[1]]),
            Ok(None) => return self.abort(Error::TruncatedFrame),
            Err(e) => return self.abort(Error::Read(e)),
        };
        let sig = match self.take(usize::from(type_sz)) {
            Ok(Some(b)) => String::from_utf8_lossy(&b).into_owned(),
            Ok(None) => return self.abort(Error::TruncatedFrame),
            Err(e) => return self.abort(Error::Read(e)),
        };

        let Some(width) = layout::signature_width(&sig) else {
            return self.abort(Error::UnknownSignature(sig));
        };

        let buf_idx = match self.take(1) {
            Ok(Some(b)) => b[0],
            Ok(None) => return self.abort(Error::TruncatedFrame),
            Err(e) => return self.abort(Error::Read(e)),
        };

        let slot = if buf_idx == UNBUFFERED {
            match self.take(width) {
                Ok(Some(b)) => b,
                Ok(None) => return self.abort(Error::TruncatedFrame),
                Err(e) => return self.abort(Error::Read(e)),
            }
        } else {
            // buf_idx names the write slot; the stable value is the other
            // slot. Mask first so a corrupt index cannot send us out of
            // the two-slot payload.
            let stable = usize::from((buf_idx & 1) ^ 1);
            match self.take(width * 2) {
                Ok(Some(b)) => b[stable * width..(stable + 1) * width].to_vec(),
                Ok(None) => return self.abort(Error::TruncatedFrame),
                Err(e) => return self.abort(Error::Read(e)),
            }
        };

        match fields::decode_value(&sig, &slot) {
            Some(value) => Some(Stat { label, value }),
            None => self.abort(Error::UnknownSignature(sig)),
        }
    }
}

impl<R: Read> Iterator for StatsReader<R> {
    type Item = Stat;

    fn next(&mut self) -> Option<Stat> {
        if self.done {
            return None;
        }
        self.next_stat()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::encode_header;

    /// Hand-roll a format-1 stream for parser tests.
    fn stream(records: &[(&str, &str, u8, Vec<u8>)]) -> Vec<u8> {
        let mut out = vec![FORMAT_VERSION];
        for (label, sig, buf_idx, payload) in records {
            encode_header(&mut out, label, sig, *buf_idx);
            out.extend_from_slice(payload);
        }
        out
    }

    #[test]
    fn test_rejects_unknown_version() {
        let err = StatsReader::from_bytes(vec![9u8, 0, 0]).unwrap_err();
        assert!(matches!(err, Error::UnsupportedVersion(9)));
    }

    #[test]
    fn test_rejects_empty_stream() {
        let err = StatsReader::from_bytes(Vec::new()).unwrap_err();
        assert!(matches!(err, Error::TruncatedFrame));
    }

    #[test]
    fn test_parses_unbuffered_field() {
        let data = stream(&[("answer", "I", UNBUFFERED, 42u32.to_le_bytes().to_vec())]);
        let stats: Vec<Stat> = StatsReader::from_bytes(data).unwrap().collect();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].label, "answer");
        assert_eq!(stats[0].value, Value::UInt(42));
    }

    #[test]
    fn test_parses_stable_slot_of_buffered_field() {
        // write slot = 1, so the stable value lives in slot 0.
        let mut payload = 7u32.to_le_bytes().to_vec();
        payload.extend_from_slice(&99u32.to_le_bytes());
        let data = stream(&[("g", "I", 1, payload)]);
        let stats: Vec<Stat> = StatsReader::from_bytes(data).unwrap().collect();
        assert_eq!(stats[0].value, Value::UInt(7));

        // write slot = 0: stable value is slot 1.
        let mut payload = 7u32.to_le_bytes().to_vec();
        payload.extend_from_slice(&99u32.to_le_bytes());
        let data = stream(&[("g", "I", 0, payload)]);
        let stats: Vec<Stat> = StatsReader::from_bytes(data).unwrap().collect();
        assert_eq!(stats[0].value, Value::UInt(99));
    }

    #[test]
    fn test_zero_label_sz_terminates() {
        let mut data = stream(&[("a", "?", UNBUFFERED, vec![1])]);
        data.extend_from_slice(&[0, 0]); // end-of-records marker
        data.extend_from_slice(&[0xFF; 32]); // garbage past the marker
        let stats: Vec<Stat> = StatsReader::from_bytes(data).unwrap().collect();
        assert_eq!(stats.len(), 1);
    }

    #[test]
    fn test_clean_eof_terminates() {
        let data = stream(&[("a", "?", UNBUFFERED, vec![0])]);
        let stats: Vec<Stat> = StatsReader::from_bytes(data).unwrap().collect();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].value, Value::Bool(false));
    }

    #[test]
    fn test_unknown_signature_aborts_after_good_frames() {
        let mut data = stream(&[("good", "Q", UNBUFFERED, 5u64.to_le_bytes().to_vec())]);
        // Frame with a bogus signature.
        encode_header(&mut data, "bad", "Z", UNBUFFERED);
        data.extend_from_slice(&[0; 8]);

        let mut reader = StatsReader::from_bytes(data).unwrap();
        let stats: Vec<Stat> = reader.by_ref().collect();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].label, "good");
        assert!(matches!(
            reader.abort_reason(),
            Some(Error::UnknownSignature(sig)) if sig == "Z"
        ));
    }

    #[test]
    fn test_truncated_frame_aborts() {
        let mut data = stream(&[("good", "?", UNBUFFERED, vec![1])]);
        // Start a frame that claims a 20-byte label but ends early.
        data.extend_from_slice(&20u16.to_le_bytes());
        data.extend_from_slice(b"short");

        let mut reader = StatsReader::from_bytes(data).unwrap();
        let stats: Vec<Stat> = reader.by_ref().collect();
        assert_eq!(stats.len(), 1);
        assert!(matches!(reader.abort_reason(), Some(Error::TruncatedFrame)));
    }

    #[test]
    fn test_lossy_label_decode() {
        let mut data = vec![FORMAT_VERSION];
        data.extend_from_slice(&2u16.to_le_bytes());
        data.extend_from_slice(&[0xFF, 0xFE]); // invalid UTF-8 label
        data.extend_from_slice(&1u16.to_le_bytes());
        data.push(b'?');
        data.push(UNBUFFERED);
        data.push(1);

        let stats: Vec<Stat> = StatsReader::from_bytes(data).unwrap().collect();
        assert_eq!(stats.len(), 1);
        assert!(stats[0].label.contains('\u{FFFD}'));
        assert_eq!(stats[0].value, Value::Bool(true));
    }

    #[test]
    fn test_string_value_nul_trimmed() {
        let data = stream(&[("s", "6s", UNBUFFERED, b"ab\0\0\0\0".to_vec())]);
        let stats: Vec<Stat> = StatsReader::from_bytes(data).unwrap().collect();
        assert_eq!(stats[0].value, Value::Str("ab".to_string()));
    }

    #[test]
    fn test_corrupt_index_byte_is_masked() {
        // buf_idx = 7 is invalid for a two-slot field; the parser masks it
        // to bit 0 instead of reading out of the payload.
        let mut payload = 1u16.to_le_bytes().to_vec();
        payload.extend_from_slice(&2u16.to_le_bytes());
        let data = stream(&[("g", "H", 7, payload)]);
        let stats: Vec<Stat> = StatsReader::from_bytes(data).unwrap().collect();
        assert_eq!(stats[0].value, Value::UInt(1));
    }
}
