//! # Physical Keys
//!
//! A cell of the sorted wide-column layout is addressed by
//! (row, family, qualifier, visibility, timestamp, delete flag).
//!
//! `Key` orders exactly like the wide-column store: row, family, qualifier
//! and visibility ascending, timestamp descending, deletes first. The byte
//! form produced by [`Key::to_bytes`] sorts identically under plain byte
//! comparison, which is what the embedded store uses:
//!
//! - strings: `0x00` escaped as `0x00 0xFF`, terminated by `0x00 0x01`
//! - timestamp: bitwise NOT of the sign-flipped big-endian value
//! - delete flag: `0x00` for deletes, `0x01` otherwise

use crate::{TesseraError, Timestamp};
use std::cmp::Ordering;
use std::fmt;
use std::ops::Bound;

const ESCAPE: u8 = 0x00;
const ESCAPED_ZERO: u8 = 0xFF;
const TERMINATOR: u8 = 0x01;
const SIGN_BIT: u64 = 1 << 63;

/// Address of one physical cell.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Key {
    pub row: String,
    pub family: String,
    pub qualifier: String,
    pub visibility: String,
    pub timestamp: Timestamp,
    pub deleted: bool,
}

impl Key {
    #[must_use]
    pub fn new(
        row: impl Into<String>,
        family: impl Into<String>,
        qualifier: impl Into<String>,
        visibility: impl Into<String>,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            row: row.into(),
            family: family.into(),
            qualifier: qualifier.into(),
            visibility: visibility.into(),
            timestamp,
            deleted: false,
        }
    }

    #[must_use]
    pub fn deleted(mut self, deleted: bool) -> Self {
        self.deleted = deleted;
        self
    }

    /// Whether `other` addresses the same column (ignores time and flag).
    #[must_use]
    pub fn same_column(&self, other: &Key) -> bool {
        self.row == other.row
            && self.family == other.family
            && self.qualifier == other.qualifier
            && self.visibility == other.visibility
    }

    /// Order-preserving byte form.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            self.row.len() + self.family.len() + self.qualifier.len() + self.visibility.len() + 17,
        );
        encode_str(&mut out, &self.row);
        encode_str(&mut out, &self.family);
        encode_str(&mut out, &self.qualifier);
        encode_str(&mut out, &self.visibility);
        out.extend_from_slice(&encode_timestamp(self.timestamp));
        out.push(if self.deleted { 0x00 } else { 0x01 });
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TesseraError> {
        let mut reader = KeyReader { bytes, pos: 0 };
        let row = reader.string()?;
        let family = reader.string()?;
        let qualifier = reader.string()?;
        let visibility = reader.string()?;
        let timestamp = reader.timestamp()?;
        let deleted = match reader.byte()? {
            0x00 => true,
            0x01 => false,
            other => {
                return Err(TesseraError::corrupt(
                    row,
                    format!("invalid delete flag byte {other:#04x}"),
                ));
            }
        };
        if reader.pos != bytes.len() {
            return Err(TesseraError::corrupt(row, "trailing bytes after key"));
        }
        Ok(Self {
            row,
            family,
            qualifier,
            visibility,
            timestamp,
            deleted,
        })
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        self.row
            .cmp(&other.row)
            .then_with(|| self.family.cmp(&other.family))
            .then_with(|| self.qualifier.cmp(&other.qualifier))
            .then_with(|| self.visibility.cmp(&other.visibility))
            .then_with(|| other.timestamp.cmp(&self.timestamp))
            .then_with(|| other.deleted.cmp(&self.deleted))
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}:{} [{}] {}",
            self.row.escape_debug(),
            self.family,
            self.qualifier.escape_debug(),
            self.visibility,
            self.timestamp
        )?;
        if self.deleted {
            write!(f, " (deleted)")?;
        }
        Ok(())
    }
}

// =============================================================================
// BYTE ENCODING
// =============================================================================

fn encode_str(out: &mut Vec<u8>, s: &str) {
    for &b in s.as_bytes() {
        if b == ESCAPE {
            out.push(ESCAPE);
            out.push(ESCAPED_ZERO);
        } else {
            out.push(b);
        }
    }
    out.push(ESCAPE);
    out.push(TERMINATOR);
}

fn encode_timestamp(timestamp: Timestamp) -> [u8; 8] {
    (!((timestamp as u64) ^ SIGN_BIT)).to_be_bytes()
}

fn decode_timestamp(bytes: [u8; 8]) -> Timestamp {
    ((!u64::from_be_bytes(bytes)) ^ SIGN_BIT) as Timestamp
}

/// Encoded row prefix: every key of `row` starts with these bytes.
#[must_use]
pub fn row_prefix(row: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(row.len() + 2);
    encode_str(&mut out, row);
    out
}

/// Encoded row bytes without the terminator. Keys of every row that starts
/// with `prefix` (as a string) start with these bytes.
#[must_use]
pub fn row_start_prefix(prefix: &str) -> Vec<u8> {
    let mut out = row_prefix(prefix);
    out.truncate(out.len() - 2);
    out
}

/// Smallest byte string greater than every string starting with `prefix`,
/// or `None` if there is none (all `0xFF`).
#[must_use]
pub fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut out = prefix.to_vec();
    while let Some(last) = out.pop() {
        if last != 0xFF {
            out.push(last + 1);
            return Some(out);
        }
    }
    None
}

/// Decode only the row of an encoded key.
pub fn decode_row_of(bytes: &[u8]) -> Result<String, TesseraError> {
    KeyReader { bytes, pos: 0 }.string()
}

/// Byte bounds covering whole rows in `[start, end]` (by row string).
#[must_use]
pub fn row_bounds(start: Bound<&str>, end: Bound<&str>) -> (Bound<Vec<u8>>, Bound<Vec<u8>>) {
    let lower = match start {
        Bound::Included(row) => Bound::Included(row_prefix(row)),
        Bound::Excluded(row) => match prefix_successor(&row_prefix(row)) {
            Some(next) => Bound::Included(next),
            None => Bound::Unbounded,
        },
        Bound::Unbounded => Bound::Unbounded,
    };
    let upper = match end {
        Bound::Included(row) => match prefix_successor(&row_prefix(row)) {
            Some(next) => Bound::Excluded(next),
            None => Bound::Unbounded,
        },
        Bound::Excluded(row) => Bound::Excluded(row_prefix(row)),
        Bound::Unbounded => Bound::Unbounded,
    };
    (lower, upper)
}

struct KeyReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl KeyReader<'_> {
    fn byte(&mut self) -> Result<u8, TesseraError> {
        let b = self
            .bytes
            .get(self.pos)
            .copied()
            .ok_or_else(|| TesseraError::corrupt(self.lossy(), "truncated key"))?;
        self.pos += 1;
        Ok(b)
    }

    fn string(&mut self) -> Result<String, TesseraError> {
        let mut raw = Vec::new();
        loop {
            let b = self.byte()?;
            if b != ESCAPE {
                raw.push(b);
                continue;
            }
            match self.byte()? {
                TERMINATOR => break,
                ESCAPED_ZERO => raw.push(ESCAPE),
                other => {
                    return Err(TesseraError::corrupt(
                        self.lossy(),
                        format!("invalid escape byte {other:#04x} in key"),
                    ));
                }
            }
        }
        String::from_utf8(raw)
            .map_err(|e| TesseraError::corrupt(self.lossy(), format!("key is not UTF-8: {e}")))
    }

    fn timestamp(&mut self) -> Result<Timestamp, TesseraError> {
        let end = self.pos + 8;
        let slice = self
            .bytes
            .get(self.pos..end)
            .ok_or_else(|| TesseraError::corrupt(self.lossy(), "truncated key timestamp"))?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(slice);
        self.pos = end;
        Ok(decode_timestamp(buf))
    }

    fn lossy(&self) -> String {
        String::from_utf8_lossy(self.bytes).into_owned()
    }
}
