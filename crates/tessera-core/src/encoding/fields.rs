//! Length-prefixed multi-field payloads.
//!
//! Cell values that carry several strings (edge references, hide markers
//! with event data) are written as a sequence of fields, each a `u32`
//! big-endian length followed by the raw bytes.

use crate::TesseraError;

/// Builds a multi-field payload.
#[derive(Debug, Default)]
pub struct FieldWriter {
    buf: Vec<u8>,
}

impl FieldWriter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts the payload with a single marker byte.
    #[must_use]
    pub fn with_marker(marker: u8) -> Self {
        Self { buf: vec![marker] }
    }

    pub fn bytes(&mut self, field: &[u8]) -> &mut Self {
        self.buf
            .extend_from_slice(&(field.len() as u32).to_be_bytes());
        self.buf.extend_from_slice(field);
        self
    }

    pub fn str(&mut self, field: &str) -> &mut Self {
        self.bytes(field.as_bytes())
    }

    /// An optional field: a presence byte, then the field if present.
    pub fn optional(&mut self, field: Option<&[u8]>) -> &mut Self {
        match field {
            Some(field) => {
                self.buf.push(1);
                self.bytes(field)
            }
            None => {
                self.buf.push(0);
                self
            }
        }
    }

    #[must_use]
    pub fn finish(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }
}

/// Reads a payload written by [`FieldWriter`]. Errors name `context`
/// (usually the offending key).
#[derive(Debug)]
pub struct FieldReader<'a> {
    bytes: &'a [u8],
    pos: usize,
    context: &'a str,
}

impl<'a> FieldReader<'a> {
    #[must_use]
    pub fn new(bytes: &'a [u8], context: &'a str) -> Self {
        Self {
            bytes,
            pos: 0,
            context,
        }
    }

    pub fn marker(&mut self) -> Result<u8, TesseraError> {
        let b = self
            .bytes
            .get(self.pos)
            .copied()
            .ok_or_else(|| self.corrupt("missing marker byte"))?;
        self.pos += 1;
        Ok(b)
    }

    pub fn bytes(&mut self) -> Result<&'a [u8], TesseraError> {
        let header = self
            .bytes
            .get(self.pos..self.pos + 4)
            .ok_or_else(|| self.corrupt("truncated field length"))?;
        let mut len = [0u8; 4];
        len.copy_from_slice(header);
        let len = u32::from_be_bytes(len) as usize;
        let start = self.pos + 4;
        let field = self
            .bytes
            .get(start..start + len)
            .ok_or_else(|| self.corrupt("truncated field"))?;
        self.pos = start + len;
        Ok(field)
    }

    pub fn string(&mut self) -> Result<String, TesseraError> {
        let field = self.bytes()?;
        String::from_utf8(field.to_vec())
            .map_err(|e| self.corrupt(&format!("field is not UTF-8: {e}")))
    }

    pub fn optional(&mut self) -> Result<Option<&'a [u8]>, TesseraError> {
        match self.marker()? {
            0 => Ok(None),
            1 => self.bytes().map(Some),
            other => Err(self.corrupt(&format!("invalid presence byte {other}"))),
        }
    }

    /// Fails unless the payload was consumed entirely.
    pub fn finish(&self) -> Result<(), TesseraError> {
        if self.pos == self.bytes.len() {
            Ok(())
        } else {
            Err(self.corrupt("trailing bytes in value"))
        }
    }

    fn corrupt(&self, reason: &str) -> TesseraError {
        TesseraError::corrupt(self.context, reason)
    }
}
