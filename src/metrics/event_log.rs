//! Summary event log reader.
//!
//! # Record framing
//!
//! ```text
//! ┌───────────────┬──────────────────────┬───────────────────┬──────────────────────┐
//! │ Length (u64)  │ CRC of length (u32)  │ Payload (Length)  │ CRC of payload (u32) │
//! └───────────────┴──────────────────────┴───────────────────┴──────────────────────┘
//! ```
//!
//! All integers are little-endian. Checksums are masked CRC-32C values.
//! Each payload is a protobuf-encoded `Event`:
//!
//! ```text
//! Event   { wall_time: double = 1, step: int64 = 2, summary: Summary = 5 }
//! Summary { value: repeated Value = 1 }
//! Value   { tag: string = 1, simple_value: float = 2, tensor: Tensor = 8 }
//! Tensor  { dtype: enum = 1, tensor_content: bytes = 4,
//!           float_val: repeated float = 5, double_val: repeated double = 6 }
//! ```
//!
//! Only the fields above are decoded; everything else is skipped by wire type.

use crate::core::{DataError, Result};
use std::io::{self, Read};

pub use ::crc32c::crc32c;

const MASK_DELTA: u32 = 0xa282_ead8;

const DT_FLOAT: u64 = 1;
const DT_DOUBLE: u64 = 2;

/// CRC-32C rotated and offset so that checksums of checksums stay distinct.
pub fn masked_crc32c(data: &[u8]) -> u32 {
    let crc = crc32c(data);
    ((crc >> 15) | (crc << 17)).wrapping_add(MASK_DELTA)
}

// ============================================================================
// Record framing
// ============================================================================

/// Forward-only reader over length-prefixed, checksummed records.
pub struct RecordReader<R> {
    reader: R,
    verify_checksums: bool,
    offset: u64,
}

impl<R: Read> RecordReader<R> {
    pub fn new(reader: R, verify_checksums: bool) -> Self {
        Self {
            reader,
            verify_checksums,
            offset: 0,
        }
    }

    /// Byte offset of the next record.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Read the next record payload, or `None` at a clean end of stream.
    pub fn read_record(&mut self) -> Result<Option<Vec<u8>>> {
        let mut header = [0u8; 12];
        let filled = self.fill(&mut header)?;
        if filled == 0 {
            return Ok(None);
        }
        if filled < header.len() {
            return Err(self.corrupt("truncated record header"));
        }

        let len_bytes = &header[0..8];
        let len = u64::from_le_bytes([
            header[0], header[1], header[2], header[3], header[4], header[5], header[6], header[7],
        ]);
        let len_crc = u32::from_le_bytes([header[8], header[9], header[10], header[11]]);
        if self.verify_checksums && masked_crc32c(len_bytes) != len_crc {
            return Err(self.corrupt("length checksum mismatch"));
        }

        let mut payload = Vec::new();
        let read = (&mut self.reader).take(len).read_to_end(&mut payload);
        read.map_err(|e| self.io_error(e))?;
        if payload.len() as u64 != len {
            return Err(self.corrupt("truncated record payload"));
        }

        let mut footer = [0u8; 4];
        if self.fill(&mut footer)? < footer.len() {
            return Err(self.corrupt("truncated record checksum"));
        }
        if self.verify_checksums && masked_crc32c(&payload) != u32::from_le_bytes(footer) {
            return Err(self.corrupt("payload checksum mismatch"));
        }

        self.offset += 16 + len;
        Ok(Some(payload))
    }

    /// Read until `buf` is full or the stream ends; returns the bytes read.
    fn fill(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(self.io_error(e)),
            }
        }
        Ok(filled)
    }

    /// True when at least one more byte follows the last record read.
    /// Consumes that byte, so only call it once reading is over.
    fn has_trailing_data(&mut self) -> Result<bool> {
        Ok(self.fill(&mut [0u8; 1])? > 0)
    }

    fn corrupt(&self, what: &str) -> DataError {
        DataError::EventLog(format!("{} at offset {}", what, self.offset))
    }

    fn io_error(&self, err: io::Error) -> DataError {
        DataError::EventLog(format!("read failed at offset {}: {}", self.offset, err))
    }
}

impl<R: Read> Iterator for RecordReader<R> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_record().transpose()
    }
}

// ============================================================================
// Events
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Event {
    pub wall_time: f64,
    pub step: i64,
    pub values: Vec<SummaryValue>,
}

/// One tagged measurement. `value` is `None` for non-scalar summaries.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryValue {
    pub tag: String,
    pub value: Option<f64>,
}

impl Event {
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut event = Event::default();
        let mut fields = ProtoReader::new(bytes);
        while let Some((field, wire)) = fields.next_key()? {
            match (field, wire) {
                (1, WireType::Fixed64) => event.wall_time = f64::from_bits(fields.fixed64()?),
                (2, WireType::Varint) => event.step = fields.varint()? as i64,
                (5, WireType::Len) => decode_summary(fields.bytes()?, &mut event.values)?,
                (_, wire) => fields.skip(wire)?,
            }
        }
        Ok(event)
    }

    /// Scalar value recorded under `tag`, if any.
    pub fn scalar(&self, tag: &str) -> Option<f64> {
        self.values.iter().find(|v| v.tag == tag).and_then(|v| v.value)
    }
}

fn decode_summary(bytes: &[u8], out: &mut Vec<SummaryValue>) -> Result<()> {
    let mut fields = ProtoReader::new(bytes);
    while let Some((field, wire)) = fields.next_key()? {
        match (field, wire) {
            (1, WireType::Len) => out.push(decode_value(fields.bytes()?)?),
            (_, wire) => fields.skip(wire)?,
        }
    }
    Ok(())
}

fn decode_value(bytes: &[u8]) -> Result<SummaryValue> {
    let mut tag = String::new();
    let mut value = None;
    let mut fields = ProtoReader::new(bytes);
    while let Some((field, wire)) = fields.next_key()? {
        match (field, wire) {
            (1, WireType::Len) => {
                tag = String::from_utf8(fields.bytes()?.to_vec())
                    .map_err(|_| DataError::EventLog("summary tag is not UTF-8".to_string()))?;
            }
            (2, WireType::Fixed32) => value = Some(f32::from_bits(fields.fixed32()?) as f64),
            (8, WireType::Len) => {
                if let Some(scalar) = decode_tensor_scalar(fields.bytes()?)? {
                    value = Some(scalar);
                }
            }
            (_, wire) => fields.skip(wire)?,
        }
    }
    Ok(SummaryValue { tag, value })
}

/// First element of a float or double tensor.
fn decode_tensor_scalar(bytes: &[u8]) -> Result<Option<f64>> {
    let mut dtype = 0;
    let mut content: &[u8] = &[];
    let mut first: Option<f64> = None;

    let mut fields = ProtoReader::new(bytes);
    while let Some((field, wire)) = fields.next_key()? {
        match (field, wire) {
            (1, WireType::Varint) => dtype = fields.varint()?,
            (4, WireType::Len) => content = fields.bytes()?,
            (5, WireType::Fixed32) => {
                let v = f32::from_bits(fields.fixed32()?) as f64;
                first.get_or_insert(v);
            }
            (5, WireType::Len) => {
                if let Some(chunk) = fields.bytes()?.first_chunk::<4>() {
                    first.get_or_insert(f32::from_le_bytes(*chunk) as f64);
                }
            }
            (6, WireType::Fixed64) => {
                let v = f64::from_bits(fields.fixed64()?);
                first.get_or_insert(v);
            }
            (6, WireType::Len) => {
                if let Some(chunk) = fields.bytes()?.first_chunk::<8>() {
                    first.get_or_insert(f64::from_le_bytes(*chunk));
                }
            }
            (_, wire) => fields.skip(wire)?,
        }
    }

    if first.is_some() {
        return Ok(first);
    }
    Ok(match dtype {
        DT_FLOAT => content.first_chunk::<4>().map(|b| f32::from_le_bytes(*b) as f64),
        DT_DOUBLE => content.first_chunk::<8>().map(|b| f64::from_le_bytes(*b)),
        _ => None,
    })
}

/// Decodes events from a record stream, optionally stopping after `max_events`.
pub struct EventReader<R> {
    records: RecordReader<R>,
    remaining: Option<u64>,
    capped: Option<bool>,
}

impl<R: Read> EventReader<R> {
    pub fn new(reader: R, verify_checksums: bool) -> Self {
        Self {
            records: RecordReader::new(reader, verify_checksums),
            remaining: None,
            capped: None,
        }
    }

    pub fn max_events(mut self, max: Option<u64>) -> Self {
        self.remaining = max;
        self
    }

    /// True when iteration stopped at the event cap with records left unread.
    pub fn capped(&self) -> bool {
        self.capped == Some(true)
    }
}

impl<R: Read> Iterator for EventReader<R> {
    type Item = Result<Event>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(remaining) = self.remaining.as_mut() {
            if *remaining == 0 {
                if self.capped.is_none() {
                    self.capped = Some(self.records.has_trailing_data().unwrap_or(true));
                }
                return None;
            }
            *remaining -= 1;
        }
        let offset = self.records.offset();
        Some(self.records.next()?.and_then(|payload| {
            Event::decode(&payload).map_err(|e| DataError::EventLog(format!("record at offset {}: {}", offset, e)))
        }))
    }
}

// ============================================================================
// Protobuf wire format
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WireType {
    Varint,
    Fixed64,
    Len,
    Fixed32,
}

struct ProtoReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ProtoReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn next_key(&mut self) -> Result<Option<(u64, WireType)>> {
        if self.pos >= self.buf.len() {
            return Ok(None);
        }
        let key = self.varint()?;
        let wire = match key & 0x7 {
            0 => WireType::Varint,
            1 => WireType::Fixed64,
            2 => WireType::Len,
            5 => WireType::Fixed32,
            other => return Err(DataError::EventLog(format!("unsupported wire type {}", other))),
        };
        Ok(Some((key >> 3, wire)))
    }

    fn varint(&mut self) -> Result<u64> {
        let mut value = 0u64;
        for shift in (0..64).step_by(7) {
            let byte = *self
                .buf
                .get(self.pos)
                .ok_or_else(|| DataError::EventLog("truncated varint".to_string()))?;
            self.pos += 1;
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(DataError::EventLog("varint too long".to_string()))
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| DataError::EventLog("field runs past end of message".to_string()))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn fixed64(&mut self) -> Result<u64> {
        let bytes = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(raw))
    }

    fn fixed32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        let mut raw = [0u8; 4];
        raw.copy_from_slice(bytes);
        Ok(u32::from_le_bytes(raw))
    }

    fn bytes(&mut self) -> Result<&'a [u8]> {
        let len = usize::try_from(self.varint()?)
            .map_err(|_| DataError::EventLog("field length overflows".to_string()))?;
        self.take(len)
    }

    fn skip(&mut self, wire: WireType) -> Result<()> {
        match wire {
            WireType::Varint => self.varint().map(drop),
            WireType::Fixed64 => self.take(8).map(drop),
            WireType::Len => self.bytes().map(drop),
            WireType::Fixed32 => self.take(4).map(drop),
        }
    }
}
