//! coverage/record.rs
//!
//! Binary coverage record codec.
//!
//! ```text
//! header : "UFCV" | version u16
//! block  : kind u8 | length u32 | payload
//! ```
//!
//! All integers are little-endian. Decoding is pure: it never touches the
//! filesystem and never panics on arbitrary input.

use crate::coverage::model::{Counter, CoverageReport, CoverageUnit};
use crate::error::DecodeError;

pub const MAGIC: &[u8; 4] = b"UFCV";
pub const VERSION: u16 = 1;

const HEADER_LEN: usize = 6;
const BLOCK_HEADER_LEN: usize = 5;

const KIND_SESSION: u8 = 0x01;
const KIND_UNIT: u8 = 0x02;

/// One recorder run appended to the record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: String,
    pub started_at_ms: u64,
    pub dumped_at_ms: u64,
}

/// Everything decoded from a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedRecord {
    pub sessions: Vec<SessionInfo>,
    pub report: CoverageReport,
}

/* ============================================================
   Decoding
   ============================================================ */

/// Decode a record. Truncated input yields the longest valid prefix with
/// `report.is_partial() == true`.
pub fn decode(bytes: &[u8]) -> Result<DecodedRecord, DecodeError> {
    if bytes.len() < HEADER_LEN {
        let n = bytes.len().min(MAGIC.len());
        if bytes[..n] != MAGIC[..n] {
            return Err(DecodeError::BadMagic);
        }
        return Ok(DecodedRecord {
            sessions: Vec::new(),
            report: CoverageReport::from_units(Vec::new(), true),
        });
    }

    if &bytes[..4] != MAGIC {
        return Err(DecodeError::BadMagic);
    }

    let version = u16::from_le_bytes([bytes[4], bytes[5]]);
    if version != VERSION {
        return Err(DecodeError::UnsupportedVersion(version));
    }

    let mut sessions = Vec::new();
    let mut units = Vec::new();
    let mut partial = false;
    let mut pos = HEADER_LEN;

    while pos < bytes.len() {
        if bytes.len() - pos < BLOCK_HEADER_LEN {
            partial = true;
            break;
        }

        let kind = bytes[pos];
        let declared = u32::from_le_bytes([bytes[pos + 1], bytes[pos + 2], bytes[pos + 3], bytes[pos + 4]]) as usize;
        let start = pos + BLOCK_HEADER_LEN;

        if bytes.len() - start < declared {
            partial = true;
            break;
        }

        let payload = &bytes[start..start + declared];
        let mut cur = Cursor::new(payload, start);

        match kind {
            KIND_SESSION => {
                let session = SessionInfo {
                    id: cur.string()?,
                    started_at_ms: cur.u64()?,
                    dumped_at_ms: cur.u64()?,
                };
                cur.finish()?;
                sessions.push(session);
            }
            KIND_UNIT => {
                let file = cur.string()?;
                let unit = read_unit(&mut cur)?;
                cur.finish()?;
                units.push((file, unit));
            }
            other => return Err(DecodeError::UnknownBlock { offset: pos, kind: other }),
        }

        pos = start + declared;
    }

    Ok(DecodedRecord {
        sessions,
        report: CoverageReport::from_units(units, partial),
    })
}

fn read_unit(cur: &mut Cursor<'_>) -> Result<CoverageUnit, DecodeError> {
    let class = cur.string()?;
    let method = cur.string()?;
    let first_line = cur.u32()?;
    let last_line = cur.u32()?;

    let mut unit = CoverageUnit::new(class, method, first_line, last_line);
    unit.instructions = Counter::new(cur.u32()?, cur.u32()?);
    unit.branches = Counter::new(cur.u32()?, cur.u32()?);

    let line_count = cur.u32()?;
    for _ in 0..line_count {
        let line = cur.u32()?;
        let hits = cur.u64()?;
        unit = unit.with_line(line, hits);
    }

    Ok(unit)
}

/// Bounds-checked reader over one block payload.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
    /// absolute offset of `buf[0]` in the record
    base: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8], base: usize) -> Self {
        Self { buf, pos: 0, base }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let end = self.pos.checked_add(n).filter(|e| *e <= self.buf.len());
        match end {
            Some(end) => {
                let out = &self.buf[self.pos..end];
                self.pos = end;
                Ok(out)
            }
            None => Err(DecodeError::LengthMismatch {
                offset: self.base - BLOCK_HEADER_LEN,
                declared: self.buf.len(),
                actual: self.pos.saturating_add(n),
            }),
        }
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, DecodeError> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_le_bytes(arr))
    }

    fn string(&mut self) -> Result<String, DecodeError> {
        let len = self.u16()? as usize;
        let at = self.base + self.pos;
        let raw = self.take(len)?;
        std::str::from_utf8(raw)
            .map(str::to_string)
            .map_err(|_| DecodeError::InvalidUtf8(at))
    }

    /// Payload must be consumed exactly.
    fn finish(&self) -> Result<(), DecodeError> {
        if self.pos == self.buf.len() {
            Ok(())
        } else {
            Err(DecodeError::LengthMismatch {
                offset: self.base - BLOCK_HEADER_LEN,
                declared: self.buf.len(),
                actual: self.pos,
            })
        }
    }
}

/* ============================================================
   Encoding
   ============================================================ */

/// Incremental record writer.
#[derive(Debug, Clone)]
pub struct RecordWriter {
    buf: Vec<u8>,
}

impl Default for RecordWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordWriter {
    pub fn new() -> Self {
        let mut buf = Vec::with_capacity(256);
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&VERSION.to_le_bytes());
        Self { buf }
    }

    pub fn session(&mut self, session: &SessionInfo) -> &mut Self {
        let mut p = Vec::new();
        put_str(&mut p, &session.id);
        p.extend_from_slice(&session.started_at_ms.to_le_bytes());
        p.extend_from_slice(&session.dumped_at_ms.to_le_bytes());
        self.block(KIND_SESSION, &p)
    }

    pub fn unit(&mut self, file: &str, unit: &CoverageUnit) -> &mut Self {
        let mut p = Vec::new();
        put_str(&mut p, file);
        put_str(&mut p, &unit.class);
        put_str(&mut p, &unit.method);
        for n in [
            unit.first_line,
            unit.last_line,
            unit.instructions.covered,
            unit.instructions.missed,
            unit.branches.covered,
            unit.branches.missed,
        ] {
            p.extend_from_slice(&n.to_le_bytes());
        }
        p.extend_from_slice(&(unit.line_hits.len() as u32).to_le_bytes());
        for (line, hits) in &unit.line_hits {
            p.extend_from_slice(&line.to_le_bytes());
            p.extend_from_slice(&hits.to_le_bytes());
        }
        self.block(KIND_UNIT, &p)
    }

    pub fn report(&mut self, report: &CoverageReport) -> &mut Self {
        for (file, unit) in report.units() {
            self.unit(file, unit);
        }
        self
    }

    fn block(&mut self, kind: u8, payload: &[u8]) -> &mut Self {
        self.buf.push(kind);
        self.buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        self.buf.extend_from_slice(payload);
        self
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Strings longer than `u16::MAX` bytes are cut at a char boundary.
fn put_str(buf: &mut Vec<u8>, s: &str) {
    let mut end = s.len().min(u16::MAX as usize);
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    buf.extend_from_slice(&(end as u16).to_le_bytes());
    buf.extend_from_slice(&s.as_bytes()[..end]);
}

/// Encode a whole report with a single session block.
pub fn encode(session: &SessionInfo, report: &CoverageReport) -> Vec<u8> {
    let mut w = RecordWriter::new();
    w.session(session).report(report);
    w.into_bytes()
}
