//! Framed binary ingest protocol.
//!
//! Every record is a 2-byte big-endian type discriminator, a 4-byte
//! big-endian payload length, and the payload. Strings inside payloads are
//! u32-length-prefixed UTF-8; producer timestamps are u64 microseconds
//! since the Unix epoch, converted to milliseconds on decode. Any
//! malformed or oversized record is an error that closes the producer
//! connection without touching room state.

use bytes::Bytes;
use std::collections::HashMap;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::core::error::{LanternError, Result};
use crate::core::types::{EntryKind, Level};

/// Upper bound for a single record payload
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Auth token length bounds
pub const MIN_TOKEN_LEN: usize = 32;
pub const MAX_TOKEN_LEN: usize = 256;

/// Wire record discriminators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum RecordType {
    Auth = 0x0001,
    LogHeader = 0x0002,
    RoomBind = 0x0003,
    LogEntry = 0x0004,
    ProcessFlow = 0x0005,
    Watch = 0x0006,
    Stream = 0x0007,
    Control = 0x0008,
}

impl TryFrom<u16> for RecordType {
    type Error = LanternError;

    fn try_from(value: u16) -> Result<Self> {
        match value {
            0x0001 => Ok(RecordType::Auth),
            0x0002 => Ok(RecordType::LogHeader),
            0x0003 => Ok(RecordType::RoomBind),
            0x0004 => Ok(RecordType::LogEntry),
            0x0005 => Ok(RecordType::ProcessFlow),
            0x0006 => Ok(RecordType::Watch),
            0x0007 => Ok(RecordType::Stream),
            0x0008 => Ok(RecordType::Control),
            other => Err(LanternError::Protocol(format!(
                "unknown record type 0x{other:04x}"
            ))),
        }
    }
}

/// Room-scoped clear commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    ClearLog,
    ClearWatches,
    ClearAll,
    ClearProcessFlow,
}

impl TryFrom<u8> for ControlCommand {
    type Error = LanternError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(ControlCommand::ClearLog),
            1 => Ok(ControlCommand::ClearWatches),
            2 => Ok(ControlCommand::ClearAll),
            3 => Ok(ControlCommand::ClearProcessFlow),
            other => Err(LanternError::Protocol(format!(
                "unknown control command {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogEntryRecord {
    pub level: Level,
    pub kind: EntryKind,
    pub session: String,
    pub host: String,
    pub process_id: u32,
    pub thread_id: u32,
    pub timestamp: i64,
    pub title: Option<String>,
    pub color: Option<u32>,
    pub payload: Option<Vec<u8>>,
    pub ctx: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone)]
pub struct ProcessFlowRecord {
    pub kind: EntryKind,
    pub title: String,
    pub session: String,
    pub host: String,
    pub process_id: u32,
    pub thread_id: u32,
    pub timestamp: i64,
}

#[derive(Debug, Clone)]
pub struct WatchRecord {
    pub name: String,
    pub value: String,
    pub watch_type: u8,
    pub group: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone)]
pub struct StreamRecord {
    pub channel: String,
    pub stream_type: u8,
    pub group: String,
    pub timestamp: i64,
    pub data: Vec<u8>,
}

/// A decoded ingest record
#[derive(Debug, Clone)]
pub enum IngestRecord {
    Auth { token: String },
    LogHeader { app_name: String },
    RoomBind { room: String },
    LogEntry(LogEntryRecord),
    ProcessFlow(ProcessFlowRecord),
    Watch(WatchRecord),
    Stream(StreamRecord),
    Control { command: ControlCommand },
}

/// Read one raw frame. `Ok(None)` on a clean EOF between records;
/// truncation inside a record is an error.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<(u16, Bytes)>> {
    let mut first = [0u8; 1];
    if reader.read(&mut first).await? == 0 {
        return Ok(None);
    }
    let mut rest = [0u8; 5];
    reader.read_exact(&mut rest).await?;

    let record_type = u16::from_be_bytes([first[0], rest[0]]);
    let len = u32::from_be_bytes([rest[1], rest[2], rest[3], rest[4]]) as usize;
    if len > MAX_FRAME_LEN {
        return Err(LanternError::OversizedFrame {
            size: len,
            max: MAX_FRAME_LEN,
        });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some((record_type, Bytes::from(payload))))
}

/// Bounds-checked payload reader
struct PayloadReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.buf.len() - self.pos < n {
            return Err(LanternError::Protocol("truncated payload".to_string()));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        Ok(u64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    fn string(&mut self) -> Result<String> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| LanternError::Protocol("invalid utf-8 in string field".to_string()))
    }

    fn bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    fn timestamp(&mut self) -> Result<i64> {
        // Microseconds on the wire, milliseconds in memory
        Ok((self.u64()? / 1_000) as i64)
    }

    fn finish(&self) -> Result<()> {
        if self.pos != self.buf.len() {
            return Err(LanternError::Protocol(format!(
                "{} trailing bytes in payload",
                self.buf.len() - self.pos
            )));
        }
        Ok(())
    }
}

const FLAG_TITLE: u8 = 0b0001;
const FLAG_COLOR: u8 = 0b0010;
const FLAG_PAYLOAD: u8 = 0b0100;
const FLAG_CTX: u8 = 0b1000;

/// Decode one raw frame into a typed record
pub fn decode(record_type: u16, payload: &Bytes) -> Result<IngestRecord> {
    let record_type = RecordType::try_from(record_type)?;
    let mut reader = PayloadReader::new(payload);

    let record = match record_type {
        RecordType::Auth => {
            let token = reader.string()?;
            if !(MIN_TOKEN_LEN..=MAX_TOKEN_LEN).contains(&token.len()) {
                return Err(LanternError::Protocol(format!(
                    "auth token length {} outside {}-{}",
                    token.len(),
                    MIN_TOKEN_LEN,
                    MAX_TOKEN_LEN
                )));
            }
            IngestRecord::Auth { token }
        }
        RecordType::LogHeader => IngestRecord::LogHeader {
            app_name: reader.string()?,
        },
        RecordType::RoomBind => IngestRecord::RoomBind {
            room: reader.string()?,
        },
        RecordType::LogEntry => {
            let flags = reader.u8()?;
            let level = Level::try_from(reader.u8()?)
                .map_err(|v| LanternError::Protocol(format!("unknown level {v}")))?;
            let kind = EntryKind::try_from(reader.u16()?)
                .map_err(|v| LanternError::Protocol(format!("unknown entry kind {v}")))?;
            let session = reader.string()?;
            let host = reader.string()?;
            let process_id = reader.u32()?;
            let thread_id = reader.u32()?;
            let timestamp = reader.timestamp()?;
            let title = (flags & FLAG_TITLE != 0)
                .then(|| reader.string())
                .transpose()?;
            let color = (flags & FLAG_COLOR != 0).then(|| reader.u32()).transpose()?;
            let payload = (flags & FLAG_PAYLOAD != 0)
                .then(|| reader.bytes())
                .transpose()?;
            let ctx = if flags & FLAG_CTX != 0 {
                let count = reader.u16()?;
                let mut map = HashMap::with_capacity(count as usize);
                for _ in 0..count {
                    let key = reader.string()?;
                    let value = reader.string()?;
                    map.insert(key, value);
                }
                Some(map)
            } else {
                None
            };
            IngestRecord::LogEntry(LogEntryRecord {
                level,
                kind,
                session,
                host,
                process_id,
                thread_id,
                timestamp,
                title,
                color,
                payload,
                ctx,
            })
        }
        RecordType::ProcessFlow => {
            let kind = match reader.u8()? {
                0 => EntryKind::EnterMethod,
                1 => EntryKind::LeaveMethod,
                other => {
                    return Err(LanternError::Protocol(format!(
                        "unknown process-flow subtype {other}"
                    )));
                }
            };
            IngestRecord::ProcessFlow(ProcessFlowRecord {
                kind,
                title: reader.string()?,
                session: reader.string()?,
                host: reader.string()?,
                process_id: reader.u32()?,
                thread_id: reader.u32()?,
                timestamp: reader.timestamp()?,
            })
        }
        RecordType::Watch => IngestRecord::Watch(WatchRecord {
            name: reader.string()?,
            value: reader.string()?,
            watch_type: reader.u8()?,
            group: reader.string()?,
            timestamp: reader.timestamp()?,
        }),
        RecordType::Stream => IngestRecord::Stream(StreamRecord {
            channel: reader.string()?,
            stream_type: reader.u8()?,
            group: reader.string()?,
            timestamp: reader.timestamp()?,
            data: reader.bytes()?,
        }),
        RecordType::Control => IngestRecord::Control {
            command: ControlCommand::try_from(reader.u8()?)?,
        },
    };

    reader.finish()?;
    Ok(record)
}
