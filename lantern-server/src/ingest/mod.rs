pub mod session;
pub mod wire;

pub use session::{IngestAuth, IngestServer};
pub use wire::{
    ControlCommand, IngestRecord, LogEntryRecord, MAX_FRAME_LEN, ProcessFlowRecord, RecordType,
    StreamRecord, WatchRecord,
};
