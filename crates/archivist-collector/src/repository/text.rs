use archivist_common::Result;

use super::RecordEncoder;
use crate::record::LogRecord;

/// Appends log text unchanged
#[derive(Clone, Copy, Debug, Default)]
pub struct TextEncoding;

impl RecordEncoder for TextEncoding {
    type Record = LogRecord;

    fn encode(&self, record: &LogRecord, _fresh: bool) -> Result<Vec<u8>> {
        Ok(record.text.as_bytes().to_vec())
    }
}
