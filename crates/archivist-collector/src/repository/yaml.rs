use archivist_common::{Error, Result};

use super::RecordEncoder;
use crate::record::ResourceRecord;

/// Writes Kubernetes objects as YAML documents
///
/// A second record with the same path becomes a second document of the file.
#[derive(Clone, Copy, Debug, Default)]
pub struct YamlEncoding;

impl RecordEncoder for YamlEncoding {
    type Record = ResourceRecord;

    fn encode(&self, record: &ResourceRecord, fresh: bool) -> Result<Vec<u8>> {
        let body = serde_yaml::to_string(&record.body)
            .map_err(|e| Error::serialization_for_kind(&record.path, e.to_string()))?;
        let mut out = String::with_capacity(body.len() + 4);
        if !fresh {
            out.push_str("---\n");
        }
        out.push_str(&body);
        Ok(out.into_bytes())
    }
}
