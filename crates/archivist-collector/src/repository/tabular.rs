use chrono::SecondsFormat;

use archivist_common::{Error, Result};

use super::RecordEncoder;
use crate::record::MetricRow;

const HEADER: [&str; 3] = ["timestamp", "labels", "value"];

/// Writes metric samples as CSV rows, one file per metric
#[derive(Clone, Copy, Debug, Default)]
pub struct TabularEncoding;

impl RecordEncoder for TabularEncoding {
    type Record = MetricRow;

    fn encode(&self, row: &MetricRow, fresh: bool) -> Result<Vec<u8>> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        if fresh {
            writer.write_record(HEADER).map_err(csv_error)?;
        }
        writer
            .write_record([
                row.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
                row.labels_text(),
                row.value.clone(),
            ])
            .map_err(csv_error)?;
        writer
            .into_inner()
            .map_err(|e| Error::serialization_for_kind("csv", e.to_string()))
    }
}

fn csv_error(e: csv::Error) -> Error {
    Error::serialization_for_kind("csv", e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;

    fn row(value: &str) -> MetricRow {
        MetricRow {
            metric: "node_memory_MemAvailable_bytes".to_string(),
            labels: BTreeMap::from([("instance".to_string(), "node-1".to_string())]),
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            value: value.to_string(),
        }
    }

    #[test]
    fn first_row_carries_the_header() {
        let bytes = TabularEncoding.encode(&row("42"), true).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            "timestamp,labels,value\n2024-03-01T12:00:00Z,instance=node-1,42\n"
        );
    }

    #[test]
    fn later_rows_are_bare() {
        let bytes = TabularEncoding.encode(&row("43"), false).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            "2024-03-01T12:00:00Z,instance=node-1,43\n"
        );
    }

    #[test]
    fn labels_with_commas_are_quoted() {
        let mut r = row("1");
        r.labels.insert("device".to_string(), "a,b".to_string());
        let text = String::from_utf8(TabularEncoding.encode(&r, false).unwrap()).unwrap();
        assert!(text.contains("\"device=a,b;instance=node-1\""));
    }
}
