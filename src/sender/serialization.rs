use super::proto::{Content, Log, LogGroup, LogGroupList, LogTag, PACKAGE_ID_TAG};
use crate::buffer::Batch;
use crate::domain::Record;
use prost::Message;
use prost::encoding::encoded_len_varint;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SerializationError {
    #[error("JSON serialization failed: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("IO error during serialization: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Batch is empty")]
    EmptyBatch,
}

/// Wire format of a request body before compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadFormat {
    /// `LogGroupList` protobuf, the collector's native format.
    #[default]
    Protobuf,
    /// Newline-delimited JSON: one metadata line, then one line per record.
    Json,
}

impl PayloadFormat {
    pub fn content_type(self) -> &'static str {
        match self {
            PayloadFormat::Protobuf => "application/x-protobuf",
            PayloadFormat::Json => "application/json",
        }
    }
}

impl fmt::Display for PayloadFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadFormat::Protobuf => write!(f, "protobuf"),
            PayloadFormat::Json => write!(f, "json"),
        }
    }
}

impl FromStr for PayloadFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "protobuf" | "pb" => Ok(PayloadFormat::Protobuf),
            "json" | "ndjson" => Ok(PayloadFormat::Json),
            other => Err(format!("unknown payload format '{other}'")),
        }
    }
}

#[derive(Serialize)]
struct BatchMetadata<'a> {
    topic_id: &'a str,
    source: &'a str,
    package_id: &'a str,
    batch_id: &'a str,
    record_count: usize,
    producer_version: &'a str,
}

/// Turns sealed batches into request bodies and sizes records for batching.
#[derive(Debug, Clone)]
pub struct BatchSerializer {
    format: PayloadFormat,
    source: String,
}

impl BatchSerializer {
    pub fn new(format: PayloadFormat, source: impl Into<String>) -> Self {
        Self {
            format,
            source: source.into(),
        }
    }

    pub fn format(&self) -> PayloadFormat {
        self.format
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Exact number of bytes `record` adds to a serialized batch body.
    ///
    /// For protobuf this is the length of one repeated `Log` entry inside the
    /// log group, tag and length prefix included. For JSON it is the record
    /// line plus its newline.
    pub fn record_size(&self, record: &Record) -> usize {
        match self.format {
            PayloadFormat::Protobuf => protobuf_record_size(record),
            PayloadFormat::Json => json_record_size(record),
        }
    }

    pub fn serialize(&self, batch: &Batch, package_id: &str) -> Result<Vec<u8>, SerializationError> {
        if batch.is_empty() {
            return Err(SerializationError::EmptyBatch);
        }

        match self.format {
            PayloadFormat::Protobuf => Ok(self.to_log_group_list(batch, package_id).encode_to_vec()),
            PayloadFormat::Json => self.serialize_ndjson(batch, package_id),
        }
    }

    fn to_log_group_list(&self, batch: &Batch, package_id: &str) -> LogGroupList {
        let logs = batch
            .records()
            .iter()
            .map(|record| Log {
                time: record.time(),
                contents: record
                    .fields()
                    .iter()
                    .map(|field| Content {
                        key: field.key.clone(),
                        value: field.value.clone(),
                    })
                    .collect(),
            })
            .collect();

        let group = LogGroup {
            logs,
            context_flow: None,
            filename: None,
            source: (!self.source.is_empty()).then(|| self.source.clone()),
            log_tags: vec![LogTag {
                key: PACKAGE_ID_TAG.to_string(),
                value: package_id.to_string(),
            }],
        };

        LogGroupList {
            log_group_list: vec![group],
        }
    }

    fn serialize_ndjson(&self, batch: &Batch, package_id: &str) -> Result<Vec<u8>, SerializationError> {
        let mut buffer = Vec::with_capacity(batch.byte_size().saturating_add(256));

        let metadata = BatchMetadata {
            topic_id: batch.destination(),
            source: &self.source,
            package_id,
            batch_id: batch.id(),
            record_count: batch.len(),
            producer_version: crate::VERSION,
        };
        serde_json::to_writer(&mut buffer, &metadata)?;
        buffer.write_all(b"\n")?;

        for record in batch.records() {
            serde_json::to_writer(&mut buffer, record)?;
            buffer.write_all(b"\n")?;
        }

        Ok(buffer)
    }
}

fn string_field_len(value: &str) -> usize {
    // proto3 omits empty strings
    if value.is_empty() {
        0
    } else {
        1 + encoded_len_varint(value.len() as u64) + value.len()
    }
}

fn protobuf_record_size(record: &Record) -> usize {
    let time_len = if record.time() == 0 {
        0
    } else {
        1 + encoded_len_varint(record.time() as u64)
    };

    let contents_len: usize = record
        .fields()
        .iter()
        .map(|field| {
            let content_len = string_field_len(&field.key) + string_field_len(&field.value);
            1 + encoded_len_varint(content_len as u64) + content_len
        })
        .sum();

    let log_len = time_len + contents_len;
    1 + encoded_len_varint(log_len as u64) + log_len
}

#[derive(Default)]
struct ByteCounter(usize);

impl Write for ByteCounter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0 += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn json_record_size(record: &Record) -> usize {
    let mut counter = ByteCounter::default();
    match serde_json::to_writer(&mut counter, record) {
        Ok(()) => counter.0 + 1,
        Err(_) => record
            .fields()
            .iter()
            .map(|field| field.key.len() + field.value.len() + 32)
            .sum::<usize>()
            .saturating_add(32),
    }
}
