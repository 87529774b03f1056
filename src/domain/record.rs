use super::error::ProducerError;
use serde::Serialize;

/// One key/value pair of a log record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Field {
    pub key: String,
    pub value: String,
}

impl Field {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl<K: Into<String>, V: Into<String>> From<(K, V)> for Field {
    fn from((key, value): (K, V)) -> Self {
        Field::new(key, value)
    }
}

/// A single immutable log entry.
///
/// `time` is epoch milliseconds. Fields keep the order they were given in;
/// duplicate keys are allowed and passed through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Record {
    time: i64,
    fields: Vec<Field>,
}

impl Record {
    pub fn new(time: i64, fields: Vec<Field>) -> Result<Self, ProducerError> {
        if time <= 0 {
            return Err(ProducerError::InvalidRecord {
                reason: format!("time must be a positive epoch millisecond value, got {time}"),
            });
        }
        if fields.is_empty() {
            return Err(ProducerError::InvalidRecord {
                reason: "record must carry at least one field".to_string(),
            });
        }

        Ok(Self { time, fields })
    }

    /// Build a record stamped with the current wall-clock time.
    pub fn now<I, F>(fields: I) -> Result<Self, ProducerError>
    where
        I: IntoIterator<Item = F>,
        F: Into<Field>,
    {
        let time = chrono::Utc::now().timestamp_millis();
        Self::new(time, fields.into_iter().map(Into::into).collect())
    }

    pub fn time(&self) -> i64 {
        self.time
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|field| field.key == key)
            .map(|field| field.value.as_str())
    }
}
