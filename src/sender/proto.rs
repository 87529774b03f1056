//! Protobuf wire model of a structured log upload.
//!
//! The collector accepts one `LogGroupList` per request. Each producer batch
//! becomes exactly one `LogGroup`.

#[derive(Clone, PartialEq, prost::Message)]
pub struct Content {
    #[prost(string, tag = "1")]
    pub key: String,
    #[prost(string, tag = "2")]
    pub value: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Log {
    #[prost(int64, tag = "1")]
    pub time: i64,
    #[prost(message, repeated, tag = "2")]
    pub contents: Vec<Content>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct LogTag {
    #[prost(string, tag = "1")]
    pub key: String,
    #[prost(string, tag = "2")]
    pub value: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct LogGroup {
    #[prost(message, repeated, tag = "1")]
    pub logs: Vec<Log>,
    #[prost(string, optional, tag = "2")]
    pub context_flow: Option<String>,
    #[prost(string, optional, tag = "3")]
    pub filename: Option<String>,
    #[prost(string, optional, tag = "4")]
    pub source: Option<String>,
    #[prost(message, repeated, tag = "5")]
    pub log_tags: Vec<LogTag>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct LogGroupList {
    #[prost(message, repeated, tag = "1")]
    pub log_group_list: Vec<LogGroup>,
}

/// Log tag key carrying the package id used for server-side de-duplication.
pub const PACKAGE_ID_TAG: &str = "__pack_id__";
