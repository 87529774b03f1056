use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::str::FromStr;
use thiserror::Error;
use tracing::warn;

/// Largest input the LZ4 block format accepts.
const LZ4_MAX_INPUT_SIZE: usize = 0x7E00_0000;

#[derive(Error, Debug)]
pub enum CompressionError {
    #[error("Input of {size} bytes exceeds the {codec} limit of {limit} bytes")]
    InputTooLarge {
        codec: Codec,
        size: usize,
        limit: usize,
    },
    #[error("Gzip compression failed: {0}")]
    Gzip(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    None,
    #[default]
    Lz4,
    Gzip,
}

impl Codec {
    /// Value of the `x-cls-compress-type` request header, if any.
    pub fn header_value(self) -> Option<&'static str> {
        match self {
            Codec::None => None,
            Codec::Lz4 => Some("lz4"),
            Codec::Gzip => Some("gzip"),
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Codec::None => write!(f, "none"),
            Codec::Lz4 => write!(f, "lz4"),
            Codec::Gzip => write!(f, "gzip"),
        }
    }
}

impl FromStr for Codec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "off" | "0" => Ok(Codec::None),
            "lz4" | "1" => Ok(Codec::Lz4),
            "gzip" | "gz" => Ok(Codec::Gzip),
            other => Err(format!("unknown compression codec '{other}'")),
        }
    }
}

/// Request body after compression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compressed {
    pub bytes: Vec<u8>,
    pub codec: Codec,
    /// The configured codec failed and the body went out uncompressed.
    pub fell_back: bool,
}

#[derive(Debug, Clone)]
pub struct Compressor {
    codec: Codec,
    gzip_level: flate2::Compression,
    lz4_input_limit: usize,
}

impl Compressor {
    pub fn new(codec: Codec) -> Self {
        Self {
            codec,
            gzip_level: flate2::Compression::fast(),
            lz4_input_limit: LZ4_MAX_INPUT_SIZE,
        }
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    /// Compress with the configured codec. Deterministic for a given input.
    pub fn compress(&self, raw: &[u8]) -> Result<(Vec<u8>, Codec), CompressionError> {
        match self.codec {
            Codec::None => Ok((raw.to_vec(), Codec::None)),
            Codec::Lz4 => {
                if raw.len() > self.lz4_input_limit {
                    return Err(CompressionError::InputTooLarge {
                        codec: Codec::Lz4,
                        size: raw.len(),
                        limit: self.lz4_input_limit,
                    });
                }
                Ok((lz4_flex::block::compress(raw), Codec::Lz4))
            }
            Codec::Gzip => {
                let mut encoder = flate2::write::GzEncoder::new(Vec::new(), self.gzip_level);
                encoder.write_all(raw)?;
                Ok((encoder.finish()?, Codec::Gzip))
            }
        }
    }

    /// Compress, degrading to an uncompressed body instead of failing.
    pub fn compress_or_raw(&self, raw: Vec<u8>) -> Compressed {
        match self.compress(&raw) {
            Ok((bytes, codec)) => Compressed {
                bytes,
                codec,
                fell_back: false,
            },
            Err(error) => {
                warn!(codec = %self.codec, %error, "Compression failed, sending uncompressed");
                Compressed {
                    bytes: raw,
                    codec: Codec::None,
                    fell_back: true,
                }
            }
        }
    }
}
