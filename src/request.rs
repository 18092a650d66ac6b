//! Requests and responses
//!
//! The caller-facing record operations, how they are checked and turned into
//! wire messages, and how a wire reply becomes a `Response`.

use std::net::IpAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use uuid::Uuid;

use crate::compression::{maybe_compress, Compressor};
use crate::config::Config;
use crate::error::{RelayError, Result};
use crate::protocol::{
    Message, MessageHeader, MetaField, MetadataComponent, Opcode, PayloadComponent, PayloadValue,
    ServerStatus, SourceInfo, MAX_CORRELATION_ID_LEN,
};

/// Record operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Get,
    Update,
    Set,
    Destroy,
    /// Update that only applies when the stored version matches
    CompareAndSet,
}

impl Operation {
    pub fn opcode(self) -> Opcode {
        match self {
            Operation::Create => Opcode::Create,
            Operation::Get => Opcode::Get,
            Operation::Update | Operation::CompareAndSet => Opcode::Update,
            Operation::Set => Opcode::Set,
            Operation::Destroy => Opcode::Destroy,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Get => "get",
            Operation::Update => "update",
            Operation::Set => "set",
            Operation::Destroy => "destroy",
            Operation::CompareAndSet => "compare_and_set",
        }
    }

    fn carries_value(self) -> bool {
        matches!(
            self,
            Operation::Create | Operation::Update | Operation::Set | Operation::CompareAndSet
        )
    }

    /// Whether an unset TTL is replaced by the configured default
    fn defaults_ttl(self) -> bool {
        matches!(self, Operation::Create | Operation::Set)
    }
}

/// A record operation as submitted by the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub operation: Operation,
    pub key: Bytes,
    pub value: Option<Bytes>,
    /// Expected record version; 0 means unconditional
    pub version: u32,
    /// Lifetime in seconds; 0 means default (create/set) or unchanged
    pub ttl_secs: u32,
    pub correlation_id: Option<Vec<u8>>,
}

impl Request {
    fn new(operation: Operation, key: impl AsRef<[u8]>, value: Option<&[u8]>) -> Self {
        Self {
            operation,
            key: Bytes::copy_from_slice(key.as_ref()),
            value: value.map(Bytes::copy_from_slice),
            version: 0,
            ttl_secs: 0,
            correlation_id: None,
        }
    }

    pub fn create(key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Self {
        Self::new(Operation::Create, key, Some(value.as_ref()))
    }

    pub fn get(key: impl AsRef<[u8]>) -> Self {
        Self::new(Operation::Get, key, None)
    }

    pub fn update(key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Self {
        Self::new(Operation::Update, key, Some(value.as_ref()))
    }

    pub fn set(key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Self {
        Self::new(Operation::Set, key, Some(value.as_ref()))
    }

    pub fn destroy(key: impl AsRef<[u8]>) -> Self {
        Self::new(Operation::Destroy, key, None)
    }

    pub fn compare_and_set(key: impl AsRef<[u8]>, value: impl AsRef<[u8]>, version: u32) -> Self {
        Self {
            version,
            ..Self::new(Operation::CompareAndSet, key, Some(value.as_ref()))
        }
    }

    pub fn with_ttl(mut self, ttl_secs: u32) -> Self {
        self.ttl_secs = ttl_secs;
        self
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<Vec<u8>>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Check the request against the configured limits
    pub fn validate(&self, config: &Config) -> Result<()> {
        if self.key.is_empty() {
            return Err(RelayError::Validation("key must not be empty".to_string()));
        }
        if self.key.len() > config.max_key_size {
            return Err(RelayError::Validation(format!(
                "key length {} exceeds {}",
                self.key.len(),
                config.max_key_size
            )));
        }
        if let Some(value) = &self.value {
            if !self.operation.carries_value() {
                return Err(RelayError::Validation(format!(
                    "{} does not take a value",
                    self.operation.name()
                )));
            }
            if value.len() > config.max_value_size {
                return Err(RelayError::Validation(format!(
                    "value length {} exceeds {}",
                    value.len(),
                    config.max_value_size
                )));
            }
        }
        if self.ttl_secs > config.max_ttl_secs {
            return Err(RelayError::Validation(format!(
                "ttl {}s exceeds {}s",
                self.ttl_secs, config.max_ttl_secs
            )));
        }
        if self.operation == Operation::CompareAndSet && self.version == 0 {
            return Err(RelayError::Validation(
                "compare_and_set needs a version of at least 1".to_string(),
            ));
        }
        if let Some(id) = &self.correlation_id {
            if id.len() > MAX_CORRELATION_ID_LEN {
                return Err(RelayError::Validation(format!(
                    "correlation id length {} exceeds {}",
                    id.len(),
                    MAX_CORRELATION_ID_LEN
                )));
            }
        }
        Ok(())
    }

    /// Validate, apply defaults and compress; the result is reused across
    /// retry attempts
    pub fn prepare(&self, config: &Config, compressor: &dyn Compressor) -> Result<PreparedRequest> {
        self.validate(config)?;

        let ttl_secs = if self.ttl_secs == 0 && self.operation.defaults_ttl() {
            config.default_ttl_secs
        } else {
            self.ttl_secs
        };

        let mut compression_percent = 0;
        let value = match &self.value {
            None => None,
            Some(data) if data.is_empty() => None,
            Some(data) => {
                let compressed = if config.use_compression {
                    maybe_compress(compressor, data, config.compression_threshold)?
                } else {
                    None
                };
                Some(match compressed {
                    Some((packed, percent)) => {
                        compression_percent = percent;
                        PayloadValue::Compressed {
                            compression: compressor.compression_type(),
                            data: Bytes::from(packed),
                        }
                    }
                    None => PayloadValue::Clear(data.clone()),
                })
            }
        };

        let request_id = Uuid::new_v4();
        let correlation_id = self
            .correlation_id
            .clone()
            .unwrap_or_else(|| request_id.hyphenated().to_string().into_bytes());

        Ok(PreparedRequest {
            operation: self.operation,
            namespace: Bytes::copy_from_slice(config.namespace.as_bytes()),
            key: self.key.clone(),
            value,
            version: self.version,
            ttl_secs,
            request_id,
            correlation_id,
            app_name: config.app_name.clone().into_bytes(),
            compression_percent,
        })
    }
}

fn now_secs() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

/// A validated request ready to be put on the wire
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub operation: Operation,
    pub namespace: Bytes,
    pub key: Bytes,
    pub value: Option<PayloadValue>,
    pub version: u32,
    pub ttl_secs: u32,
    pub request_id: Uuid,
    pub correlation_id: Vec<u8>,
    pub app_name: Vec<u8>,
    pub compression_percent: u32,
}

impl PreparedRequest {
    /// Build the wire message for one attempt
    pub fn to_message(&self, opaque: u32, local_ip: IpAddr) -> Message {
        let mut metadata = MetadataComponent::new();
        if self.version != 0 {
            metadata.push(MetaField::Version(self.version));
        }
        if matches!(self.operation, Operation::Create | Operation::Set) {
            metadata.push(MetaField::CreationTime(now_secs()));
        }
        if self.ttl_secs != 0 {
            metadata.push(MetaField::TimeToLive(self.ttl_secs));
        }
        metadata.push(MetaField::CorrelationId(self.correlation_id.clone()));
        metadata.push(MetaField::RequestId(self.request_id));
        metadata.push(MetaField::SourceInfo(SourceInfo::new(
            local_ip,
            0,
            self.app_name.clone(),
        )));

        let payload = PayloadComponent::new(self.namespace.clone(), self.key.clone(), self.value.clone());

        Message::new(MessageHeader::request(self.operation.opcode(), opaque))
            .with_metadata(metadata)
            .with_payload(payload)
    }

    /// Turn the proxy's reply into a caller response
    pub fn parse_response(&self, message: Message, compressor: &dyn Compressor) -> Result<Response> {
        let metadata = message.metadata.unwrap_or_default();

        match metadata.request_id() {
            Some(id) if id != self.request_id => {
                return Err(RelayError::Protocol(format!(
                    "response request id {} does not match {}",
                    id, self.request_id
                )));
            }
            Some(_) => {}
            None => tracing::debug!(request_id = %self.request_id, "Response carries no request id"),
        }

        let status = ServerStatus::from_code(message.header.status).normalized();
        if !status.is_txn_ok() {
            return Err(RelayError::Server {
                status,
                message: status.error_text().to_string(),
            });
        }

        let (key, value) = match message.payload {
            Some(payload) => {
                let key = if payload.key.is_empty() {
                    self.key.clone()
                } else {
                    payload.key
                };
                let value = payload.value.map(|v| decode_value(v, compressor)).transpose()?;
                (key, value)
            }
            None => (self.key.clone(), None),
        };

        Ok(Response {
            key,
            value,
            version: metadata.version().unwrap_or(0),
            ttl_secs: metadata.ttl().unwrap_or(0),
            creation_time: metadata.creation_time().unwrap_or(0),
            status,
            request_id: self.request_id,
            request_handling_time_us: metadata.request_handling_time().unwrap_or(0),
            message_size: message.header.message_size,
            compression_percent: self.compression_percent,
        })
    }
}

fn decode_value(value: PayloadValue, compressor: &dyn Compressor) -> Result<Bytes> {
    match value {
        PayloadValue::Compressed { compression, data } => {
            if compression != compressor.compression_type() {
                return Err(RelayError::Compression(format!(
                    "unsupported compression: {}",
                    compression.name()
                )));
            }
            Ok(Bytes::from(compressor.decompress(&data)?))
        }
        PayloadValue::Clear(data)
        | PayloadValue::ClientEncrypted(data)
        | PayloadValue::ProxyEncrypted(data) => Ok(data),
    }
}

/// Result of a record operation the proxy answered legitimately
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub key: Bytes,
    pub value: Option<Bytes>,
    pub version: u32,
    pub ttl_secs: u32,
    /// Seconds since the epoch
    pub creation_time: u32,
    pub status: ServerStatus,
    pub request_id: Uuid,
    pub request_handling_time_us: u32,
    /// Size of the reply on the wire
    pub message_size: u32,
    /// Space saved by compressing the request value
    pub compression_percent: u32,
}

impl Response {
    pub fn is_success(&self) -> bool {
        self.status == ServerStatus::Success
    }
}
