use std::{error::Error, fmt::Display};

/// Failure to decode a packet frame or a topic string. Surfaced to callers as
/// [`crate::err`]'s sole error type; higher layers (mqtt-broker) wrap this into
/// their own client/server error taxonomies.
#[derive(Debug, Clone)]
pub struct DecodeError {
    kind: DecodeErrorKind,
    message: String,
}

impl DecodeError {
    pub fn new(kind: DecodeErrorKind, message: String) -> Self {
        return Self { kind, message };
    }

    pub fn kind(&self) -> DecodeErrorKind {
        return self.kind;
    }

    pub fn message(&self) -> &str {
        return &self.message;
    }
}

impl Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl Error for DecodeError {}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeErrorKind {
    MalformedJson,
    MissingType,
    UnknownType,
    MissingField,
    MalformedTopicFilter,
    MalformedTopicName,
    InvalidQos,
}

impl From<serde_json::Error> for DecodeError {
    fn from(value: serde_json::Error) -> Self {
        return Self::new(DecodeErrorKind::MalformedJson, value.to_string());
    }
}
