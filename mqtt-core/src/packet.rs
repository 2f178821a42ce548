use serde::{Deserialize, Serialize};

use crate::err::{DecodeError, DecodeErrorKind};
use crate::qos::QosLevel;

/// Last Will and Testament, attached to a CONNECT and fired by the broker if
/// the session ends without a clean DISCONNECT.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Will {
    pub topic: String,
    pub payload: String,
    #[serde(default)]
    pub retain: bool,
}

/// The broker's packet set. Frames are newline-terminated UTF-8 JSON objects
/// tagged by `type`; this enum is the single encode/decode boundary for all
/// of them.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type")]
pub enum Packet {
    #[serde(rename = "CONNECT")]
    Connect {
        client_id: String,
        username: String,
        password: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_will: Option<Will>,
    },
    #[serde(rename = "CONNACK")]
    ConnAck { success: bool },
    #[serde(rename = "SUBSCRIBE")]
    Subscribe { topic: String, qos: QosLevel },
    #[serde(rename = "SUBACK")]
    SubAck { success: bool, topic: String },
    #[serde(rename = "PUBLISH")]
    Publish {
        topic: String,
        payload: String,
        qos: QosLevel,
        #[serde(default)]
        retain: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<u16>,
    },
    #[serde(rename = "PUBACK")]
    PubAck { id: u16 },
    #[serde(rename = "PUBREC")]
    PubRec { id: u16 },
    #[serde(rename = "PUBREL")]
    PubRel { id: u16 },
    #[serde(rename = "PUBCOMP")]
    PubComp { id: u16 },
    #[serde(rename = "DISCONNECT")]
    Disconnect,
}

impl Packet {
    /// Parses one newline-delimited JSON frame (the trailing `\n` must
    /// already be stripped by the caller's line reader).
    pub fn decode(line: &str) -> Result<Self, DecodeError> {
        if line.trim().is_empty() {
            return Err(DecodeError::new(
                DecodeErrorKind::MalformedJson,
                "empty frame".to_owned(),
            ));
        }

        let value: serde_json::Value = serde_json::from_str(line)?;
        if value.get("type").is_none() {
            return Err(DecodeError::new(
                DecodeErrorKind::MissingType,
                "packet is missing the 'type' field".to_owned(),
            ));
        }

        return serde_json::from_value(value).map_err(|err| {
            // serde's untagged-enum-style errors on an unrecognized `type`
            // read as "unknown variant"; surface that distinctly from a
            // merely malformed body so callers can tell the two apart.
            let message = err.to_string();
            if message.contains("unknown variant") {
                DecodeError::new(DecodeErrorKind::UnknownType, message)
            } else {
                DecodeError::new(DecodeErrorKind::MissingField, message)
            }
        });
    }

    /// Serializes this packet as one JSON line, including the trailing `\n`.
    pub fn encode(&self) -> String {
        let mut line = serde_json::to_string(self).expect("Packet serialization is infallible");
        line.push('\n');
        return line;
    }
}
