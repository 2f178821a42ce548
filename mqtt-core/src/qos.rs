use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::err::{DecodeError, DecodeErrorKind};

#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Debug, Hash, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum QosLevel {
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl TryFrom<u8> for QosLevel {
    type Error = DecodeError;
    fn try_from(value: u8) -> Result<Self, DecodeError> {
        let out = match value {
            0 => Self::AtMostOnce,
            1 => Self::AtLeastOnce,
            2 => Self::ExactlyOnce,
            _ => {
                return Err(DecodeError::new(
                    DecodeErrorKind::InvalidQos,
                    format!("Invalid QoS: {value}, only values 0-2 are valid"),
                ));
            }
        };

        return Ok(out);
    }
}

impl QosLevel {
    /// Delivery QoS to a subscriber is the minimum of the publisher's QoS and
    /// the QoS the subscriber requested at SUBSCRIBE time (MQTT-3.8.4-6 downgrade rule).
    pub fn downgrade(self, subscriber: QosLevel) -> QosLevel {
        return self.min(subscriber);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_from_rejects_out_of_range() {
        assert!(QosLevel::try_from(3).is_err());
    }

    #[test]
    fn downgrade_takes_the_lower_qos() {
        assert_eq!(
            QosLevel::ExactlyOnce.downgrade(QosLevel::AtLeastOnce),
            QosLevel::AtLeastOnce
        );
        assert_eq!(
            QosLevel::AtMostOnce.downgrade(QosLevel::ExactlyOnce),
            QosLevel::AtMostOnce
        );
    }
}
