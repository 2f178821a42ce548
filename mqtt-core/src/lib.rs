pub mod err;
pub mod id;
pub mod packet;
pub mod qos;
pub mod topic;

pub use packet::{Packet, Will};
pub use qos::QosLevel;
pub use topic::TopicFilter;
