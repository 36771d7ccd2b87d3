//! E4 streaming server line protocol

pub mod channel;
pub mod command;
pub mod framer;
pub mod parser;

pub use channel::{ChannelKind, Device, SubscriptionSet};
pub use command::{Command, parse_device_list};
pub use framer::{Framed, LineFramer};
pub use parser::{DEVICE_LOST_NOTICE, Field, Line, Sample, is_ack, parse_line};
