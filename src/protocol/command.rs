//! Control command vocabulary
//!
//! Commands are ASCII lines terminated by `\r\n`. The server answers each
//! one with a single `R <command> ...` line; success is signalled by a last
//! token starting with `OK`.
//!
//! ```text
//! > device_list
//! < R device_list 2 | 9ff167 Empatica_E4 | 740163 Empatica_E4
//! > device_connect 9ff167
//! < R device_connect OK
//! > device_subscribe acc ON
//! < R device_subscribe acc OK
//! ```

use super::channel::Device;
use std::fmt;

/// Fixed command set understood by the streaming server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    DeviceList,
    DeviceConnect(String),
    DeviceDisconnect,
    Pause(bool),
    Subscribe(&'static str),
}

impl Command {
    /// Operation name carried by `Error::Control`
    pub fn name(&self) -> &'static str {
        match self {
            Command::DeviceList => "device_list",
            Command::DeviceConnect(_) => "device_connect",
            Command::DeviceDisconnect => "device_disconnect",
            Command::Pause(_) => "pause",
            Command::Subscribe(_) => "device_subscribe",
        }
    }

    /// Whether `line` is the server's answer to this command
    ///
    /// Answers echo the command as `R <name>`; subscription answers also
    /// echo the stream, so a late answer for one stream is never taken as
    /// the answer for the next.
    pub fn is_reply(&self, line: &str) -> bool {
        let mut tokens = line.split_whitespace();
        if tokens.next() != Some("R") || tokens.next() != Some(self.name()) {
            return false;
        }
        match self {
            Command::Subscribe(stream) => tokens.next() == Some(*stream),
            _ => true,
        }
    }

    /// Encoded command including the `\r\n` terminator
    pub fn to_wire(&self) -> Vec<u8> {
        format!("{}\r\n", self).into_bytes()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::DeviceList => f.write_str("device_list"),
            Command::DeviceConnect(id) => write!(f, "device_connect {}", id),
            Command::DeviceDisconnect => f.write_str("device_disconnect"),
            Command::Pause(true) => f.write_str("pause ON"),
            Command::Pause(false) => f.write_str("pause OFF"),
            Command::Subscribe(stream) => write!(f, "device_subscribe {} ON", stream),
        }
    }
}

/// Extract device ids from a `device_list` response
///
/// The response is `|`-separated; the first segment is the header
/// (`R device_list <count>`) and each following segment starts with a
/// device id.
pub fn parse_device_list(response: &str) -> Vec<Device> {
    response
        .split('|')
        .skip(1)
        .filter_map(|segment| segment.split_whitespace().next())
        .map(Device::new)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_encoding() {
        assert_eq!(Command::DeviceList.to_wire(), b"device_list\r\n");
        assert_eq!(
            Command::DeviceConnect("A02DE7".into()).to_wire(),
            b"device_connect A02DE7\r\n"
        );
        assert_eq!(Command::DeviceDisconnect.to_wire(), b"device_disconnect\r\n");
        assert_eq!(Command::Pause(true).to_wire(), b"pause ON\r\n");
        assert_eq!(Command::Pause(false).to_wire(), b"pause OFF\r\n");
        assert_eq!(
            Command::Subscribe("tmp").to_wire(),
            b"device_subscribe tmp ON\r\n"
        );
    }

    #[test]
    fn test_names() {
        assert_eq!(Command::Pause(false).name(), "pause");
        assert_eq!(Command::Subscribe("acc").name(), "device_subscribe");
    }

    #[test]
    fn test_device_list_parsing() {
        let devices = parse_device_list("R device_list 2 | 9ff167 Empatica_E4 | 740163 Empatica_E4");
        assert_eq!(devices, vec![Device::new("9ff167"), Device::new("740163")]);
    }

    #[test]
    fn test_empty_device_list() {
        assert!(parse_device_list("R device_list 0").is_empty());
        assert!(parse_device_list("").is_empty());
        // Blank segments are skipped
        assert_eq!(
            parse_device_list("R device_list 1 |  | A02DE7 Empatica_E4"),
            vec![Device::new("A02DE7")]
        );
    }

    #[test]
    fn test_reply_matching() {
        let acc = Command::Subscribe("acc");
        assert!(acc.is_reply("R device_subscribe acc OK"));
        assert!(acc.is_reply("R device_subscribe acc ERR unknown stream"));
        assert!(!acc.is_reply("R device_subscribe bvp OK"));
        assert!(!acc.is_reply("R device_subscribe"));
        assert!(Command::Pause(false).is_reply("R pause OFF OK"));
        assert!(Command::DeviceConnect("A02DE7".into()).is_reply("R device_connect OK"));
        assert!(!Command::DeviceList.is_reply("R device_connect OK"));
        assert!(!Command::DeviceList.is_reply("device_list 1 | A02DE7"));
    }
}
