//! Channel catalogue for the E4 streaming server
//!
//! | Channel     | Wire tag         | Stream | Arity | Columns            |
//! |-------------|------------------|--------|-------|--------------------|
//! | Accel       | `E4_Acc`         | `acc`  | 3     | `timestamp,x,y,z`  |
//! | BVP         | `E4_Bvp`         | `bvp`  | 1     | `timestamp,BVP`    |
//! | GSR         | `E4_Gsr`         | `gsr`  | 1     | `timestamp,GSR`    |
//! | IBI         | `E4_Ibi`         | `ibi`  | 1     | `timestamp,IBI`    |
//! | HeartRate   | `E4_Hr`          | `ibi`  | 1     | `timestamp,HR`     |
//! | Temperature | `E4_Temperature` | `tmp`  | 1     | `timestamp,Tmp`    |
//!
//! The server has no separate heart-rate stream: subscribing to `ibi` yields
//! both `E4_Ibi` and `E4_Hr` lines.

use std::collections::BTreeSet;
use std::fmt;

/// Physiological data channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChannelKind {
    Accel,
    Bvp,
    Gsr,
    Ibi,
    HeartRate,
    Temperature,
}

impl ChannelKind {
    /// All channels in wire-catalogue order
    pub const ALL: [ChannelKind; 6] = [
        ChannelKind::Accel,
        ChannelKind::Bvp,
        ChannelKind::Gsr,
        ChannelKind::Ibi,
        ChannelKind::HeartRate,
        ChannelKind::Temperature,
    ];

    /// Tag prefixing data lines of this channel
    pub const fn tag(self) -> &'static str {
        match self {
            ChannelKind::Accel => "E4_Acc",
            ChannelKind::Bvp => "E4_Bvp",
            ChannelKind::Gsr => "E4_Gsr",
            ChannelKind::Ibi => "E4_Ibi",
            ChannelKind::HeartRate => "E4_Hr",
            ChannelKind::Temperature => "E4_Temperature",
        }
    }

    /// Look up a channel by its exact wire tag
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.tag() == tag)
    }

    /// Number of value fields following the timestamp
    pub const fn arity(self) -> usize {
        match self {
            ChannelKind::Accel => 3,
            _ => 1,
        }
    }

    /// Server stream name used in `device_subscribe <stream> ON`
    pub const fn stream(self) -> &'static str {
        match self {
            ChannelKind::Accel => "acc",
            ChannelKind::Bvp => "bvp",
            ChannelKind::Gsr => "gsr",
            ChannelKind::Ibi | ChannelKind::HeartRate => "ibi",
            ChannelKind::Temperature => "tmp",
        }
    }

    /// Short name used for output files (`<stem>_data.csv`)
    pub const fn file_stem(self) -> &'static str {
        match self {
            ChannelKind::Accel => "acc",
            ChannelKind::Bvp => "bvp",
            ChannelKind::Gsr => "gsr",
            ChannelKind::Ibi => "ibi",
            ChannelKind::HeartRate => "hr",
            ChannelKind::Temperature => "tmp",
        }
    }

    /// Header row written once per sink
    pub const fn columns(self) -> &'static [&'static str] {
        match self {
            ChannelKind::Accel => &["timestamp", "x", "y", "z"],
            ChannelKind::Bvp => &["timestamp", "BVP"],
            ChannelKind::Gsr => &["timestamp", "GSR"],
            ChannelKind::Ibi => &["timestamp", "IBI"],
            ChannelKind::HeartRate => &["timestamp", "HR"],
            ChannelKind::Temperature => &["timestamp", "Tmp"],
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChannelKind::Accel => "Accel",
            ChannelKind::Bvp => "BVP",
            ChannelKind::Gsr => "GSR",
            ChannelKind::Ibi => "IBI",
            ChannelKind::HeartRate => "HeartRate",
            ChannelKind::Temperature => "Temperature",
        };
        f.write_str(name)
    }
}

/// Physical wristband known to the server
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Device {
    pub id: String,
}

impl Device {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// Set of channels enabled for a session
///
/// Fixed once the session is subscribed; there is no re-subscription while
/// streaming.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionSet {
    enabled: BTreeSet<ChannelKind>,
}

impl SubscriptionSet {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Every channel enabled
    pub fn all() -> Self {
        ChannelKind::ALL.into_iter().collect()
    }

    /// Enable or disable one channel
    pub fn set(&mut self, channel: ChannelKind, enabled: bool) {
        if enabled {
            self.enabled.insert(channel);
        } else {
            self.enabled.remove(&channel);
        }
    }

    /// Builder form of [`set`](Self::set)
    pub fn with(mut self, channel: ChannelKind) -> Self {
        self.set(channel, true);
        self
    }

    pub fn is_enabled(&self, channel: ChannelKind) -> bool {
        self.enabled.contains(&channel)
    }

    pub fn is_empty(&self) -> bool {
        self.enabled.is_empty()
    }

    /// Enabled channels in catalogue order
    pub fn channels(&self) -> impl Iterator<Item = ChannelKind> + '_ {
        self.enabled.iter().copied()
    }

    /// Distinct server streams to subscribe, in catalogue order
    pub fn streams(&self) -> Vec<&'static str> {
        let mut streams: Vec<&'static str> = Vec::new();
        for channel in self.channels() {
            let stream = channel.stream();
            if !streams.contains(&stream) {
                streams.push(stream);
            }
        }
        streams
    }
}

impl FromIterator<ChannelKind> for SubscriptionSet {
    fn from_iter<I: IntoIterator<Item = ChannelKind>>(iter: I) -> Self {
        Self {
            enabled: iter.into_iter().collect(),
        }
    }
}
