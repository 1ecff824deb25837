//! Channel, program and track types exchanged with collaborators.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoordError;

/// Channel identifier as assigned by the channel directory.
pub type ChannelId = i64;

/// Program (EPG event) identifier as assigned by the channel directory.
pub type ProgramId = i64;

/// Service type of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    #[default]
    AudioVideo,
    Audio,
    Other,
}

/// A tunable broadcast service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    /// Transport identifier understood by the engine (`dvb://onid.tsid.sid`).
    pub dvb_uri: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub service_type: ServiceType,
}

/// A scheduled broadcast event on a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    pub id: ProgramId,
    pub channel_id: ChannelId,
    #[serde(default)]
    pub title: String,
    /// Start time in milliseconds since the Unix epoch.
    pub start_ms: i64,
    /// End time in milliseconds since the Unix epoch.
    pub end_ms: i64,
    /// DVB event id, if known.
    #[serde(default)]
    pub event_id: Option<u16>,
}

impl Program {
    /// Record duration bound in seconds.
    pub fn duration_secs(&self) -> i64 {
        ((self.end_ms - self.start_ms) / 1000).max(0)
    }

    /// Engine identifier of this event (`<channel uri>;<event id hex>`).
    pub fn dvb_uri(&self, channel: &Channel) -> String {
        format!("{};{:04x}", channel.dvb_uri, self.event_id.unwrap_or(0))
    }
}

/// Scheduled-recording identifier of a whole channel.
pub fn channel_schedule_uri(channel: &Channel) -> String {
    format!("{};0000", channel.dvb_uri)
}

/// Reference to the thing a session should tune to.
///
/// Parsed from `<scheme>://.../channel/<id>` or `<scheme>://.../program/<id>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetRef {
    Channel(ChannelId),
    Program(ProgramId),
}

impl FromStr for TargetRef {
    type Err = CoordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (_, rest) = s
            .split_once("://")
            .ok_or_else(|| CoordError::Invalid(format!("missing scheme: {}", s)))?;
        let mut segments = rest.trim_end_matches('/').rsplit('/');
        let id = segments
            .next()
            .and_then(|v| v.parse::<i64>().ok())
            .ok_or_else(|| CoordError::Invalid(format!("missing id: {}", s)))?;
        match segments.next() {
            Some("channel") => Ok(TargetRef::Channel(id)),
            Some("program") => Ok(TargetRef::Program(id)),
            _ => Err(CoordError::Invalid(format!("unsupported target: {}", s))),
        }
    }
}

impl fmt::Display for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetRef::Channel(id) => write!(f, "tv://channel/{}", id),
            TargetRef::Program(id) => write!(f, "tv://program/{}", id),
        }
    }
}

/// Kind of selectable track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackType {
    Audio,
    Subtitle,
}

/// A selectable audio or subtitle stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub track_type: TrackType,
    pub index: u32,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub codec: String,
    #[serde(default)]
    pub pid: u16,
    /// Audio description flag.
    #[serde(default)]
    pub ad: bool,
}

impl Track {
    /// Track details are complete once the decoder reported a codec.
    pub fn is_complete(&self) -> bool {
        self.track_type == TrackType::Subtitle || !self.codec.is_empty()
    }
}

/// Frontend signal figures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub struct SignalStatus {
    #[serde(default)]
    pub strength: i32,
    #[serde(default)]
    pub integrity: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_parse() {
        assert_eq!(
            "content://android.media.tv/channel/12".parse::<TargetRef>().unwrap(),
            TargetRef::Channel(12)
        );
        assert_eq!("tv://program/7/".parse::<TargetRef>().unwrap(), TargetRef::Program(7));
        assert!(matches!(
            "channel/12".parse::<TargetRef>(),
            Err(CoordError::Invalid(_))
        ));
        assert!(matches!(
            "tv://passthrough/12".parse::<TargetRef>(),
            Err(CoordError::Invalid(_))
        ));
        assert!("tv://channel/abc".parse::<TargetRef>().is_err());
    }

    #[test]
    fn test_program_uris() {
        let channel = Channel {
            id: 1,
            dvb_uri: "dvb://233a.1041.1041".into(),
            name: "BBC ONE".into(),
            service_type: ServiceType::AudioVideo,
        };
        let program = Program {
            id: 9,
            channel_id: 1,
            title: "News".into(),
            start_ms: 1_000,
            end_ms: 1_801_000,
            event_id: Some(0x1a2b),
        };
        assert_eq!(program.dvb_uri(&channel), "dvb://233a.1041.1041;1a2b");
        assert_eq!(program.duration_secs(), 1800);
        assert_eq!(channel_schedule_uri(&channel), "dvb://233a.1041.1041;0000");
    }
}
