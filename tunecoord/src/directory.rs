//! Channel directory: resolves channel and program references into engine
//! transport identifiers.

use std::collections::HashMap;

use tunecoord_protocol::{Channel, ChannelId, CoordError, Program, ProgramId, TargetRef};

/// Lookup interface implemented by the EPG/channel store collaborator.
pub trait ChannelDirectory: Send + Sync {
    fn channel(&self, id: ChannelId) -> Option<Channel>;
    fn channel_by_dvb_uri(&self, dvb_uri: &str) -> Option<Channel>;
    fn program(&self, id: ProgramId) -> Option<Program>;
}

/// A target resolved down to a channel, and the event when one was named.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub channel: Channel,
    pub program: Option<Program>,
}

impl ResolvedTarget {
    /// Transport identifier handed to the engine.
    pub fn dvb_uri(&self) -> &str {
        &self.channel.dvb_uri
    }
}

/// Resolve `target` against `directory`.
///
/// Unknown channels and programs fail with [`CoordError::Unknown`].
pub fn resolve(
    directory: &dyn ChannelDirectory,
    target: TargetRef,
) -> Result<ResolvedTarget, CoordError> {
    match target {
        TargetRef::Channel(id) => directory
            .channel(id)
            .map(|channel| ResolvedTarget {
                channel,
                program: None,
            })
            .ok_or_else(|| CoordError::Unknown(format!("no channel {}", id))),
        TargetRef::Program(id) => {
            let program = directory
                .program(id)
                .ok_or_else(|| CoordError::Unknown(format!("no program {}", id)))?;
            let channel = directory.channel(program.channel_id).ok_or_else(|| {
                CoordError::Unknown(format!(
                    "program {} references missing channel {}",
                    id, program.channel_id
                ))
            })?;
            Ok(ResolvedTarget {
                channel,
                program: Some(program),
            })
        }
    }
}

/// In-memory directory, filled from configuration.
#[derive(Default)]
pub struct StaticDirectory {
    channels: HashMap<ChannelId, Channel>,
    programs: HashMap<ProgramId, Program>,
}

impl StaticDirectory {
    pub fn new(channels: Vec<Channel>, programs: Vec<Program>) -> Self {
        Self {
            channels: channels.into_iter().map(|c| (c.id, c)).collect(),
            programs: programs.into_iter().map(|p| (p.id, p)).collect(),
        }
    }

    pub fn channels(&self) -> Vec<Channel> {
        let mut list: Vec<Channel> = self.channels.values().cloned().collect();
        list.sort_by_key(|c| c.id);
        list
    }
}

impl ChannelDirectory for StaticDirectory {
    fn channel(&self, id: ChannelId) -> Option<Channel> {
        self.channels.get(&id).cloned()
    }

    fn channel_by_dvb_uri(&self, dvb_uri: &str) -> Option<Channel> {
        self.channels
            .values()
            .find(|c| c.dvb_uri == dvb_uri)
            .cloned()
    }

    fn program(&self, id: ProgramId) -> Option<Program> {
        self.programs.get(&id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tunecoord_protocol::ServiceType;

    fn directory() -> StaticDirectory {
        StaticDirectory::new(
            vec![Channel {
                id: 1,
                dvb_uri: "dvb://233a.1041.1041".into(),
                name: "One".into(),
                service_type: ServiceType::AudioVideo,
            }],
            vec![
                Program {
                    id: 10,
                    channel_id: 1,
                    title: "News".into(),
                    start_ms: 0,
                    end_ms: 60_000,
                    event_id: Some(1),
                },
                Program {
                    id: 11,
                    channel_id: 99,
                    title: "Orphan".into(),
                    start_ms: 0,
                    end_ms: 60_000,
                    event_id: None,
                },
            ],
        )
    }

    #[test]
    fn test_resolve_targets() {
        let dir = directory();
        let ch = resolve(&dir, TargetRef::Channel(1)).unwrap();
        assert_eq!(ch.dvb_uri(), "dvb://233a.1041.1041");
        assert!(ch.program.is_none());

        let prog = resolve(&dir, TargetRef::Program(10)).unwrap();
        assert_eq!(prog.program.unwrap().title, "News");

        assert!(matches!(resolve(&dir, TargetRef::Channel(5)), Err(CoordError::Unknown(_))));
        assert!(matches!(resolve(&dir, TargetRef::Program(11)), Err(CoordError::Unknown(_))));
    }

    #[test]
    fn test_lookup_by_dvb_uri() {
        let dir = directory();
        assert_eq!(dir.channel_by_dvb_uri("dvb://233a.1041.1041").unwrap().id, 1);
        assert!(dir.channel_by_dvb_uri("dvb://0.0.0").is_none());
    }
}
