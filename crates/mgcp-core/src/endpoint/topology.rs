//! Mixer and splitter topologies
//!
//! A topology only decides *who hears whom*. The endpoint owns the frames and
//! the mode counters that decide whether the topology runs at all.

use std::collections::BTreeMap;
use std::fmt;

use crate::connection::{ConnectionId, ConnectionMode, ConnectionType};

/// Side of a splitter a participant sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// In-gateway legs
    Inside,
    /// Network legs
    Outside,
}

impl From<ConnectionType> for Side {
    fn from(kind: ConnectionType) -> Self {
        match kind {
            ConnectionType::Local => Side::Inside,
            ConnectionType::Rtp => Side::Outside,
        }
    }
}

/// Routing strategy of an endpoint
pub trait Topology: Send + fmt::Debug {
    fn kind(&self) -> &'static str;

    fn add_participant(&mut self, id: ConnectionId, side: Side);

    fn remove_participant(&mut self, id: ConnectionId);

    /// Participants whose audio is summed into `id`'s output
    fn sources_for(&self, id: ConnectionId) -> Vec<ConnectionId>;

    fn participants(&self) -> usize;
}

/// N-way conference: everyone hears everyone else
#[derive(Debug, Default)]
pub struct MixerTopology {
    members: Vec<ConnectionId>,
}

impl MixerTopology {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Topology for MixerTopology {
    fn kind(&self) -> &'static str {
        "mixer"
    }

    fn add_participant(&mut self, id: ConnectionId, _side: Side) {
        if !self.members.contains(&id) {
            self.members.push(id);
        }
    }

    fn remove_participant(&mut self, id: ConnectionId) {
        self.members.retain(|member| *member != id);
    }

    fn sources_for(&self, id: ConnectionId) -> Vec<ConnectionId> {
        self.members.iter().copied().filter(|member| *member != id).collect()
    }

    fn participants(&self) -> usize {
        self.members.len()
    }
}

/// Two-sided forwarding: each side hears only the other side
#[derive(Debug, Default)]
pub struct SplitterTopology {
    members: BTreeMap<ConnectionId, Side>,
}

impl SplitterTopology {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Topology for SplitterTopology {
    fn kind(&self) -> &'static str {
        "splitter"
    }

    fn add_participant(&mut self, id: ConnectionId, side: Side) {
        self.members.insert(id, side);
    }

    fn remove_participant(&mut self, id: ConnectionId) {
        self.members.remove(&id);
    }

    fn sources_for(&self, id: ConnectionId) -> Vec<ConnectionId> {
        let Some(side) = self.members.get(&id).copied() else {
            return Vec::new();
        };
        self.members
            .iter()
            .filter(|(_, other)| **other != side)
            .map(|(member, _)| *member)
            .collect()
    }

    fn participants(&self) -> usize {
        self.members.len()
    }
}

/// Running counts of read, write and loopback enabled connections
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModeCounters {
    pub read: usize,
    pub write: usize,
    pub loopback: usize,
}

impl ModeCounters {
    /// Whether the topology should be running
    pub fn should_run(&self) -> bool {
        self.loopback == 0 && (self.read > 0 || self.write > 0)
    }

    /// Apply a mode transition. Returns true when `should_run` flipped.
    pub fn apply(&mut self, old: ConnectionMode, new: ConnectionMode) -> bool {
        let before = self.should_run();
        fn adjust(counter: &mut usize, was: bool, is: bool) {
            match (was, is) {
                (false, true) => *counter += 1,
                (true, false) => *counter = counter.saturating_sub(1),
                _ => {}
            }
        }
        adjust(&mut self.read, old.reads(), new.reads());
        adjust(&mut self.write, old.writes(), new.writes());
        adjust(&mut self.loopback, old.loops(), new.loops());
        before != self.should_run()
    }
}

impl fmt::Display for ModeCounters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "read={} write={} loopback={}", self.read, self.write, self.loopback)
    }
}

/// Sum frames sample by sample, clamping to the 16-bit range
pub fn mix_frames(frames: &[&[i16]], samples: usize) -> Vec<i16> {
    let mut mixed = vec![0i32; samples];
    for frame in frames {
        for (acc, sample) in mixed.iter_mut().zip(frame.iter()) {
            *acc += i32::from(*sample);
        }
    }
    mixed
        .into_iter()
        .map(|sum| sum.clamp(i16::MIN as i32, i16::MAX as i32) as i16)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mixer_excludes_self() {
        let mut mixer = MixerTopology::new();
        for id in 1..=3 {
            mixer.add_participant(ConnectionId(id), Side::Outside);
        }
        assert_eq!(mixer.sources_for(ConnectionId(2)), vec![ConnectionId(1), ConnectionId(3)]);

        mixer.remove_participant(ConnectionId(1));
        assert_eq!(mixer.sources_for(ConnectionId(2)), vec![ConnectionId(3)]);
        assert_eq!(mixer.participants(), 2);
    }

    #[test]
    fn test_splitter_forwards_across_sides() {
        let mut splitter = SplitterTopology::new();
        splitter.add_participant(ConnectionId(1), Side::Outside);
        splitter.add_participant(ConnectionId(2), Side::Outside);
        splitter.add_participant(ConnectionId(3), Side::Inside);

        assert_eq!(splitter.sources_for(ConnectionId(1)), vec![ConnectionId(3)]);
        assert_eq!(splitter.sources_for(ConnectionId(3)), vec![ConnectionId(1), ConnectionId(2)]);
        assert!(splitter.sources_for(ConnectionId(9)).is_empty());
    }

    #[test]
    fn test_counters_toggle_only_on_crossing() {
        let mut counters = ModeCounters::default();
        assert!(counters.apply(ConnectionMode::Inactive, ConnectionMode::SendRecv));
        assert!(!counters.apply(ConnectionMode::Inactive, ConnectionMode::RecvOnly));
        assert!(!counters.apply(ConnectionMode::SendRecv, ConnectionMode::SendOnly));
        assert!(counters.apply(ConnectionMode::RecvOnly, ConnectionMode::Loopback));
        assert!(!counters.should_run());
        assert!(counters.apply(ConnectionMode::Loopback, ConnectionMode::Inactive));
        assert_eq!(counters, ModeCounters { read: 0, write: 1, loopback: 0 });
    }

    #[test]
    fn test_mix_saturates() {
        let a = [i16::MAX, 100, -5];
        let b = [10, 200, i16::MIN];
        assert_eq!(mix_frames(&[&a, &b], 3), vec![i16::MAX, 300, i16::MIN]);
        assert_eq!(mix_frames(&[], 2), vec![0, 0]);
    }
}
