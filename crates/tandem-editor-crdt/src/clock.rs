//! Replica identity and logical clocks.

use std::collections::BTreeMap;
use std::fmt;

use loro::VersionVector;
use serde::{Deserialize, Serialize};

/// Identity of a replica. Doubles as the Loro peer id of its documents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(pub u64);

impl ActorId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

impl From<u64> for ActorId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Per-actor count of mutations a replica has integrated.
///
/// Built from Loro's version vector: `clock[actor]` is the number of ops by
/// `actor` the replica has seen.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Clock(BTreeMap<ActorId, u64>);

impl Clock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_version_vector(vv: &VersionVector) -> Self {
        Self(
            vv.iter()
                .filter(|(_, counter)| **counter > 0)
                .map(|(peer, counter)| (ActorId(*peer), *counter as u64))
                .collect(),
        )
    }

    pub fn to_version_vector(&self) -> VersionVector {
        self.0
            .iter()
            .map(|(actor, counter)| (actor.0, *counter as i32))
            .collect()
    }

    pub fn get(&self, actor: ActorId) -> u64 {
        self.0.get(&actor).copied().unwrap_or(0)
    }

    pub fn set(&mut self, actor: ActorId, counter: u64) {
        if counter == 0 {
            self.0.remove(&actor);
        } else {
            self.0.insert(actor, counter);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ActorId, u64)> + '_ {
        self.0.iter().map(|(a, c)| (*a, *c))
    }

    /// True when this clock has seen everything `other` has.
    pub fn covers(&self, other: &Clock) -> bool {
        other.iter().all(|(actor, counter)| self.get(actor) >= counter)
    }

    /// Pointwise maximum.
    pub fn union(&self, other: &Clock) -> Clock {
        let mut out = self.clone();
        for (actor, counter) in other.iter() {
            if counter > out.get(actor) {
                out.set(actor, counter);
            }
        }
        out
    }

    /// Total number of mutations seen.
    pub fn total(&self) -> u64 {
        self.0.values().sum()
    }
}

impl FromIterator<(ActorId, u64)> for Clock {
    fn from_iter<I: IntoIterator<Item = (ActorId, u64)>>(iter: I) -> Self {
        let mut clock = Clock::new();
        for (actor, counter) in iter {
            clock.set(actor, counter);
        }
        clock
    }
}

impl fmt::Display for Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (actor, counter)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{actor}: {counter}")?;
        }
        f.write_str("}")
    }
}
