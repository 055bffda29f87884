//! Interface groups and the associate graph derived from them.

use std::collections::HashMap;

use smfwarp_core::{
    config::RelayType,
    error::{ErrorKind, Result},
};

/// How members of a group forward to one another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupMode {
    /// One designated source forwards to every other member.
    Push {
        /// Source interface index.
        source: usize,
    },
    /// Any member forwards to every other member.
    Merge,
    /// MANET flooding: any member forwards to every other member, and
    /// reflecting members also back onto themselves.
    Relay,
}

/// Directed forwarding edge from one interface to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Associate {
    /// Arrival interface.
    pub src: usize,
    /// Destination interface.
    pub dst: usize,
    /// Policy of the group the edge came from.
    pub relay_type: RelayType,
}

/// Named set of interfaces sharing a relay policy and forwarding mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceGroup {
    name: String,
    relay_type: RelayType,
    mode: GroupMode,
    members: Vec<usize>,
}

impl InterfaceGroup {
    /// Creates a group. Duplicate members are ignored; a PUSH source must be
    /// a member.
    pub fn new(
        name: impl Into<String>,
        relay_type: RelayType,
        mode: GroupMode,
        members: impl IntoIterator<Item = usize>,
    ) -> Result<Self> {
        let mut unique: Vec<usize> = Vec::new();
        for member in members {
            if !unique.contains(&member) {
                unique.push(member);
            }
        }
        if unique.is_empty() {
            return Err(ErrorKind::InvalidGroup("group has no members"));
        }
        if let GroupMode::Push { source } = mode {
            if !unique.contains(&source) {
                return Err(ErrorKind::InvalidGroup("push source is not a member"));
            }
        }
        Ok(Self { name: name.into(), relay_type, mode, members: unique })
    }

    /// Group name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Relay policy.
    pub fn relay_type(&self) -> RelayType {
        self.relay_type
    }

    /// Forwarding mode.
    pub fn mode(&self) -> GroupMode {
        self.mode
    }

    /// Member interface indices.
    pub fn members(&self) -> &[usize] {
        &self.members
    }

    /// Drops `index` from the group. Returns false if the group no longer
    /// makes sense (no members, or the PUSH source was removed).
    pub(crate) fn remove_member(&mut self, index: usize) -> bool {
        self.members.retain(|m| *m != index);
        match self.mode {
            GroupMode::Push { source } if source == index => false,
            _ => !self.members.is_empty(),
        }
    }

    /// Edges contributed by this group. `reflects` tells whether an interface
    /// re-floods on its arrival channel.
    pub fn associates(&self, reflects: impl Fn(usize) -> bool) -> Vec<Associate> {
        let edge = |src, dst| Associate { src, dst, relay_type: self.relay_type };
        match self.mode {
            GroupMode::Push { source } => self
                .members
                .iter()
                .filter(|dst| **dst != source)
                .map(|dst| edge(source, *dst))
                .collect(),
            GroupMode::Merge | GroupMode::Relay => {
                let relay = self.mode == GroupMode::Relay;
                let mut edges = Vec::new();
                for &src in &self.members {
                    for &dst in &self.members {
                        if src != dst || (relay && reflects(src)) {
                            edges.push(edge(src, dst));
                        }
                    }
                }
                edges
            }
        }
    }
}

/// Associates of every group, indexed by arrival interface.
#[derive(Debug, Clone, Default)]
pub struct AssociateMap {
    by_source: HashMap<usize, Vec<Associate>>,
}

impl AssociateMap {
    /// Builds the map for `groups`, in group order.
    pub fn build<'a>(
        groups: impl IntoIterator<Item = &'a InterfaceGroup>,
        reflects: impl Fn(usize) -> bool,
    ) -> Self {
        let mut by_source: HashMap<usize, Vec<Associate>> = HashMap::new();
        for group in groups {
            for associate in group.associates(&reflects) {
                by_source.entry(associate.src).or_default().push(associate);
            }
        }
        Self { by_source }
    }

    /// Edges leaving `src`.
    pub fn from_source(&self, src: usize) -> &[Associate] {
        self.by_source.get(&src).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Total number of edges.
    pub fn len(&self) -> usize {
        self.by_source.values().map(Vec::len).sum()
    }

    /// Returns true if there are no edges.
    pub fn is_empty(&self) -> bool {
        self.by_source.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dsts(edges: &[Associate], src: usize) -> Vec<usize> {
        edges.iter().filter(|a| a.src == src).map(|a| a.dst).collect()
    }

    #[test]
    fn test_rejects_bad_groups() {
        assert!(InterfaceGroup::new("empty", RelayType::Cf, GroupMode::Merge, Vec::new()).is_err());
        let push = GroupMode::Push { source: 9 };
        assert!(InterfaceGroup::new("push", RelayType::Cf, push, [0, 1]).is_err());
    }

    #[test]
    fn test_push_edges() {
        let group =
            InterfaceGroup::new("p", RelayType::Cf, GroupMode::Push { source: 1 }, [0, 1, 2])
                .unwrap();
        let edges = group.associates(|_| true);
        assert_eq!(dsts(&edges, 1), vec![0, 2]);
        assert!(dsts(&edges, 0).is_empty());
    }

    #[test]
    fn test_merge_and_relay_edges() {
        let merge = InterfaceGroup::new("m", RelayType::Cf, GroupMode::Merge, [0, 1, 2]).unwrap();
        assert_eq!(merge.associates(|_| true).len(), 6);

        let relay = InterfaceGroup::new("r", RelayType::SMpr, GroupMode::Relay, [0, 1, 1, 2])
            .unwrap();
        assert_eq!(relay.members(), &[0, 1, 2]);
        assert_eq!(relay.associates(|_| false).len(), 6);
        let edges = relay.associates(|i| i == 0);
        assert_eq!(dsts(&edges, 0), vec![0, 1, 2]);
        assert_eq!(dsts(&edges, 1), vec![0, 2]);
        assert!(edges.iter().all(|a| a.relay_type == RelayType::SMpr));
    }

    #[test]
    fn test_associate_map() {
        let a = InterfaceGroup::new("a", RelayType::Cf, GroupMode::Merge, [0, 1]).unwrap();
        let b = InterfaceGroup::new("b", RelayType::ECds, GroupMode::Relay, [0, 2]).unwrap();
        let map = AssociateMap::build([&a, &b], |_| false);
        let from_zero: Vec<_> = map.from_source(0).iter().map(|e| (e.dst, e.relay_type)).collect();
        assert_eq!(from_zero, vec![(1, RelayType::Cf), (2, RelayType::ECds)]);
        assert!(map.from_source(7).is_empty());
        assert_eq!(map.len(), 4);
    }

    #[test]
    fn test_remove_member() {
        let mut push =
            InterfaceGroup::new("p", RelayType::Cf, GroupMode::Push { source: 0 }, [0, 1])
                .unwrap();
        assert!(push.clone().remove_member(1));
        assert!(!push.remove_member(0));
    }
}
