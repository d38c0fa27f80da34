//! Node groups: batches of hosts suspended as one decision.

use serde::{Deserialize, Serialize};

use crate::types::HostName;

/// A batch of hosts under one parent host (e.g. the containers of a
/// physical machine), to be taken down atomically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeGroup {
    parent: HostName,
    hosts: Vec<HostName>,
}

impl NodeGroup {
    /// Create a group. Duplicate members are dropped, keeping the order in
    /// which each host first appears.
    pub fn new(parent: HostName, hosts: impl IntoIterator<Item = HostName>) -> Self {
        let mut members: Vec<HostName> = Vec::new();
        for host in hosts {
            if !members.contains(&host) {
                members.push(host);
            }
        }
        Self {
            parent,
            hosts: members,
        }
    }

    pub fn parent(&self) -> &HostName {
        &self.parent
    }

    pub fn hosts(&self) -> &[HostName] {
        &self.hosts
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }
}
