//! Value objects describing provisioned resources.
//!
//! A [`ResourceHandle`] records one cloud object together with the dependency
//! ids teardown will need; a [`Topology`] is the set of handles sharing one
//! project tag. Identity lives entirely in cloud-side tags, so a topology can
//! always be rebuilt by discovery and never depends on local state.

use crate::graph::ResourceKind;
use std::collections::BTreeSet;
use std::fmt;

/// Instance role identities within the lab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Bastion,
    Web,
    App,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Bastion, Role::Web, Role::App];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Bastion => "bastion",
            Role::Web => "web",
            Role::App => "app",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "bastion" => Some(Role::Bastion),
            "web" => Some(Role::Web),
            "app" => Some(Role::App),
            _ => None,
        }
    }

    /// Bastion and web instances live in the public subnet, app in private.
    pub fn is_public(self) -> bool {
        matches!(self, Role::Bastion | Role::Web)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which of the two subnets a subnet-scoped resource belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubnetScope {
    Public,
    Private,
}

impl SubnetScope {
    pub fn as_str(self) -> &'static str {
        match self {
            SubnetScope::Public => "public",
            SubnetScope::Private => "private",
        }
    }
}

/// Lifecycle state of a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    Pending,
    Creating,
    Ready,
    Deleted,
}

/// A dependency link carrying the concrete id teardown needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub kind: ResourceKind,
    pub id: String,
}

/// The orchestrator's record of one provisioned cloud object.
#[derive(Debug, Clone)]
pub struct ResourceHandle {
    pub kind: ResourceKind,
    pub id: String,
    pub name: String,
    pub role: Option<Role>,
    pub depends_on: Vec<Link>,
    pub state: ResourceState,
}

impl ResourceHandle {
    pub fn new(kind: ResourceKind, id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            name: name.into(),
            role: None,
            depends_on: Vec::new(),
            state: ResourceState::Ready,
        }
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }

    pub fn with_state(mut self, state: ResourceState) -> Self {
        self.state = state;
        self
    }

    pub fn link(mut self, kind: ResourceKind, id: impl Into<String>) -> Self {
        self.depends_on.push(Link { kind, id: id.into() });
        self
    }

    /// Id of the first dependency link of the given kind, if recorded.
    pub fn link_id(&self, kind: ResourceKind) -> Option<&str> {
        self.depends_on
            .iter()
            .find(|l| l.kind == kind)
            .map(|l| l.id.as_str())
    }
}

/// All handles belonging to one project tag.
///
/// At most one live topology per project tag is assumed; discovery takes the
/// first match, and concurrent topologies under the same tag are undefined
/// behavior for teardown.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    pub project: String,
    handles: Vec<ResourceHandle>,
}

impl Topology {
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            handles: Vec::new(),
        }
    }

    pub fn push(&mut self, handle: ResourceHandle) {
        self.handles.push(handle);
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn handles(&self) -> &[ResourceHandle] {
        &self.handles
    }

    pub fn handles_of(&self, kind: ResourceKind) -> impl Iterator<Item = &ResourceHandle> {
        self.handles.iter().filter(move |h| h.kind == kind)
    }

    /// Id of the single handle of a kind. Role-scoped kinds have several
    /// handles; use [`Topology::role_id_of`] for those.
    pub fn first_id_of(&self, kind: ResourceKind) -> Option<&str> {
        self.handles_of(kind).next().map(|h| h.id.as_str())
    }

    /// Id of the handle of a role-scoped kind for one role.
    pub fn role_id_of(&self, kind: ResourceKind, role: Role) -> Option<&str> {
        self.handles_of(kind)
            .find(|h| h.role == Some(role))
            .map(|h| h.id.as_str())
    }

    /// The set of kinds present, independent of multiplicity.
    pub fn kinds(&self) -> BTreeSet<ResourceKind> {
        self.handles.iter().map(|h| h.kind).collect()
    }

    pub fn set_state(&mut self, kind: ResourceKind, id: &str, state: ResourceState) {
        if let Some(handle) = self
            .handles
            .iter_mut()
            .find(|h| h.kind == kind && h.id == id)
        {
            handle.state = state;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips_through_tags() {
        for role in Role::ALL {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("database"), None);
    }

    #[test]
    fn link_lookup_by_kind() {
        let handle = ResourceHandle::new(ResourceKind::NatGateway, "nat-1", "lab-nat")
            .link(ResourceKind::PublicSubnet, "subnet-1")
            .link(ResourceKind::ElasticIp, "eipalloc-1");
        assert_eq!(handle.link_id(ResourceKind::ElasticIp), Some("eipalloc-1"));
        assert_eq!(handle.link_id(ResourceKind::Vpc), None);
    }

    #[test]
    fn role_scoped_lookup() {
        let mut topo = Topology::new("lab");
        for (role, id) in [(Role::Bastion, "i-1"), (Role::Web, "i-2"), (Role::App, "i-3")] {
            topo.push(
                ResourceHandle::new(ResourceKind::Instance, id, format!("lab-{role}"))
                    .with_role(role),
            );
        }
        assert_eq!(topo.role_id_of(ResourceKind::Instance, Role::App), Some("i-3"));
        assert_eq!(topo.handles_of(ResourceKind::Instance).count(), 3);
        assert_eq!(topo.kinds().len(), 1);
    }
}
