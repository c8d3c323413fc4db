//! The provisioner: walks the dependency graph forward and builds the lab.
//!
//! Each node's create call receives the ids produced by the nodes it depends
//! on; a missing id is an internal invariant violation, not a recoverable
//! condition. Failure policy is fail-fast with no automatic rollback: a
//! partial topology is always tag-discoverable and therefore always
//! cleanable by a later deprovision run.

use crate::aws::ops::{CloudOps, RouteTarget};
use crate::graph::{self, ResourceKind};
use crate::topology::{ResourceHandle, ResourceState, Role, SubnetScope, Topology};
use thiserror::Error;
use tracing::info;

/// Fatal provisioning errors. Any of these aborts the run immediately.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// A required fixed input could not be resolved before the run started.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A create call failed. The partial topology remains discoverable.
    #[error("creating {kind} failed: {cause:#}")]
    Create {
        kind: ResourceKind,
        cause: anyhow::Error,
    },

    /// An asynchronous resource never reached its ready state.
    #[error("gave up waiting for {kind} {id}: {cause:#}")]
    Timeout {
        kind: ResourceKind,
        id: String,
        cause: anyhow::Error,
    },

    /// Ordering invariant violation: a dependency id was absent when needed.
    #[error("missing {dependency} id while provisioning {kind}")]
    MissingDependency {
        kind: ResourceKind,
        dependency: ResourceKind,
    },
}

/// Addresses the operator needs to reach the lab, printed at the end of
/// provisioning.
#[derive(Debug, Clone, Default)]
pub struct ConnectionSummary {
    pub bastion_public_ip: Option<String>,
    pub web_public_ip: Option<String>,
    pub app_private_ip: Option<String>,
}

/// Id of the single handle of `dep`, required while provisioning `kind`.
fn require(topo: &Topology, kind: ResourceKind, dep: ResourceKind) -> Result<String, ProvisionError> {
    topo.first_id_of(dep)
        .map(str::to_string)
        .ok_or(ProvisionError::MissingDependency {
            kind,
            dependency: dep,
        })
}

/// Id of the handle of a role-scoped `dep` for one role.
fn require_role(
    topo: &Topology,
    kind: ResourceKind,
    dep: ResourceKind,
    role: Role,
) -> Result<String, ProvisionError> {
    topo.role_id_of(dep, role)
        .map(str::to_string)
        .ok_or(ProvisionError::MissingDependency {
            kind,
            dependency: dep,
        })
}

fn create_err(kind: ResourceKind) -> impl FnOnce(anyhow::Error) -> ProvisionError {
    move |cause| ProvisionError::Create { kind, cause }
}

/// Build the full lab topology against the cloud gateway.
///
/// Walks `graph::forward_order()` node by node, sequentially; ordering is
/// the correctness mechanism, since every node consumes ids generated by
/// earlier nodes and the account-level resources are shared mutable state.
pub async fn provision<G: CloudOps>(
    gateway: &G,
    project: &str,
) -> Result<(Topology, ConnectionSummary), ProvisionError> {
    let mut topo = Topology::new(project);
    let mut summary = ConnectionSummary::default();

    for &kind in graph::forward_order() {
        info!(kind = %kind, "Provisioning");
        provision_kind(gateway, kind, project, &mut topo, &mut summary).await?;
    }

    info!(resources = topo.len(), "Topology provisioned");
    Ok((topo, summary))
}

async fn provision_kind<G: CloudOps>(
    gateway: &G,
    kind: ResourceKind,
    project: &str,
    topo: &mut Topology,
    summary: &mut ConnectionSummary,
) -> Result<(), ProvisionError> {
    use ResourceKind::*;

    match kind {
        Vpc => {
            let id = gateway.create_vpc().await.map_err(create_err(kind))?;
            topo.push(ResourceHandle::new(kind, id, format!("{project}-vpc")));
        }
        PublicSubnet | PrivateSubnet => {
            let vpc_id = require(topo, kind, Vpc)?;
            let scope = if kind == PublicSubnet {
                SubnetScope::Public
            } else {
                SubnetScope::Private
            };
            let id = gateway
                .create_subnet(&vpc_id, scope)
                .await
                .map_err(create_err(kind))?;
            topo.push(
                ResourceHandle::new(kind, id, format!("{project}-{}", scope.as_str()))
                    .link(Vpc, vpc_id),
            );
        }
        InternetGateway => {
            let id = gateway
                .create_internet_gateway()
                .await
                .map_err(create_err(kind))?;
            topo.push(ResourceHandle::new(kind, id, format!("{project}-igw")));
        }
        InternetGatewayAttachment => {
            let igw_id = require(topo, kind, InternetGateway)?;
            let vpc_id = require(topo, kind, Vpc)?;
            gateway
                .attach_internet_gateway(&igw_id, &vpc_id)
                .await
                .map_err(create_err(kind))?;
            topo.push(
                ResourceHandle::new(kind, &igw_id, format!("{project}-igw-attachment"))
                    .link(InternetGateway, igw_id)
                    .link(Vpc, vpc_id),
            );
        }
        ElasticIp => {
            let id = gateway
                .allocate_elastic_ip()
                .await
                .map_err(create_err(kind))?;
            topo.push(ResourceHandle::new(kind, id, format!("{project}-nat-eip")));
        }
        NatGateway => {
            let subnet_id = require(topo, kind, PublicSubnet)?;
            let allocation_id = require(topo, kind, ElasticIp)?;
            let id = gateway
                .create_nat_gateway(&subnet_id, &allocation_id)
                .await
                .map_err(create_err(kind))?;
            topo.push(
                ResourceHandle::new(kind, &id, format!("{project}-nat"))
                    .with_state(ResourceState::Creating)
                    .link(PublicSubnet, subnet_id)
                    .link(ElasticIp, allocation_id),
            );
            gateway
                .wait_nat_gateway_available(&id)
                .await
                .map_err(|cause| ProvisionError::Timeout {
                    kind,
                    id: id.clone(),
                    cause,
                })?;
            topo.set_state(kind, &id, ResourceState::Ready);
        }
        PublicRouteTable | PrivateRouteTable => {
            let vpc_id = require(topo, kind, Vpc)?;
            let scope = if kind == PublicRouteTable {
                SubnetScope::Public
            } else {
                SubnetScope::Private
            };
            let id = gateway
                .create_route_table(&vpc_id, scope)
                .await
                .map_err(create_err(kind))?;
            topo.push(
                ResourceHandle::new(kind, id, format!("{project}-{}-rt", scope.as_str()))
                    .link(Vpc, vpc_id),
            );
        }
        PublicRoute => {
            let rt_id = require(topo, kind, PublicRouteTable)?;
            let igw_id = require(topo, kind, InternetGateway)?;
            gateway
                .create_default_route(&rt_id, RouteTarget::InternetGateway(&igw_id))
                .await
                .map_err(create_err(kind))?;
            topo.push(
                ResourceHandle::new(kind, &rt_id, format!("{project}-public-default-route"))
                    .link(PublicRouteTable, rt_id)
                    .link(InternetGateway, igw_id),
            );
        }
        PrivateRoute => {
            let rt_id = require(topo, kind, PrivateRouteTable)?;
            let nat_id = require(topo, kind, NatGateway)?;
            gateway
                .create_default_route(&rt_id, RouteTarget::NatGateway(&nat_id))
                .await
                .map_err(create_err(kind))?;
            topo.push(
                ResourceHandle::new(kind, &rt_id, format!("{project}-private-default-route"))
                    .link(PrivateRouteTable, rt_id)
                    .link(NatGateway, nat_id),
            );
        }
        PublicRouteTableAssociation => {
            let rt_id = require(topo, kind, PublicRouteTable)?;
            let subnet_id = require(topo, kind, PublicSubnet)?;
            let id = gateway
                .associate_route_table(&rt_id, &subnet_id)
                .await
                .map_err(create_err(kind))?;
            topo.push(
                ResourceHandle::new(kind, id, format!("{project}-public-rt-assoc"))
                    .link(PublicRouteTable, rt_id)
                    .link(PublicSubnet, subnet_id),
            );
        }
        PrivateRouteTableAssociation => {
            let rt_id = require(topo, kind, PrivateRouteTable)?;
            let subnet_id = require(topo, kind, PrivateSubnet)?;
            let id = gateway
                .associate_route_table(&rt_id, &subnet_id)
                .await
                .map_err(create_err(kind))?;
            topo.push(
                ResourceHandle::new(kind, id, format!("{project}-private-rt-assoc"))
                    .link(PrivateRouteTable, rt_id)
                    .link(PrivateSubnet, subnet_id),
            );
        }
        BastionSecurityGroup => {
            let vpc_id = require(topo, kind, Vpc)?;
            let id = gateway
                .create_bastion_security_group(&vpc_id)
                .await
                .map_err(create_err(kind))?;
            topo.push(
                ResourceHandle::new(kind, id, format!("{project}-bastion"))
                    .with_role(Role::Bastion)
                    .link(Vpc, vpc_id),
            );
        }
        WebSecurityGroup => {
            let vpc_id = require(topo, kind, Vpc)?;
            let bastion_sg = require(topo, kind, BastionSecurityGroup)?;
            let id = gateway
                .create_web_security_group(&vpc_id, &bastion_sg)
                .await
                .map_err(create_err(kind))?;
            topo.push(
                ResourceHandle::new(kind, id, format!("{project}-web"))
                    .with_role(Role::Web)
                    .link(Vpc, vpc_id)
                    .link(BastionSecurityGroup, bastion_sg),
            );
        }
        AppSecurityGroup => {
            let vpc_id = require(topo, kind, Vpc)?;
            let web_sg = require(topo, kind, WebSecurityGroup)?;
            let bastion_sg = require(topo, kind, BastionSecurityGroup)?;
            let id = gateway
                .create_app_security_group(&vpc_id, &web_sg, &bastion_sg)
                .await
                .map_err(create_err(kind))?;
            topo.push(
                ResourceHandle::new(kind, id, format!("{project}-app"))
                    .with_role(Role::App)
                    .link(Vpc, vpc_id)
                    .link(WebSecurityGroup, web_sg)
                    .link(BastionSecurityGroup, bastion_sg),
            );
        }
        PublicNetworkAcl | PrivateNetworkAcl => {
            let vpc_id = require(topo, kind, Vpc)?;
            let scope = if kind == PublicNetworkAcl {
                SubnetScope::Public
            } else {
                SubnetScope::Private
            };
            let id = gateway
                .create_network_acl(&vpc_id, scope)
                .await
                .map_err(create_err(kind))?;
            topo.push(
                ResourceHandle::new(kind, id, format!("{project}-{}-acl", scope.as_str()))
                    .link(Vpc, vpc_id),
            );
        }
        PublicNetworkAclAssociation => {
            let acl_id = require(topo, kind, PublicNetworkAcl)?;
            let subnet_id = require(topo, kind, PublicSubnet)?;
            let vpc_id = require(topo, kind, Vpc)?;
            let id = gateway
                .associate_network_acl(&acl_id, &subnet_id)
                .await
                .map_err(create_err(kind))?;
            topo.push(
                ResourceHandle::new(kind, id, format!("{project}-public-acl-assoc"))
                    .link(PublicNetworkAcl, acl_id)
                    .link(PublicSubnet, subnet_id)
                    .link(Vpc, vpc_id),
            );
        }
        PrivateNetworkAclAssociation => {
            let acl_id = require(topo, kind, PrivateNetworkAcl)?;
            let subnet_id = require(topo, kind, PrivateSubnet)?;
            let vpc_id = require(topo, kind, Vpc)?;
            let id = gateway
                .associate_network_acl(&acl_id, &subnet_id)
                .await
                .map_err(create_err(kind))?;
            topo.push(
                ResourceHandle::new(kind, id, format!("{project}-private-acl-assoc"))
                    .link(PrivateNetworkAcl, acl_id)
                    .link(PrivateSubnet, subnet_id)
                    .link(Vpc, vpc_id),
            );
        }
        InstanceRole => {
            for role in Role::ALL {
                let name = gateway
                    .create_instance_role(role)
                    .await
                    .map_err(create_err(kind))?;
                topo.push(ResourceHandle::new(kind, &name, &name).with_role(role));
            }
        }
        InstanceProfile => {
            for role in Role::ALL {
                let role_name = require_role(topo, kind, InstanceRole, role)?;
                let name = gateway
                    .create_instance_profile(role)
                    .await
                    .map_err(create_err(kind))?;
                topo.push(
                    ResourceHandle::new(kind, &name, &name)
                        .with_role(role)
                        .link(InstanceRole, role_name),
                );
            }
        }
        Instance => {
            for role in Role::ALL {
                provision_instance(gateway, topo, summary, role).await?;
            }
        }
    }

    Ok(())
}

async fn provision_instance<G: CloudOps>(
    gateway: &G,
    topo: &mut Topology,
    summary: &mut ConnectionSummary,
    role: Role,
) -> Result<(), ProvisionError> {
    use ResourceKind::*;

    let kind = Instance;
    let (subnet_kind, sg_kind) = match role {
        Role::Bastion => (PublicSubnet, BastionSecurityGroup),
        Role::Web => (PublicSubnet, WebSecurityGroup),
        Role::App => (PrivateSubnet, AppSecurityGroup),
    };

    let subnet_id = require(topo, kind, subnet_kind)?;
    let sg_id = require(topo, kind, sg_kind)?;
    let profile = require_role(topo, kind, InstanceProfile, role)?;

    let id = gateway
        .run_instance(role, &subnet_id, &sg_id, &profile)
        .await
        .map_err(create_err(kind))?;
    topo.push(
        ResourceHandle::new(kind, &id, format!("{}-{role}", topo.project))
            .with_role(role)
            .with_state(ResourceState::Creating)
            .link(subnet_kind, subnet_id)
            .link(sg_kind, sg_id)
            .link(InstanceProfile, profile),
    );

    let addresses = gateway
        .wait_instance_running(&id)
        .await
        .map_err(|cause| ProvisionError::Timeout {
            kind,
            id: id.clone(),
            cause,
        })?;
    topo.set_state(kind, &id, ResourceState::Ready);

    match role {
        Role::Bastion => summary.bastion_public_ip = addresses.public_ip,
        Role::Web => summary.web_public_ip = addresses.public_ip,
        Role::App => summary.app_private_ip = addresses.private_ip,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockCloud;
    use std::collections::BTreeSet;

    #[tokio::test]
    async fn full_provision_covers_every_graph_node() {
        let mock = MockCloud::default();
        let (topo, summary) = provision(&mock, "lab").await.expect("provision succeeds");

        let expected: BTreeSet<_> = graph::forward_order().iter().copied().collect();
        assert_eq!(topo.kinds(), expected);

        // Role-scoped kinds exist once per role
        for kind in [
            ResourceKind::InstanceRole,
            ResourceKind::InstanceProfile,
            ResourceKind::Instance,
        ] {
            assert_eq!(topo.handles_of(kind).count(), 3, "{kind} not x3");
        }

        assert!(summary.bastion_public_ip.is_some());
        assert!(summary.web_public_ip.is_some());
        assert!(summary.app_private_ip.is_some());
    }

    #[tokio::test]
    async fn create_calls_respect_dependency_edges() {
        let mock = MockCloud::default();
        provision(&mock, "lab").await.expect("provision succeeds");

        let order = mock.created_kinds();
        for (pos, kind) in order.iter().enumerate() {
            for dep in kind.depends_on() {
                let dep_pos = order
                    .iter()
                    .position(|k| k == dep)
                    .unwrap_or_else(|| panic!("{dep} never created before {kind}"));
                assert!(
                    dep_pos < pos,
                    "{kind} created at {pos} before its dependency {dep} at {dep_pos}"
                );
            }
        }
    }

    #[tokio::test]
    async fn create_failure_aborts_the_run() {
        let mock = MockCloud::default().failing_on("create_web_security_group");
        let err = provision(&mock, "lab").await.unwrap_err();

        assert!(matches!(
            err,
            ProvisionError::Create {
                kind: ResourceKind::WebSecurityGroup,
                ..
            }
        ));

        // Fail-fast: nothing after the failing node was attempted
        assert!(mock.created_kinds().contains(&ResourceKind::BastionSecurityGroup));
        assert!(!mock.created_kinds().contains(&ResourceKind::AppSecurityGroup));
        assert!(!mock.created_kinds().contains(&ResourceKind::Instance));
    }

    #[tokio::test]
    async fn wait_timeout_aborts_with_the_stuck_resource() {
        let mock = MockCloud::default().failing_on("wait_nat_gateway_available");
        let err = provision(&mock, "lab").await.unwrap_err();

        match err {
            ProvisionError::Timeout { kind, id, .. } => {
                assert_eq!(kind, ResourceKind::NatGateway);
                assert!(!id.is_empty());
            }
            other => panic!("expected Timeout, got {other:?}"),
        }
    }
}
