//! Tag-based topology discovery
//!
//! Rebuilds a [`Topology`] purely by querying the control plane: the VPC by
//! project tag, everything inside it by `vpc-id` filter, IAM by the
//! deterministic `{project}-{role}` names. No local state is consulted; the
//! cloud is the single source of truth.
//!
//! Implicitly created default objects (the main route table, the default
//! network ACL, the `default` security group) are never included, so a
//! teardown based on this discovery cannot touch them. Resources that exist
//! but are only partially linked (an address whose NAT gateway is gone, an
//! ACL that was never associated) degrade to handles with fewer links, not
//! errors.

use crate::aws::ec2::Ec2Client;
use crate::aws::iam::{iam_name, IamClient};
use crate::aws::tags::{name_of, role_of, TAG_PROJECT};
use crate::graph::ResourceKind;
use crate::topology::{ResourceHandle, Role, SubnetScope, Topology};
use anyhow::{Context, Result};
use aws_sdk_ec2::types::{Filter, RouteTable, SecurityGroup};
use tracing::{debug, info};

/// Scanner reconstructing a topology from tags.
pub struct TopologyScanner {
    ec2: Ec2Client,
    iam: IamClient,
}

/// True when any association of this route table is the VPC main association.
fn is_main_route_table(rt: &RouteTable) -> bool {
    rt.associations()
        .iter()
        .any(|assoc| assoc.main().unwrap_or(false))
}

/// Classify a route table by the target of its default route; falls back to
/// the Name tag when no default route survived.
fn route_table_scope(rt: &RouteTable) -> Option<SubnetScope> {
    for route in rt.routes() {
        if route.destination_cidr_block() != Some("0.0.0.0/0") {
            continue;
        }
        if route.nat_gateway_id().is_some() {
            return Some(SubnetScope::Private);
        }
        if route.gateway_id().map(|g| g.starts_with("igw-")).unwrap_or(false) {
            return Some(SubnetScope::Public);
        }
    }
    name_of(rt.tags()).map(|name| {
        if name.contains("private") {
            SubnetScope::Private
        } else {
            SubnetScope::Public
        }
    })
}

/// True when the route table still carries its 0.0.0.0/0 route.
fn has_default_route(rt: &RouteTable) -> bool {
    rt.routes()
        .iter()
        .any(|r| r.destination_cidr_block() == Some("0.0.0.0/0"))
}

/// Map a security group to its role, by role tag first, then name suffix.
/// Unclassifiable project groups land in the bastion bucket, which is
/// deleted last among the groups.
fn security_group_role(sg: &SecurityGroup) -> Role {
    if let Some(role) = role_of(sg.tags()) {
        return role;
    }
    let name = sg.group_name().unwrap_or_default();
    if name.ends_with("-web") {
        Role::Web
    } else if name.ends_with("-app") {
        Role::App
    } else {
        Role::Bastion
    }
}

fn sg_kind(role: Role) -> ResourceKind {
    match role {
        Role::Bastion => ResourceKind::BastionSecurityGroup,
        Role::Web => ResourceKind::WebSecurityGroup,
        Role::App => ResourceKind::AppSecurityGroup,
    }
}

impl TopologyScanner {
    pub fn new(ec2: Ec2Client, iam: IamClient) -> Self {
        Self { ec2, iam }
    }

    /// Rebuild the topology for a project tag.
    ///
    /// Returns an empty topology when no VPC carries the tag: nothing to
    /// clean up is a normal terminal outcome, not a failure. When several
    /// VPCs carry the same tag the first match wins; concurrent topologies
    /// under one tag are not supported.
    pub async fn discover(&self, project: &str) -> Result<Topology> {
        let mut topo = Topology::new(project);

        let vpc_id = match self.find_vpc(project).await? {
            Some(id) => id,
            None => {
                info!(project = %project, "No VPC found for project tag");
                return Ok(topo);
            }
        };
        topo.push(ResourceHandle::new(
            ResourceKind::Vpc,
            &vpc_id,
            format!("{project}-vpc"),
        ));

        self.discover_subnets(&mut topo, &vpc_id).await?;
        self.discover_internet_gateways(&mut topo, project, &vpc_id).await?;
        self.discover_addresses(&mut topo, project).await?;
        self.discover_nat_gateways(&mut topo, &vpc_id).await?;
        self.discover_route_tables(&mut topo, &vpc_id).await?;
        self.discover_network_acls(&mut topo, &vpc_id).await?;
        self.discover_security_groups(&mut topo, project, &vpc_id).await?;
        self.discover_instances(&mut topo, project, &vpc_id).await?;
        self.discover_iam(&mut topo, project).await?;

        info!(
            project = %project,
            vpc_id = %vpc_id,
            resources = topo.len(),
            "Topology discovered"
        );
        Ok(topo)
    }

    async fn find_vpc(&self, project: &str) -> Result<Option<String>> {
        let response = self
            .ec2
            .client
            .describe_vpcs()
            .filters(
                Filter::builder()
                    .name(format!("tag:{TAG_PROJECT}"))
                    .values(project)
                    .build(),
            )
            .send()
            .await
            .context("Failed to describe VPCs")?;

        Ok(response
            .vpcs()
            .first()
            .and_then(|v| v.vpc_id())
            .map(|id| id.to_string()))
    }

    async fn discover_subnets(&self, topo: &mut Topology, vpc_id: &str) -> Result<()> {
        let response = self
            .ec2
            .client
            .describe_subnets()
            .filters(Filter::builder().name("vpc-id").values(vpc_id).build())
            .send()
            .await
            .context("Failed to describe subnets")?;

        for subnet in response.subnets() {
            let Some(subnet_id) = subnet.subnet_id() else {
                continue;
            };
            let kind = if subnet.map_public_ip_on_launch().unwrap_or(false) {
                ResourceKind::PublicSubnet
            } else {
                ResourceKind::PrivateSubnet
            };
            let name = name_of(subnet.tags()).unwrap_or_else(|| subnet_id.to_string());
            topo.push(ResourceHandle::new(kind, subnet_id, name).link(ResourceKind::Vpc, vpc_id));
        }
        debug!(count = response.subnets().len(), "Subnets discovered");
        Ok(())
    }

    async fn discover_internet_gateways(
        &self,
        topo: &mut Topology,
        project: &str,
        vpc_id: &str,
    ) -> Result<()> {
        let response = self
            .ec2
            .client
            .describe_internet_gateways()
            .filters(
                Filter::builder()
                    .name(format!("tag:{TAG_PROJECT}"))
                    .values(project)
                    .build(),
            )
            .send()
            .await
            .context("Failed to describe internet gateways")?;

        for igw in response.internet_gateways() {
            let Some(igw_id) = igw.internet_gateway_id() else {
                continue;
            };
            let name = name_of(igw.tags()).unwrap_or_else(|| igw_id.to_string());
            topo.push(ResourceHandle::new(
                ResourceKind::InternetGateway,
                igw_id,
                name,
            ));

            // The attachment exists only if the gateway reached the VPC
            let attached = igw
                .attachments()
                .iter()
                .any(|a| a.vpc_id() == Some(vpc_id));
            if attached {
                topo.push(
                    ResourceHandle::new(
                        ResourceKind::InternetGatewayAttachment,
                        igw_id,
                        format!("{project}-igw-attachment"),
                    )
                    .link(ResourceKind::InternetGateway, igw_id)
                    .link(ResourceKind::Vpc, vpc_id),
                );
            }
        }
        Ok(())
    }

    async fn discover_addresses(&self, topo: &mut Topology, project: &str) -> Result<()> {
        let response = self
            .ec2
            .client
            .describe_addresses()
            .filters(
                Filter::builder()
                    .name(format!("tag:{TAG_PROJECT}"))
                    .values(project)
                    .build(),
            )
            .send()
            .await
            .context("Failed to describe addresses")?;

        for address in response.addresses() {
            let Some(allocation_id) = address.allocation_id() else {
                continue;
            };
            let name = name_of(address.tags()).unwrap_or_else(|| allocation_id.to_string());
            topo.push(ResourceHandle::new(
                ResourceKind::ElasticIp,
                allocation_id,
                name,
            ));
        }
        Ok(())
    }

    async fn discover_nat_gateways(&self, topo: &mut Topology, vpc_id: &str) -> Result<()> {
        for nat_id in self.ec2.live_nat_gateways(vpc_id).await? {
            topo.push(
                ResourceHandle::new(ResourceKind::NatGateway, &nat_id, nat_id.clone())
                    .link(ResourceKind::Vpc, vpc_id),
            );
        }
        Ok(())
    }

    async fn discover_route_tables(&self, topo: &mut Topology, vpc_id: &str) -> Result<()> {
        let response = self
            .ec2
            .client
            .describe_route_tables()
            .filters(Filter::builder().name("vpc-id").values(vpc_id).build())
            .send()
            .await
            .context("Failed to describe route tables")?;

        for rt in response.route_tables() {
            // The main route table is implicitly created with the VPC and
            // must never be deleted
            if is_main_route_table(rt) {
                continue;
            }
            let Some(rt_id) = rt.route_table_id() else {
                continue;
            };
            let scope = route_table_scope(rt).unwrap_or(SubnetScope::Public);
            let (table_kind, route_kind, assoc_kind) = match scope {
                SubnetScope::Public => (
                    ResourceKind::PublicRouteTable,
                    ResourceKind::PublicRoute,
                    ResourceKind::PublicRouteTableAssociation,
                ),
                SubnetScope::Private => (
                    ResourceKind::PrivateRouteTable,
                    ResourceKind::PrivateRoute,
                    ResourceKind::PrivateRouteTableAssociation,
                ),
            };

            let name = name_of(rt.tags()).unwrap_or_else(|| rt_id.to_string());
            topo.push(
                ResourceHandle::new(table_kind, rt_id, name).link(ResourceKind::Vpc, vpc_id),
            );
            if has_default_route(rt) {
                topo.push(
                    ResourceHandle::new(route_kind, rt_id, format!("{rt_id}-default-route"))
                        .link(table_kind, rt_id),
                );
            }
            for assoc in rt.associations() {
                let Some(assoc_id) = assoc.route_table_association_id() else {
                    continue;
                };
                let mut handle = ResourceHandle::new(
                    assoc_kind,
                    assoc_id,
                    format!("{rt_id}-association"),
                )
                .link(table_kind, rt_id);
                if let Some(subnet_id) = assoc.subnet_id() {
                    let subnet_kind = match scope {
                        SubnetScope::Public => ResourceKind::PublicSubnet,
                        SubnetScope::Private => ResourceKind::PrivateSubnet,
                    };
                    handle = handle.link(subnet_kind, subnet_id);
                }
                topo.push(handle);
            }
        }
        Ok(())
    }

    async fn discover_network_acls(&self, topo: &mut Topology, vpc_id: &str) -> Result<()> {
        let public_subnet = topo
            .first_id_of(ResourceKind::PublicSubnet)
            .map(str::to_string);

        let response = self
            .ec2
            .client
            .describe_network_acls()
            .filters(Filter::builder().name("vpc-id").values(vpc_id).build())
            .filters(Filter::builder().name("default").values("false").build())
            .send()
            .await
            .context("Failed to describe network ACLs")?;

        for acl in response.network_acls() {
            let Some(acl_id) = acl.network_acl_id() else {
                continue;
            };
            // Classify by associated subnet, falling back to the Name tag
            // for an ACL whose association was already restored
            let scope = acl
                .associations()
                .iter()
                .find_map(|assoc| {
                    assoc.subnet_id().map(|subnet| {
                        if Some(subnet.to_string()) == public_subnet {
                            SubnetScope::Public
                        } else {
                            SubnetScope::Private
                        }
                    })
                })
                .unwrap_or_else(|| {
                    match name_of(acl.tags()) {
                        Some(name) if name.contains("private") => SubnetScope::Private,
                        _ => SubnetScope::Public,
                    }
                });
            let (acl_kind, assoc_kind, subnet_kind) = match scope {
                SubnetScope::Public => (
                    ResourceKind::PublicNetworkAcl,
                    ResourceKind::PublicNetworkAclAssociation,
                    ResourceKind::PublicSubnet,
                ),
                SubnetScope::Private => (
                    ResourceKind::PrivateNetworkAcl,
                    ResourceKind::PrivateNetworkAclAssociation,
                    ResourceKind::PrivateSubnet,
                ),
            };

            let name = name_of(acl.tags()).unwrap_or_else(|| acl_id.to_string());
            topo.push(ResourceHandle::new(acl_kind, acl_id, name).link(ResourceKind::Vpc, vpc_id));
            for assoc in acl.associations() {
                let Some(assoc_id) = assoc.network_acl_association_id() else {
                    continue;
                };
                let mut handle = ResourceHandle::new(
                    assoc_kind,
                    assoc_id,
                    format!("{acl_id}-association"),
                )
                .link(acl_kind, acl_id)
                .link(ResourceKind::Vpc, vpc_id);
                if let Some(subnet_id) = assoc.subnet_id() {
                    handle = handle.link(subnet_kind, subnet_id);
                }
                topo.push(handle);
            }
        }
        Ok(())
    }

    async fn discover_security_groups(
        &self,
        topo: &mut Topology,
        project: &str,
        vpc_id: &str,
    ) -> Result<()> {
        let response = self
            .ec2
            .client
            .describe_security_groups()
            .filters(Filter::builder().name("vpc-id").values(vpc_id).build())
            .filters(
                Filter::builder()
                    .name(format!("tag:{TAG_PROJECT}"))
                    .values(project)
                    .build(),
            )
            .send()
            .await
            .context("Failed to describe security groups")?;

        for sg in response.security_groups() {
            // The VPC default group cannot be deleted and is never ours
            if sg.group_name() == Some("default") {
                continue;
            }
            let Some(sg_id) = sg.group_id() else {
                continue;
            };
            let role = security_group_role(sg);
            let name = name_of(sg.tags())
                .or_else(|| sg.group_name().map(str::to_string))
                .unwrap_or_else(|| sg_id.to_string());
            topo.push(
                ResourceHandle::new(sg_kind(role), sg_id, name)
                    .with_role(role)
                    .link(ResourceKind::Vpc, vpc_id),
            );
        }
        Ok(())
    }

    async fn discover_instances(
        &self,
        topo: &mut Topology,
        project: &str,
        vpc_id: &str,
    ) -> Result<()> {
        let response = self
            .ec2
            .client
            .describe_instances()
            .filters(Filter::builder().name("vpc-id").values(vpc_id).build())
            .filters(
                Filter::builder()
                    .name(format!("tag:{TAG_PROJECT}"))
                    .values(project)
                    .build(),
            )
            // Exclude instances already terminated or on their way out
            .filters(
                Filter::builder()
                    .name("instance-state-name")
                    .values("pending")
                    .values("running")
                    .values("stopping")
                    .values("stopped")
                    .build(),
            )
            .send()
            .await
            .context("Failed to describe instances")?;

        for reservation in response.reservations() {
            for instance in reservation.instances() {
                let Some(instance_id) = instance.instance_id() else {
                    continue;
                };
                let name = name_of(instance.tags()).unwrap_or_else(|| instance_id.to_string());
                let mut handle = ResourceHandle::new(ResourceKind::Instance, instance_id, name)
                    .link(ResourceKind::Vpc, vpc_id);
                if let Some(role) = role_of(instance.tags()) {
                    handle = handle.with_role(role);
                }
                topo.push(handle);
            }
        }
        Ok(())
    }

    async fn discover_iam(&self, topo: &mut Topology, project: &str) -> Result<()> {
        for role in Role::ALL {
            let name = iam_name(project, role);

            let role_exists = self
                .iam
                .raw()
                .get_role()
                .role_name(&name)
                .send()
                .await
                .is_ok();
            if role_exists {
                topo.push(
                    ResourceHandle::new(ResourceKind::InstanceRole, &name, &name).with_role(role),
                );
            }

            let profile_exists = self
                .iam
                .raw()
                .get_instance_profile()
                .instance_profile_name(&name)
                .send()
                .await
                .is_ok();
            if profile_exists {
                topo.push(
                    ResourceHandle::new(ResourceKind::InstanceProfile, &name, &name)
                        .with_role(role)
                        .link(ResourceKind::InstanceRole, &name),
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_ec2::types::{
        Route, RouteTableAssociation, SecurityGroup, Tag,
    };

    fn name_tag(value: &str) -> Tag {
        Tag::builder().key("Name").value(value).build()
    }

    #[test]
    fn main_route_table_is_recognized() {
        let rt = RouteTable::builder()
            .route_table_id("rtb-main")
            .associations(RouteTableAssociation::builder().main(true).build())
            .build();
        assert!(is_main_route_table(&rt));

        let rt = RouteTable::builder()
            .route_table_id("rtb-custom")
            .associations(
                RouteTableAssociation::builder()
                    .main(false)
                    .subnet_id("subnet-1")
                    .build(),
            )
            .build();
        assert!(!is_main_route_table(&rt));
    }

    #[test]
    fn route_table_scope_follows_default_route_target() {
        let public = RouteTable::builder()
            .route_table_id("rtb-1")
            .routes(
                Route::builder()
                    .destination_cidr_block("0.0.0.0/0")
                    .gateway_id("igw-1")
                    .build(),
            )
            .build();
        assert_eq!(route_table_scope(&public), Some(SubnetScope::Public));

        let private = RouteTable::builder()
            .route_table_id("rtb-2")
            .routes(
                Route::builder()
                    .destination_cidr_block("0.0.0.0/0")
                    .nat_gateway_id("nat-1")
                    .build(),
            )
            .build();
        assert_eq!(route_table_scope(&private), Some(SubnetScope::Private));
    }

    #[test]
    fn route_table_scope_falls_back_to_name_tag() {
        let rt = RouteTable::builder()
            .route_table_id("rtb-3")
            .tags(name_tag("lab-private-rt"))
            .build();
        assert_eq!(route_table_scope(&rt), Some(SubnetScope::Private));

        let untagged = RouteTable::builder().route_table_id("rtb-4").build();
        assert_eq!(route_table_scope(&untagged), None);
    }

    #[test]
    fn security_group_role_prefers_role_tag() {
        let sg = SecurityGroup::builder()
            .group_id("sg-1")
            .group_name("lab-bastion")
            .tags(Tag::builder().key("vpclab:role").value("app").build())
            .build();
        assert_eq!(security_group_role(&sg), Role::App);
    }

    #[test]
    fn security_group_role_falls_back_to_name_suffix() {
        let sg = SecurityGroup::builder()
            .group_id("sg-2")
            .group_name("lab-web")
            .build();
        assert_eq!(security_group_role(&sg), Role::Web);

        let unknown = SecurityGroup::builder()
            .group_id("sg-3")
            .group_name("lab-extras")
            .build();
        assert_eq!(security_group_role(&unknown), Role::Bastion);
    }
}
