//! The fixed resource dependency graph.
//!
//! The lab topology is one known shape, so the graph is configuration data,
//! not something discovered at runtime: a node per resource kind and a static
//! edge set describing which kinds must exist before which others. Creation
//! walks `forward_order()`, teardown walks `teardown_order()`.

use std::fmt;

/// Every resource kind the lab provisions, in creation order.
///
/// The declaration order below is a valid topological order of the dependency
/// edges in [`ResourceKind::depends_on`]; `forward_order()` returns exactly
/// this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Vpc,
    PublicSubnet,
    PrivateSubnet,
    InternetGateway,
    InternetGatewayAttachment,
    ElasticIp,
    NatGateway,
    PublicRouteTable,
    PublicRoute,
    PublicRouteTableAssociation,
    PrivateRouteTable,
    PrivateRoute,
    PrivateRouteTableAssociation,
    BastionSecurityGroup,
    WebSecurityGroup,
    AppSecurityGroup,
    PublicNetworkAcl,
    PublicNetworkAclAssociation,
    PrivateNetworkAcl,
    PrivateNetworkAclAssociation,
    InstanceRole,
    InstanceProfile,
    Instance,
}

use ResourceKind::*;

/// Creation order. Teardown is the exact reverse, except for the promotions
/// applied in [`teardown_order`].
const FORWARD_ORDER: [ResourceKind; 23] = [
    Vpc,
    PublicSubnet,
    PrivateSubnet,
    InternetGateway,
    InternetGatewayAttachment,
    ElasticIp,
    NatGateway,
    PublicRouteTable,
    PublicRoute,
    PublicRouteTableAssociation,
    PrivateRouteTable,
    PrivateRoute,
    PrivateRouteTableAssociation,
    BastionSecurityGroup,
    WebSecurityGroup,
    AppSecurityGroup,
    PublicNetworkAcl,
    PublicNetworkAclAssociation,
    PrivateNetworkAcl,
    PrivateNetworkAclAssociation,
    InstanceRole,
    InstanceProfile,
    Instance,
];

impl ResourceKind {
    /// Kinds this kind requires ids from before it can be created.
    pub fn depends_on(self) -> &'static [ResourceKind] {
        match self {
            Vpc => &[],
            PublicSubnet | PrivateSubnet => &[Vpc],
            InternetGateway => &[],
            InternetGatewayAttachment => &[InternetGateway, Vpc],
            ElasticIp => &[],
            NatGateway => &[PublicSubnet, ElasticIp],
            PublicRouteTable => &[Vpc],
            PublicRoute => &[PublicRouteTable, InternetGatewayAttachment],
            PublicRouteTableAssociation => &[PublicRouteTable, PublicSubnet],
            PrivateRouteTable => &[Vpc],
            PrivateRoute => &[PrivateRouteTable, NatGateway],
            PrivateRouteTableAssociation => &[PrivateRouteTable, PrivateSubnet],
            BastionSecurityGroup => &[Vpc],
            WebSecurityGroup => &[Vpc, BastionSecurityGroup],
            AppSecurityGroup => &[Vpc, WebSecurityGroup, BastionSecurityGroup],
            PublicNetworkAcl => &[Vpc],
            PublicNetworkAclAssociation => &[PublicNetworkAcl, PublicSubnet],
            PrivateNetworkAcl => &[Vpc, PublicSubnet],
            PrivateNetworkAclAssociation => &[PrivateNetworkAcl, PrivateSubnet],
            InstanceRole => &[],
            InstanceProfile => &[InstanceRole],
            Instance => &[
                PublicSubnet,
                PrivateSubnet,
                BastionSecurityGroup,
                WebSecurityGroup,
                AppSecurityGroup,
                InstanceProfile,
            ],
        }
    }

    /// Kinds whose creation completes only after a polled delay.
    pub fn is_async(self) -> bool {
        matches!(self, NatGateway | Instance)
    }

    /// Kinds that exist once per instance role (bastion/web/app).
    pub fn is_role_scoped(self) -> bool {
        matches!(self, InstanceRole | InstanceProfile | Instance)
    }

    /// Stable identifier, used in logs and the scan output.
    pub fn as_str(self) -> &'static str {
        match self {
            Vpc => "vpc",
            PublicSubnet => "public-subnet",
            PrivateSubnet => "private-subnet",
            InternetGateway => "internet-gateway",
            InternetGatewayAttachment => "internet-gateway-attachment",
            ElasticIp => "elastic-ip",
            NatGateway => "nat-gateway",
            PublicRouteTable => "public-route-table",
            PublicRoute => "public-route",
            PublicRouteTableAssociation => "public-route-table-association",
            PrivateRouteTable => "private-route-table",
            PrivateRoute => "private-route",
            PrivateRouteTableAssociation => "private-route-table-association",
            BastionSecurityGroup => "bastion-security-group",
            WebSecurityGroup => "web-security-group",
            AppSecurityGroup => "app-security-group",
            PublicNetworkAcl => "public-network-acl",
            PublicNetworkAclAssociation => "public-network-acl-association",
            PrivateNetworkAcl => "private-network-acl",
            PrivateNetworkAclAssociation => "private-network-acl-association",
            InstanceRole => "instance-role",
            InstanceProfile => "instance-profile",
            Instance => "instance",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Creation order: a deterministic topological ordering of the graph.
pub fn forward_order() -> &'static [ResourceKind] {
    &FORWARD_ORDER
}

/// The element-wise reverse of [`forward_order`].
pub fn reverse_order() -> Vec<ResourceKind> {
    FORWARD_ORDER.iter().rev().copied().collect()
}

/// Teardown order: [`reverse_order`] with two stable promotions.
///
/// Instances go first because every other kind refuses deletion while an
/// instance still references it. The NAT gateway and its elastic address
/// follow immediately: the NAT gateway is the one resource in the topology
/// that keeps billing while it exists, so it must not wait behind firewall
/// and routing deletes that can individually fail.
pub fn teardown_order() -> Vec<ResourceKind> {
    const PROMOTED: [ResourceKind; 3] = [Instance, NatGateway, ElasticIp];
    let mut order = PROMOTED.to_vec();
    order.extend(
        FORWARD_ORDER
            .iter()
            .rev()
            .copied()
            .filter(|kind| !PROMOTED.contains(kind)),
    );
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn forward_order_visits_every_kind_once() {
        let seen: HashSet<_> = forward_order().iter().collect();
        assert_eq!(seen.len(), FORWARD_ORDER.len());
    }

    #[test]
    fn forward_order_is_topological() {
        for (pos, kind) in forward_order().iter().enumerate() {
            for dep in kind.depends_on() {
                let dep_pos = forward_order()
                    .iter()
                    .position(|k| k == dep)
                    .expect("dependency must be a graph node");
                assert!(
                    dep_pos < pos,
                    "{kind} at {pos} is ordered before its dependency {dep} at {dep_pos}"
                );
            }
        }
    }

    #[test]
    fn reverse_order_is_elementwise_reverse() {
        let mut reversed = reverse_order();
        reversed.reverse();
        assert_eq!(reversed, forward_order());
    }

    #[test]
    fn teardown_order_visits_every_kind_once() {
        let order = teardown_order();
        assert_eq!(order.len(), FORWARD_ORDER.len());
        let seen: HashSet<_> = order.iter().collect();
        assert_eq!(seen.len(), order.len());
    }

    #[test]
    fn teardown_starts_with_instances_then_nat() {
        let order = teardown_order();
        assert_eq!(order[0], Instance);
        assert_eq!(order[1], NatGateway);
        assert_eq!(order[2], ElasticIp);
    }

    #[test]
    fn teardown_preserves_reverse_order_outside_promotions() {
        let order = teardown_order();
        let rest: Vec<_> = order[3..].to_vec();
        let expected: Vec<_> = reverse_order()
            .into_iter()
            .filter(|k| !matches!(k, Instance | NatGateway | ElasticIp))
            .collect();
        assert_eq!(rest, expected);
    }

    #[test]
    fn teardown_deletes_nat_before_route_tables_and_subnets() {
        let order = teardown_order();
        let pos = |kind| order.iter().position(|k| *k == kind).unwrap();
        assert!(pos(NatGateway) < pos(PrivateRouteTable));
        assert!(pos(NatGateway) < pos(PublicRouteTable));
        assert!(pos(NatGateway) < pos(PublicSubnet));
        assert!(pos(NatGateway) < pos(PrivateSubnet));
    }

    #[test]
    fn vpc_is_deleted_last() {
        assert_eq!(teardown_order().last(), Some(&Vpc));
    }

    #[test]
    fn kind_metadata() {
        let async_kinds: Vec<_> = forward_order().iter().filter(|k| k.is_async()).collect();
        assert_eq!(async_kinds, vec![&NatGateway, &Instance]);

        let role_scoped: Vec<_> = forward_order()
            .iter()
            .filter(|k| k.is_role_scoped())
            .collect();
        assert_eq!(role_scoped, vec![&InstanceRole, &InstanceProfile, &Instance]);
    }
}
