//! Shared test doubles for orchestration tests.
//!
//! `MockCloud` implements [`CloudOps`] with deterministic ids, records every
//! call in order, tracks which objects have been deleted (so a second delete
//! reports not-found, like the real control plane), and can be told to fail
//! any single operation by name.

use crate::aws::ec2::InstanceAddresses;
use crate::aws::ops::{CloudOps, DeleteOutcome, RouteTarget};
use crate::graph::ResourceKind;
use crate::topology::{Role, SubnetScope};
use anyhow::Result;
use std::collections::HashSet;
use std::sync::Mutex;

/// One recorded gateway call.
#[derive(Debug, Clone)]
pub struct CallRecord {
    pub op: &'static str,
    pub id: String,
}

#[derive(Default)]
pub struct MockCloud {
    calls: Mutex<Vec<CallRecord>>,
    created: Mutex<Vec<ResourceKind>>,
    deleted: Mutex<HashSet<String>>,
    fail_ops: HashSet<&'static str>,
}

impl MockCloud {
    /// Make the named operation fail with an injected error.
    pub fn failing_on(mut self, op: &'static str) -> Self {
        self.fail_ops.insert(op);
        self
    }

    pub fn calls(&self) -> Vec<CallRecord> {
        self.calls.lock().unwrap().clone()
    }

    /// Kinds in the order their create calls were issued.
    pub fn created_kinds(&self) -> Vec<ResourceKind> {
        self.created.lock().unwrap().clone()
    }

    /// Forget recorded calls (but keep deletion state), so tests can look at
    /// teardown traffic in isolation.
    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
        self.created.lock().unwrap().clear();
    }

    fn check(&self, op: &'static str) -> Result<()> {
        if self.fail_ops.contains(op) {
            anyhow::bail!("injected failure in {op}");
        }
        Ok(())
    }

    fn record(&self, op: &'static str, id: impl Into<String>) {
        self.calls.lock().unwrap().push(CallRecord {
            op,
            id: id.into(),
        });
    }

    fn create(&self, op: &'static str, kind: ResourceKind, id: &str) -> Result<String> {
        self.check(op)?;
        self.record(op, id);
        self.created.lock().unwrap().push(kind);
        Ok(id.to_string())
    }

    fn delete(&self, op: &'static str, id: &str) -> Result<DeleteOutcome> {
        self.check(op)?;
        self.record(op, id);
        let key = format!("{op}:{id}");
        if self.deleted.lock().unwrap().insert(key) {
            Ok(DeleteOutcome::Deleted)
        } else {
            Ok(DeleteOutcome::NotFound)
        }
    }

    fn scope_of(id: &str) -> SubnetScope {
        if id.ends_with("public") {
            SubnetScope::Public
        } else {
            SubnetScope::Private
        }
    }
}

impl CloudOps for MockCloud {
    async fn create_vpc(&self) -> Result<String> {
        self.create("create_vpc", ResourceKind::Vpc, "vpc-1")
    }

    async fn create_subnet(&self, _vpc_id: &str, scope: SubnetScope) -> Result<String> {
        let (kind, id) = match scope {
            SubnetScope::Public => (ResourceKind::PublicSubnet, "subnet-public"),
            SubnetScope::Private => (ResourceKind::PrivateSubnet, "subnet-private"),
        };
        self.create("create_subnet", kind, id)
    }

    async fn create_internet_gateway(&self) -> Result<String> {
        self.create("create_internet_gateway", ResourceKind::InternetGateway, "igw-1")
    }

    async fn attach_internet_gateway(&self, igw_id: &str, _vpc_id: &str) -> Result<()> {
        self.create(
            "attach_internet_gateway",
            ResourceKind::InternetGatewayAttachment,
            igw_id,
        )?;
        Ok(())
    }

    async fn allocate_elastic_ip(&self) -> Result<String> {
        self.create("allocate_elastic_ip", ResourceKind::ElasticIp, "eipalloc-1")
    }

    async fn create_nat_gateway(&self, _subnet_id: &str, _allocation_id: &str) -> Result<String> {
        self.create("create_nat_gateway", ResourceKind::NatGateway, "nat-1")
    }

    async fn wait_nat_gateway_available(&self, nat_id: &str) -> Result<()> {
        self.check("wait_nat_gateway_available")?;
        self.record("wait_nat_gateway_available", nat_id);
        Ok(())
    }

    async fn create_route_table(&self, _vpc_id: &str, scope: SubnetScope) -> Result<String> {
        let (kind, id) = match scope {
            SubnetScope::Public => (ResourceKind::PublicRouteTable, "rtb-public"),
            SubnetScope::Private => (ResourceKind::PrivateRouteTable, "rtb-private"),
        };
        self.create("create_route_table", kind, id)
    }

    async fn create_default_route(
        &self,
        route_table_id: &str,
        target: RouteTarget<'_>,
    ) -> Result<()> {
        let kind = match target {
            RouteTarget::InternetGateway(_) => ResourceKind::PublicRoute,
            RouteTarget::NatGateway(_) => ResourceKind::PrivateRoute,
        };
        self.create("create_default_route", kind, route_table_id)?;
        Ok(())
    }

    async fn associate_route_table(
        &self,
        route_table_id: &str,
        _subnet_id: &str,
    ) -> Result<String> {
        let (kind, id) = match Self::scope_of(route_table_id) {
            SubnetScope::Public => (
                ResourceKind::PublicRouteTableAssociation,
                "rtbassoc-public",
            ),
            SubnetScope::Private => (
                ResourceKind::PrivateRouteTableAssociation,
                "rtbassoc-private",
            ),
        };
        self.create("associate_route_table", kind, id)
    }

    async fn create_bastion_security_group(&self, _vpc_id: &str) -> Result<String> {
        self.create(
            "create_bastion_security_group",
            ResourceKind::BastionSecurityGroup,
            "sg-bastion",
        )
    }

    async fn create_web_security_group(
        &self,
        _vpc_id: &str,
        _bastion_sg_id: &str,
    ) -> Result<String> {
        self.create(
            "create_web_security_group",
            ResourceKind::WebSecurityGroup,
            "sg-web",
        )
    }

    async fn create_app_security_group(
        &self,
        _vpc_id: &str,
        _web_sg_id: &str,
        _bastion_sg_id: &str,
    ) -> Result<String> {
        self.create(
            "create_app_security_group",
            ResourceKind::AppSecurityGroup,
            "sg-app",
        )
    }

    async fn create_network_acl(&self, _vpc_id: &str, scope: SubnetScope) -> Result<String> {
        let (kind, id) = match scope {
            SubnetScope::Public => (ResourceKind::PublicNetworkAcl, "acl-public"),
            SubnetScope::Private => (ResourceKind::PrivateNetworkAcl, "acl-private"),
        };
        self.create("create_network_acl", kind, id)
    }

    async fn associate_network_acl(&self, acl_id: &str, _subnet_id: &str) -> Result<String> {
        let (kind, id) = match Self::scope_of(acl_id) {
            SubnetScope::Public => (
                ResourceKind::PublicNetworkAclAssociation,
                "aclassoc-public",
            ),
            SubnetScope::Private => (
                ResourceKind::PrivateNetworkAclAssociation,
                "aclassoc-private",
            ),
        };
        self.create("associate_network_acl", kind, id)
    }

    async fn create_instance_role(&self, role: Role) -> Result<String> {
        self.create(
            "create_instance_role",
            ResourceKind::InstanceRole,
            &format!("role-{role}"),
        )
    }

    async fn create_instance_profile(&self, role: Role) -> Result<String> {
        self.create(
            "create_instance_profile",
            ResourceKind::InstanceProfile,
            &format!("profile-{role}"),
        )
    }

    async fn run_instance(
        &self,
        role: Role,
        _subnet_id: &str,
        _security_group_id: &str,
        _instance_profile: &str,
    ) -> Result<String> {
        self.create("run_instance", ResourceKind::Instance, &format!("i-{role}"))
    }

    async fn wait_instance_running(&self, instance_id: &str) -> Result<InstanceAddresses> {
        self.check("wait_instance_running")?;
        self.record("wait_instance_running", instance_id);
        Ok(InstanceAddresses {
            public_ip: Some("203.0.113.10".to_string()),
            private_ip: Some("10.0.2.10".to_string()),
        })
    }

    async fn terminate_instance(&self, instance_id: &str) -> Result<DeleteOutcome> {
        self.delete("terminate_instance", instance_id)
    }

    async fn wait_instance_terminated(&self, instance_id: &str) -> Result<()> {
        self.check("wait_instance_terminated")?;
        self.record("wait_instance_terminated", instance_id);
        Ok(())
    }

    async fn delete_nat_gateway(&self, nat_id: &str) -> Result<DeleteOutcome> {
        self.delete("delete_nat_gateway", nat_id)
    }

    async fn wait_nat_gateway_deleted(&self, nat_id: &str) -> Result<()> {
        self.check("wait_nat_gateway_deleted")?;
        self.record("wait_nat_gateway_deleted", nat_id);
        Ok(())
    }

    async fn release_elastic_ip(&self, allocation_id: &str) -> Result<DeleteOutcome> {
        self.delete("release_elastic_ip", allocation_id)
    }

    async fn delete_instance_profile(&self, profile_name: &str) -> Result<DeleteOutcome> {
        self.delete("delete_instance_profile", profile_name)
    }

    async fn delete_instance_role(&self, role_name: &str) -> Result<DeleteOutcome> {
        self.delete("delete_instance_role", role_name)
    }

    async fn restore_default_network_acl(
        &self,
        association_id: &str,
        _vpc_id: &str,
    ) -> Result<DeleteOutcome> {
        self.delete("restore_default_network_acl", association_id)
    }

    async fn delete_network_acl(&self, acl_id: &str) -> Result<DeleteOutcome> {
        self.delete("delete_network_acl", acl_id)
    }

    async fn delete_security_group(&self, sg_id: &str) -> Result<DeleteOutcome> {
        self.delete("delete_security_group", sg_id)
    }

    async fn disassociate_route_table(&self, association_id: &str) -> Result<DeleteOutcome> {
        self.delete("disassociate_route_table", association_id)
    }

    async fn delete_default_route(&self, route_table_id: &str) -> Result<DeleteOutcome> {
        self.delete("delete_default_route", route_table_id)
    }

    async fn delete_route_table(&self, route_table_id: &str) -> Result<DeleteOutcome> {
        self.delete("delete_route_table", route_table_id)
    }

    async fn detach_internet_gateway(&self, igw_id: &str, _vpc_id: &str) -> Result<DeleteOutcome> {
        self.delete("detach_internet_gateway", igw_id)
    }

    async fn delete_internet_gateway(&self, igw_id: &str) -> Result<DeleteOutcome> {
        self.delete("delete_internet_gateway", igw_id)
    }

    async fn delete_subnet(&self, subnet_id: &str) -> Result<DeleteOutcome> {
        self.delete("delete_subnet", subnet_id)
    }

    async fn delete_vpc(&self, vpc_id: &str) -> Result<DeleteOutcome> {
        self.delete("delete_vpc", vpc_id)
    }
}
