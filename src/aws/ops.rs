//! Cloud operations trait
//!
//! Abstracts every create/delete/wait operation the provisioner and
//! deprovisioner perform, so orchestration logic can be unit tested against
//! a recording mock without hitting AWS. [`AwsClients`] is the real
//! implementation, delegating to the typed EC2 and IAM wrappers.

use crate::aws::ec2::{Ec2Client, InstanceAddresses, LaunchSpec};
use crate::aws::iam::IamClient;
use crate::config::LabConfig;
use crate::topology::{Role, SubnetScope};
use anyhow::Result;
use std::fmt;
use std::future::Future;

/// Result of one delete call. The distinction matters for idempotent
/// teardown: "already gone" is success, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

/// Target of a default route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteTarget<'a> {
    InternetGateway(&'a str),
    NatGateway(&'a str),
}

impl fmt::Display for RouteTarget<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteTarget::InternetGateway(id) => write!(f, "internet gateway {id}"),
            RouteTarget::NatGateway(id) => write!(f, "NAT gateway {id}"),
        }
    }
}

/// Every cloud operation the orchestrator needs, in one place.
///
/// The real implementation carries the lab configuration (CIDRs, project
/// tag, operator address), so orchestration code deals only in generated
/// ids.
pub trait CloudOps: Send + Sync {
    // Creation, in dependency order

    fn create_vpc(&self) -> impl Future<Output = Result<String>> + Send;

    fn create_subnet(
        &self,
        vpc_id: &str,
        scope: SubnetScope,
    ) -> impl Future<Output = Result<String>> + Send;

    fn create_internet_gateway(&self) -> impl Future<Output = Result<String>> + Send;

    fn attach_internet_gateway(
        &self,
        igw_id: &str,
        vpc_id: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    fn allocate_elastic_ip(&self) -> impl Future<Output = Result<String>> + Send;

    fn create_nat_gateway(
        &self,
        subnet_id: &str,
        allocation_id: &str,
    ) -> impl Future<Output = Result<String>> + Send;

    fn wait_nat_gateway_available(&self, nat_id: &str)
        -> impl Future<Output = Result<()>> + Send;

    fn create_route_table(
        &self,
        vpc_id: &str,
        scope: SubnetScope,
    ) -> impl Future<Output = Result<String>> + Send;

    fn create_default_route(
        &self,
        route_table_id: &str,
        target: RouteTarget<'_>,
    ) -> impl Future<Output = Result<()>> + Send;

    fn associate_route_table(
        &self,
        route_table_id: &str,
        subnet_id: &str,
    ) -> impl Future<Output = Result<String>> + Send;

    fn create_bastion_security_group(
        &self,
        vpc_id: &str,
    ) -> impl Future<Output = Result<String>> + Send;

    fn create_web_security_group(
        &self,
        vpc_id: &str,
        bastion_sg_id: &str,
    ) -> impl Future<Output = Result<String>> + Send;

    fn create_app_security_group(
        &self,
        vpc_id: &str,
        web_sg_id: &str,
        bastion_sg_id: &str,
    ) -> impl Future<Output = Result<String>> + Send;

    fn create_network_acl(
        &self,
        vpc_id: &str,
        scope: SubnetScope,
    ) -> impl Future<Output = Result<String>> + Send;

    fn associate_network_acl(
        &self,
        acl_id: &str,
        subnet_id: &str,
    ) -> impl Future<Output = Result<String>> + Send;

    fn create_instance_role(&self, role: Role) -> impl Future<Output = Result<String>> + Send;

    fn create_instance_profile(&self, role: Role) -> impl Future<Output = Result<String>> + Send;

    fn run_instance(
        &self,
        role: Role,
        subnet_id: &str,
        security_group_id: &str,
        instance_profile: &str,
    ) -> impl Future<Output = Result<String>> + Send;

    fn wait_instance_running(
        &self,
        instance_id: &str,
    ) -> impl Future<Output = Result<InstanceAddresses>> + Send;

    // Teardown

    fn terminate_instance(
        &self,
        instance_id: &str,
    ) -> impl Future<Output = Result<DeleteOutcome>> + Send;

    fn wait_instance_terminated(
        &self,
        instance_id: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    fn delete_nat_gateway(
        &self,
        nat_id: &str,
    ) -> impl Future<Output = Result<DeleteOutcome>> + Send;

    fn wait_nat_gateway_deleted(&self, nat_id: &str) -> impl Future<Output = Result<()>> + Send;

    fn release_elastic_ip(
        &self,
        allocation_id: &str,
    ) -> impl Future<Output = Result<DeleteOutcome>> + Send;

    fn delete_instance_profile(
        &self,
        profile_name: &str,
    ) -> impl Future<Output = Result<DeleteOutcome>> + Send;

    fn delete_instance_role(
        &self,
        role_name: &str,
    ) -> impl Future<Output = Result<DeleteOutcome>> + Send;

    fn restore_default_network_acl(
        &self,
        association_id: &str,
        vpc_id: &str,
    ) -> impl Future<Output = Result<DeleteOutcome>> + Send;

    fn delete_network_acl(
        &self,
        acl_id: &str,
    ) -> impl Future<Output = Result<DeleteOutcome>> + Send;

    fn delete_security_group(
        &self,
        sg_id: &str,
    ) -> impl Future<Output = Result<DeleteOutcome>> + Send;

    fn disassociate_route_table(
        &self,
        association_id: &str,
    ) -> impl Future<Output = Result<DeleteOutcome>> + Send;

    fn delete_default_route(
        &self,
        route_table_id: &str,
    ) -> impl Future<Output = Result<DeleteOutcome>> + Send;

    fn delete_route_table(
        &self,
        route_table_id: &str,
    ) -> impl Future<Output = Result<DeleteOutcome>> + Send;

    fn detach_internet_gateway(
        &self,
        igw_id: &str,
        vpc_id: &str,
    ) -> impl Future<Output = Result<DeleteOutcome>> + Send;

    fn delete_internet_gateway(
        &self,
        igw_id: &str,
    ) -> impl Future<Output = Result<DeleteOutcome>> + Send;

    fn delete_subnet(
        &self,
        subnet_id: &str,
    ) -> impl Future<Output = Result<DeleteOutcome>> + Send;

    fn delete_vpc(&self, vpc_id: &str) -> impl Future<Output = Result<DeleteOutcome>> + Send;
}

/// Real AWS implementation of [`CloudOps`].
pub struct AwsClients {
    pub ec2: Ec2Client,
    pub iam: IamClient,
    config: LabConfig,
}

impl AwsClients {
    pub fn new(ec2: Ec2Client, iam: IamClient, config: LabConfig) -> Self {
        Self { ec2, iam, config }
    }

    pub fn config(&self) -> &LabConfig {
        &self.config
    }

    fn subnet_cidr(&self, scope: SubnetScope) -> &str {
        match scope {
            SubnetScope::Public => &self.config.public_subnet_cidr,
            SubnetScope::Private => &self.config.private_subnet_cidr,
        }
    }
}

impl CloudOps for AwsClients {
    async fn create_vpc(&self) -> Result<String> {
        self.ec2
            .create_vpc(&self.config.project, &self.config.vpc_cidr)
            .await
    }

    async fn create_subnet(&self, vpc_id: &str, scope: SubnetScope) -> Result<String> {
        self.ec2
            .create_subnet(
                &self.config.project,
                vpc_id,
                self.subnet_cidr(scope),
                &self.config.availability_zone,
                scope,
            )
            .await
    }

    async fn create_internet_gateway(&self) -> Result<String> {
        self.ec2.create_internet_gateway(&self.config.project).await
    }

    async fn attach_internet_gateway(&self, igw_id: &str, vpc_id: &str) -> Result<()> {
        self.ec2.attach_internet_gateway(igw_id, vpc_id).await
    }

    async fn allocate_elastic_ip(&self) -> Result<String> {
        self.ec2.allocate_elastic_ip(&self.config.project).await
    }

    async fn create_nat_gateway(&self, subnet_id: &str, allocation_id: &str) -> Result<String> {
        self.ec2
            .create_nat_gateway(&self.config.project, subnet_id, allocation_id)
            .await
    }

    async fn wait_nat_gateway_available(&self, nat_id: &str) -> Result<()> {
        self.ec2.wait_nat_gateway_available(nat_id).await
    }

    async fn create_route_table(&self, vpc_id: &str, scope: SubnetScope) -> Result<String> {
        self.ec2
            .create_route_table(&self.config.project, vpc_id, scope)
            .await
    }

    async fn create_default_route(
        &self,
        route_table_id: &str,
        target: RouteTarget<'_>,
    ) -> Result<()> {
        self.ec2.create_default_route(route_table_id, target).await
    }

    async fn associate_route_table(
        &self,
        route_table_id: &str,
        subnet_id: &str,
    ) -> Result<String> {
        self.ec2
            .associate_route_table(route_table_id, subnet_id)
            .await
    }

    async fn create_bastion_security_group(&self, vpc_id: &str) -> Result<String> {
        self.ec2
            .create_bastion_security_group(
                &self.config.project,
                vpc_id,
                &self.config.operator_cidr,
            )
            .await
    }

    async fn create_web_security_group(
        &self,
        vpc_id: &str,
        bastion_sg_id: &str,
    ) -> Result<String> {
        self.ec2
            .create_web_security_group(&self.config.project, vpc_id, bastion_sg_id)
            .await
    }

    async fn create_app_security_group(
        &self,
        vpc_id: &str,
        web_sg_id: &str,
        bastion_sg_id: &str,
    ) -> Result<String> {
        self.ec2
            .create_app_security_group(&self.config.project, vpc_id, web_sg_id, bastion_sg_id)
            .await
    }

    async fn create_network_acl(&self, vpc_id: &str, scope: SubnetScope) -> Result<String> {
        self.ec2
            .create_network_acl(
                &self.config.project,
                vpc_id,
                scope,
                &self.config.operator_cidr,
                &self.config.public_subnet_cidr,
            )
            .await
    }

    async fn associate_network_acl(&self, acl_id: &str, subnet_id: &str) -> Result<String> {
        self.ec2.associate_network_acl(acl_id, subnet_id).await
    }

    async fn create_instance_role(&self, role: Role) -> Result<String> {
        self.iam
            .create_instance_role(&self.config.project, role)
            .await
    }

    async fn create_instance_profile(&self, role: Role) -> Result<String> {
        self.iam
            .create_instance_profile(&self.config.project, role)
            .await
    }

    async fn run_instance(
        &self,
        role: Role,
        subnet_id: &str,
        security_group_id: &str,
        instance_profile: &str,
    ) -> Result<String> {
        let mut spec = LaunchSpec::new(
            &self.config.project,
            role,
            &self.config.instance_type,
            subnet_id,
            security_group_id,
            instance_profile,
        );
        if let Some(key) = &self.config.ssh_key_name {
            spec = spec.with_ssh_key(key);
        }
        self.ec2.run_instance(&spec).await
    }

    async fn wait_instance_running(&self, instance_id: &str) -> Result<InstanceAddresses> {
        self.ec2.wait_instance_running(instance_id).await
    }

    async fn terminate_instance(&self, instance_id: &str) -> Result<DeleteOutcome> {
        self.ec2.terminate_instance(instance_id).await
    }

    async fn wait_instance_terminated(&self, instance_id: &str) -> Result<()> {
        self.ec2.wait_instance_terminated(instance_id).await
    }

    async fn delete_nat_gateway(&self, nat_id: &str) -> Result<DeleteOutcome> {
        self.ec2.delete_nat_gateway(nat_id).await
    }

    async fn wait_nat_gateway_deleted(&self, nat_id: &str) -> Result<()> {
        self.ec2.wait_nat_gateway_deleted(nat_id).await
    }

    async fn release_elastic_ip(&self, allocation_id: &str) -> Result<DeleteOutcome> {
        self.ec2.release_elastic_ip(allocation_id).await
    }

    async fn delete_instance_profile(&self, profile_name: &str) -> Result<DeleteOutcome> {
        self.iam.delete_instance_profile(profile_name).await
    }

    async fn delete_instance_role(&self, role_name: &str) -> Result<DeleteOutcome> {
        self.iam.delete_instance_role(role_name).await
    }

    async fn restore_default_network_acl(
        &self,
        association_id: &str,
        vpc_id: &str,
    ) -> Result<DeleteOutcome> {
        self.ec2
            .restore_default_network_acl(association_id, vpc_id)
            .await
    }

    async fn delete_network_acl(&self, acl_id: &str) -> Result<DeleteOutcome> {
        self.ec2.delete_network_acl(acl_id).await
    }

    async fn delete_security_group(&self, sg_id: &str) -> Result<DeleteOutcome> {
        self.ec2.delete_security_group(sg_id).await
    }

    async fn disassociate_route_table(&self, association_id: &str) -> Result<DeleteOutcome> {
        self.ec2.disassociate_route_table(association_id).await
    }

    async fn delete_default_route(&self, route_table_id: &str) -> Result<DeleteOutcome> {
        self.ec2.delete_default_route(route_table_id).await
    }

    async fn delete_route_table(&self, route_table_id: &str) -> Result<DeleteOutcome> {
        self.ec2.delete_route_table(route_table_id).await
    }

    async fn detach_internet_gateway(&self, igw_id: &str, vpc_id: &str) -> Result<DeleteOutcome> {
        self.ec2.detach_internet_gateway(igw_id, vpc_id).await
    }

    async fn delete_internet_gateway(&self, igw_id: &str) -> Result<DeleteOutcome> {
        self.ec2.delete_internet_gateway(igw_id).await
    }

    async fn delete_subnet(&self, subnet_id: &str) -> Result<DeleteOutcome> {
        self.ec2.delete_subnet(subnet_id).await
    }

    async fn delete_vpc(&self, vpc_id: &str) -> Result<DeleteOutcome> {
        self.ec2.delete_vpc(vpc_id).await
    }
}
