//! VPC, subnet, and internet gateway operations

use super::Ec2Client;
use crate::aws::error::ignore_not_found;
use crate::aws::ops::DeleteOutcome;
use crate::aws::tags;
use crate::topology::SubnetScope;
use anyhow::{Context, Result};
use aws_sdk_ec2::types::{AttributeBooleanValue, ResourceType};
use tracing::{debug, info};

impl Ec2Client {
    /// Create the lab VPC with DNS support and hostnames enabled.
    pub async fn create_vpc(&self, project: &str, cidr: &str) -> Result<String> {
        info!(cidr = %cidr, "Creating VPC");

        let response = self
            .client
            .create_vpc()
            .cidr_block(cidr)
            .tag_specifications(tags::ec2_tag_spec(
                ResourceType::Vpc,
                project,
                &format!("{project}-vpc"),
                None,
            ))
            .send()
            .await
            .context("Failed to create VPC")?;

        let vpc_id = response
            .vpc()
            .and_then(|v| v.vpc_id())
            .context("No VPC ID in response")?
            .to_string();

        // Instances in the private subnet resolve package mirrors by name,
        // so both DNS attributes must be on before anything boots.
        self.client
            .modify_vpc_attribute()
            .vpc_id(&vpc_id)
            .enable_dns_support(AttributeBooleanValue::builder().value(true).build())
            .send()
            .await
            .context("Failed to enable DNS support on VPC")?;
        self.client
            .modify_vpc_attribute()
            .vpc_id(&vpc_id)
            .enable_dns_hostnames(AttributeBooleanValue::builder().value(true).build())
            .send()
            .await
            .context("Failed to enable DNS hostnames on VPC")?;

        info!(vpc_id = %vpc_id, "VPC created");
        Ok(vpc_id)
    }

    /// Delete a VPC. Everything inside it must already be gone.
    pub async fn delete_vpc(&self, vpc_id: &str) -> Result<DeleteOutcome> {
        info!(vpc_id = %vpc_id, "Deleting VPC");

        let result = self.client.delete_vpc().vpc_id(vpc_id).send().await;
        match ignore_not_found(result).context("Failed to delete VPC")? {
            Some(_) => Ok(DeleteOutcome::Deleted),
            None => {
                debug!(vpc_id = %vpc_id, "VPC already deleted");
                Ok(DeleteOutcome::NotFound)
            }
        }
    }

    /// Create a subnet. Public subnets map public IPs onto launched instances.
    pub async fn create_subnet(
        &self,
        project: &str,
        vpc_id: &str,
        cidr: &str,
        availability_zone: &str,
        scope: SubnetScope,
    ) -> Result<String> {
        info!(cidr = %cidr, scope = %scope.as_str(), "Creating subnet");

        let response = self
            .client
            .create_subnet()
            .vpc_id(vpc_id)
            .cidr_block(cidr)
            .availability_zone(availability_zone)
            .tag_specifications(tags::ec2_tag_spec(
                ResourceType::Subnet,
                project,
                &format!("{project}-{}", scope.as_str()),
                None,
            ))
            .send()
            .await
            .context("Failed to create subnet")?;

        let subnet_id = response
            .subnet()
            .and_then(|s| s.subnet_id())
            .context("No subnet ID in response")?
            .to_string();

        if scope == SubnetScope::Public {
            self.client
                .modify_subnet_attribute()
                .subnet_id(&subnet_id)
                .map_public_ip_on_launch(AttributeBooleanValue::builder().value(true).build())
                .send()
                .await
                .context("Failed to enable public IP mapping on subnet")?;
        }

        info!(subnet_id = %subnet_id, scope = %scope.as_str(), "Subnet created");
        Ok(subnet_id)
    }

    /// Delete a subnet.
    pub async fn delete_subnet(&self, subnet_id: &str) -> Result<DeleteOutcome> {
        info!(subnet_id = %subnet_id, "Deleting subnet");

        let result = self
            .client
            .delete_subnet()
            .subnet_id(subnet_id)
            .send()
            .await;
        match ignore_not_found(result).context("Failed to delete subnet")? {
            Some(_) => Ok(DeleteOutcome::Deleted),
            None => {
                debug!(subnet_id = %subnet_id, "Subnet already deleted");
                Ok(DeleteOutcome::NotFound)
            }
        }
    }

    /// Create an internet gateway.
    pub async fn create_internet_gateway(&self, project: &str) -> Result<String> {
        info!("Creating internet gateway");

        let response = self
            .client
            .create_internet_gateway()
            .tag_specifications(tags::ec2_tag_spec(
                ResourceType::InternetGateway,
                project,
                &format!("{project}-igw"),
                None,
            ))
            .send()
            .await
            .context("Failed to create internet gateway")?;

        let igw_id = response
            .internet_gateway()
            .and_then(|g| g.internet_gateway_id())
            .context("No internet gateway ID in response")?
            .to_string();

        info!(igw_id = %igw_id, "Internet gateway created");
        Ok(igw_id)
    }

    /// Attach an internet gateway to a VPC.
    pub async fn attach_internet_gateway(&self, igw_id: &str, vpc_id: &str) -> Result<()> {
        info!(igw_id = %igw_id, vpc_id = %vpc_id, "Attaching internet gateway");

        self.client
            .attach_internet_gateway()
            .internet_gateway_id(igw_id)
            .vpc_id(vpc_id)
            .send()
            .await
            .context("Failed to attach internet gateway")?;

        Ok(())
    }

    /// Detach an internet gateway from a VPC.
    pub async fn detach_internet_gateway(
        &self,
        igw_id: &str,
        vpc_id: &str,
    ) -> Result<DeleteOutcome> {
        info!(igw_id = %igw_id, vpc_id = %vpc_id, "Detaching internet gateway");

        let result = self
            .client
            .detach_internet_gateway()
            .internet_gateway_id(igw_id)
            .vpc_id(vpc_id)
            .send()
            .await;
        match ignore_not_found(result).context("Failed to detach internet gateway")? {
            Some(_) => Ok(DeleteOutcome::Deleted),
            None => {
                debug!(igw_id = %igw_id, "Internet gateway already detached");
                Ok(DeleteOutcome::NotFound)
            }
        }
    }

    /// Delete an internet gateway. It must be detached first.
    pub async fn delete_internet_gateway(&self, igw_id: &str) -> Result<DeleteOutcome> {
        info!(igw_id = %igw_id, "Deleting internet gateway");

        let result = self
            .client
            .delete_internet_gateway()
            .internet_gateway_id(igw_id)
            .send()
            .await;
        match ignore_not_found(result).context("Failed to delete internet gateway")? {
            Some(_) => Ok(DeleteOutcome::Deleted),
            None => {
                debug!(igw_id = %igw_id, "Internet gateway already deleted");
                Ok(DeleteOutcome::NotFound)
            }
        }
    }
}
