//! Elastic IP, NAT gateway, and route table operations

use super::Ec2Client;
use crate::aws::error::ignore_not_found;
use crate::aws::ops::{DeleteOutcome, RouteTarget};
use crate::aws::tags;
use crate::topology::SubnetScope;
use crate::wait::{wait_for_resource, WaitConfig};
use anyhow::{Context, Result};
use aws_sdk_ec2::types::{DomainType, Filter, NatGatewayState, ResourceType};
use std::time::Duration;
use tracing::{debug, info};

/// Destination CIDR of the default route in both route tables.
pub const DEFAULT_ROUTE_CIDR: &str = "0.0.0.0/0";

/// NAT gateways routinely take minutes to provision (10 minute ceiling).
const NAT_WAIT_TIMEOUT_SECS: u64 = 600;

impl Ec2Client {
    /// Allocate an Elastic IP for the NAT gateway.
    pub async fn allocate_elastic_ip(&self, project: &str) -> Result<String> {
        info!("Allocating Elastic IP");

        let response = self
            .client
            .allocate_address()
            .domain(DomainType::Vpc)
            .tag_specifications(tags::ec2_tag_spec(
                ResourceType::ElasticIp,
                project,
                &format!("{project}-nat-eip"),
                None,
            ))
            .send()
            .await
            .context("Failed to allocate Elastic IP")?;

        let allocation_id = response
            .allocation_id()
            .context("No allocation ID in response")?
            .to_string();

        info!(allocation_id = %allocation_id, "Elastic IP allocated");
        Ok(allocation_id)
    }

    /// Release an Elastic IP.
    pub async fn release_elastic_ip(&self, allocation_id: &str) -> Result<DeleteOutcome> {
        info!(allocation_id = %allocation_id, "Releasing Elastic IP");

        let result = self
            .client
            .release_address()
            .allocation_id(allocation_id)
            .send()
            .await;
        match ignore_not_found(result).context("Failed to release Elastic IP")? {
            Some(_) => Ok(DeleteOutcome::Deleted),
            None => {
                debug!(allocation_id = %allocation_id, "Elastic IP already released");
                Ok(DeleteOutcome::NotFound)
            }
        }
    }

    /// Create a NAT gateway in the given public subnet.
    ///
    /// The gateway is not usable until it reports `available`; callers must
    /// follow up with [`Ec2Client::wait_nat_gateway_available`] before
    /// routing through it.
    pub async fn create_nat_gateway(
        &self,
        project: &str,
        subnet_id: &str,
        allocation_id: &str,
    ) -> Result<String> {
        info!(subnet_id = %subnet_id, allocation_id = %allocation_id, "Creating NAT gateway");

        let response = self
            .client
            .create_nat_gateway()
            .subnet_id(subnet_id)
            .allocation_id(allocation_id)
            .tag_specifications(tags::ec2_tag_spec(
                ResourceType::Natgateway,
                project,
                &format!("{project}-nat"),
                None,
            ))
            .send()
            .await
            .context("Failed to create NAT gateway")?;

        let nat_id = response
            .nat_gateway()
            .and_then(|n| n.nat_gateway_id())
            .context("No NAT gateway ID in response")?
            .to_string();

        info!(nat_id = %nat_id, "NAT gateway created, waiting for it to become available");
        Ok(nat_id)
    }

    /// Wait until a NAT gateway reports `available`.
    pub async fn wait_nat_gateway_available(&self, nat_id: &str) -> Result<()> {
        wait_for_resource(
            WaitConfig {
                initial_delay: Duration::from_secs(5),
                max_delay: Duration::from_secs(20),
                timeout: Duration::from_secs(NAT_WAIT_TIMEOUT_SECS),
            },
            || async {
                let state = self.nat_gateway_state(nat_id).await?;
                match state {
                    Some(NatGatewayState::Available) => Ok(true),
                    Some(NatGatewayState::Pending) | None => Ok(false),
                    Some(other) => anyhow::bail!(
                        "NAT gateway {} entered unexpected state: {:?}",
                        nat_id,
                        other
                    ),
                }
            },
            &format!("NAT gateway {} available", nat_id),
        )
        .await
    }

    /// Delete a NAT gateway. Deletion is asynchronous; callers that need the
    /// subnet or the Elastic IP free must follow up with
    /// [`Ec2Client::wait_nat_gateway_deleted`].
    pub async fn delete_nat_gateway(&self, nat_id: &str) -> Result<DeleteOutcome> {
        info!(nat_id = %nat_id, "Deleting NAT gateway");

        let result = self
            .client
            .delete_nat_gateway()
            .nat_gateway_id(nat_id)
            .send()
            .await;
        match ignore_not_found(result).context("Failed to delete NAT gateway")? {
            Some(_) => Ok(DeleteOutcome::Deleted),
            None => {
                debug!(nat_id = %nat_id, "NAT gateway already deleted");
                Ok(DeleteOutcome::NotFound)
            }
        }
    }

    /// Wait until a NAT gateway reports `deleted` (or disappears entirely).
    pub async fn wait_nat_gateway_deleted(&self, nat_id: &str) -> Result<()> {
        wait_for_resource(
            WaitConfig {
                initial_delay: Duration::from_secs(5),
                max_delay: Duration::from_secs(20),
                timeout: Duration::from_secs(NAT_WAIT_TIMEOUT_SECS),
            },
            || async {
                match self.nat_gateway_state(nat_id).await {
                    Ok(Some(NatGatewayState::Deleted)) | Ok(None) => Ok(true),
                    Ok(_) => Ok(false),
                    // Describe racing with deletion can briefly error; retry
                    Err(_) => Ok(true),
                }
            },
            &format!("NAT gateway {} deleted", nat_id),
        )
        .await
    }

    async fn nat_gateway_state(&self, nat_id: &str) -> Result<Option<NatGatewayState>> {
        let response = self
            .client
            .describe_nat_gateways()
            .nat_gateway_ids(nat_id)
            .send()
            .await
            .context("Failed to describe NAT gateway")?;

        Ok(response
            .nat_gateways()
            .first()
            .and_then(|n| n.state())
            .cloned())
    }

    /// Create a route table in the VPC.
    pub async fn create_route_table(
        &self,
        project: &str,
        vpc_id: &str,
        scope: SubnetScope,
    ) -> Result<String> {
        info!(vpc_id = %vpc_id, scope = %scope.as_str(), "Creating route table");

        let response = self
            .client
            .create_route_table()
            .vpc_id(vpc_id)
            .tag_specifications(tags::ec2_tag_spec(
                ResourceType::RouteTable,
                project,
                &format!("{project}-{}-rt", scope.as_str()),
                None,
            ))
            .send()
            .await
            .context("Failed to create route table")?;

        let rt_id = response
            .route_table()
            .and_then(|rt| rt.route_table_id())
            .context("No route table ID in response")?
            .to_string();

        info!(route_table_id = %rt_id, "Route table created");
        Ok(rt_id)
    }

    /// Delete a route table. Its non-main associations must be removed first.
    pub async fn delete_route_table(&self, route_table_id: &str) -> Result<DeleteOutcome> {
        info!(route_table_id = %route_table_id, "Deleting route table");

        let result = self
            .client
            .delete_route_table()
            .route_table_id(route_table_id)
            .send()
            .await;
        match ignore_not_found(result).context("Failed to delete route table")? {
            Some(_) => Ok(DeleteOutcome::Deleted),
            None => {
                debug!(route_table_id = %route_table_id, "Route table already deleted");
                Ok(DeleteOutcome::NotFound)
            }
        }
    }

    /// Install the default route (0.0.0.0/0) into a route table.
    pub async fn create_default_route(
        &self,
        route_table_id: &str,
        target: RouteTarget<'_>,
    ) -> Result<()> {
        info!(route_table_id = %route_table_id, target = %target, "Creating default route");

        let mut request = self
            .client
            .create_route()
            .route_table_id(route_table_id)
            .destination_cidr_block(DEFAULT_ROUTE_CIDR);
        request = match target {
            RouteTarget::InternetGateway(id) => request.gateway_id(id),
            RouteTarget::NatGateway(id) => request.nat_gateway_id(id),
        };
        request.send().await.context("Failed to create route")?;

        Ok(())
    }

    /// Remove the default route from a route table.
    pub async fn delete_default_route(&self, route_table_id: &str) -> Result<DeleteOutcome> {
        info!(route_table_id = %route_table_id, "Deleting default route");

        let result = self
            .client
            .delete_route()
            .route_table_id(route_table_id)
            .destination_cidr_block(DEFAULT_ROUTE_CIDR)
            .send()
            .await;
        match ignore_not_found(result).context("Failed to delete route")? {
            Some(_) => Ok(DeleteOutcome::Deleted),
            None => {
                debug!(route_table_id = %route_table_id, "Route already deleted");
                Ok(DeleteOutcome::NotFound)
            }
        }
    }

    /// Associate a route table with a subnet. Returns the association id.
    pub async fn associate_route_table(
        &self,
        route_table_id: &str,
        subnet_id: &str,
    ) -> Result<String> {
        info!(route_table_id = %route_table_id, subnet_id = %subnet_id, "Associating route table");

        let response = self
            .client
            .associate_route_table()
            .route_table_id(route_table_id)
            .subnet_id(subnet_id)
            .send()
            .await
            .context("Failed to associate route table")?;

        let association_id = response
            .association_id()
            .context("No association ID in response")?
            .to_string();

        Ok(association_id)
    }

    /// Remove a route table association.
    pub async fn disassociate_route_table(&self, association_id: &str) -> Result<DeleteOutcome> {
        info!(association_id = %association_id, "Disassociating route table");

        let result = self
            .client
            .disassociate_route_table()
            .association_id(association_id)
            .send()
            .await;
        match ignore_not_found(result).context("Failed to disassociate route table")? {
            Some(_) => Ok(DeleteOutcome::Deleted),
            None => {
                debug!(association_id = %association_id, "Association already removed");
                Ok(DeleteOutcome::NotFound)
            }
        }
    }

    /// Find NAT gateways inside a VPC that are not deleted or deleting.
    pub async fn live_nat_gateways(&self, vpc_id: &str) -> Result<Vec<String>> {
        let response = self
            .client
            .describe_nat_gateways()
            .filter(Filter::builder().name("vpc-id").values(vpc_id).build())
            .filter(
                Filter::builder()
                    .name("state")
                    .values("pending")
                    .values("available")
                    .build(),
            )
            .send()
            .await
            .context("Failed to describe NAT gateways")?;

        Ok(response
            .nat_gateways()
            .iter()
            .filter_map(|n| n.nat_gateway_id())
            .map(|id| id.to_string())
            .collect())
    }
}
