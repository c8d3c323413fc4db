//! Network ACL operations
//!
//! Each subnet gets a dedicated ACL replacing the VPC default association.
//! Removing an association at teardown means pointing it back at the VPC's
//! default ACL; there is no standalone disassociate call.

use super::Ec2Client;
use crate::aws::error::ignore_not_found;
use crate::aws::ops::DeleteOutcome;
use crate::aws::tags;
use crate::config::defaults::{APP_PORT, EPHEMERAL_PORT_FROM, EPHEMERAL_PORT_TO};
use crate::topology::SubnetScope;
use anyhow::{Context, Result};
use aws_sdk_ec2::types::{Filter, PortRange, ResourceType, RuleAction};
use tracing::{debug, info};

const ANYWHERE: &str = "0.0.0.0/0";

/// One allow entry in a network ACL rule set.
struct AclRule {
    number: i32,
    egress: bool,
    cidr: String,
    from_port: i32,
    to_port: i32,
}

impl AclRule {
    fn new(number: i32, egress: bool, cidr: &str, from_port: i32, to_port: i32) -> Self {
        Self {
            number,
            egress,
            cidr: cidr.to_string(),
            from_port,
            to_port,
        }
    }
}

/// Rule set for the public subnet: SSH from the operator only, web from
/// anywhere, ephemeral ports both ways for return traffic.
fn public_rules(operator_cidr: &str) -> Vec<AclRule> {
    vec![
        AclRule::new(100, false, operator_cidr, 22, 22),
        AclRule::new(110, false, ANYWHERE, 80, 80),
        AclRule::new(120, false, ANYWHERE, 443, 443),
        AclRule::new(140, false, ANYWHERE, EPHEMERAL_PORT_FROM, EPHEMERAL_PORT_TO),
        AclRule::new(100, true, ANYWHERE, 80, 80),
        AclRule::new(110, true, ANYWHERE, 443, 443),
        AclRule::new(120, true, ANYWHERE, 22, 22),
        AclRule::new(140, true, ANYWHERE, EPHEMERAL_PORT_FROM, EPHEMERAL_PORT_TO),
    ]
}

/// Rule set for the private subnet: SSH and the app port from the public
/// subnet only, outbound web through the NAT gateway, ephemeral return paths.
fn private_rules(public_subnet_cidr: &str) -> Vec<AclRule> {
    vec![
        AclRule::new(100, false, public_subnet_cidr, 22, 22),
        AclRule::new(110, false, public_subnet_cidr, APP_PORT, APP_PORT),
        AclRule::new(120, false, ANYWHERE, EPHEMERAL_PORT_FROM, EPHEMERAL_PORT_TO),
        AclRule::new(100, true, ANYWHERE, 80, 80),
        AclRule::new(110, true, ANYWHERE, 443, 443),
        AclRule::new(
            120,
            true,
            public_subnet_cidr,
            EPHEMERAL_PORT_FROM,
            EPHEMERAL_PORT_TO,
        ),
    ]
}

impl Ec2Client {
    /// Create a network ACL with the rule set for the given subnet scope.
    pub async fn create_network_acl(
        &self,
        project: &str,
        vpc_id: &str,
        scope: SubnetScope,
        operator_cidr: &str,
        public_subnet_cidr: &str,
    ) -> Result<String> {
        info!(vpc_id = %vpc_id, scope = %scope.as_str(), "Creating network ACL");

        let response = self
            .client
            .create_network_acl()
            .vpc_id(vpc_id)
            .tag_specifications(tags::ec2_tag_spec(
                ResourceType::NetworkAcl,
                project,
                &format!("{project}-{}-acl", scope.as_str()),
                None,
            ))
            .send()
            .await
            .context("Failed to create network ACL")?;

        let acl_id = response
            .network_acl()
            .and_then(|a| a.network_acl_id())
            .context("No network ACL ID in response")?
            .to_string();

        let rules = match scope {
            SubnetScope::Public => public_rules(operator_cidr),
            SubnetScope::Private => private_rules(public_subnet_cidr),
        };

        for rule in rules {
            self.client
                .create_network_acl_entry()
                .network_acl_id(&acl_id)
                .rule_number(rule.number)
                .protocol("6")
                .rule_action(RuleAction::Allow)
                .egress(rule.egress)
                .cidr_block(&rule.cidr)
                .port_range(
                    PortRange::builder()
                        .from(rule.from_port)
                        .to(rule.to_port)
                        .build(),
                )
                .send()
                .await
                .with_context(|| {
                    format!(
                        "Failed to add {} rule {} to network ACL",
                        if rule.egress { "egress" } else { "ingress" },
                        rule.number
                    )
                })?;
        }

        info!(acl_id = %acl_id, "Network ACL created with rules");
        Ok(acl_id)
    }

    /// Delete a network ACL. Its subnet associations must have been restored
    /// to the default ACL first.
    pub async fn delete_network_acl(&self, acl_id: &str) -> Result<DeleteOutcome> {
        info!(acl_id = %acl_id, "Deleting network ACL");

        let result = self
            .client
            .delete_network_acl()
            .network_acl_id(acl_id)
            .send()
            .await;
        match ignore_not_found(result).context("Failed to delete network ACL")? {
            Some(_) => Ok(DeleteOutcome::Deleted),
            None => {
                debug!(acl_id = %acl_id, "Network ACL already deleted");
                Ok(DeleteOutcome::NotFound)
            }
        }
    }

    /// Point a subnet's ACL association at the given ACL.
    ///
    /// Subnets are always associated with exactly one ACL, so "associating"
    /// means replacing the current association. Returns the new association
    /// id.
    pub async fn associate_network_acl(&self, acl_id: &str, subnet_id: &str) -> Result<String> {
        info!(acl_id = %acl_id, subnet_id = %subnet_id, "Associating network ACL");

        let current = self
            .subnet_acl_association(subnet_id)
            .await?
            .context("Subnet has no current network ACL association")?;

        let response = self
            .client
            .replace_network_acl_association()
            .association_id(&current)
            .network_acl_id(acl_id)
            .send()
            .await
            .context("Failed to replace network ACL association")?;

        let association_id = response
            .new_association_id()
            .context("No association ID in response")?
            .to_string();

        Ok(association_id)
    }

    /// Restore a subnet's ACL association to the VPC default ACL.
    pub async fn restore_default_network_acl(
        &self,
        association_id: &str,
        vpc_id: &str,
    ) -> Result<DeleteOutcome> {
        info!(association_id = %association_id, vpc_id = %vpc_id, "Restoring default network ACL");

        let default_acl = match self.default_network_acl(vpc_id).await? {
            Some(id) => id,
            // VPC (and its default ACL) already gone
            None => {
                debug!(vpc_id = %vpc_id, "No default network ACL found");
                return Ok(DeleteOutcome::NotFound);
            }
        };

        let result = self
            .client
            .replace_network_acl_association()
            .association_id(association_id)
            .network_acl_id(&default_acl)
            .send()
            .await;
        match ignore_not_found(result).context("Failed to restore default network ACL")? {
            Some(_) => Ok(DeleteOutcome::Deleted),
            None => {
                debug!(association_id = %association_id, "ACL association already gone");
                Ok(DeleteOutcome::NotFound)
            }
        }
    }

    /// Find the VPC's default (implicitly created) network ACL.
    async fn default_network_acl(&self, vpc_id: &str) -> Result<Option<String>> {
        let response = self
            .client
            .describe_network_acls()
            .filters(Filter::builder().name("vpc-id").values(vpc_id).build())
            .filters(Filter::builder().name("default").values("true").build())
            .send()
            .await
            .context("Failed to describe default network ACL")?;

        Ok(response
            .network_acls()
            .first()
            .and_then(|a| a.network_acl_id())
            .map(|id| id.to_string()))
    }

    /// Find the current ACL association of a subnet.
    async fn subnet_acl_association(&self, subnet_id: &str) -> Result<Option<String>> {
        let response = self
            .client
            .describe_network_acls()
            .filters(
                Filter::builder()
                    .name("association.subnet-id")
                    .values(subnet_id)
                    .build(),
            )
            .send()
            .await
            .context("Failed to describe subnet network ACL association")?;

        for acl in response.network_acls() {
            for assoc in acl.associations() {
                if assoc.subnet_id() == Some(subnet_id) {
                    return Ok(assoc
                        .network_acl_association_id()
                        .map(|id| id.to_string()));
                }
            }
        }
        Ok(None)
    }
}
