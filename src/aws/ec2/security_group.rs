//! Security group management
//!
//! Three groups with a reference chain: web admits SSH from bastion, app
//! admits SSH from bastion and the app port from web. Deletion must run in
//! app -> web -> bastion order so no group is still referenced when its turn
//! comes.

use super::Ec2Client;
use crate::aws::error::{classify_anyhow_error, ignore_not_found};
use crate::aws::ops::DeleteOutcome;
use crate::aws::tags;
use crate::config::defaults::APP_PORT;
use crate::topology::Role;
use anyhow::{Context, Result};
use aws_sdk_ec2::types::{IpPermission, IpRange, ResourceType, UserIdGroupPair};
use backon::{ExponentialBuilder, Retryable};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Build a TCP permission for one port range from a CIDR source.
fn cidr_permission(from_port: i32, to_port: i32, cidr: &str, description: &str) -> IpPermission {
    IpPermission::builder()
        .ip_protocol("tcp")
        .from_port(from_port)
        .to_port(to_port)
        .ip_ranges(
            IpRange::builder()
                .cidr_ip(cidr)
                .description(description)
                .build(),
        )
        .build()
}

/// Build a TCP permission for one port from another security group.
fn group_permission(port: i32, source_group_id: &str, description: &str) -> IpPermission {
    IpPermission::builder()
        .ip_protocol("tcp")
        .from_port(port)
        .to_port(port)
        .user_id_group_pairs(
            UserIdGroupPair::builder()
                .group_id(source_group_id)
                .description(description)
                .build(),
        )
        .build()
}

impl Ec2Client {
    async fn create_role_security_group(
        &self,
        project: &str,
        vpc_id: &str,
        role: Role,
        description: &str,
        permissions: Vec<IpPermission>,
    ) -> Result<String> {
        let sg_name = format!("{project}-{role}");
        info!(name = %sg_name, "Creating security group");

        let create_response = self
            .client
            .create_security_group()
            .group_name(&sg_name)
            .description(description)
            .vpc_id(vpc_id)
            .tag_specifications(tags::ec2_tag_spec(
                ResourceType::SecurityGroup,
                project,
                &sg_name,
                Some(role),
            ))
            .send()
            .await
            .context("Failed to create security group")?;

        let sg_id = create_response
            .group_id()
            .context("No security group ID in response")?
            .to_string();

        let mut request = self
            .client
            .authorize_security_group_ingress()
            .group_id(&sg_id);
        for permission in permissions {
            request = request.ip_permissions(permission);
        }
        request
            .send()
            .await
            .context("Failed to add ingress rules to security group")?;

        info!(sg_id = %sg_id, role = %role, "Security group created with ingress rules");
        Ok(sg_id)
    }

    /// Create the bastion security group: SSH from the operator address only.
    pub async fn create_bastion_security_group(
        &self,
        project: &str,
        vpc_id: &str,
        operator_cidr: &str,
    ) -> Result<String> {
        self.create_role_security_group(
            project,
            vpc_id,
            Role::Bastion,
            "Bastion host: SSH from the operator address",
            vec![cidr_permission(22, 22, operator_cidr, "Operator SSH")],
        )
        .await
    }

    /// Create the web security group: HTTP/HTTPS from anywhere, SSH from the
    /// bastion group.
    pub async fn create_web_security_group(
        &self,
        project: &str,
        vpc_id: &str,
        bastion_sg_id: &str,
    ) -> Result<String> {
        self.create_role_security_group(
            project,
            vpc_id,
            Role::Web,
            "Web tier: HTTP/HTTPS from anywhere, SSH from bastion",
            vec![
                cidr_permission(80, 80, "0.0.0.0/0", "HTTP"),
                cidr_permission(443, 443, "0.0.0.0/0", "HTTPS"),
                group_permission(22, bastion_sg_id, "SSH from bastion"),
            ],
        )
        .await
    }

    /// Create the app security group: app port from the web group, SSH from
    /// the bastion group.
    pub async fn create_app_security_group(
        &self,
        project: &str,
        vpc_id: &str,
        web_sg_id: &str,
        bastion_sg_id: &str,
    ) -> Result<String> {
        self.create_role_security_group(
            project,
            vpc_id,
            Role::App,
            "App tier: app port from web, SSH from bastion",
            vec![
                group_permission(APP_PORT, web_sg_id, "App traffic from web tier"),
                group_permission(22, bastion_sg_id, "SSH from bastion"),
            ],
        )
        .await
    }

    /// Delete a security group.
    ///
    /// Retries on DependencyViolation errors (ENIs can linger for a while
    /// after instance termination).
    pub async fn delete_security_group(&self, security_group_id: &str) -> Result<DeleteOutcome> {
        info!(sg_id = %security_group_id, "Deleting security group");

        let sg_id = security_group_id.to_string();
        let sg_id_for_log = sg_id.clone();

        (|| async {
            let result = self
                .client
                .delete_security_group()
                .group_id(&sg_id)
                .send()
                .await;
            match ignore_not_found(result).context("Failed to delete security group")? {
                Some(_) => {
                    info!(sg_id = %sg_id, "Security group deleted");
                    Ok(DeleteOutcome::Deleted)
                }
                None => {
                    debug!(sg_id = %sg_id, "Security group already deleted");
                    Ok(DeleteOutcome::NotFound)
                }
            }
        })
        .retry(
            ExponentialBuilder::default()
                .with_min_delay(Duration::from_secs(10))
                .with_max_delay(Duration::from_secs(60))
                .with_max_times(5),
        )
        .when(|e| classify_anyhow_error(e).is_retryable())
        .notify(|e, dur| {
            warn!(
                sg_id = %sg_id_for_log,
                delay = ?dur,
                error = %e,
                "Security group deletion failed, retrying..."
            );
        })
        .await
    }
}
