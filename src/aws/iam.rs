//! IAM role and instance profile management for lab instances
//!
//! Each of the three instance roles gets its own IAM role and instance
//! profile, both named `{project}-{role}` so discovery can find them by name
//! prefix without any local state.

use crate::aws::context::AwsContext;
use crate::aws::ops::DeleteOutcome;
use crate::aws::tags;
use crate::topology::Role;
use crate::wait::{wait_for_resource, WaitConfig};
use anyhow::{Context, Result};
use aws_sdk_iam::Client;
use std::time::Duration;
use tracing::{debug, info};

/// The trust policy allowing EC2 to assume the role
const EC2_ASSUME_ROLE_POLICY: &str = r#"{
    "Version": "2012-10-17",
    "Statement": [
        {
            "Effect": "Allow",
            "Principal": {
                "Service": "ec2.amazonaws.com"
            },
            "Action": "sts:AssumeRole"
        }
    ]
}"#;

/// Managed policy granting Session Manager access, so the app instance is
/// reachable without a public address.
const SSM_POLICY_ARN: &str = "arn:aws:iam::aws:policy/AmazonSSMManagedInstanceCore";

/// IAM name for one role identity.
pub fn iam_name(project: &str, role: Role) -> String {
    format!("{project}-{role}")
}

/// IAM client for managing roles and instance profiles
pub struct IamClient {
    client: Client,
}

impl IamClient {
    /// Create a new IAM client
    pub async fn new(region: &str) -> Result<Self> {
        let ctx = AwsContext::new(region).await;
        Ok(Self::from_context(&ctx))
    }

    /// Create an IAM client from a pre-loaded AWS context
    pub fn from_context(ctx: &AwsContext) -> Self {
        Self {
            client: ctx.iam_client(),
        }
    }

    pub(crate) fn raw(&self) -> &Client {
        &self.client
    }

    /// Create the IAM role for one instance role identity.
    pub async fn create_instance_role(&self, project: &str, role: Role) -> Result<String> {
        let role_name = iam_name(project, role);
        info!(role_name = %role_name, "Creating IAM role");

        let mut request = self
            .client
            .create_role()
            .role_name(&role_name)
            .assume_role_policy_document(EC2_ASSUME_ROLE_POLICY)
            .description(format!("{project} {role} instance role"));
        for tag in tags::iam_tags(project, role)? {
            request = request.tags(tag);
        }
        request.send().await.context("Failed to create IAM role")?;

        self.client
            .attach_role_policy()
            .role_name(&role_name)
            .policy_arn(SSM_POLICY_ARN)
            .send()
            .await
            .context("Failed to attach SSM managed policy")?;

        debug!(role_name = %role_name, "IAM role created with SSM policy");
        Ok(role_name)
    }

    /// Create the instance profile for one role identity and attach its role.
    ///
    /// Completes only once the profile reports the role attached; EC2 may
    /// still lag behind (eventual consistency), which the instance launch
    /// retry handles.
    pub async fn create_instance_profile(&self, project: &str, role: Role) -> Result<String> {
        let profile_name = iam_name(project, role);
        info!(profile_name = %profile_name, "Creating instance profile");

        let mut request = self
            .client
            .create_instance_profile()
            .instance_profile_name(&profile_name);
        for tag in tags::iam_tags(project, role)? {
            request = request.tags(tag);
        }
        request
            .send()
            .await
            .context("Failed to create instance profile")?;

        self.client
            .add_role_to_instance_profile()
            .instance_profile_name(&profile_name)
            .role_name(&profile_name)
            .send()
            .await
            .context("Failed to add role to instance profile")?;

        let client = self.client.clone();
        let profile = profile_name.clone();
        wait_for_resource(
            WaitConfig {
                initial_delay: Duration::from_millis(500),
                max_delay: Duration::from_secs(5),
                timeout: Duration::from_secs(60),
            },
            || {
                let c = client.clone();
                let p = profile.clone();
                async move {
                    match c.get_instance_profile().instance_profile_name(&p).send().await {
                        Ok(resp) => {
                            let has_role = resp
                                .instance_profile()
                                .map(|profile| !profile.roles().is_empty())
                                .unwrap_or(false);
                            Ok(has_role)
                        }
                        Err(_) => Ok(false), // Profile not ready yet
                    }
                }
            },
            &format!("IAM instance profile {profile_name}"),
        )
        .await
        .context("Waiting for IAM instance profile to be ready")?;

        debug!(profile_name = %profile_name, "Instance profile visible in IAM API");
        Ok(profile_name)
    }

    /// Delete an instance profile, removing its role first.
    pub async fn delete_instance_profile(&self, profile_name: &str) -> Result<DeleteOutcome> {
        info!(profile_name = %profile_name, "Deleting instance profile");

        // Remove role from profile; it may already be detached
        if let Err(e) = self
            .client
            .remove_role_from_instance_profile()
            .instance_profile_name(profile_name)
            .role_name(profile_name)
            .send()
            .await
        {
            debug!(error = ?e, "Failed to remove role from instance profile (may already be removed)");
        }

        let result = self
            .client
            .delete_instance_profile()
            .instance_profile_name(profile_name)
            .send()
            .await;
        match crate::aws::error::ignore_not_found(result)
            .context("Failed to delete instance profile")?
        {
            Some(_) => Ok(DeleteOutcome::Deleted),
            None => {
                debug!(profile_name = %profile_name, "Instance profile already deleted");
                Ok(DeleteOutcome::NotFound)
            }
        }
    }

    /// Delete an IAM role, detaching its managed policy first.
    pub async fn delete_instance_role(&self, role_name: &str) -> Result<DeleteOutcome> {
        info!(role_name = %role_name, "Deleting IAM role");

        if let Err(e) = self
            .client
            .detach_role_policy()
            .role_name(role_name)
            .policy_arn(SSM_POLICY_ARN)
            .send()
            .await
        {
            debug!(error = ?e, "Failed to detach SSM managed policy (may already be detached)");
        }

        let result = self.client.delete_role().role_name(role_name).send().await;
        match crate::aws::error::ignore_not_found(result).context("Failed to delete IAM role")? {
            Some(_) => Ok(DeleteOutcome::Deleted),
            None => {
                debug!(role_name = %role_name, "IAM role already deleted");
                Ok(DeleteOutcome::NotFound)
            }
        }
    }
}
