//! EC2 instance lifecycle operations

use super::Ec2Client;
use crate::aws::error::{classify_anyhow_error, ignore_not_found, AwsError};
use crate::aws::ops::DeleteOutcome;
use crate::aws::tags;
use crate::config::defaults::APP_PORT;
use crate::topology::Role;
use crate::wait::{wait_for_resource, WaitConfig};
use anyhow::{Context, Result};
use aws_sdk_ec2::types::{InstanceStateName, InstanceType, ResourceType};
use backon::{ExponentialBuilder, Retryable};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default timeout for waiting for an instance to be running (10 minutes)
const RUNNING_WAIT_TIMEOUT_SECS: u64 = 600;

/// Timeout for waiting for an instance to terminate (10 minutes)
const TERMINATION_WAIT_TIMEOUT_SECS: u64 = 600;

/// Addresses of a running instance.
#[derive(Debug, Clone, Default)]
pub struct InstanceAddresses {
    pub public_ip: Option<String>,
    pub private_ip: Option<String>,
}

/// Configuration for launching one lab instance.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub project: String,
    pub role: Role,
    pub instance_type: String,
    pub subnet_id: String,
    pub security_group_id: String,
    pub iam_instance_profile: String,
    pub ssh_key_name: Option<String>,
}

impl LaunchSpec {
    pub fn new(
        project: impl Into<String>,
        role: Role,
        instance_type: impl Into<String>,
        subnet_id: impl Into<String>,
        security_group_id: impl Into<String>,
        iam_instance_profile: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            role,
            instance_type: instance_type.into(),
            subnet_id: subnet_id.into(),
            security_group_id: security_group_id.into(),
            iam_instance_profile: iam_instance_profile.into(),
            ssh_key_name: None,
        }
    }

    pub fn with_ssh_key(mut self, key_name: impl Into<String>) -> Self {
        self.ssh_key_name = Some(key_name.into());
        self
    }
}

/// Bootstrap script installed on each instance at first boot.
///
/// The payloads are deliberately thin; they exist so a freshly provisioned
/// lab is immediately poke-able, not as configuration management.
fn bootstrap_script(role: Role) -> String {
    match role {
        Role::Bastion => "#!/bin/bash\n\
             set -euo pipefail\n\
             hostnamectl set-hostname bastion\n"
            .to_string(),
        Role::Web => "#!/bin/bash\n\
             set -euo pipefail\n\
             hostnamectl set-hostname web\n\
             dnf install -y nginx\n\
             systemctl enable --now nginx\n"
            .to_string(),
        Role::App => format!(
            "#!/bin/bash\n\
             set -euo pipefail\n\
             hostnamectl set-hostname app\n\
             nohup python3 -m http.server {APP_PORT} >/var/log/app.log 2>&1 &\n"
        ),
    }
}

/// Check if an error is retryable (IAM propagation delay or throttling)
fn is_retryable_launch_error(e: &anyhow::Error) -> bool {
    matches!(
        classify_anyhow_error(e),
        AwsError::IamPropagationDelay | AwsError::Throttled
    )
}

impl Ec2Client {
    /// Launch one lab instance.
    ///
    /// Retries on transient errors: IAM eventual consistency (profile not yet
    /// visible to EC2) and rate limiting.
    pub async fn run_instance(&self, spec: &LaunchSpec) -> Result<String> {
        let ami_id = self.get_al2023_ami().await?;

        let instance_type: InstanceType = spec
            .instance_type
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid instance type: {}", spec.instance_type))?;

        info!(
            role = %spec.role,
            instance_type = %spec.instance_type,
            subnet_id = %spec.subnet_id,
            ami = %ami_id,
            "Launching instance"
        );

        let user_data_b64 = base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            bootstrap_script(spec.role).as_bytes(),
        );

        let role_for_log = spec.role;

        (|| async {
            self.do_run_instance(spec, &ami_id, instance_type.clone(), &user_data_b64)
                .await
        })
        .retry(
            ExponentialBuilder::default()
                .with_min_delay(Duration::from_secs(2))
                .with_max_delay(Duration::from_secs(30))
                .with_max_times(8),
        )
        .when(is_retryable_launch_error)
        .notify(|e, dur| {
            warn!(
                role = %role_for_log,
                delay = ?dur,
                error = %e,
                "Instance launch hit a transient error, retrying..."
            );
        })
        .await
    }

    async fn do_run_instance(
        &self,
        spec: &LaunchSpec,
        ami_id: &str,
        instance_type: InstanceType,
        user_data_b64: &str,
    ) -> Result<String> {
        let mut request = self
            .client
            .run_instances()
            .image_id(ami_id)
            .instance_type(instance_type)
            .min_count(1)
            .max_count(1)
            .subnet_id(&spec.subnet_id)
            .security_group_ids(&spec.security_group_id)
            .user_data(user_data_b64)
            .iam_instance_profile(
                aws_sdk_ec2::types::IamInstanceProfileSpecification::builder()
                    .name(&spec.iam_instance_profile)
                    .build(),
            )
            .tag_specifications(tags::ec2_tag_spec(
                ResourceType::Instance,
                &spec.project,
                &format!("{}-{}", spec.project, spec.role),
                Some(spec.role),
            ));

        if let Some(key) = &spec.ssh_key_name {
            request = request.key_name(key);
        }

        let response = request.send().await.context("Failed to launch instance")?;

        let instance_id = response
            .instances()
            .first()
            .and_then(|i| i.instance_id())
            .context("No instance ID in response")?
            .to_string();

        info!(instance_id = %instance_id, role = %spec.role, "Instance launched");
        Ok(instance_id)
    }

    /// Wait for an instance to be running and collect its addresses.
    pub async fn wait_instance_running(&self, instance_id: &str) -> Result<InstanceAddresses> {
        info!(instance_id = %instance_id, "Waiting for instance to be running");

        let addresses: Mutex<InstanceAddresses> = Mutex::new(InstanceAddresses::default());

        wait_for_resource(
            WaitConfig {
                initial_delay: Duration::from_secs(2),
                max_delay: Duration::from_secs(15),
                timeout: Duration::from_secs(RUNNING_WAIT_TIMEOUT_SECS),
            },
            || {
                let addresses = &addresses;
                async move {
                    let response = self
                        .client
                        .describe_instances()
                        .instance_ids(instance_id)
                        .send()
                        .await
                        .context("Failed to describe instance")?;

                    let instance = response
                        .reservations()
                        .first()
                        .and_then(|r| r.instances().first())
                        .context("Instance not found")?;

                    let state = instance
                        .state()
                        .and_then(|s| s.name())
                        .unwrap_or(&InstanceStateName::Pending);

                    match state {
                        InstanceStateName::Running => {
                            let found = InstanceAddresses {
                                public_ip: instance.public_ip_address().map(str::to_string),
                                private_ip: instance.private_ip_address().map(str::to_string),
                            };
                            info!(
                                instance_id = %instance_id,
                                public_ip = ?found.public_ip,
                                private_ip = ?found.private_ip,
                                "Instance is running"
                            );
                            *addresses.lock().unwrap() = found;
                            Ok(true)
                        }
                        InstanceStateName::Pending => Ok(false),
                        _ => {
                            let state_reason = instance
                                .state_reason()
                                .and_then(|r| r.message())
                                .unwrap_or("no state reason provided");
                            anyhow::bail!(
                                "Instance {} entered unexpected state {:?}: {}",
                                instance_id,
                                state,
                                state_reason
                            );
                        }
                    }
                }
            },
            &format!("EC2 instance {} running", instance_id),
        )
        .await?;

        Ok(addresses.into_inner().unwrap())
    }

    /// Terminate an instance.
    pub async fn terminate_instance(&self, instance_id: &str) -> Result<DeleteOutcome> {
        info!(instance_id = %instance_id, "Terminating instance");

        let result = self
            .client
            .terminate_instances()
            .instance_ids(instance_id)
            .send()
            .await;
        match ignore_not_found(result).context("Failed to terminate instance")? {
            Some(_) => Ok(DeleteOutcome::Deleted),
            None => {
                debug!(instance_id = %instance_id, "Instance already gone");
                Ok(DeleteOutcome::NotFound)
            }
        }
    }

    /// Wait for an instance to be fully terminated.
    pub async fn wait_instance_terminated(&self, instance_id: &str) -> Result<()> {
        let result = wait_for_resource(
            WaitConfig {
                initial_delay: Duration::from_secs(2),
                max_delay: Duration::from_secs(15),
                timeout: Duration::from_secs(TERMINATION_WAIT_TIMEOUT_SECS),
            },
            || async {
                let response = self
                    .client
                    .describe_instances()
                    .instance_ids(instance_id)
                    .send()
                    .await;

                match response {
                    Ok(resp) => {
                        let state = resp
                            .reservations()
                            .first()
                            .and_then(|r| r.instances().first())
                            .and_then(|i| i.state())
                            .and_then(|s| s.name());

                        match state {
                            Some(InstanceStateName::Terminated) => {
                                debug!(instance_id = %instance_id, "Instance terminated");
                                Ok(true)
                            }
                            None => Ok(true), // No state info = gone
                            _ => Ok(false),   // Still shutting down
                        }
                    }
                    Err(e) => {
                        let err = anyhow::Error::from(e);
                        if classify_anyhow_error(&err).is_not_found() {
                            Ok(true) // Already gone
                        } else {
                            warn!(instance_id = %instance_id, error = ?err, "Error checking instance state");
                            Ok(false) // Transient error, retry
                        }
                    }
                }
            },
            &format!("EC2 instance {} terminated", instance_id),
        )
        .await;

        // Timeout on termination wait is not fatal; teardown continues and
        // the affected deletes surface their own failures
        if let Err(e) = &result {
            if e.to_string().contains("Timeout") {
                warn!(instance_id = %instance_id, "Timeout waiting for instance to terminate");
                return Ok(());
            }
        }

        result
    }
}
