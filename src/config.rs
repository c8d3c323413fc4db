//! Fixed lab configuration.
//!
//! The topology shape is not configurable: two subnets, three instances, one
//! NAT gateway. What varies between runs is the project tag, the region, and
//! the operator's address, which is resolved once per provisioning run and
//! fixed for the lifetime of the topology.

pub mod defaults {
    /// Default project tag value; the only durable key identifying a topology.
    pub const DEFAULT_PROJECT: &str = "vpclab";

    /// Default AWS region.
    pub const DEFAULT_REGION: &str = "us-east-2";

    /// Default EC2 instance type for all three instances.
    pub const DEFAULT_INSTANCE_TYPE: &str = "t3.micro";

    /// VPC address range.
    pub const VPC_CIDR: &str = "10.0.0.0/16";

    /// Public subnet range (bastion, web, NAT gateway).
    pub const PUBLIC_SUBNET_CIDR: &str = "10.0.1.0/24";

    /// Private subnet range (app).
    pub const PRIVATE_SUBNET_CIDR: &str = "10.0.2.0/24";

    /// Port the app tier listens on.
    pub const APP_PORT: i32 = 8080;

    /// Ephemeral port range used by the network ACL return-traffic rules.
    pub const EPHEMERAL_PORT_FROM: i32 = 1024;
    pub const EPHEMERAL_PORT_TO: i32 = 65535;
}

/// Configuration for one provisioning run.
#[derive(Debug, Clone)]
pub struct LabConfig {
    /// Project tag value shared by every resource in the topology.
    pub project: String,
    /// AWS region, passed explicitly to every client.
    pub region: String,
    /// Availability zone for both subnets.
    pub availability_zone: String,
    /// VPC address range.
    pub vpc_cidr: String,
    /// Public subnet range.
    pub public_subnet_cidr: String,
    /// Private subnet range.
    pub private_subnet_cidr: String,
    /// Instance type for all three instances.
    pub instance_type: String,
    /// Name of an existing EC2 key pair to install on the instances.
    pub ssh_key_name: Option<String>,
    /// Operator address in CIDR form (`a.b.c.d/32`), resolved once at the
    /// start of the run and fixed for the topology's lifetime.
    pub operator_cidr: String,
}

impl LabConfig {
    pub fn new(
        project: impl Into<String>,
        region: impl Into<String>,
        availability_zone: Option<String>,
        instance_type: impl Into<String>,
        ssh_key_name: Option<String>,
        operator_cidr: impl Into<String>,
    ) -> Self {
        let region = region.into();
        let availability_zone = availability_zone.unwrap_or_else(|| format!("{region}a"));
        Self {
            project: project.into(),
            region,
            availability_zone,
            vpc_cidr: defaults::VPC_CIDR.to_string(),
            public_subnet_cidr: defaults::PUBLIC_SUBNET_CIDR.to_string(),
            private_subnet_cidr: defaults::PRIVATE_SUBNET_CIDR.to_string(),
            instance_type: instance_type.into(),
            ssh_key_name,
            operator_cidr: operator_cidr.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn availability_zone_defaults_to_region_a() {
        let config = LabConfig::new("lab", "eu-west-1", None, "t3.micro", None, "1.2.3.4/32");
        assert_eq!(config.availability_zone, "eu-west-1a");

        let config = LabConfig::new(
            "lab",
            "eu-west-1",
            Some("eu-west-1c".to_string()),
            "t3.micro",
            None,
            "1.2.3.4/32",
        );
        assert_eq!(config.availability_zone, "eu-west-1c");
    }
}
