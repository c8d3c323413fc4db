//! AWS client modules
//!
//! Wrappers around AWS SDK clients:
//! - EC2: VPC, subnets, gateways, routing, ACLs, security groups, instances
//! - IAM: role and instance profile management
//! - STS: account ID lookup
//! - ops: the `CloudOps` trait tying them together for the orchestrator

pub mod account;
pub mod context;
pub mod ec2;
pub mod error;
pub mod iam;
pub mod ops;
pub mod tags;

pub use account::{get_current_account_id, AccountId};
pub use context::AwsContext;
pub use ec2::{get_operator_public_ip, Ec2Client};
pub use error::{classify_anyhow_error, classify_aws_error, ignore_not_found, AwsError};
pub use iam::IamClient;
pub use ops::{AwsClients, CloudOps, DeleteOutcome, RouteTarget};
