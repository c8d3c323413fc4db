//! Lifecycle integration tests - actually call AWS APIs
//!
//! These tests are marked `#[ignore]` and only run with:
//! ```
//! AWS_PROFILE=your_profile cargo test --test aws_lifecycle -- --ignored
//! ```
//!
//! They create (and delete) real, billable resources, including a NAT
//! gateway. Expect a full run to take several minutes.

use std::collections::BTreeSet;
use vpclab::aws::{AwsClients, AwsContext, Ec2Client, IamClient};
use vpclab::config::{defaults, LabConfig};
use vpclab::discover::TopologyScanner;
use vpclab::graph;
use vpclab::provision::provision;
use vpclab::teardown::deprovision;

fn get_test_region() -> String {
    std::env::var("AWS_REGION").unwrap_or_else(|_| defaults::DEFAULT_REGION.to_string())
}

fn test_project() -> String {
    format!("vpclab-test-{}", chrono::Utc::now().timestamp())
}

fn test_clients(ctx: &AwsContext, config: LabConfig) -> AwsClients {
    AwsClients::new(
        Ec2Client::from_context(ctx),
        IamClient::from_context(ctx),
        config,
    )
}

/// Full lifecycle: provision, rediscover from tags alone, tear down, verify
/// nothing is left.
#[tokio::test]
#[ignore]
async fn full_lifecycle() {
    let region = get_test_region();
    let project = test_project();
    let ctx = AwsContext::new(&region).await;

    let operator_ip = vpclab::aws::get_operator_public_ip()
        .await
        .expect("operator address lookup");
    let config = LabConfig::new(
        &project,
        &region,
        None,
        defaults::DEFAULT_INSTANCE_TYPE,
        None,
        format!("{operator_ip}/32"),
    );

    let clients = test_clients(&ctx, config.clone());
    let (topology, summary) = provision(&clients, &project)
        .await
        .expect("provision should succeed");

    // Every graph node materialized
    let expected: BTreeSet<_> = graph::forward_order().iter().copied().collect();
    assert_eq!(topology.kinds(), expected);
    assert!(summary.bastion_public_ip.is_some(), "bastion needs a public IP");
    assert!(summary.web_public_ip.is_some(), "web needs a public IP");
    assert!(summary.app_private_ip.is_some(), "app needs a private IP");

    // Rediscovery from tags alone sees the same kind set
    let scanner = TopologyScanner::new(Ec2Client::from_context(&ctx), IamClient::from_context(&ctx));
    let discovered = scanner.discover(&project).await.expect("discover");
    assert_eq!(discovered.kinds(), expected);

    // Teardown leaves nothing behind
    let report = deprovision(&clients, &discovered).await;
    assert!(
        report.is_clean(),
        "teardown failures: {:?}",
        report.failures()
    );

    let after = scanner.discover(&project).await.expect("discover after teardown");
    assert!(after.is_empty(), "resources left over: {} found", after.len());
}

/// Discovery of a project that was never provisioned is an empty topology,
/// and tearing it down is a no-op.
#[tokio::test]
#[ignore]
async fn discover_unknown_project_is_empty() {
    let region = get_test_region();
    let ctx = AwsContext::new(&region).await;

    let scanner = TopologyScanner::new(Ec2Client::from_context(&ctx), IamClient::from_context(&ctx));
    let topology = scanner
        .discover("vpclab-test-never-provisioned")
        .await
        .expect("discover");
    assert!(topology.is_empty());

    let config = LabConfig::new(
        "vpclab-test-never-provisioned",
        &region,
        None,
        defaults::DEFAULT_INSTANCE_TYPE,
        None,
        "",
    );
    let clients = test_clients(&ctx, config);
    let report = deprovision(&clients, &topology).await;
    assert!(report.is_empty());
}
