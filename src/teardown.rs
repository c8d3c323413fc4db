//! The deprovisioner: walks discovered handles in teardown order.
//!
//! Teardown is best-effort throughout: a failed delete is recorded and the
//! walk continues, so one stuck resource never leaves the expensive ones
//! running. "Not found" is success, which makes re-running teardown over a
//! partially cleaned account harmless.

use crate::aws::ops::{CloudOps, DeleteOutcome};
use crate::graph::{self, ResourceKind};
use crate::topology::{ResourceHandle, Topology};
use anyhow::Result;
use tracing::{info, warn};

/// What happened to one handle during teardown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeardownOutcome {
    /// Delete call succeeded
    Deleted,
    /// The object no longer existed; nothing to do
    AlreadyAbsent,
    /// Delete failed; teardown continued with the next resource
    Failed(String),
    /// Not attempted (e.g. a required dependency id was never discovered)
    Skipped,
}

/// Per-handle record in the final report.
#[derive(Debug, Clone)]
pub struct TeardownEntry {
    pub kind: ResourceKind,
    pub id: String,
    pub name: String,
    pub outcome: TeardownOutcome,
}

/// Aggregate teardown report, surfaced to the operator at the end.
#[derive(Debug, Clone, Default)]
pub struct TeardownReport {
    entries: Vec<TeardownEntry>,
}

impl TeardownReport {
    fn record(&mut self, handle: &ResourceHandle, outcome: TeardownOutcome) {
        match &outcome {
            TeardownOutcome::Deleted => {
                info!(kind = %handle.kind, id = %handle.id, "Deleted")
            }
            TeardownOutcome::AlreadyAbsent => {
                info!(kind = %handle.kind, id = %handle.id, "Already absent")
            }
            TeardownOutcome::Failed(reason) => {
                warn!(kind = %handle.kind, id = %handle.id, reason = %reason, "Delete failed")
            }
            TeardownOutcome::Skipped => {
                info!(kind = %handle.kind, id = %handle.id, "Skipped")
            }
        }
        self.entries.push(TeardownEntry {
            kind: handle.kind,
            id: handle.id.clone(),
            name: handle.name.clone(),
            outcome,
        });
    }

    pub fn entries(&self) -> &[TeardownEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn deleted(&self) -> usize {
        self.count(|o| matches!(o, TeardownOutcome::Deleted))
    }

    pub fn already_absent(&self) -> usize {
        self.count(|o| matches!(o, TeardownOutcome::AlreadyAbsent))
    }

    pub fn failures(&self) -> Vec<&TeardownEntry> {
        self.entries
            .iter()
            .filter(|e| matches!(e.outcome, TeardownOutcome::Failed(_)))
            .collect()
    }

    /// True when nothing failed; skipped and already-absent entries count as
    /// clean.
    pub fn is_clean(&self) -> bool {
        self.failures().is_empty()
    }

    fn count(&self, pred: impl Fn(&TeardownOutcome) -> bool) -> usize {
        self.entries.iter().filter(|e| pred(&e.outcome)).count()
    }
}

/// Map a delete result onto a report outcome.
fn outcome_of(result: Result<DeleteOutcome>) -> TeardownOutcome {
    match result {
        Ok(DeleteOutcome::Deleted) => TeardownOutcome::Deleted,
        Ok(DeleteOutcome::NotFound) => TeardownOutcome::AlreadyAbsent,
        Err(e) => TeardownOutcome::Failed(format!("{e:#}")),
    }
}

/// Tear down a discovered topology.
///
/// Walks `graph::teardown_order()`: instances first (terminated and awaited,
/// they gate everything else), then the NAT gateway and its address (the
/// only resources with material ongoing cost), then the remaining kinds in
/// exact reverse creation order, with the VPC strictly last. Never aborts on
/// an individual resource.
pub async fn deprovision<G: CloudOps>(gateway: &G, topology: &Topology) -> TeardownReport {
    let mut report = TeardownReport::default();

    if topology.is_empty() {
        info!(project = %topology.project, "Nothing to tear down");
        return report;
    }

    info!(
        project = %topology.project,
        resources = topology.len(),
        "Tearing down topology"
    );

    for kind in graph::teardown_order() {
        let handles: Vec<&ResourceHandle> = topology.handles_of(kind).collect();
        if handles.is_empty() {
            continue;
        }
        teardown_kind(gateway, kind, &handles, &mut report).await;
    }

    info!(
        deleted = report.deleted(),
        already_absent = report.already_absent(),
        failed = report.failures().len(),
        "Teardown finished"
    );
    report
}

async fn teardown_kind<G: CloudOps>(
    gateway: &G,
    kind: ResourceKind,
    handles: &[&ResourceHandle],
    report: &mut TeardownReport,
) {
    use ResourceKind::*;

    match kind {
        Instance => {
            // Terminate everything first, then await: every other resource
            // kind refuses deletion while an instance references it.
            let mut terminated = Vec::new();
            for handle in handles {
                let outcome = outcome_of(gateway.terminate_instance(&handle.id).await);
                if outcome == TeardownOutcome::Deleted {
                    terminated.push(&handle.id);
                }
                report.record(handle, outcome);
            }
            for id in terminated {
                if let Err(e) = gateway.wait_instance_terminated(id).await {
                    warn!(instance_id = %id, error = ?e, "Error waiting for termination");
                }
            }
        }
        NatGateway => {
            for handle in handles {
                let outcome = outcome_of(gateway.delete_nat_gateway(&handle.id).await);
                if outcome == TeardownOutcome::Deleted {
                    // The subnet and the address stay held until deletion
                    // completes; later deletes would fail spuriously.
                    if let Err(e) = gateway.wait_nat_gateway_deleted(&handle.id).await {
                        warn!(nat_id = %handle.id, error = ?e, "Error waiting for NAT gateway deletion");
                    }
                }
                report.record(handle, outcome);
            }
        }
        ElasticIp => {
            for handle in handles {
                report.record(handle, outcome_of(gateway.release_elastic_ip(&handle.id).await));
            }
        }
        InstanceProfile => {
            for handle in handles {
                report.record(
                    handle,
                    outcome_of(gateway.delete_instance_profile(&handle.id).await),
                );
            }
        }
        InstanceRole => {
            for handle in handles {
                report.record(
                    handle,
                    outcome_of(gateway.delete_instance_role(&handle.id).await),
                );
            }
        }
        PublicNetworkAclAssociation | PrivateNetworkAclAssociation => {
            for handle in handles {
                match handle.link_id(Vpc) {
                    Some(vpc_id) => report.record(
                        handle,
                        outcome_of(
                            gateway
                                .restore_default_network_acl(&handle.id, vpc_id)
                                .await,
                        ),
                    ),
                    // Discovery found the association but not its VPC link
                    None => report.record(handle, TeardownOutcome::Skipped),
                }
            }
        }
        PublicNetworkAcl | PrivateNetworkAcl => {
            for handle in handles {
                report.record(handle, outcome_of(gateway.delete_network_acl(&handle.id).await));
            }
        }
        AppSecurityGroup | WebSecurityGroup | BastionSecurityGroup => {
            for handle in handles {
                report.record(
                    handle,
                    outcome_of(gateway.delete_security_group(&handle.id).await),
                );
            }
        }
        PublicRouteTableAssociation | PrivateRouteTableAssociation => {
            for handle in handles {
                report.record(
                    handle,
                    outcome_of(gateway.disassociate_route_table(&handle.id).await),
                );
            }
        }
        PublicRoute | PrivateRoute => {
            for handle in handles {
                report.record(
                    handle,
                    outcome_of(gateway.delete_default_route(&handle.id).await),
                );
            }
        }
        PublicRouteTable | PrivateRouteTable => {
            for handle in handles {
                report.record(handle, outcome_of(gateway.delete_route_table(&handle.id).await));
            }
        }
        InternetGatewayAttachment => {
            for handle in handles {
                match handle.link_id(Vpc) {
                    Some(vpc_id) => report.record(
                        handle,
                        outcome_of(gateway.detach_internet_gateway(&handle.id, vpc_id).await),
                    ),
                    None => report.record(handle, TeardownOutcome::Skipped),
                }
            }
        }
        InternetGateway => {
            for handle in handles {
                report.record(
                    handle,
                    outcome_of(gateway.delete_internet_gateway(&handle.id).await),
                );
            }
        }
        PublicSubnet | PrivateSubnet => {
            for handle in handles {
                report.record(handle, outcome_of(gateway.delete_subnet(&handle.id).await));
            }
        }
        Vpc => {
            for handle in handles {
                report.record(handle, outcome_of(gateway.delete_vpc(&handle.id).await));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provision::provision;
    use crate::testing::MockCloud;

    async fn provisioned_mock() -> (MockCloud, Topology) {
        let mock = MockCloud::default();
        let (topo, _) = provision(&mock, "lab").await.expect("provision succeeds");
        mock.clear_calls();
        (mock, topo)
    }

    #[tokio::test]
    async fn full_teardown_deletes_everything() {
        let (mock, topo) = provisioned_mock().await;
        let report = deprovision(&mock, &topo).await;

        assert!(report.is_clean());
        assert_eq!(report.deleted(), topo.len());
        assert_eq!(report.already_absent(), 0);
    }

    #[tokio::test]
    async fn second_teardown_reports_only_already_absent() {
        let (mock, topo) = provisioned_mock().await;
        deprovision(&mock, &topo).await;

        let report = deprovision(&mock, &topo).await;
        assert!(report.is_clean());
        assert_eq!(report.deleted(), 0);
        assert_eq!(report.already_absent(), topo.len());
    }

    #[tokio::test]
    async fn empty_topology_issues_zero_delete_calls() {
        let mock = MockCloud::default();
        let report = deprovision(&mock, &Topology::new("lab")).await;

        assert!(report.is_empty());
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn nat_gateway_deleted_before_route_tables_and_subnets() {
        let (mock, topo) = provisioned_mock().await;
        deprovision(&mock, &topo).await;

        let calls = mock.calls();
        let pos = |op: &str| {
            calls
                .iter()
                .position(|c| c.op == op)
                .unwrap_or_else(|| panic!("{op} never called"))
        };

        assert!(pos("delete_nat_gateway") < pos("delete_route_table"));
        assert!(pos("delete_nat_gateway") < pos("disassociate_route_table"));
        assert!(pos("delete_nat_gateway") < pos("delete_subnet"));
        // Instances are always first, VPC always last
        assert!(pos("terminate_instance") < pos("delete_nat_gateway"));
        assert_eq!(calls.last().unwrap().op, "delete_vpc");
    }

    #[tokio::test]
    async fn failures_are_recorded_and_teardown_continues() {
        let (mock, topo) = provisioned_mock().await;
        let mock = mock.failing_on("delete_route_table");

        let report = deprovision(&mock, &topo).await;

        assert!(!report.is_clean());
        assert_eq!(report.failures().len(), 2); // both route tables
        // The walk continued past the failures to the VPC
        assert!(mock.calls().iter().any(|c| c.op == "delete_vpc"));
    }

    #[tokio::test]
    async fn partial_topology_teardown_removes_what_exists() {
        // A provision run that died after the bastion group leaves exactly
        // one discoverable security group; teardown removes it alone.
        let mock = MockCloud::default();
        let mut topo = Topology::new("lab");
        topo.push(
            ResourceHandle::new(
                ResourceKind::BastionSecurityGroup,
                "sg-bastion",
                "lab-bastion",
            )
            .link(ResourceKind::Vpc, "vpc-1"),
        );

        let report = deprovision(&mock, &topo).await;

        assert!(report.is_clean());
        assert_eq!(report.deleted(), 1);
        let deletes: Vec<_> = mock
            .calls()
            .iter()
            .map(|c| (c.op, c.id.clone()))
            .collect();
        assert_eq!(
            deletes,
            vec![("delete_security_group", "sg-bastion".to_string())]
        );
    }

    #[tokio::test]
    async fn association_without_vpc_link_is_skipped() {
        let mock = MockCloud::default();
        let mut topo = Topology::new("lab");
        // Discovered association whose VPC link never materialized
        topo.push(ResourceHandle::new(
            ResourceKind::PublicNetworkAclAssociation,
            "aclassoc-1",
            "lab-public-acl-assoc",
        ));

        let report = deprovision(&mock, &topo).await;
        assert_eq!(report.entries().len(), 1);
        assert_eq!(report.entries()[0].outcome, TeardownOutcome::Skipped);
        assert!(mock.calls().is_empty());
    }
}
