//! vpclab: provision and tear down a three-tier VPC lab
//!
//! Two destructive-side operations (`provision`, `deprovision`) plus a
//! read-only `scan`. All state lives in cloud-side tags; re-running
//! `deprovision` over a half-cleaned account is safe.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use vpclab::aws::{
    get_current_account_id, get_operator_public_ip, AwsClients, AwsContext, Ec2Client, IamClient,
};
use vpclab::config::{defaults, LabConfig};
use vpclab::discover::TopologyScanner;
use vpclab::provision::{provision, ConnectionSummary, ProvisionError};
use vpclab::teardown::{deprovision, TeardownOutcome, TeardownReport};
use vpclab::topology::Topology;

#[derive(Parser, Debug)]
#[command(name = "vpclab")]
#[command(about = "Three-tier VPC lab provisioner")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Provision the lab topology
    Provision {
        /// Project tag identifying the topology
        #[arg(long, default_value = defaults::DEFAULT_PROJECT)]
        project: String,

        /// AWS region
        #[arg(long, default_value = defaults::DEFAULT_REGION)]
        region: String,

        /// Availability zone for both subnets (default: first zone of the region)
        #[arg(long)]
        availability_zone: Option<String>,

        /// EC2 instance type for all three instances
        #[arg(long, default_value = defaults::DEFAULT_INSTANCE_TYPE)]
        instance_type: String,

        /// Name of an existing EC2 key pair to install on the instances
        #[arg(long)]
        ssh_key: Option<String>,
    },

    /// Discover and list lab resources by project tag
    Scan {
        /// Project tag identifying the topology
        #[arg(long, default_value = defaults::DEFAULT_PROJECT)]
        project: String,

        /// AWS region
        #[arg(long, default_value = defaults::DEFAULT_REGION)]
        region: String,

        /// Output format (table, json)
        #[arg(long, default_value = "table")]
        format: String,
    },

    /// Discover and tear down the lab topology
    Deprovision {
        /// Project tag identifying the topology
        #[arg(long, default_value = defaults::DEFAULT_PROJECT)]
        project: String,

        /// AWS region
        #[arg(long, default_value = defaults::DEFAULT_REGION)]
        region: String,

        /// Skip the interactive confirmation
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&e);
        std::process::exit(1);
    }
}

/// Print error in a user-friendly way
fn print_error(e: &anyhow::Error) {
    use std::io::Write;

    let mut stderr = std::io::stderr();

    let _ = writeln!(stderr, "\n\x1b[1;31mError:\x1b[0m {e}");

    // Print error chain (causes)
    let mut source = e.source();
    while let Some(cause) = source {
        let _ = writeln!(stderr, "  \x1b[33mCaused by:\x1b[0m {cause}");
        source = cause.source();
    }

    if std::env::var("RUST_BACKTRACE").is_err() {
        let _ = writeln!(
            stderr,
            "\n\x1b[2mSet RUST_BACKTRACE=1 for a detailed backtrace\x1b[0m"
        );
    } else {
        let backtrace = e.backtrace();
        if backtrace.status() == std::backtrace::BacktraceStatus::Captured {
            let _ = writeln!(stderr, "\n\x1b[2mBacktrace:\x1b[0m\n{backtrace}");
        }
    }
}

async fn run() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    match args.command {
        Command::Provision {
            project,
            region,
            availability_zone,
            instance_type,
            ssh_key,
        } => {
            handle_provision(project, region, availability_zone, instance_type, ssh_key).await
        }
        Command::Scan {
            project,
            region,
            format,
        } => handle_scan(project, region, format).await,
        Command::Deprovision {
            project,
            region,
            yes,
        } => handle_deprovision(project, region, yes).await,
    }
}

async fn handle_provision(
    project: String,
    region: String,
    availability_zone: Option<String>,
    instance_type: String,
    ssh_key: Option<String>,
) -> Result<()> {
    let ctx = AwsContext::new(&region).await;
    let account = get_current_account_id(ctx.sdk_config()).await?;
    info!(account_id = %account, region = %region, "AWS account validated");

    // Resolved once; fixed for the lifetime of the topology
    let operator_ip = get_operator_public_ip().await.map_err(|e| {
        ProvisionError::Configuration(format!("could not resolve the operator address: {e:#}"))
    })?;
    let operator_cidr = format!("{operator_ip}/32");

    let scanner = TopologyScanner::new(Ec2Client::from_context(&ctx), IamClient::from_context(&ctx));
    let existing = scanner.discover(&project).await?;
    if !existing.is_empty() {
        anyhow::bail!(
            "A topology tagged '{}' already exists in {} ({} resources). \
             Run `vpclab deprovision --project {}` first.",
            project,
            region,
            existing.len(),
            project
        );
    }

    let config = LabConfig::new(
        &project,
        &region,
        availability_zone,
        instance_type,
        ssh_key,
        operator_cidr,
    );
    info!(
        project = %project,
        az = %config.availability_zone,
        operator = %config.operator_cidr,
        "Provisioning lab topology"
    );

    let clients = AwsClients::new(
        Ec2Client::from_context(&ctx),
        IamClient::from_context(&ctx),
        config,
    );
    let (topology, summary) = provision(&clients, &project).await?;

    println!("\nProvisioned {} resources.", topology.len());
    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &ConnectionSummary) {
    let show = |ip: &Option<String>| ip.as_deref().unwrap_or("unknown").to_string();
    println!("\n=== Connection summary ===");
    println!("Bastion (SSH from your address): {}", show(&summary.bastion_public_ip));
    println!("Web (HTTP/HTTPS from anywhere):  {}", show(&summary.web_public_ip));
    println!("App (private, via bastion):      {}", show(&summary.app_private_ip));
}

async fn handle_scan(project: String, region: String, format: String) -> Result<()> {
    let ctx = AwsContext::new(&region).await;
    let scanner = TopologyScanner::new(Ec2Client::from_context(&ctx), IamClient::from_context(&ctx));
    let topology = scanner.discover(&project).await?;

    if topology.is_empty() {
        println!("No resources found for project '{project}' in {region}.");
        return Ok(());
    }

    if format == "json" {
        let resources: Vec<_> = topology
            .handles()
            .iter()
            .map(|h| {
                serde_json::json!({
                    "kind": h.kind.as_str(),
                    "id": h.id,
                    "name": h.name,
                    "role": h.role.map(|r| r.as_str()),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&resources)?);
    } else {
        print_topology(&topology);
    }
    Ok(())
}

fn print_topology(topology: &Topology) {
    println!(
        "{:<32} {:<28} {:<8} {}",
        "KIND", "ID", "ROLE", "NAME"
    );
    println!("{}", "-".repeat(92));
    for handle in topology.handles() {
        println!(
            "{:<32} {:<28} {:<8} {}",
            handle.kind.as_str(),
            handle.id,
            handle.role.map(|r| r.as_str()).unwrap_or("-"),
            handle.name,
        );
    }
    println!("\nTotal: {} resources", topology.len());
}

async fn handle_deprovision(project: String, region: String, yes: bool) -> Result<()> {
    let ctx = AwsContext::new(&region).await;
    let account = get_current_account_id(ctx.sdk_config()).await?;
    info!(account_id = %account, region = %region, "AWS account validated");

    let scanner = TopologyScanner::new(Ec2Client::from_context(&ctx), IamClient::from_context(&ctx));
    let topology = scanner.discover(&project).await?;

    if topology.is_empty() {
        println!("Nothing to clean up for project '{project}' in {region}.");
        return Ok(());
    }

    println!("The following resources will be deleted:\n");
    print_topology(&topology);

    if !yes {
        let confirmed = dialoguer::Confirm::new()
            .with_prompt(format!(
                "Delete all {} resources of project '{}'?",
                topology.len(),
                project
            ))
            .default(false)
            .interact()
            .context("Failed to read confirmation")?;
        if !confirmed {
            println!("Aborted; nothing was deleted.");
            return Ok(());
        }
    }

    let config = LabConfig::new(&project, &region, None, defaults::DEFAULT_INSTANCE_TYPE, None, "");
    let clients = AwsClients::new(
        Ec2Client::from_context(&ctx),
        IamClient::from_context(&ctx),
        config,
    );
    let report = deprovision(&clients, &topology).await;
    print_report(&report);

    // Individual failures are surfaced above but do not fail the command;
    // the operator re-runs teardown after resolving whatever blocked it
    Ok(())
}

fn print_report(report: &TeardownReport) {
    println!("\n=== Teardown report ===");
    println!("Deleted:        {}", report.deleted());
    println!("Already absent: {}", report.already_absent());
    println!("Failed:         {}", report.failures().len());

    if !report.is_clean() {
        println!("\nFailed resources:");
        for entry in report.failures() {
            let reason = match &entry.outcome {
                TeardownOutcome::Failed(reason) => reason.as_str(),
                _ => "",
            };
            println!("  {:<32} {:<28} {}", entry.kind.as_str(), entry.id, reason);
        }
        println!("\nRe-run `vpclab deprovision` after resolving the failures above.");
    }
}
