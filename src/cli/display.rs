//! Display formatting for CLI output
//!
//! SBIO pattern: Pure functions that format data for display

use super::commands::{ContextInfo, TemplateInfo, ValidationResult};
use crate::cluster::{ActionOutcome, ClusterState, ScriptOutput, VmCluster, VmInstance};
use crate::config::AuthType;
use crate::deploy::DeploymentPlan;
use crate::template::TemplateSource;

// ============================================================================
// Table formatting helpers
// ============================================================================

/// Format a simple table with headers and rows
pub fn format_table(headers: &[&str], rows: Vec<Vec<String>>) -> String {
    if rows.is_empty() {
        return "No resources found.\n".to_string();
    }

    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.len());
            }
        }
    }

    let mut output = String::new();

    for (i, header) in headers.iter().enumerate() {
        if i > 0 {
            output.push_str("   ");
        }
        output.push_str(&format!(
            "{:width$}",
            header.to_uppercase(),
            width = widths[i]
        ));
    }
    output.push('\n');

    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if i > 0 {
                output.push_str("   ");
            }
            if i < widths.len() {
                output.push_str(&format!("{:width$}", cell, width = widths[i]));
            } else {
                output.push_str(cell);
            }
        }
        output.push('\n');
    }

    output
}

fn or_dash(value: Option<&str>) -> String {
    value.unwrap_or("-").to_string()
}

// ============================================================================
// Context display
// ============================================================================

/// Format context list for display
pub fn format_context_list(contexts: &[ContextInfo]) -> String {
    let headers = &["", "NAME", "SUBSCRIPTION", "RESOURCE GROUP"];
    let rows: Vec<Vec<String>> = contexts
        .iter()
        .map(|ctx| {
            vec![
                if ctx.is_current { "*" } else { " " }.to_string(),
                ctx.name.clone(),
                ctx.subscription.clone(),
                or_dash(ctx.resource_group.as_deref()),
            ]
        })
        .collect();

    format_table(headers, rows)
}

/// Format current context for display
pub fn format_current_context(ctx: &ContextInfo) -> String {
    format!(
        "Current context: {} (subscription {}, resource group {})\n",
        ctx.name,
        ctx.subscription,
        ctx.resource_group.as_deref().unwrap_or("-")
    )
}

// ============================================================================
// Deployment display
// ============================================================================

pub fn format_state(state: &ClusterState) -> String {
    match state {
        ClusterState::Ready => "Ready".to_string(),
        ClusterState::DeploymentInProgress => "Deployment in progress".to_string(),
        ClusterState::DeploymentFailed(msg) => format!("Deployment failed: {}", msg),
    }
}

fn format_disks(vm: &VmInstance) -> String {
    let mut parts = Vec::new();
    if let Some(os) = &vm.os_disk {
        parts.push(format!("os:{}", os.name));
    }
    for disk in &vm.data_disks {
        match (disk.lun, disk.size_gb) {
            (Some(lun), Some(size)) => parts.push(format!("lun{}:{}GB", lun, size)),
            (Some(lun), None) => parts.push(format!("lun{}", lun)),
            _ => parts.push(disk.name.clone()),
        }
    }
    if parts.is_empty() {
        "-".to_string()
    } else {
        parts.join(",")
    }
}

/// Instances of a deployment as a table
pub fn format_instances(instances: &[VmInstance]) -> String {
    let headers = &[
        "NAME",
        "SIZE",
        "POWER",
        "PROVISIONING",
        "PUBLIC IP",
        "PRIVATE IP",
        "FQDN",
        "DISKS",
    ];
    let rows: Vec<Vec<String>> = instances
        .iter()
        .map(|vm| {
            vec![
                vm.name.clone(),
                vm.size.clone(),
                vm.power_state.to_string(),
                vm.provisioning_state.clone(),
                or_dash(vm.public_ip.as_deref()),
                or_dash(vm.private_ip.as_deref()),
                or_dash(vm.fqdn.as_deref()),
                format_disks(vm),
            ]
        })
        .collect();

    format_table(headers, rows)
}

/// Detailed view of a deployment and its instances
pub fn format_cluster(cluster: &VmCluster) -> String {
    let mut output = String::new();

    output.push_str(&format!("Deployment:      {}\n", cluster.name()));
    output.push_str(&format!(
        "Resource group:  {}\n",
        cluster.group().resource_group
    ));
    output.push_str(&format!("State:           {}\n", format_state(cluster.state())));

    if matches!(cluster.state(), ClusterState::Ready) {
        output.push('\n');
        output.push_str(&format_instances(cluster.instances()));
    }

    output
}

/// One-line result of a lifecycle command
pub fn format_outcome(action: &str, name: &str, outcome: &ActionOutcome) -> String {
    match outcome {
        ActionOutcome::Applied(1) => format!("{}: {} applied to 1 VM\n", name, action),
        ActionOutcome::Applied(n) => format!("{}: {} applied to {} VMs\n", name, action, n),
        ActionOutcome::DeploymentInProgress => format!(
            "{}: deployment still in progress, {} not applied\n",
            name, action
        ),
    }
}

/// What a script printed, one section per VM
pub fn format_script_outputs(outputs: &[ScriptOutput]) -> String {
    let mut output = String::new();
    for run in outputs {
        output.push_str(&format!("--- {} ---\n", run.instance));
        output.push_str(run.output.trim_end());
        output.push('\n');
    }
    output
}

/// Dry-run output for deploy
pub fn format_plan(plan: &DeploymentPlan) -> String {
    let mut output = String::new();
    output.push_str("=== Dry Run ===\n\n");
    output.push_str(&format!("Template:   {}\n", plan.kind));
    output.push_str(&format!("Target:     {}\n", plan.group));
    output.push_str(&format!("Location:   {}\n\n", plan.location));
    output.push_str(&plan.render());
    output.push('\n');
    output
}

// ============================================================================
// Validation display
// ============================================================================

/// Format validation result for display
pub fn format_validation_result(result: &ValidationResult, file: &str) -> String {
    if result.valid {
        let mut output = format!("✓ {} is valid\n", file);
        if let Some(template) = &result.template {
            output.push_str(&format!("  Template:  {}\n", template));
        }
        output.push_str(&format!("  VMs:       {}\n", result.instances.join(", ")));
        output
    } else {
        format!(
            "✗ {} is invalid\n  Error: {}\n",
            file,
            result.error.as_deref().unwrap_or("unknown error")
        )
    }
}

// ============================================================================
// Template display
// ============================================================================

pub fn format_template_list(templates: &[TemplateInfo]) -> String {
    let headers = &["NAME", "OS", "CLUSTER", "AUTH", "EXTENSION", "SOURCE"];
    let rows: Vec<Vec<String>> = templates
        .iter()
        .map(|t| {
            vec![
                t.name.clone(),
                t.os.as_str().to_string(),
                if t.clustered { "yes" } else { "no" }.to_string(),
                match t.auth {
                    AuthType::Key => "key",
                    AuthType::Password => "password",
                }
                .to_string(),
                if t.extension { "yes" } else { "no" }.to_string(),
                match &t.source {
                    TemplateSource::Builtin => "builtin".to_string(),
                    TemplateSource::Override(path) => path.display().to_string(),
                },
            ]
        })
        .collect();

    format_table(headers, rows)
}
