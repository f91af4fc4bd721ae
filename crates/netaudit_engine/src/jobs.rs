//! Predefined audit and remediation jobs
//!
//! Thin compositions over the pipeline: each job describes what to fetch,
//! which rules to run, what to report and which remediations to plan.
//! Read-only audits stop after reporting; remediation jobs plan tasks
//! from NonCompliant verdicts and let the executor enforce idempotence.

use crate::pipeline::{AuditPipeline, AuditRun, GroupKeySpec, RunOutput};
use crate::remediation::{Change, RemediationTask};
use crate::report::Report;
use crate::rules::{
    DescriptionMismatchRule, DuplicateAddressRule, InterfaceUnusedRule,
    PrimaryAddressPresenceRule, RuleSet,
};
use netaudit_common::{InventoryRecord, RecordFilter};
use tracing::warn;

/// Custom field rewritten by `replace_mgmt_address`.
pub const CONFIG_SNIPPET_FIELD: &str = "config_snippet";

/// Audit all IP addresses for duplicates and export the CSV report.
pub async fn duplicate_ip_report(pipeline: &AuditPipeline) -> RunOutput {
    let policy = pipeline.config().ip_key_policy;
    let run = AuditRun::new("duplicate_ip_addresses")
        .with_filters(vec![RecordFilter::ip_addresses()])
        .with_key(GroupKeySpec::CanonicalIp(policy))
        .with_rules(RuleSet::new().with_group_rule(DuplicateAddressRule))
        .with_report(|_, grouping, _| Report::duplicate_addresses(grouping));
    pipeline.run(run).await
}

/// Check that every device at a location has a primary IPv4 management
/// address. Read-only; verdicts carry the device identities.
pub async fn primary_ipv4_audit(pipeline: &AuditPipeline, location: &str) -> RunOutput {
    let run = AuditRun::new("primary_ipv4_audit")
        .with_filters(vec![RecordFilter::devices().eq("location", location)])
        .with_rules(RuleSet::new().with_rule(PrimaryAddressPresenceRule));
    pipeline.run(run).await
}

/// Report interfaces with no LAG, no cable, no connected endpoint and no
/// addresses, across all devices of a role at a location.
pub async fn unused_interfaces_report(
    pipeline: &AuditPipeline,
    location: &str,
    role: &str,
) -> RunOutput {
    let kind = "unused_interfaces";
    let filters = match interface_filters_for_devices(
        pipeline,
        RecordFilter::devices().eq("location", location).eq("role", role),
    )
    .await
    {
        Ok(filters) => filters,
        Err(err) => return RunOutput::aborted(kind, err),
    };
    if filters.is_empty() {
        warn!(
            "No devices found for role '{}' in location '{}'",
            role, location
        );
    }
    let run = AuditRun::new(kind)
        .with_filters(filters)
        .with_rules(RuleSet::new().with_rule(InterfaceUnusedRule))
        .with_report(|records, _, verdicts| Report::unused_interfaces(records, verdicts));
    pipeline.run(run).await
}

/// Report interfaces whose description contains the search string, across
/// all devices at a location.
pub async fn interface_description_search(
    pipeline: &AuditPipeline,
    location: &str,
    needle: &str,
) -> RunOutput {
    let kind = "interface_description_search";
    let filters = match interface_filters_for_devices(
        pipeline,
        RecordFilter::devices().eq("location", location),
    )
    .await
    {
        Ok(filters) => filters,
        Err(err) => return RunOutput::aborted(kind, err),
    };
    let needle = needle.to_string();
    let run = AuditRun::new(kind)
        .with_filters(filters)
        .with_report(move |records, _, _| Report::interface_search(records, &needle));
    pipeline.run(run).await
}

/// Set the description of one or more interfaces in the inventory.
/// Interfaces already carrying the text are skipped by the executor.
pub async fn update_interface_descriptions(
    pipeline: &AuditPipeline,
    interface_ids: &[String],
    description: &str,
) -> RunOutput {
    let filters = interface_ids
        .iter()
        .map(|id| RecordFilter::interfaces().eq("id", id))
        .collect();
    let desired = description.to_string();
    let run = AuditRun::new("update_interface_descriptions")
        .with_filters(filters)
        .with_rules(RuleSet::new().with_rule(DescriptionMismatchRule::new(description)))
        .with_planner(move |_, verdicts| {
            verdicts
                .iter()
                .filter(|v| v.rule == "description-mismatch" && v.is_noncompliant())
                .map(|v| {
                    RemediationTask::new(Change::SetInterfaceDescription {
                        interface_id: v.target.clone(),
                        description: desired.clone(),
                    })
                })
                .collect()
        });
    pipeline.run(run).await
}

/// Push an interface description to the live device configuration. The
/// inventory record's description is the idempotence check: when it
/// already matches, no session is opened.
pub async fn push_interface_description(
    pipeline: &AuditPipeline,
    device_id: &str,
    interface_name: &str,
    description: &str,
) -> RunOutput {
    let device = device_id.to_string();
    let iface = interface_name.to_string();
    let desired = description.to_string();
    let run = AuditRun::new("push_interface_description")
        .with_filters(vec![
            RecordFilter::interfaces()
                .eq("device", device_id)
                .eq("name", interface_name),
            RecordFilter::devices().eq("id", device_id),
        ])
        .with_rules(RuleSet::new().with_rule(DescriptionMismatchRule::new(description)))
        .with_planner(move |_, verdicts| {
            verdicts
                .iter()
                .filter(|v| v.rule == "description-mismatch" && v.is_noncompliant())
                .map(|_| {
                    RemediationTask::new(Change::PushInterfaceDescription {
                        device_id: device.clone(),
                        interface: iface.clone(),
                        description: desired.clone(),
                    })
                })
                .collect()
        });
    pipeline.run(run).await
}

/// Set a device's serial number. The executor skips when it already
/// matches.
pub async fn update_device_serial(
    pipeline: &AuditPipeline,
    device_id: &str,
    serial: &str,
) -> RunOutput {
    let desired = serial.to_string();
    let run = AuditRun::new("update_device_serial")
        .with_filters(vec![RecordFilter::devices().eq("id", device_id)])
        .with_planner(move |records, _| {
            records
                .iter()
                .filter_map(InventoryRecord::as_device)
                .map(|d| {
                    RemediationTask::new(Change::SetDeviceSerial {
                        device_id: d.id.clone(),
                        serial: desired.clone(),
                    })
                })
                .collect()
        });
    pipeline.run(run).await
}

/// Replace an input IP address with each device's primary IPv4 inside the
/// `config_snippet` custom field. Devices without a primary address are
/// flagged by the presence rule and planned around.
pub async fn replace_mgmt_address(
    pipeline: &AuditPipeline,
    location: &str,
    input_ip: &str,
) -> RunOutput {
    let needle = input_ip.to_string();
    let run = AuditRun::new("replace_mgmt_address")
        .with_filters(vec![RecordFilter::devices().eq("location", location)])
        .with_rules(RuleSet::new().with_rule(PrimaryAddressPresenceRule))
        .with_planner(move |records, _| {
            records
                .iter()
                .filter_map(InventoryRecord::as_device)
                .filter_map(|d| {
                    let mgmt = d.primary_ip4_host()?;
                    let snippet = d.custom_fields.get(CONFIG_SNIPPET_FIELD)?;
                    if !snippet.contains(&needle) {
                        return None;
                    }
                    Some(RemediationTask::new(Change::RewriteCustomField {
                        device_id: d.id.clone(),
                        field: CONFIG_SNIPPET_FIELD.to_string(),
                        from: needle.clone(),
                        to: mgmt,
                    }))
                })
                .collect()
        });
    pipeline.run(run).await
}

/// One interface filter per device matching the device filter; an empty
/// result means no interfaces are fetched at all.
async fn interface_filters_for_devices(
    pipeline: &AuditPipeline,
    device_filter: RecordFilter,
) -> Result<Vec<RecordFilter>, netaudit_common::AuditError> {
    let devices = pipeline.inventory().fetch(&device_filter).await?;
    Ok(devices
        .iter()
        .filter_map(InventoryRecord::as_device)
        .map(|d| RecordFilter::interfaces().eq("device", &d.id))
        .collect())
}
