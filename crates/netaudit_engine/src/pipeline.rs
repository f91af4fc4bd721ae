//! Pipeline orchestration
//!
//! One audit run walks Fetching -> Grouping -> Evaluating -> Reporting ->
//! (optional) Remediating -> Done. Only a fetch failure aborts the run;
//! every later error is recorded at task level and the run still reaches
//! Done. Collaborators are injected, never looked up from any global
//! registry.

use crate::grouping::{group_by, Grouping};
use crate::inventory::InventorySource;
use crate::remediation::{OutcomeCounts, RemediationExecutor, RemediationOutcome, RemediationTask};
use crate::report::{report_file_name, Report, ReportSink};
use crate::rules::{RuleSet, Verdict};
use chrono::Utc;
use netaudit_common::{AuditConfig, AuditError, InventoryRecord, IpKeyPolicy, RecordFilter};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// States of one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Fetching,
    Grouping,
    Evaluating,
    Reporting,
    Remediating,
    Done,
    Aborted,
}

/// How records are partitioned during the grouping stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupKeySpec {
    /// Identity grouping: every record is its own group.
    RecordKey,
    /// Canonical IP key for address records; other variants fall back to
    /// the record key.
    CanonicalIp(IpKeyPolicy),
}

impl GroupKeySpec {
    pub fn key_of(&self, record: &InventoryRecord) -> String {
        match self {
            GroupKeySpec::RecordKey => record.key().to_string(),
            GroupKeySpec::CanonicalIp(policy) => match record.as_ip_address() {
                Some(ip) => policy.canonical_key(&ip.address),
                None => record.key().to_string(),
            },
        }
    }
}

type ReportBuilderFn =
    Box<dyn Fn(&[InventoryRecord], &Grouping<InventoryRecord>, &[Verdict]) -> Report + Send + Sync>;

type TaskPlannerFn =
    Box<dyn Fn(&[InventoryRecord], &[Verdict]) -> Vec<RemediationTask> + Send + Sync>;

/// Description of one audit run: what to fetch, how to group, which rules
/// to apply, what to report and which remediations to plan.
pub struct AuditRun {
    pub kind: String,
    /// Fetches feeding one grouping pass; results are concatenated.
    pub filters: Vec<RecordFilter>,
    pub key: GroupKeySpec,
    pub rules: RuleSet,
    report: Option<ReportBuilderFn>,
    planner: Option<TaskPlannerFn>,
}

impl AuditRun {
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            filters: vec![RecordFilter::new()],
            key: GroupKeySpec::RecordKey,
            rules: RuleSet::new(),
            report: None,
            planner: None,
        }
    }

    pub fn with_filters(mut self, filters: Vec<RecordFilter>) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_key(mut self, key: GroupKeySpec) -> Self {
        self.key = key;
        self
    }

    pub fn with_rules(mut self, rules: RuleSet) -> Self {
        self.rules = rules;
        self
    }

    /// Request a serialized report, built from the run data after
    /// evaluation.
    pub fn with_report(
        mut self,
        builder: impl Fn(&[InventoryRecord], &Grouping<InventoryRecord>, &[Verdict]) -> Report
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.report = Some(Box::new(builder));
        self
    }

    /// Plan remediation tasks from actionable NonCompliant verdicts.
    pub fn with_planner(
        mut self,
        planner: impl Fn(&[InventoryRecord], &[Verdict]) -> Vec<RemediationTask> + Send + Sync + 'static,
    ) -> Self {
        self.planner = Some(Box::new(planner));
        self
    }
}

/// Counts and terminal state of one run. Failed targets are always
/// counted, never silently dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub kind: String,
    pub state: RunState,
    pub records_scanned: usize,
    pub duplicate_groups: usize,
    pub verdicts_total: usize,
    pub noncompliant: usize,
    pub tasks: OutcomeCounts,
    pub report_file: Option<String>,
    /// Set only when the run aborted during Fetching.
    pub error: Option<AuditError>,
}

/// Everything one run produced.
pub struct RunOutput {
    pub summary: RunSummary,
    pub verdicts: Vec<Verdict>,
    pub outcomes: Vec<RemediationOutcome>,
    pub report_csv: Option<String>,
}

impl RunOutput {
    /// Output for a run that aborted before producing anything.
    pub fn aborted(kind: &str, error: AuditError) -> Self {
        Self {
            summary: RunSummary {
                kind: kind.to_string(),
                state: RunState::Aborted,
                records_scanned: 0,
                duplicate_groups: 0,
                verdicts_total: 0,
                noncompliant: 0,
                tasks: OutcomeCounts::default(),
                report_file: None,
                error: Some(error),
            },
            verdicts: Vec::new(),
            outcomes: Vec::new(),
            report_csv: None,
        }
    }
}

/// Wires inventory, rules, reports and remediation into one run.
pub struct AuditPipeline {
    inventory: Arc<dyn InventorySource>,
    sink: Arc<dyn ReportSink>,
    config: AuditConfig,
    executor: Option<RemediationExecutor>,
}

impl AuditPipeline {
    pub fn new(
        inventory: Arc<dyn InventorySource>,
        sink: Arc<dyn ReportSink>,
        config: AuditConfig,
    ) -> Self {
        Self {
            inventory,
            sink,
            config,
            executor: None,
        }
    }

    /// Attach a remediation executor; without one, runs are read-only
    /// audits and planners are ignored with a warning.
    pub fn with_executor(mut self, executor: RemediationExecutor) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn inventory(&self) -> Arc<dyn InventorySource> {
        Arc::clone(&self.inventory)
    }

    pub fn config(&self) -> &AuditConfig {
        &self.config
    }

    /// Execute one audit run to completion.
    pub async fn run(&self, run: AuditRun) -> RunOutput {
        // Fetching: the only stage whose failure aborts the run.
        debug!("run '{}': fetching", run.kind);
        let mut records: Vec<InventoryRecord> = Vec::new();
        for filter in &run.filters {
            match self.inventory.fetch(filter).await {
                Ok(batch) => records.extend(batch),
                Err(err) => {
                    error!("run '{}' aborted: {}", run.kind, err);
                    return RunOutput::aborted(&run.kind, err);
                }
            }
        }
        info!("run '{}': fetched {} records", run.kind, records.len());

        // Grouping: single pass, first-seen key order.
        debug!("run '{}': grouping", run.kind);
        let grouping = group_by(records.clone(), |r| run.key.key_of(r));

        // Evaluating: deterministic over the snapshot.
        debug!("run '{}': evaluating", run.kind);
        let verdicts = run.rules.evaluate(&records, &grouping);
        let noncompliant = verdicts.iter().filter(|v| v.is_noncompliant()).count();

        // Reporting.
        debug!("run '{}': reporting", run.kind);
        let mut report_csv = None;
        let mut report_file = None;
        if let Some(builder) = &run.report {
            let report = builder(&records, &grouping, &verdicts);
            match report.to_csv() {
                Ok(csv) => {
                    let name = report_file_name(&report.kind, Utc::now());
                    match self.sink.create_file(&name, &csv) {
                        Ok(()) => report_file = Some(name),
                        Err(err) => error!("run '{}': report export failed: {}", run.kind, err),
                    }
                    report_csv = Some(csv);
                }
                Err(err) => error!("run '{}': report serialization failed: {}", run.kind, err),
            }
        }

        // Remediating: optional; skipping it still reaches Done.
        let mut outcomes = Vec::new();
        if let Some(planner) = &run.planner {
            let tasks = planner(&records, &verdicts);
            if tasks.is_empty() {
                debug!("run '{}': nothing to remediate", run.kind);
            } else if let Some(executor) = &self.executor {
                info!("run '{}': remediating {} targets", run.kind, tasks.len());
                outcomes = executor.apply_all(&tasks).await;
            } else {
                warn!(
                    "run '{}': {} tasks planned but no executor attached",
                    run.kind,
                    tasks.len()
                );
            }
        }

        let tasks = OutcomeCounts::tally(&outcomes);
        let summary = RunSummary {
            kind: run.kind.clone(),
            state: RunState::Done,
            records_scanned: records.len(),
            duplicate_groups: grouping.duplicate_count(),
            verdicts_total: verdicts.len(),
            noncompliant,
            tasks,
            report_file,
            error: None,
        };
        info!(
            "run '{}' done: {} records, {} noncompliant, tasks {}/{}/{} applied/skipped/failed",
            run.kind,
            summary.records_scanned,
            summary.noncompliant,
            tasks.applied,
            tasks.skipped,
            tasks.failed
        );
        RunOutput {
            summary,
            verdicts,
            outcomes,
            report_csv,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::MemoryInventory;
    use crate::report::MemorySink;
    use crate::rules::PrimaryAddressPresenceRule;
    use netaudit_common::Device;
    use std::collections::HashMap;

    fn device(id: &str, primary_ip4: Option<&str>) -> InventoryRecord {
        InventoryRecord::Device(Device {
            id: id.to_string(),
            name: id.to_string(),
            location: "fra1".to_string(),
            role: "leaf".to_string(),
            serial: String::new(),
            primary_ip4: primary_ip4.map(str::to_string),
            status: "active".to_string(),
            custom_fields: HashMap::new(),
        })
    }

    fn pipeline(records: Vec<InventoryRecord>) -> (AuditPipeline, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let pipeline = AuditPipeline::new(
            Arc::new(MemoryInventory::with_records(records)),
            Arc::clone(&sink) as Arc<dyn ReportSink>,
            AuditConfig::default(),
        );
        (pipeline, sink)
    }

    #[tokio::test]
    async fn test_fetch_failure_aborts_run() {
        let inventory = Arc::new(MemoryInventory::new());
        inventory.set_fetch_error("backend down");
        let pipeline = AuditPipeline::new(
            inventory,
            Arc::new(MemorySink::new()),
            AuditConfig::default(),
        );

        let output = pipeline.run(AuditRun::new("audit")).await;
        assert_eq!(output.summary.state, RunState::Aborted);
        assert_eq!(
            output.summary.error,
            Some(AuditError::InventoryUnavailable("backend down".into()))
        );
    }

    #[tokio::test]
    async fn test_read_only_run_reaches_done_without_remediation() {
        let (pipeline, _sink) = pipeline(vec![device("sw1", None), device("sw2", Some("10.0.0.2"))]);

        let run = AuditRun::new("primary_ipv4_audit")
            .with_filters(vec![RecordFilter::devices()])
            .with_rules(RuleSet::new().with_rule(PrimaryAddressPresenceRule));
        let output = pipeline.run(run).await;

        assert_eq!(output.summary.state, RunState::Done);
        assert_eq!(output.summary.records_scanned, 2);
        assert_eq!(output.summary.noncompliant, 1);
        assert_eq!(output.summary.tasks.attempted, 0);
        assert!(output.report_csv.is_none());
    }

    #[tokio::test]
    async fn test_report_is_exported_through_sink() {
        let (pipeline, sink) = pipeline(vec![device("sw1", None)]);

        let run = AuditRun::new("primary_ipv4_audit")
            .with_filters(vec![RecordFilter::devices()])
            .with_rules(RuleSet::new().with_rule(PrimaryAddressPresenceRule))
            .with_report(|_, _, verdicts| Report::from_verdicts("primary_ipv4_audit", verdicts));
        let output = pipeline.run(run).await;

        let files = sink.files();
        assert_eq!(files.len(), 1);
        assert!(files[0].0.starts_with("primary_ipv4_audit_"));
        assert!(files[0].0.ends_with(".csv"));
        assert_eq!(Some(files[0].1.clone()), output.report_csv);
        assert_eq!(output.summary.report_file.as_deref(), Some(files[0].0.as_str()));
    }

    #[tokio::test]
    async fn test_summary_serializes_to_json() {
        let (pipeline, _sink) = pipeline(vec![device("sw1", None)]);

        let run = AuditRun::new("primary_ipv4_audit")
            .with_filters(vec![RecordFilter::devices()])
            .with_rules(RuleSet::new().with_rule(PrimaryAddressPresenceRule));
        let output = pipeline.run(run).await;

        let json = serde_json::to_value(&output.summary).unwrap();
        assert_eq!(json["state"], "done");
        assert_eq!(json["records_scanned"], 1);
        assert_eq!(json["noncompliant"], 1);
    }

    #[tokio::test]
    async fn test_planner_without_executor_is_read_only() {
        let (pipeline, _sink) = pipeline(vec![device("sw1", None)]);

        let run = AuditRun::new("audit").with_planner(|_, _| {
            vec![crate::remediation::RemediationTask::new(
                crate::remediation::Change::SetDeviceSerial {
                    device_id: "sw1".to_string(),
                    serial: "X".to_string(),
                },
            )]
        });
        let output = pipeline.run(run).await;

        assert_eq!(output.summary.state, RunState::Done);
        assert!(output.outcomes.is_empty());
        assert_eq!(output.summary.tasks.attempted, 0);
    }
}
