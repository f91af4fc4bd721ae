//! netaudit engine - audit, report and remediate a network inventory
//!
//! One pipeline run fetches an inventory snapshot, groups records by a
//! derived key, evaluates compliance rules, materializes a tabular report
//! and optionally applies idempotent remediations against local records or
//! live devices. Collaborators (inventory store, device transport, report
//! sink) are injected trait objects; fakes for all three live next to the
//! traits for deterministic tests.

pub mod grouping;
pub mod inventory;
pub mod jobs;
pub mod pipeline;
pub mod remediation;
pub mod report;
pub mod rules;
pub mod transport;

pub use grouping::{group_by, Grouping};
pub use inventory::{InventorySource, MemoryInventory};
pub use pipeline::{AuditPipeline, AuditRun, GroupKeySpec, RunOutput, RunState, RunSummary};
pub use remediation::{
    Change, OutcomeCounts, OutcomeState, RemediationExecutor, RemediationOutcome,
    RemediationTask,
};
pub use report::{report_file_name, DirectorySink, MemorySink, Report, ReportRow, ReportSink};
pub use rules::{
    ComplianceRule, DescriptionMismatchRule, DuplicateAddressRule, GroupRule,
    InterfaceUnusedRule, Outcome, PrimaryAddressPresenceRule, RuleSet, TargetKind, Verdict,
};
pub use transport::{
    DeviceCredentials, DeviceSession, DeviceTransport, FakeBehavior, FakeTransport,
    FakeTransportBuilder,
};
