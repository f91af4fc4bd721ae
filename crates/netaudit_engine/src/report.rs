//! Report building and tabular export
//!
//! Verdicts and groups flatten into in-memory rows, serialized as UTF-8
//! CSV with a fixed header per report family. Identical input produces
//! byte-identical output; empty optional fields serialize as empty
//! strings. A requested export always includes the header row, even when
//! there are no data rows.

use crate::grouping::Grouping;
use crate::rules::{Outcome, Verdict};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use netaudit_common::{AuditError, InventoryRecord};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::info;

/// Columns of the duplicate-address report.
pub const DUPLICATE_ADDRESS_HEADERS: &[&str] = &[
    "IP Address",
    "Status",
    "Assigned Object Type",
    "Assigned Object Name",
    "Tenant",
    "Description",
];

/// Columns of the unused-interface and description-search reports.
pub const INTERFACE_HEADERS: &[&str] = &["Device", "Interface", "Description"];

/// Columns of the generic verdict report.
pub const VERDICT_HEADERS: &[&str] = &["Target", "Kind", "Rule", "Outcome", "Reason"];

/// One flattened report row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportRow(pub Vec<String>);

/// An in-memory tabular report for one rule family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    /// Report kind, used as the file name stem (e.g. `duplicate_ip_addresses`).
    pub kind: String,
    pub header: Vec<String>,
    pub rows: Vec<ReportRow>,
}

impl Report {
    fn new(kind: &str, header: &[&str]) -> Self {
        Self {
            kind: kind.to_string(),
            header: header.iter().map(|h| h.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    /// Duplicate-address report: one row per member of each duplicate
    /// group. Groups are ordered lexicographically by canonical key;
    /// members keep input order.
    pub fn duplicate_addresses(grouping: &Grouping<InventoryRecord>) -> Self {
        let mut report = Self::new("duplicate_ip_addresses", DUPLICATE_ADDRESS_HEADERS);
        let mut keys: Vec<&str> = grouping.duplicates().map(|(k, _)| k).collect();
        keys.sort_unstable();
        for key in keys {
            for member in grouping.get(key).unwrap_or(&[]) {
                let ip = match member.as_ip_address() {
                    Some(ip) => ip,
                    None => continue,
                };
                report.rows.push(ReportRow(vec![
                    ip.address.clone(),
                    ip.status.clone(),
                    ip.assigned.kind_label().to_string(),
                    ip.assigned.display_name(),
                    ip.tenant.clone().unwrap_or_default(),
                    ip.description.clone(),
                ]));
            }
        }
        report
    }

    /// Unused-interface report: one row per NonCompliant interface-unused
    /// verdict, in verdict order.
    pub fn unused_interfaces(records: &[InventoryRecord], verdicts: &[Verdict]) -> Self {
        let mut report = Self::new("unused_interfaces", INTERFACE_HEADERS);
        let by_key: HashMap<&str, &InventoryRecord> =
            records.iter().map(|r| (r.key(), r)).collect();
        for verdict in verdicts {
            if verdict.rule != "interface-unused" || !verdict.is_noncompliant() {
                continue;
            }
            if let Some(iface) = by_key
                .get(verdict.target.as_str())
                .and_then(|r| r.as_interface())
            {
                report.rows.push(ReportRow(vec![
                    iface.device.clone(),
                    iface.name.clone(),
                    iface.description.clone(),
                ]));
            }
        }
        report
    }

    /// Description-search report: one row per interface whose description
    /// contains the needle, in input order.
    pub fn interface_search(records: &[InventoryRecord], needle: &str) -> Self {
        let mut report = Self::new("interface_description_search", INTERFACE_HEADERS);
        for record in records {
            if let Some(iface) = record.as_interface() {
                if iface.description.contains(needle) {
                    report.rows.push(ReportRow(vec![
                        iface.device.clone(),
                        iface.name.clone(),
                        iface.description.clone(),
                    ]));
                }
            }
        }
        report
    }

    /// Generic verdict report: one row per verdict, in verdict order.
    pub fn from_verdicts(kind: &str, verdicts: &[Verdict]) -> Self {
        let mut report = Self::new(kind, VERDICT_HEADERS);
        for verdict in verdicts {
            let outcome = match verdict.outcome {
                Outcome::Compliant => "compliant",
                Outcome::NonCompliant => "noncompliant",
            };
            report.rows.push(ReportRow(vec![
                verdict.target.clone(),
                verdict.target_kind.label().to_string(),
                verdict.rule.clone(),
                outcome.to_string(),
                verdict.reason.clone(),
            ]));
        }
        report
    }

    /// Serialize to CSV text. The header row is always present; fields
    /// containing the delimiter, quotes or newlines are quoted per the
    /// usual CSV rules.
    pub fn to_csv(&self) -> Result<String> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer
            .write_record(&self.header)
            .context("Failed to write report header")?;
        for row in &self.rows {
            writer
                .write_record(&row.0)
                .context("Failed to write report row")?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| anyhow::anyhow!("Failed to flush report writer: {}", e))?;
        String::from_utf8(bytes).context("Report contained invalid UTF-8")
    }
}

/// Timestamped report file name: `<kind>_<YYYYMMDD_HHMMSS>.csv` in UTC.
pub fn report_file_name(kind: &str, at: DateTime<Utc>) -> String {
    format!("{}_{}.csv", kind, at.format("%Y%m%d_%H%M%S"))
}

/// Where serialized reports end up. The core never manages paths beyond
/// the generated file name.
pub trait ReportSink: Send + Sync {
    fn create_file(&self, name: &str, contents: &str) -> Result<(), AuditError>;
}

/// Writes report files under a base directory.
pub struct DirectorySink {
    base: PathBuf,
}

impl DirectorySink {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }
}

impl ReportSink for DirectorySink {
    fn create_file(&self, name: &str, contents: &str) -> Result<(), AuditError> {
        std::fs::create_dir_all(&self.base)
            .map_err(|e| AuditError::PersistenceFailure(e.to_string()))?;
        let path = self.base.join(name);
        std::fs::write(&path, contents)
            .map_err(|e| AuditError::PersistenceFailure(e.to_string()))?;
        info!("Report written to {}", path.display());
        Ok(())
    }
}

/// In-memory sink for tests: captures (name, contents) pairs.
#[derive(Default)]
pub struct MemorySink {
    files: Mutex<Vec<(String, String)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn files(&self) -> Vec<(String, String)> {
        self.files.lock().unwrap().clone()
    }
}

impl ReportSink for MemorySink {
    fn create_file(&self, name: &str, contents: &str) -> Result<(), AuditError> {
        self.files
            .lock()
            .unwrap()
            .push((name.to_string(), contents.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grouping::group_by;
    use crate::rules::TargetKind;
    use netaudit_common::{AssignedObject, IpAddress, IpKeyPolicy};

    fn ip(id: &str, address: &str, tenant: Option<&str>, description: &str) -> InventoryRecord {
        InventoryRecord::IpAddress(IpAddress {
            id: id.to_string(),
            address: address.to_string(),
            status: "active".to_string(),
            tenant: tenant.map(str::to_string),
            description: description.to_string(),
            assigned: AssignedObject::None,
        })
    }

    fn duplicate_grouping() -> Grouping<InventoryRecord> {
        let policy = IpKeyPolicy::HostOnly;
        let records = vec![
            ip("ip1", "10.0.0.1/24", Some("acme"), "gateway"),
            ip("ip2", "10.0.0.1", None, ""),
            ip("ip3", "10.0.0.2/24", None, ""),
        ];
        group_by(records, |r| {
            policy.canonical_key(&r.as_ip_address().unwrap().address)
        })
    }

    #[test]
    fn test_duplicate_report_rows_cover_duplicate_members_only() {
        let report = Report::duplicate_addresses(&duplicate_grouping());
        assert_eq!(report.rows.len(), 2);
        assert_eq!(report.rows[0].0[0], "10.0.0.1/24");
        assert_eq!(report.rows[1].0[0], "10.0.0.1");
    }

    #[test]
    fn test_csv_header_always_present() {
        let empty = group_by(Vec::<InventoryRecord>::new(), |r| r.key().to_string());
        let report = Report::duplicate_addresses(&empty);
        let csv = report.to_csv().unwrap();
        assert_eq!(
            csv.lines().next().unwrap(),
            "IP Address,Status,Assigned Object Type,Assigned Object Name,Tenant,Description"
        );
        assert_eq!(csv.lines().count(), 1);
    }

    #[test]
    fn test_csv_empty_optionals_are_empty_strings() {
        let report = Report::duplicate_addresses(&duplicate_grouping());
        let csv = report.to_csv().unwrap();
        let second_row = csv.lines().nth(2).unwrap();
        assert_eq!(second_row, "10.0.0.1,active,,,,");
    }

    #[test]
    fn test_csv_escapes_delimiters_and_quotes() {
        let grouping = group_by(
            vec![
                ip("ip1", "10.0.0.1", None, "core, uplink \"a\""),
                ip("ip2", "10.0.0.1", None, "line1\nline2"),
            ],
            |r| r.as_ip_address().unwrap().address.clone(),
        );
        let csv = Report::duplicate_addresses(&grouping).to_csv().unwrap();
        assert!(csv.contains("\"core, uplink \"\"a\"\"\""));
        assert!(csv.contains("\"line1\nline2\""));
    }

    #[test]
    fn test_csv_output_is_stable() {
        let report = Report::duplicate_addresses(&duplicate_grouping());
        assert_eq!(report.to_csv().unwrap(), report.to_csv().unwrap());
    }

    #[test]
    fn test_csv_round_trip() {
        let verdicts = vec![Verdict {
            target: "sw1".to_string(),
            target_kind: TargetKind::Device,
            rule: "primary-address-presence".to_string(),
            outcome: Outcome::NonCompliant,
            reason: "Device 'sw1' has no primary IPv4 management address".to_string(),
        }];
        let report = Report::from_verdicts("primary_ipv4_audit", &verdicts);
        let csv_text = report.to_csv().unwrap();

        let mut reader = csv::Reader::from_reader(csv_text.as_bytes());
        let headers: Vec<String> = reader
            .headers()
            .unwrap()
            .iter()
            .map(str::to_string)
            .collect();
        assert_eq!(headers, report.header);

        let rows: Vec<Vec<String>> = reader
            .records()
            .map(|r| r.unwrap().iter().map(str::to_string).collect())
            .collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0], report.rows[0].0);
    }

    #[test]
    fn test_report_file_name_format() {
        let at = DateTime::parse_from_rfc3339("2026-03-01T08:09:10Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(
            report_file_name("duplicate_ip_addresses", at),
            "duplicate_ip_addresses_20260301_080910.csv"
        );
    }

    #[test]
    fn test_directory_sink_writes_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let sink = DirectorySink::new(dir.path().join("reports"));
        sink.create_file("audit.csv", "a,b\n1,2\n").unwrap();
        let written =
            std::fs::read_to_string(dir.path().join("reports").join("audit.csv")).unwrap();
        assert_eq!(written, "a,b\n1,2\n");
    }
}
