//! Compliance rule evaluation
//!
//! A rule is a pure predicate over one record (or one group) producing a
//! verdict. Rules are independent and order-insensitive; evaluating the
//! same rule twice over unchanged input yields identical verdicts.
//!
//! A record missing a field a rule requires becomes a NonCompliant
//! "data incomplete" verdict rather than an evaluation failure.

use crate::grouping::Grouping;
use netaudit_common::{AuditError, InventoryRecord};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Outcome of evaluating one rule against one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Compliant,
    NonCompliant,
}

/// Which record variant a verdict refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Device,
    Interface,
    IpAddress,
}

impl TargetKind {
    pub fn of(record: &InventoryRecord) -> Self {
        match record {
            InventoryRecord::Device(_) => TargetKind::Device,
            InventoryRecord::Interface(_) => TargetKind::Interface,
            InventoryRecord::IpAddress(_) => TargetKind::IpAddress,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TargetKind::Device => "device",
            TargetKind::Interface => "interface",
            TargetKind::IpAddress => "ip_address",
        }
    }
}

/// The verdict for one (target, rule) pair. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    /// Identity key of the record the verdict refers to.
    pub target: String,
    pub target_kind: TargetKind,
    pub rule: String,
    pub outcome: Outcome,
    pub reason: String,
}

impl Verdict {
    pub fn is_noncompliant(&self) -> bool {
        self.outcome == Outcome::NonCompliant
    }
}

/// A compliance rule over a single record.
///
/// `evaluate` returns `Ok(None)` when the rule does not apply to the
/// record's variant, and `Err(MalformedRecord)` when a required field is
/// missing; the evaluator folds that error into a "data incomplete"
/// verdict.
pub trait ComplianceRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn evaluate(&self, record: &InventoryRecord) -> Result<Option<Verdict>, AuditError>;
}

/// A compliance rule over one group of records sharing a key.
pub trait GroupRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn evaluate_group(&self, key: &str, members: &[InventoryRecord]) -> Vec<Verdict>;
}

// ============================================================================
// PrimaryAddressPresence
// ============================================================================

/// Devices must have a primary IPv4 management address.
pub struct PrimaryAddressPresenceRule;

impl ComplianceRule for PrimaryAddressPresenceRule {
    fn name(&self) -> &'static str {
        "primary-address-presence"
    }

    fn evaluate(&self, record: &InventoryRecord) -> Result<Option<Verdict>, AuditError> {
        let device = match record.as_device() {
            Some(d) => d,
            None => return Ok(None),
        };
        if device.name.trim().is_empty() {
            return Err(AuditError::MalformedRecord {
                key: device.id.clone(),
                missing: "name".to_string(),
            });
        }
        let verdict = match device.primary_ip4_host() {
            Some(ip) => Verdict {
                target: device.id.clone(),
                target_kind: TargetKind::Device,
                rule: self.name().to_string(),
                outcome: Outcome::Compliant,
                reason: format!("Device '{}' has primary IPv4 {}", device.name, ip),
            },
            None => Verdict {
                target: device.id.clone(),
                target_kind: TargetKind::Device,
                rule: self.name().to_string(),
                outcome: Outcome::NonCompliant,
                reason: format!(
                    "Device '{}' has no primary IPv4 management address",
                    device.name
                ),
            },
        };
        Ok(Some(verdict))
    }
}

// ============================================================================
// InterfaceUnused
// ============================================================================

/// An interface is unused only when it has no LAG membership, no cable,
/// no connected endpoint and zero assigned addresses. All four conditions
/// are required; an interface with an address but no cable is still in use.
pub struct InterfaceUnusedRule;

impl ComplianceRule for InterfaceUnusedRule {
    fn name(&self) -> &'static str {
        "interface-unused"
    }

    fn evaluate(&self, record: &InventoryRecord) -> Result<Option<Verdict>, AuditError> {
        let iface = match record.as_interface() {
            Some(i) => i,
            None => return Ok(None),
        };
        if iface.device.trim().is_empty() {
            return Err(AuditError::MalformedRecord {
                key: iface.id.clone(),
                missing: "device".to_string(),
            });
        }
        let unused = iface.lag.is_none()
            && iface.cable.is_none()
            && iface.connected_endpoint.is_none()
            && iface.ip_addresses.is_empty();
        let verdict = if unused {
            Verdict {
                target: iface.id.clone(),
                target_kind: TargetKind::Interface,
                rule: self.name().to_string(),
                outcome: Outcome::NonCompliant,
                reason: format!(
                    "Interface '{}' on device '{}' is unused: no LAG, no cable, no connected endpoint, no addresses",
                    iface.name, iface.device
                ),
            }
        } else {
            Verdict {
                target: iface.id.clone(),
                target_kind: TargetKind::Interface,
                rule: self.name().to_string(),
                outcome: Outcome::Compliant,
                reason: format!(
                    "Interface '{}' on device '{}' is in use",
                    iface.name, iface.device
                ),
            }
        };
        Ok(Some(verdict))
    }
}

// ============================================================================
// DescriptionMismatch
// ============================================================================

/// Interface description must equal a desired text. Drives idempotent
/// description remediations: a Compliant verdict means the update is a
/// no-op.
pub struct DescriptionMismatchRule {
    pub desired: String,
}

impl DescriptionMismatchRule {
    pub fn new(desired: &str) -> Self {
        Self {
            desired: desired.to_string(),
        }
    }
}

impl ComplianceRule for DescriptionMismatchRule {
    fn name(&self) -> &'static str {
        "description-mismatch"
    }

    fn evaluate(&self, record: &InventoryRecord) -> Result<Option<Verdict>, AuditError> {
        let iface = match record.as_interface() {
            Some(i) => i,
            None => return Ok(None),
        };
        let verdict = if iface.description == self.desired {
            Verdict {
                target: iface.id.clone(),
                target_kind: TargetKind::Interface,
                rule: self.name().to_string(),
                outcome: Outcome::Compliant,
                reason: format!(
                    "Interface '{}' description already matches desired text",
                    iface.name
                ),
            }
        } else {
            Verdict {
                target: iface.id.clone(),
                target_kind: TargetKind::Interface,
                rule: self.name().to_string(),
                outcome: Outcome::NonCompliant,
                reason: format!(
                    "Interface '{}' description '{}' does not match desired '{}'",
                    iface.name, iface.description, self.desired
                ),
            }
        };
        Ok(Some(verdict))
    }
}

// ============================================================================
// DuplicateAddress
// ============================================================================

/// Every member of a group with more than one member is NonCompliant;
/// the reason names the sibling records and what they are assigned to.
pub struct DuplicateAddressRule;

impl GroupRule for DuplicateAddressRule {
    fn name(&self) -> &'static str {
        "duplicate-address"
    }

    fn evaluate_group(&self, key: &str, members: &[InventoryRecord]) -> Vec<Verdict> {
        let mut verdicts = Vec::with_capacity(members.len());
        for (index, member) in members.iter().enumerate() {
            let ip = match member.as_ip_address() {
                Some(ip) => ip,
                None => continue,
            };
            if members.len() <= 1 {
                verdicts.push(Verdict {
                    target: ip.id.clone(),
                    target_kind: TargetKind::IpAddress,
                    rule: self.name().to_string(),
                    outcome: Outcome::Compliant,
                    reason: format!("Address {} is unique", key),
                });
                continue;
            }
            let siblings: Vec<String> = members
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != index)
                .filter_map(|(_, m)| m.as_ip_address())
                .map(|s| format!("{} ({})", s.id, s.assigned.reason_label()))
                .collect();
            verdicts.push(Verdict {
                target: ip.id.clone(),
                target_kind: TargetKind::IpAddress,
                rule: self.name().to_string(),
                outcome: Outcome::NonCompliant,
                reason: format!(
                    "Address {} is also assigned to: {}",
                    key,
                    siblings.join(", ")
                ),
            });
        }
        verdicts
    }
}

// ============================================================================
// RuleSet
// ============================================================================

/// The rules selected for one pipeline run.
#[derive(Default)]
pub struct RuleSet {
    record_rules: Vec<Box<dyn ComplianceRule>>,
    group_rules: Vec<Box<dyn GroupRule>>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rule(mut self, rule: impl ComplianceRule + 'static) -> Self {
        self.record_rules.push(Box::new(rule));
        self
    }

    pub fn with_group_rule(mut self, rule: impl GroupRule + 'static) -> Self {
        self.group_rules.push(Box::new(rule));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.record_rules.is_empty() && self.group_rules.is_empty()
    }

    /// Run every selected rule over the full record and group sets.
    ///
    /// Record verdicts come first, in input record order, then group
    /// verdicts in first-seen group order; the result is deterministic for
    /// a given input.
    pub fn evaluate(
        &self,
        records: &[InventoryRecord],
        grouping: &Grouping<InventoryRecord>,
    ) -> Vec<Verdict> {
        let mut verdicts = Vec::new();
        for record in records {
            for rule in &self.record_rules {
                match rule.evaluate(record) {
                    Ok(Some(verdict)) => verdicts.push(verdict),
                    Ok(None) => {}
                    Err(err) => {
                        debug!("Rule {} on '{}': {}", rule.name(), record.key(), err);
                        verdicts.push(Verdict {
                            target: record.key().to_string(),
                            target_kind: TargetKind::of(record),
                            rule: rule.name().to_string(),
                            outcome: Outcome::NonCompliant,
                            reason: format!("data incomplete: {}", err),
                        });
                    }
                }
            }
        }
        for rule in &self.group_rules {
            for (key, members) in grouping.iter() {
                verdicts.extend(rule.evaluate_group(key, members));
            }
        }
        verdicts
    }
}
