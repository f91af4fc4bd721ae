//! Remediation execution
//!
//! A task carries one desired change against one target. The executor is
//! idempotent: when the target already matches the desired state the task
//! is skipped without any external call. Local changes persist through
//! the inventory source and roll back in memory on save failure; remote
//! changes drive a scoped device session that is released on every exit
//! path. Batch application isolates failures per task and never
//! fail-fasts across the batch.
//!
//! A Failed outcome against a remote target means "outcome uncertain":
//! the device's actual state after a failure is not re-verified.

use crate::inventory::InventorySource;
use crate::transport::{DeviceCredentials, DeviceTransport};
use netaudit_common::{
    AuditError, InventoryRecord, RecordFilter, RemediationConfig,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use uuid::Uuid;

/// The desired change a task applies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum Change {
    /// Set a device's serial number in the inventory.
    SetDeviceSerial { device_id: String, serial: String },
    /// Set an interface's description in the inventory.
    SetInterfaceDescription {
        interface_id: String,
        description: String,
    },
    /// Push an interface description to the live device configuration.
    PushInterfaceDescription {
        device_id: String,
        interface: String,
        description: String,
    },
    /// Replace every occurrence of `from` with `to` inside a device
    /// custom field.
    RewriteCustomField {
        device_id: String,
        field: String,
        from: String,
        to: String,
    },
}

impl Change {
    /// Identity of the record the change targets.
    pub fn target(&self) -> &str {
        match self {
            Change::SetDeviceSerial { device_id, .. } => device_id,
            Change::SetInterfaceDescription { interface_id, .. } => interface_id,
            Change::PushInterfaceDescription { device_id, .. } => device_id,
            Change::RewriteCustomField { device_id, .. } => device_id,
        }
    }
}

/// One corrective action against one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemediationTask {
    pub id: Uuid,
    pub change: Change,
}

impl RemediationTask {
    pub fn new(change: Change) -> Self {
        Self {
            id: Uuid::new_v4(),
            change,
        }
    }
}

/// Terminal state of one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum OutcomeState {
    /// The change was applied and persisted.
    Applied,
    /// The target already matched the desired state; no external call
    /// was made.
    Skipped { reason: String },
    /// The task failed. For remote targets the device state is
    /// unknown, not necessarily unchanged.
    Failed { error: AuditError },
}

/// The recorded result of one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemediationOutcome {
    pub task_id: Uuid,
    pub target: String,
    pub state: OutcomeState,
}

impl RemediationOutcome {
    pub fn is_applied(&self) -> bool {
        self.state == OutcomeState::Applied
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.state, OutcomeState::Skipped { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.state, OutcomeState::Failed { .. })
    }
}

/// Applies remediation tasks against the inventory and live devices.
#[derive(Clone)]
pub struct RemediationExecutor {
    inventory: Arc<dyn InventorySource>,
    transport: Arc<dyn DeviceTransport>,
    credentials: DeviceCredentials,
    config: RemediationConfig,
    cancelled: Arc<AtomicBool>,
}

impl RemediationExecutor {
    pub fn new(
        inventory: Arc<dyn InventorySource>,
        transport: Arc<dyn DeviceTransport>,
        credentials: DeviceCredentials,
        config: RemediationConfig,
    ) -> Self {
        Self {
            inventory,
            transport,
            credentials,
            config,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag checked before each task dispatch. Setting it stops new
    /// dispatches; already-dispatched sessions still finish releasing.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.config.session_timeout_secs)
    }

    /// Apply one task to its target.
    pub async fn apply(&self, task: &RemediationTask) -> RemediationOutcome {
        let target = task.change.target().to_string();
        info!("Applying task {} to '{}'", task.id, target);
        let state = match self.try_apply(&task.change).await {
            Ok(state) => state,
            Err(err) => {
                error!("Task {} against '{}' failed: {}", task.id, target, err);
                OutcomeState::Failed { error: err }
            }
        };
        RemediationOutcome {
            task_id: task.id,
            target,
            state,
        }
    }

    /// Apply a batch sequentially. One task's failure never aborts its
    /// siblings; outcomes come back in task order.
    pub async fn apply_all(&self, tasks: &[RemediationTask]) -> Vec<RemediationOutcome> {
        let mut outcomes = Vec::with_capacity(tasks.len());
        for task in tasks {
            if self.cancelled.load(Ordering::SeqCst) {
                warn!("Run cancelled; not dispatching task {}", task.id);
                outcomes.push(RemediationOutcome {
                    task_id: task.id,
                    target: task.change.target().to_string(),
                    state: OutcomeState::Skipped {
                        reason: "run cancelled before dispatch".to_string(),
                    },
                });
                continue;
            }
            outcomes.push(self.apply(task).await);
        }
        outcomes
    }

    /// Apply a batch with bounded concurrency over distinct targets.
    /// Outcomes are re-ordered to task order before returning.
    pub async fn apply_all_concurrent(
        &self,
        tasks: Vec<RemediationTask>,
    ) -> Vec<RemediationOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let mut join_set = JoinSet::new();
        let mut outcomes: Vec<(usize, RemediationOutcome)> = Vec::with_capacity(tasks.len());

        for (index, task) in tasks.into_iter().enumerate() {
            if self.cancelled.load(Ordering::SeqCst) {
                warn!("Run cancelled; not dispatching task {}", task.id);
                outcomes.push((
                    index,
                    RemediationOutcome {
                        task_id: task.id,
                        target: task.change.target().to_string(),
                        state: OutcomeState::Skipped {
                            reason: "run cancelled before dispatch".to_string(),
                        },
                    },
                ));
                continue;
            }
            let executor = self.clone();
            let semaphore = Arc::clone(&semaphore);
            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                (index, executor.apply(&task).await)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(pair) => outcomes.push(pair),
                Err(err) => error!("Remediation worker panicked: {}", err),
            }
        }
        outcomes.sort_by_key(|(index, _)| *index);
        outcomes.into_iter().map(|(_, outcome)| outcome).collect()
    }

    async fn try_apply(&self, change: &Change) -> Result<OutcomeState, AuditError> {
        match change {
            Change::SetDeviceSerial { device_id, serial } => {
                self.set_device_serial(device_id, serial).await
            }
            Change::SetInterfaceDescription {
                interface_id,
                description,
            } => self.set_interface_description(interface_id, description).await,
            Change::PushInterfaceDescription {
                device_id,
                interface,
                description,
            } => {
                self.push_interface_description(device_id, interface, description)
                    .await
            }
            Change::RewriteCustomField {
                device_id,
                field,
                from,
                to,
            } => self.rewrite_custom_field(device_id, field, from, to).await,
        }
    }

    async fn fetch_one(
        &self,
        filter: RecordFilter,
        key: &str,
        what: &str,
    ) -> Result<InventoryRecord, AuditError> {
        let mut records = self.inventory.fetch(&filter).await?;
        if records.is_empty() {
            return Err(AuditError::MalformedRecord {
                key: key.to_string(),
                missing: format!("{} record in inventory", what),
            });
        }
        Ok(records.remove(0))
    }

    fn expect_device(record: InventoryRecord) -> Result<netaudit_common::Device, AuditError> {
        match record {
            InventoryRecord::Device(d) => Ok(d),
            other => Err(AuditError::MalformedRecord {
                key: other.key().to_string(),
                missing: "device record in inventory".to_string(),
            }),
        }
    }

    async fn set_device_serial(
        &self,
        device_id: &str,
        serial: &str,
    ) -> Result<OutcomeState, AuditError> {
        let record = self
            .fetch_one(RecordFilter::devices().eq("id", device_id), device_id, "device")
            .await?;
        let mut device = Self::expect_device(record)?;
        if device.serial == serial {
            return Ok(OutcomeState::Skipped {
                reason: format!("serial already '{}'", serial),
            });
        }
        device.serial = serial.to_string();
        self.inventory.save(&InventoryRecord::Device(device)).await?;
        Ok(OutcomeState::Applied)
    }

    async fn set_interface_description(
        &self,
        interface_id: &str,
        description: &str,
    ) -> Result<OutcomeState, AuditError> {
        let record = self
            .fetch_one(
                RecordFilter::interfaces().eq("id", interface_id),
                interface_id,
                "interface",
            )
            .await?;
        let mut iface = match record {
            InventoryRecord::Interface(i) => i,
            other => {
                return Err(AuditError::MalformedRecord {
                    key: other.key().to_string(),
                    missing: "interface record in inventory".to_string(),
                })
            }
        };
        if iface.description == description {
            return Ok(OutcomeState::Skipped {
                reason: "description already matches".to_string(),
            });
        }
        iface.description = description.to_string();
        self.inventory
            .save(&InventoryRecord::Interface(iface))
            .await?;
        Ok(OutcomeState::Applied)
    }

    async fn rewrite_custom_field(
        &self,
        device_id: &str,
        field: &str,
        from: &str,
        to: &str,
    ) -> Result<OutcomeState, AuditError> {
        let record = self
            .fetch_one(RecordFilter::devices().eq("id", device_id), device_id, "device")
            .await?;
        let mut device = Self::expect_device(record)?;
        let current = device.custom_fields.get(field).cloned().unwrap_or_default();
        if !current.contains(from) {
            return Ok(OutcomeState::Skipped {
                reason: format!("'{}' not present in custom field '{}'", from, field),
            });
        }
        let rewritten = current.replace(from, to);
        if rewritten == current {
            return Ok(OutcomeState::Skipped {
                reason: format!("custom field '{}' already rewritten", field),
            });
        }
        device.custom_fields.insert(field.to_string(), rewritten);
        self.inventory.save(&InventoryRecord::Device(device)).await?;
        Ok(OutcomeState::Applied)
    }

    async fn push_interface_description(
        &self,
        device_id: &str,
        interface: &str,
        description: &str,
    ) -> Result<OutcomeState, AuditError> {
        let iface_record = self
            .fetch_one(
                RecordFilter::interfaces()
                    .eq("device", device_id)
                    .eq("name", interface),
                device_id,
                "interface",
            )
            .await?;
        if let Some(iface) = iface_record.as_interface() {
            if iface.description == description {
                return Ok(OutcomeState::Skipped {
                    reason: "description already matches".to_string(),
                });
            }
        }

        let device_record = self
            .fetch_one(RecordFilter::devices().eq("id", device_id), device_id, "device")
            .await?;
        let address = device_record
            .as_device()
            .and_then(|d| d.primary_ip4_host())
            .ok_or_else(|| AuditError::MalformedRecord {
                key: device_id.to_string(),
                missing: "primary_ip4".to_string(),
            })?;

        let commands = vec![
            "enable".to_string(),
            "configure terminal".to_string(),
            format!("interface {}", interface),
            format!("description {}", description),
            "end".to_string(),
        ];
        self.drive_session(&address, &commands).await?;
        info!(
            "Pushed description for interface '{}' on device '{}'",
            interface, device_id
        );
        Ok(OutcomeState::Applied)
    }

    /// Open a session, send the sequence and release the session on every
    /// exit path, including timeouts and mid-sequence rejections.
    async fn drive_session(&self, address: &str, commands: &[String]) -> Result<(), AuditError> {
        let timeout = self.session_timeout();
        let timeout_error = || AuditError::SessionTimeout {
            seconds: self.config.session_timeout_secs,
        };

        let opened = tokio::time::timeout(
            timeout,
            self.transport.open_session(address, &self.credentials, timeout),
        )
        .await;
        let mut session = match opened {
            Ok(Ok(session)) => session,
            Ok(Err(err)) => return Err(err),
            Err(_) => return Err(timeout_error()),
        };

        let sent = match tokio::time::timeout(timeout, session.send_commands(commands)).await {
            Ok(result) => result,
            Err(_) => Err(timeout_error()),
        };
        session.close().await;
        sent
    }
}

/// Aggregate counts over a batch of outcomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub attempted: usize,
    pub applied: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl OutcomeCounts {
    pub fn tally(outcomes: &[RemediationOutcome]) -> Self {
        let mut counts = Self {
            attempted: outcomes.len(),
            ..Self::default()
        };
        for outcome in outcomes {
            match outcome.state {
                OutcomeState::Applied => counts.applied += 1,
                OutcomeState::Skipped { .. } => counts.skipped += 1,
                OutcomeState::Failed { .. } => counts.failed += 1,
            }
        }
        counts
    }
}
