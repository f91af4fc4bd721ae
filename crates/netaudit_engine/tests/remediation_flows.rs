//! Remediation flows driven through fakes.
//!
//! Batch isolation, timeout handling, idempotence and the remediation
//! jobs end-to-end. The fake transport scripts per-device outcomes; the
//! in-memory inventory counts saves.

use netaudit_common::{
    AuditConfig, Device, Interface, InventoryRecord, RemediationConfig,
};
use netaudit_engine::inventory::MemoryInventory;
use netaudit_engine::jobs;
use netaudit_engine::report::{MemorySink, ReportSink};
use netaudit_engine::transport::FakeTransportBuilder;
use netaudit_engine::{
    AuditPipeline, Change, DeviceCredentials, FakeTransport, OutcomeCounts, OutcomeState,
    RemediationExecutor, RemediationTask,
};
use netaudit_common::AuditError;
use std::collections::HashMap;
use std::sync::Arc;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

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

fn interface(id: &str, device: &str, name: &str, description: &str) -> InventoryRecord {
    InventoryRecord::Interface(Interface {
        id: id.to_string(),
        device: device.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        enabled: true,
        lag: None,
        cable: None,
        connected_endpoint: None,
        ip_addresses: Vec::new(),
    })
}

fn executor_over(
    inventory: Arc<MemoryInventory>,
    transport: Arc<FakeTransport>,
) -> RemediationExecutor {
    RemediationExecutor::new(
        inventory,
        transport,
        DeviceCredentials::new("audit", "secret"),
        RemediationConfig {
            session_timeout_secs: 1,
            max_concurrency: 4,
        },
    )
}

fn push_task(device_id: &str) -> RemediationTask {
    RemediationTask::new(Change::PushInterfaceDescription {
        device_id: device_id.to_string(),
        interface: "Ethernet1".to_string(),
        description: "uplink".to_string(),
    })
}

// ============================================================================
// Batch behavior
// ============================================================================

/// One device times out mid-batch: its siblings still apply, and the
/// summary counts every target.
#[tokio::test]
async fn test_batch_timeout_does_not_abort_siblings() {
    init_tracing();
    let inventory = Arc::new(MemoryInventory::with_records(vec![
        device("sw1", Some("10.0.0.1")),
        device("sw2", Some("10.0.0.2")),
        device("sw3", Some("10.0.0.3")),
        interface("eth1", "sw1", "Ethernet1", "old"),
        interface("eth2", "sw2", "Ethernet1", "old"),
        interface("eth3", "sw3", "Ethernet1", "old"),
    ]));
    let transport = Arc::new(FakeTransportBuilder::new().hang_on_open("10.0.0.2").build());
    let executor = executor_over(inventory, Arc::clone(&transport));

    let tasks = vec![push_task("sw1"), push_task("sw2"), push_task("sw3")];
    let outcomes = executor.apply_all(&tasks).await;

    assert_eq!(outcomes.len(), 3);
    assert_eq!(outcomes[0].state, OutcomeState::Applied);
    assert_eq!(
        outcomes[1].state,
        OutcomeState::Failed {
            error: AuditError::SessionTimeout { seconds: 1 }
        }
    );
    assert_eq!(outcomes[2].state, OutcomeState::Applied);

    let counts = OutcomeCounts::tally(&outcomes);
    assert_eq!(counts.attempted, 3);
    assert_eq!(counts.applied, 2);
    assert_eq!(counts.failed, 1);

    // Both successful sessions were released.
    assert_eq!(transport.sessions_opened(), 2);
    assert_eq!(transport.sessions_closed(), 2);
}

/// Concurrent application keeps outcomes in task order.
#[tokio::test]
async fn test_concurrent_batch_keeps_task_order() {
    init_tracing();
    let inventory = Arc::new(MemoryInventory::with_records(vec![
        device("sw1", Some("10.0.0.1")),
        device("sw2", Some("10.0.0.2")),
        device("sw3", Some("10.0.0.3")),
        interface("eth1", "sw1", "Ethernet1", "old"),
        interface("eth2", "sw2", "Ethernet1", "old"),
        interface("eth3", "sw3", "Ethernet1", "old"),
    ]));
    let transport = Arc::new(FakeTransportBuilder::new().hang_on_open("10.0.0.2").build());
    let executor = executor_over(inventory, transport);

    let tasks = vec![push_task("sw1"), push_task("sw2"), push_task("sw3")];
    let expected: Vec<_> = tasks.iter().map(|t| t.id).collect();
    let outcomes = executor.apply_all_concurrent(tasks).await;

    let got: Vec<_> = outcomes.iter().map(|o| o.task_id).collect();
    assert_eq!(got, expected);
    assert!(outcomes[1].is_failed());
}

// ============================================================================
// Jobs end-to-end
// ============================================================================

fn pipeline_with_executor(
    inventory: Arc<MemoryInventory>,
    transport: Arc<FakeTransport>,
) -> AuditPipeline {
    let executor = executor_over(Arc::clone(&inventory), transport);
    AuditPipeline::new(
        inventory,
        Arc::new(MemorySink::new()) as Arc<dyn ReportSink>,
        AuditConfig::default(),
    )
    .with_executor(executor)
}

/// Updating two interfaces where one already matches: one applied, one
/// skipped, a single save.
#[tokio::test]
async fn test_update_interface_descriptions_is_idempotent() {
    let inventory = Arc::new(MemoryInventory::with_records(vec![
        interface("eth1", "sw1", "Ethernet1", "old"),
        interface("eth2", "sw1", "Ethernet2", "uplink"),
    ]));
    let pipeline = pipeline_with_executor(Arc::clone(&inventory), Arc::new(FakeTransport::all_ok()));

    let ids = vec!["eth1".to_string(), "eth2".to_string()];
    let output = jobs::update_interface_descriptions(&pipeline, &ids, "uplink").await;

    // Only the mismatched interface produced a task.
    assert_eq!(output.summary.tasks.attempted, 1);
    assert_eq!(output.summary.tasks.applied, 1);
    assert_eq!(inventory.save_count(), 1);
    assert_eq!(
        inventory.get("eth1").unwrap().field("description").as_deref(),
        Some("uplink")
    );

    // Second run: everything matches, nothing is planned or saved.
    let output = jobs::update_interface_descriptions(&pipeline, &ids, "uplink").await;
    assert_eq!(output.summary.tasks.attempted, 0);
    assert_eq!(inventory.save_count(), 1);
}

/// Pushing a description drives the fixed command sequence against the
/// device's management address.
#[tokio::test]
async fn test_push_interface_description_job() {
    let inventory = Arc::new(MemoryInventory::with_records(vec![
        device("sw1", Some("10.0.0.1/24")),
        interface("eth1", "sw1", "Ethernet1", "old"),
    ]));
    let transport = Arc::new(FakeTransport::all_ok());
    let pipeline = pipeline_with_executor(Arc::clone(&inventory), Arc::clone(&transport));

    let output =
        jobs::push_interface_description(&pipeline, "sw1", "Ethernet1", "uplink to spine1").await;

    assert_eq!(output.summary.tasks.applied, 1);
    assert_eq!(
        transport.commands_for("10.0.0.1"),
        vec![
            "enable",
            "configure terminal",
            "interface Ethernet1",
            "description uplink to spine1",
            "end",
        ]
    );
    assert_eq!(transport.sessions_closed(), 1);
}

/// A serial update applies once, then skips.
#[tokio::test]
async fn test_update_device_serial_job() {
    let inventory = Arc::new(MemoryInventory::with_records(vec![device("sw1", None)]));
    let pipeline = pipeline_with_executor(Arc::clone(&inventory), Arc::new(FakeTransport::all_ok()));

    let output = jobs::update_device_serial(&pipeline, "sw1", "FDO1234").await;
    assert_eq!(output.summary.tasks.applied, 1);
    assert_eq!(
        inventory.get("sw1").unwrap().field("serial").as_deref(),
        Some("FDO1234")
    );

    let output = jobs::update_device_serial(&pipeline, "sw1", "FDO1234").await;
    assert_eq!(output.summary.tasks.attempted, 1);
    assert_eq!(output.summary.tasks.skipped, 1);
    assert_eq!(inventory.save_count(), 1);
}

/// Management-address substitution rewrites the custom field on devices
/// that have a primary address and flags the ones that do not.
#[tokio::test]
async fn test_replace_mgmt_address_job() {
    let mut with_snippet = device("sw1", Some("10.0.0.1/24"));
    if let InventoryRecord::Device(d) = &mut with_snippet {
        d.custom_fields.insert(
            "config_snippet".to_string(),
            "logging host 192.0.2.9".to_string(),
        );
    }
    let mut no_mgmt = device("sw2", None);
    if let InventoryRecord::Device(d) = &mut no_mgmt {
        d.custom_fields.insert(
            "config_snippet".to_string(),
            "logging host 192.0.2.9".to_string(),
        );
    }
    let inventory = Arc::new(MemoryInventory::with_records(vec![with_snippet, no_mgmt]));
    let pipeline = pipeline_with_executor(Arc::clone(&inventory), Arc::new(FakeTransport::all_ok()));

    let output = jobs::replace_mgmt_address(&pipeline, "fra1", "192.0.2.9").await;

    // sw2 has no management address: flagged, not remediated.
    assert_eq!(output.summary.noncompliant, 1);
    assert_eq!(output.summary.tasks.attempted, 1);
    assert_eq!(output.summary.tasks.applied, 1);

    let stored = inventory.get("sw1").unwrap();
    assert_eq!(
        stored
            .as_device()
            .unwrap()
            .custom_fields
            .get("config_snippet")
            .unwrap(),
        "logging host 10.0.0.1"
    );
}

/// Cancelling mid-batch stops new dispatches and still reports every
/// target in the summary.
#[tokio::test]
async fn test_cancelled_batch_reports_all_targets() {
    let inventory = Arc::new(MemoryInventory::with_records(vec![
        device("sw1", None),
        device("sw2", None),
    ]));
    let executor = executor_over(Arc::clone(&inventory), Arc::new(FakeTransport::all_ok()));
    executor.cancel();

    let tasks = vec![
        RemediationTask::new(Change::SetDeviceSerial {
            device_id: "sw1".to_string(),
            serial: "A".to_string(),
        }),
        RemediationTask::new(Change::SetDeviceSerial {
            device_id: "sw2".to_string(),
            serial: "B".to_string(),
        }),
    ];
    let outcomes = executor.apply_all(&tasks).await;

    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|o| o.is_skipped()));
    assert_eq!(inventory.save_count(), 0);
}
