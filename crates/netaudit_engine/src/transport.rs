//! Remote-device transport boundary
//!
//! Remediations that touch live devices go through `DeviceTransport`,
//! which hands out scoped sessions. The transport is opaque to the core:
//! SSH or console mechanics live behind these traits. `FakeTransport`
//! scripts per-device outcomes (success, unreachable, hang, command
//! rejection) and records every open, command and close for assertions.

use async_trait::async_trait;
use netaudit_common::AuditError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Credentials for a device session. Authentication policy is the
/// caller's concern; the core only carries the values through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCredentials {
    pub username: String,
    pub password: String,
}

impl DeviceCredentials {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
        }
    }
}

/// A live session against one device.
#[async_trait]
pub trait DeviceSession: Send + std::fmt::Debug {
    /// Send a single command. A rejection fails the remaining sequence.
    async fn send_command(&mut self, command: &str) -> Result<(), AuditError>;

    /// Send a command sequence, stopping at the first failure.
    async fn send_commands(&mut self, commands: &[String]) -> Result<(), AuditError> {
        for command in commands {
            self.send_command(command).await?;
        }
        Ok(())
    }

    /// Release the session. Must be safe to call after any failure.
    async fn close(&mut self);
}

/// Opens scoped sessions to devices by management address.
#[async_trait]
pub trait DeviceTransport: Send + Sync {
    async fn open_session(
        &self,
        address: &str,
        credentials: &DeviceCredentials,
        timeout: Duration,
    ) -> Result<Box<dyn DeviceSession>, AuditError>;
}

// ============================================================================
// Fake transport (testing)
// ============================================================================

/// Scripted behavior for one device address.
#[derive(Debug, Clone)]
pub enum FakeBehavior {
    /// Every command succeeds.
    Ok,
    /// Session open fails with `TransportFailure`.
    FailOpen(String),
    /// Session open never completes; the caller's timeout fires.
    HangOpen,
    /// The named command is rejected; earlier commands succeed.
    RejectCommand { command: String, reason: String },
    /// Sending the named command never completes.
    HangCommand { command: String },
}

#[derive(Debug, Default)]
struct FakeLog {
    opens: Vec<String>,
    closes: Vec<String>,
    commands: Vec<(String, String)>,
}

/// Fake transport for deterministic tests: no sockets, scripted outcomes.
pub struct FakeTransport {
    behaviors: HashMap<String, FakeBehavior>,
    log: Arc<Mutex<FakeLog>>,
}

impl FakeTransport {
    /// A transport where every device succeeds.
    pub fn all_ok() -> Self {
        FakeTransportBuilder::new().build()
    }

    pub fn sessions_opened(&self) -> usize {
        self.log.lock().unwrap().opens.len()
    }

    pub fn sessions_closed(&self) -> usize {
        self.log.lock().unwrap().closes.len()
    }

    /// Every (address, command) pair sent, in order.
    pub fn commands_sent(&self) -> Vec<(String, String)> {
        self.log.lock().unwrap().commands.clone()
    }

    /// Commands sent to one address, in order.
    pub fn commands_for(&self, address: &str) -> Vec<String> {
        self.log
            .lock()
            .unwrap()
            .commands
            .iter()
            .filter(|(addr, _)| addr == address)
            .map(|(_, cmd)| cmd.clone())
            .collect()
    }
}

#[async_trait]
impl DeviceTransport for FakeTransport {
    async fn open_session(
        &self,
        address: &str,
        _credentials: &DeviceCredentials,
        _timeout: Duration,
    ) -> Result<Box<dyn DeviceSession>, AuditError> {
        let behavior = self
            .behaviors
            .get(address)
            .cloned()
            .unwrap_or(FakeBehavior::Ok);
        match &behavior {
            FakeBehavior::FailOpen(reason) => {
                return Err(AuditError::TransportFailure(reason.clone()));
            }
            FakeBehavior::HangOpen => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                unreachable!("hung session open should be cancelled by the caller's timeout");
            }
            _ => {}
        }
        self.log.lock().unwrap().opens.push(address.to_string());
        Ok(Box::new(FakeSession {
            address: address.to_string(),
            behavior,
            log: Arc::clone(&self.log),
        }))
    }
}

#[derive(Debug)]
struct FakeSession {
    address: String,
    behavior: FakeBehavior,
    log: Arc<Mutex<FakeLog>>,
}

#[async_trait]
impl DeviceSession for FakeSession {
    async fn send_command(&mut self, command: &str) -> Result<(), AuditError> {
        match &self.behavior {
            FakeBehavior::RejectCommand { command: bad, reason } if command == bad => {
                return Err(AuditError::CommandRejected {
                    command: command.to_string(),
                    reason: reason.clone(),
                });
            }
            FakeBehavior::HangCommand { command: slow } if command == slow => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            _ => {}
        }
        self.log
            .lock()
            .unwrap()
            .commands
            .push((self.address.clone(), command.to_string()));
        Ok(())
    }

    async fn close(&mut self) {
        self.log.lock().unwrap().closes.push(self.address.clone());
    }
}

/// Builder for `FakeTransport` with per-device scripts.
#[derive(Default)]
pub struct FakeTransportBuilder {
    behaviors: HashMap<String, FakeBehavior>,
}

impl FakeTransportBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn device(mut self, address: &str, behavior: FakeBehavior) -> Self {
        self.behaviors.insert(address.to_string(), behavior);
        self
    }

    pub fn unreachable(self, address: &str, reason: &str) -> Self {
        let behavior = FakeBehavior::FailOpen(reason.to_string());
        self.device(address, behavior)
    }

    pub fn hang_on_open(self, address: &str) -> Self {
        self.device(address, FakeBehavior::HangOpen)
    }

    pub fn reject_command(self, address: &str, command: &str, reason: &str) -> Self {
        self.device(
            address,
            FakeBehavior::RejectCommand {
                command: command.to_string(),
                reason: reason.to_string(),
            },
        )
    }

    pub fn build(self) -> FakeTransport {
        FakeTransport {
            behaviors: self.behaviors,
            log: Arc::new(Mutex::new(FakeLog::default())),
        }
    }
}
