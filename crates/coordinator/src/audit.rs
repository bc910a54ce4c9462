//! Business audit trail for certificate lifecycle transitions.
//!
//! Verification attempts are recorded in the registry itself. Everything
//! else the coordinator, driver and reconciler do (issuance, linkage,
//! revocation, reconciliation) is reported through an [`AuditLogger`]:
//!
//! - [`TracingAuditLogger`]: structured `tracing` events at INFO with
//!   `audit.*` fields.
//! - [`NoopAuditLogger`]: discards events.
//! - [`MemoryAuditLogger`]: keeps events for assertions in tests.

use std::{collections::BTreeMap, fmt, sync::Arc};

use async_trait::async_trait;
use certledger_core::{ActorId, CertificateId};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Audited lifecycle action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuditAction {
    /// A pending row was created.
    Issue,
    /// Anchor data was attached.
    AttachAnchor,
    /// Anchor data was overwritten with different values.
    OverwriteAnchor,
    /// A certificate was revoked in the registry.
    Revoke,
    /// A certificate was revoked on the ledger.
    LedgerRevoke,
    /// The reconciler linked an orphaned on-chain record.
    ReconcileLink,
    /// The reconciler flagged a pending row for manual review.
    FlagAbandoned,
    /// An on-chain record exists that could not be linked.
    OrphanedRecord,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Issue => write!(f, "issue"),
            Self::AttachAnchor => write!(f, "attach_anchor"),
            Self::OverwriteAnchor => write!(f, "overwrite_anchor"),
            Self::Revoke => write!(f, "revoke"),
            Self::LedgerRevoke => write!(f, "ledger_revoke"),
            Self::ReconcileLink => write!(f, "reconcile_link"),
            Self::FlagAbandoned => write!(f, "flag_abandoned"),
            Self::OrphanedRecord => write!(f, "orphaned_record"),
        }
    }
}

/// Outcome of an audited operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditResult {
    /// Completed.
    Success,
    /// Failed with the given reason.
    Failure(String),
}

impl fmt::Display for AuditResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure(reason) => write!(f, "failure: {reason}"),
        }
    }
}

/// Who caused an audited action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditActor {
    /// A registry actor.
    Actor(ActorId),
    /// A background component such as the reconciler.
    System(&'static str),
}

impl fmt::Display for AuditActor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Actor(id) => write!(f, "actor:{id}"),
            Self::System(name) => write!(f, "system:{name}"),
        }
    }
}

/// A lifecycle audit event.
#[derive(Debug, Clone, bon::Builder)]
pub struct AuditEvent {
    /// When the event occurred.
    #[builder(default = Utc::now())]
    pub timestamp: DateTime<Utc>,
    /// Who caused it.
    pub actor: AuditActor,
    /// What happened.
    pub action: AuditAction,
    /// Affected certificate, when one is known.
    pub certificate_id: Option<CertificateId>,
    /// Outcome.
    #[builder(default = AuditResult::Success)]
    pub result: AuditResult,
    /// Extra context such as a reason or a transaction hash.
    #[builder(default)]
    pub metadata: BTreeMap<String, String>,
}

impl AuditEvent {
    /// Adds a metadata entry.
    #[must_use]
    pub fn with(mut self, key: &str, value: impl fmt::Display) -> Self {
        self.metadata.insert(key.to_owned(), value.to_string());
        self
    }
}

/// Audit sink.
#[async_trait]
pub trait AuditLogger: Send + Sync {
    /// Records an event. Delivery failures are the sink's to report.
    async fn log(&self, event: &AuditEvent);
}

#[async_trait]
impl<L: AuditLogger + ?Sized> AuditLogger for Arc<L> {
    async fn log(&self, event: &AuditEvent) {
        (**self).log(event).await;
    }
}

/// Emits events as INFO `tracing` events with `audit.*` fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditLogger;

#[async_trait]
impl AuditLogger for TracingAuditLogger {
    async fn log(&self, event: &AuditEvent) {
        let metadata =
            event.metadata.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join(", ");
        let certificate = event.certificate_id.map(|id| id.to_string()).unwrap_or_default();

        tracing::info!(
            audit.timestamp = %event.timestamp.to_rfc3339(),
            audit.actor = %event.actor,
            audit.action = %event.action,
            audit.certificate_id = %certificate,
            audit.result = %event.result,
            audit.metadata = %metadata,
            "audit_event"
        );
    }
}

/// Discards events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAuditLogger;

#[async_trait]
impl AuditLogger for NoopAuditLogger {
    async fn log(&self, _event: &AuditEvent) {}
}

/// Keeps events in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryAuditLogger {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl MemoryAuditLogger {
    /// Creates an empty logger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded events, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    /// Recorded events with the given action.
    #[must_use]
    pub fn with_action(&self, action: AuditAction) -> Vec<AuditEvent> {
        self.events.lock().iter().filter(|e| e.action == action).cloned().collect()
    }
}

#[async_trait]
impl AuditLogger for MemoryAuditLogger {
    async fn log(&self, event: &AuditEvent) {
        self.events.lock().push(event.clone());
    }
}
