//! Recovery of issuances whose client never finished step 3.
//!
//! A driver can crash, or lose its network, after the ledger transaction is
//! mined but before the linkage reaches the registry. The certificate then
//! exists on chain while its registry row stays pending. The [`Reconciler`]
//! finds those rows, matches them to `CertificateIssued` events through the
//! certificate number embedded in the published metadata, and attaches the
//! linkage. Rows that stay unmatched long enough are flagged for review.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fmt,
    sync::Arc,
};

use certledger_core::{
    AnchorData, CertError, CertResult, Certificate, CertificateId, CertificateRegistry, LedgerId,
};
use certledger_gateway::{BlockRange, IssuedEvent, LedgerGateway, MetadataStore};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::{
    sync::{Mutex, watch},
    task::JoinHandle,
};

use crate::{
    audit::{AuditAction, AuditActor, AuditEvent, AuditLogger, NoopAuditLogger},
    config::ReconcileConfig,
    requests::MetadataPayload,
};

/// Several on-chain records carry the same certificate number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateMatch {
    /// The pending certificate.
    pub certificate_id: CertificateId,
    /// Every matching ledger id, in chain order. The last one was linked.
    pub ledger_ids: Vec<LedgerId>,
}

/// Result of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationReport {
    /// Pending rows old enough to be examined.
    pub scanned: usize,
    /// Issued events read from newly scanned blocks.
    pub events_examined: usize,
    /// Events, new or retried, whose metadata could not be read or carried
    /// no number.
    pub unresolved_events: usize,
    /// Rows linked in this pass.
    pub linked: Vec<(CertificateId, LedgerId)>,
    /// Rows matched by more than one on-chain record.
    pub duplicates: Vec<DuplicateMatch>,
    /// Rows flagged for manual review in this pass. A row is flagged once.
    pub abandoned: Vec<CertificateId>,
    /// Last block covered by the event scan.
    pub scanned_to_block: Option<u64>,
}

/// Links orphaned on-chain records to their pending registry rows.
///
/// Passes are serialized and share a [`ScanState`]: the next block to scan,
/// events already matched to a pending row, events whose metadata could not
/// be read yet, and rows already flagged for review. Each block is read once.
pub struct Reconciler {
    registry: Arc<dyn CertificateRegistry>,
    ledger: Arc<dyn LedgerGateway>,
    metadata: Arc<dyn MetadataStore>,
    audit: Arc<dyn AuditLogger>,
    config: ReconcileConfig,
    state: Mutex<ScanState>,
}

#[derive(Debug, Default)]
struct ScanState {
    next_block: u64,
    candidates: HashMap<String, Vec<IssuedEvent>>,
    unresolved: Vec<IssuedEvent>,
    flagged: HashSet<CertificateId>,
}

impl fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler").field("config", &self.config).finish_non_exhaustive()
    }
}

#[bon::bon]
impl Reconciler {
    /// Creates a reconciler.
    #[builder]
    pub fn new(
        registry: Arc<dyn CertificateRegistry>,
        ledger: Arc<dyn LedgerGateway>,
        metadata: Arc<dyn MetadataStore>,
        #[builder(default)] config: ReconcileConfig,
        #[builder(default = noop_audit())] audit: Arc<dyn AuditLogger>,
    ) -> Self {
        let state = Mutex::new(ScanState { next_block: config.from_block, ..ScanState::default() });
        Self { registry, ledger, metadata, audit, config, state }
    }

    /// Runs one pass as of `now`.
    ///
    /// Blocks past the last scanned one are read in chunks of
    /// [`ReconcileConfig::scan_chunk`]. Events are kept while their row is
    /// pending, so a row still too young to link is matched on a later pass
    /// without rescanning. Each unmatched row is flagged once.
    ///
    /// # Errors
    ///
    /// Registry failures, and ledger failures while reading the block
    /// height or the event index. Chunks scanned before a failure stay
    /// scanned. Metadata fetch failures only mark the event unresolved; it
    /// is retried on the next pass.
    #[tracing::instrument(skip(self))]
    pub async fn run_once(&self, now: DateTime<Utc>) -> CertResult<ReconciliationReport> {
        let mut state = self.state.lock().await;
        let mut report = ReconciliationReport::default();

        // Rows are created before their issuance, so reading the height first
        // means every event up to `latest` belongs to a row listed below.
        let latest = self.ledger.latest_block().await?;
        let open = self
            .registry
            .list_pending(Utc::now().max(now) + chrono::Duration::seconds(1))
            .await?;
        let open_numbers: HashSet<&str> =
            open.iter().map(|c| c.certificate_number.as_str()).collect();
        let open_ids: HashSet<CertificateId> = open.iter().map(|c| c.id).collect();
        state.candidates.retain(|number, _| open_numbers.contains(number.as_str()));
        state.flagged.retain(|id| open_ids.contains(id));

        if open.is_empty() {
            state.unresolved.clear();
            state.next_block = state.next_block.max(latest.saturating_add(1));
            return Ok(report);
        }

        self.scan(&mut state, latest, &open_numbers, &mut report).await?;

        let cutoff = now - to_chrono(self.config.pending_threshold)?;
        let abandon_after = to_chrono(self.config.abandon_after)?;
        let due: Vec<&Certificate> = open.iter().filter(|c| c.created_at < cutoff).collect();
        report.scanned = due.len();

        for certificate in due {
            if let Some(mut events) = state.candidates.remove(&certificate.certificate_number) {
                events.sort_by_key(|e| (e.block_number, e.log_index));
                if let Err(err) = self.link(certificate, &events, &mut report).await {
                    state.candidates.insert(certificate.certificate_number.clone(), events);
                    return Err(err);
                }
                continue;
            }
            if certificate.is_possibly_abandoned(now, abandon_after)
                && state.flagged.insert(certificate.id)
            {
                self.flag(certificate, &mut report).await;
            }
        }

        tracing::debug!(
            scanned = report.scanned,
            linked = report.linked.len(),
            abandoned = report.abandoned.len(),
            next_block = state.next_block,
            "reconciliation pass complete"
        );
        Ok(report)
    }

    /// Runs [`run_once`](Self::run_once) every configured interval until
    /// `shutdown` turns `true` or its sender is dropped.
    ///
    /// # Panics
    ///
    /// Must be called within a Tokio runtime context.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.interval);
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            tracing::info!("reconciler shutting down");
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        if let Err(err) = self.run_once(Utc::now()).await {
                            tracing::warn!(error = %err, "reconciliation pass failed");
                        }
                    }
                }
            }
        })
    }

    /// Retries unresolved events, then reads new blocks chunk by chunk and
    /// keeps events whose metadata names an open row.
    async fn scan(
        &self,
        state: &mut ScanState,
        latest: u64,
        open_numbers: &HashSet<&str>,
        report: &mut ReconciliationReport,
    ) -> CertResult<()> {
        let mut numbers: BTreeMap<String, Option<String>> = BTreeMap::new();

        for event in std::mem::take(&mut state.unresolved) {
            self.index(state, event, open_numbers, &mut numbers, report).await;
        }

        while state.next_block <= latest {
            let from = state.next_block;
            let to = latest.min(from.saturating_add(self.config.scan_chunk.max(1) - 1));
            let mut events = self.ledger.issued_events(BlockRange { from, to }).await?;
            events.sort_by_key(|e| (e.block_number, e.log_index));
            report.events_examined += events.len();
            for event in events {
                self.index(state, event, open_numbers, &mut numbers, report).await;
            }
            state.next_block = to.saturating_add(1);
        }

        if state.next_block > self.config.from_block {
            report.scanned_to_block = Some(state.next_block - 1);
        }
        Ok(())
    }

    async fn index(
        &self,
        state: &mut ScanState,
        event: IssuedEvent,
        open_numbers: &HashSet<&str>,
        numbers: &mut BTreeMap<String, Option<String>>,
        report: &mut ReconciliationReport,
    ) {
        let number = match numbers.get(&event.content_id) {
            Some(number) => number.clone(),
            None => {
                let number = self.number_for(&event).await;
                numbers.insert(event.content_id.clone(), number.clone());
                number
            },
        };
        match number {
            None => {
                report.unresolved_events += 1;
                state.unresolved.push(event);
            },
            Some(number) if open_numbers.contains(number.as_str()) => {
                state.candidates.entry(number).or_default().push(event);
            },
            Some(_) => {},
        }
    }

    async fn number_for(&self, event: &IssuedEvent) -> Option<String> {
        match self.metadata.fetch(&event.content_id).await {
            Ok(document) => {
                let number =
                    MetadataPayload::certificate_number_of(&document).map(str::to_owned);
                if number.is_none() {
                    tracing::debug!(content_id = %event.content_id, "metadata has no certificate number");
                }
                number
            },
            Err(err) => {
                tracing::warn!(
                    ledger_id = %event.ledger_id,
                    content_id = %event.content_id,
                    error = %err,
                    "metadata for issued event could not be fetched"
                );
                None
            },
        }
    }

    async fn flag(&self, certificate: &Certificate, report: &mut ReconciliationReport) {
        tracing::warn!(
            certificate_id = %certificate.id,
            number = %certificate.certificate_number,
            created_at = %certificate.created_at,
            "pending certificate has no on-chain record; flagging for review"
        );
        self.audit
            .log(
                &AuditEvent::builder()
                    .actor(AuditActor::System("reconciler"))
                    .action(AuditAction::FlagAbandoned)
                    .certificate_id(certificate.id)
                    .build()
                    .with("number", &certificate.certificate_number),
            )
            .await;
        report.abandoned.push(certificate.id);
    }

    async fn link(
        &self,
        certificate: &Certificate,
        events: &[IssuedEvent],
        report: &mut ReconciliationReport,
    ) -> CertResult<()> {
        let Some(winner) = events.last() else {
            return Ok(());
        };
        if events.len() > 1 {
            let ledger_ids: Vec<LedgerId> = events.iter().map(|e| e.ledger_id).collect();
            tracing::warn!(
                certificate_id = %certificate.id,
                ledger_ids = ?ledger_ids,
                "several on-chain records carry this certificate number; linking the last"
            );
            report.duplicates.push(DuplicateMatch { certificate_id: certificate.id, ledger_ids });
        }

        let anchor = AnchorData {
            ledger_id: winner.ledger_id,
            transaction_hash: winner.transaction_hash.to_string(),
            content_id: winner.content_id.clone(),
            metadata_url: self.metadata.url_for(&winner.content_id),
        };
        self.registry.attach_anchor_data(certificate.id, &anchor).await?;

        tracing::info!(
            certificate_id = %certificate.id,
            ledger_id = %anchor.ledger_id,
            "linked orphaned on-chain certificate"
        );
        self.audit
            .log(
                &AuditEvent::builder()
                    .actor(AuditActor::System("reconciler"))
                    .action(AuditAction::ReconcileLink)
                    .certificate_id(certificate.id)
                    .build()
                    .with("ledger_id", anchor.ledger_id)
                    .with("tx_hash", &anchor.transaction_hash),
            )
            .await;
        report.linked.push((certificate.id, anchor.ledger_id));
        Ok(())
    }
}

fn to_chrono(duration: std::time::Duration) -> CertResult<chrono::Duration> {
    chrono::Duration::from_std(duration)
        .map_err(|e| CertError::internal_with_source("duration out of range", e))
}

fn noop_audit() -> Arc<dyn AuditLogger> {
    Arc::new(NoopAuditLogger)
}
