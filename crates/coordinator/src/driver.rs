//! Client-side issuance driver.
//!
//! Issuance step 2 runs on the issuer's side: publish the metadata, send the
//! ledger transaction, wait for it, extract the chain-assigned id and hand
//! the linkage back to the coordinator. [`IssuanceDriver`] performs those
//! steps in order and reports exactly where it stopped.
//!
//! ```text
//! publish ─► role check ─► submit ─► receipt ─► extract ─► attach
//! (retried)                (once)   (timeout)  (2 ways)   (retried)
//! ```
//!
//! Only the publish and the attach are retried. A resent transaction could
//! issue the certificate twice on chain.

use std::{fmt, sync::Arc};

use certledger_core::{CertError, CertResult, Certificate, CertificateId, Dependency, ErrorKind};
use certledger_gateway::{
    Address, B256, IssuanceCall, LedgerGateway, MetadataStore, PublishedMetadata, Role, TxHandle,
    TxReceipt, extract_issued_id, with_retry,
};
use fail::fail_point;

use crate::{
    LifecycleCoordinator,
    audit::{AuditAction, AuditActor, AuditEvent, AuditLogger, AuditResult, NoopAuditLogger},
    config::DriverConfig,
    requests::{AttachRequest, IssuanceTicket, IssueCertificateRequest},
};

/// Where a driver run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IssuanceStage {
    /// Issuance step 1 (pending row creation).
    Issue,
    /// Metadata publish.
    Publish,
    /// Signer role check.
    RoleCheck,
    /// Transaction submission.
    Submit,
    /// Receipt wait.
    Receipt,
    /// Ledger id extraction.
    Extract,
    /// Linkage attach.
    Attach,
}

impl fmt::Display for IssuanceStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Issue => "issue",
            Self::Publish => "publish",
            Self::RoleCheck => "role_check",
            Self::Submit => "submit",
            Self::Receipt => "receipt",
            Self::Extract => "extract",
            Self::Attach => "attach",
        };
        f.write_str(name)
    }
}

/// A failed driver run.
#[derive(Debug, thiserror::Error)]
#[error("issuance stopped at {stage}: {source}")]
pub struct DriverError {
    /// Stage that failed.
    pub stage: IssuanceStage,
    /// Pending certificate, absent if step 1 failed.
    pub certificate_id: Option<CertificateId>,
    /// Issuance transaction, once one was accepted by the node.
    pub tx_hash: Option<B256>,
    /// Underlying error.
    #[source]
    pub source: CertError,
    reverted: bool,
}

impl DriverError {
    fn new(stage: IssuanceStage, certificate_id: Option<CertificateId>, source: CertError) -> Self {
        Self { stage, certificate_id, tx_hash: None, source, reverted: false }
    }

    fn with_tx(mut self, tx_hash: B256) -> Self {
        self.tx_hash = Some(tx_hash);
        self
    }

    fn reverted(mut self) -> Self {
        self.reverted = true;
        self
    }

    /// Returns `true` if the issuance transaction was mined and reverted.
    #[must_use]
    pub fn is_revert(&self) -> bool {
        self.reverted
    }

    /// Returns `true` if a certificate may exist on chain without being
    /// linked in the registry.
    ///
    /// Failures before submission leave nothing on chain. A transient
    /// submission failure may have lost the response of an accepted
    /// transaction. After submission only a reverted receipt proves that
    /// nothing was written.
    #[must_use]
    pub fn ledger_write_may_exist(&self) -> bool {
        match self.stage {
            IssuanceStage::Issue | IssuanceStage::Publish | IssuanceStage::RoleCheck => false,
            IssuanceStage::Submit => self.source.is_transient(),
            IssuanceStage::Receipt => !self.reverted,
            IssuanceStage::Extract | IssuanceStage::Attach => true,
        }
    }

    /// Returns the underlying error's kind.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.source.kind()
    }
}

/// Drives issuance steps 2 and 3 for a ticket.
pub struct IssuanceDriver {
    coordinator: Arc<LifecycleCoordinator>,
    ledger: Arc<dyn LedgerGateway>,
    metadata: Arc<dyn MetadataStore>,
    audit: Arc<dyn AuditLogger>,
    config: DriverConfig,
}

impl fmt::Debug for IssuanceDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuanceDriver").field("config", &self.config).finish_non_exhaustive()
    }
}

#[bon::bon]
impl IssuanceDriver {
    /// Creates a driver.
    #[builder]
    pub fn new(
        coordinator: Arc<LifecycleCoordinator>,
        ledger: Arc<dyn LedgerGateway>,
        metadata: Arc<dyn MetadataStore>,
        #[builder(default)] config: DriverConfig,
        #[builder(default = noop_audit())] audit: Arc<dyn AuditLogger>,
    ) -> Self {
        Self { coordinator, ledger, metadata, audit, config }
    }

    /// Runs all three issuance steps for a request.
    ///
    /// # Errors
    ///
    /// [`DriverError`] naming the stage that failed.
    #[tracing::instrument(skip(self, request), fields(student_id = %request.student_id))]
    pub async fn issue(&self, request: &IssueCertificateRequest) -> Result<Certificate, DriverError> {
        let ticket = self
            .coordinator
            .issue_certificate(request)
            .await
            .map_err(|e| DriverError::new(IssuanceStage::Issue, None, e))?;
        self.anchor(&ticket).await
    }

    /// Publishes, submits and links the certificate described by `ticket`.
    ///
    /// # Errors
    ///
    /// [`DriverError`] naming the stage that failed. Check
    /// [`DriverError::ledger_write_may_exist`] before resubmitting.
    #[tracing::instrument(
        skip(self, ticket),
        fields(certificate_id = %ticket.certificate_id, number = %ticket.certificate_number)
    )]
    pub async fn anchor(&self, ticket: &IssuanceTicket) -> Result<Certificate, DriverError> {
        let id = Some(ticket.certificate_id);

        let published = self.publish(ticket).await.map_err(failed(IssuanceStage::Publish, id))?;
        tracing::debug!(content_id = %published.content_id, "metadata published");

        self.check_role().await.map_err(failed(IssuanceStage::RoleCheck, id))?;

        let call = self.issuance_call(ticket, &published);
        let tx =
            self.ledger.submit_issuance(&call).await.map_err(failed(IssuanceStage::Submit, id))?;
        tracing::debug!(tx_hash = %tx.hash, "issuance submitted");

        fail_point!("driver-after-submit", |_| {
            Err(DriverError::new(
                IssuanceStage::Receipt,
                id,
                CertError::internal("injected crash after submission"),
            )
            .with_tx(tx.hash))
        });

        let receipt = self
            .await_receipt(tx)
            .await
            .map_err(|e| DriverError::new(IssuanceStage::Receipt, id, e).with_tx(tx.hash))?;
        if !receipt.success {
            let source = CertError::external(
                Dependency::Ledger,
                format!("issuance transaction {} reverted", tx.hash),
            );
            return Err(DriverError::new(IssuanceStage::Receipt, id, source).with_tx(tx.hash).reverted());
        }

        let ledger_id = match extract_issued_id(self.ledger.as_ref(), &receipt).await {
            Ok(ledger_id) => ledger_id,
            Err(err) => {
                let err = DriverError::new(IssuanceStage::Extract, id, err).with_tx(tx.hash);
                self.report_orphan(&err).await;
                return Err(err);
            },
        };

        let request = AttachRequest {
            certificate_id: ticket.certificate_id,
            ledger_id,
            transaction_hash: tx.hash.to_string(),
            content_id: published.content_id,
            metadata_url: published.url,
        };
        let attached = with_retry(&self.config.attach_retry, "attach_anchor_data", || {
            self.coordinator.attach_anchor_data(&request)
        })
        .await;

        match attached {
            Ok(certificate) => {
                tracing::debug!(ledger_id = %ledger_id, "issuance anchored");
                Ok(certificate)
            },
            Err(err) => {
                let err = DriverError::new(IssuanceStage::Attach, id, err).with_tx(tx.hash);
                self.report_orphan(&err).await;
                Err(err)
            },
        }
    }

    async fn publish(&self, ticket: &IssuanceTicket) -> CertResult<PublishedMetadata> {
        let document = ticket.metadata.to_json()?;
        let metadata = &self.metadata;
        let document = &document;
        with_retry(&self.config.publish_retry, "metadata_publish", move || metadata.publish(document))
            .await
    }

    async fn check_role(&self) -> CertResult<()> {
        let signer = self.ledger.signer();
        if self.ledger.has_role(signer, Role::Issuer).await? {
            Ok(())
        } else {
            Err(CertError::invalid_state(format!("signer {signer} does not hold the issuer role")))
        }
    }

    /// The student's wallet when it parses, the signer otherwise.
    fn recipient(&self, ticket: &IssuanceTicket) -> Address {
        ticket
            .student_wallet
            .as_deref()
            .and_then(|wallet| wallet.trim().parse::<Address>().ok())
            .unwrap_or_else(|| self.ledger.signer())
    }

    fn issuance_call(&self, ticket: &IssuanceTicket, published: &PublishedMetadata) -> IssuanceCall {
        let metadata = &ticket.metadata;
        IssuanceCall::builder()
            .recipient(self.recipient(ticket))
            .student_id(metadata.student_id.to_string())
            .student_name(metadata.student_name.as_str())
            .certificate_type(metadata.certificate_type.as_str())
            .course_name(metadata.course_name.as_str())
            .grade(metadata.grade.as_str())
            .content_id(published.content_id.as_str())
            .build()
    }

    async fn await_receipt(&self, tx: TxHandle) -> CertResult<TxReceipt> {
        let wait = &self.config.ledger;
        tokio::time::timeout(wait.receipt_timeout, self.ledger.await_receipt(tx, wait.confirmations))
            .await
            .map_err(|_| CertError::timeout("issuance receipt", wait.receipt_timeout))?
    }

    async fn report_orphan(&self, err: &DriverError) {
        tracing::error!(
            certificate_id = ?err.certificate_id,
            tx_hash = ?err.tx_hash,
            stage = %err.stage,
            error = %err.source,
            "on-chain certificate exists but is not linked in the registry"
        );
        let mut event = AuditEvent::builder()
            .actor(AuditActor::System("issuance_driver"))
            .action(AuditAction::OrphanedRecord)
            .maybe_certificate_id(err.certificate_id)
            .result(AuditResult::Failure(err.source.to_string()))
            .build()
            .with("stage", err.stage);
        if let Some(tx_hash) = err.tx_hash {
            event = event.with("tx_hash", tx_hash);
        }
        self.audit.log(&event).await;
    }
}

fn failed(
    stage: IssuanceStage,
    certificate_id: Option<CertificateId>,
) -> impl FnOnce(CertError) -> DriverError {
    move |source| DriverError::new(stage, certificate_id, source)
}

fn noop_audit() -> Arc<dyn AuditLogger> {
    Arc::new(NoopAuditLogger)
}
