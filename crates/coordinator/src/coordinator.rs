//! The lifecycle coordinator: the server-side operation surface.
//!
//! The coordinator holds handles only. Every decision it makes is derived
//! from the registry row it just read, and the registry's unique number
//! constraint and conditional revocation are the only serialization points.

use std::sync::Arc;

use certledger_core::{
    Actor, ActorId, AnchorData, CertError, CertResult, Certificate, CertificateDraft,
    CertificateFilter, CertificateId, CertificateRegistry, CertificateType, CertificateView,
    ConfigError, Dependency, Entity, ErrorKind, NetworkConfig, NewVerification, Revocation,
    VerificationMethod, Verifier,
};
use certledger_gateway::LedgerGateway;
use chrono::{DateTime, Utc};

use crate::{
    audit::{AuditAction, AuditActor, AuditEvent, AuditLogger, NoopAuditLogger},
    config::{CoordinatorConfig, NetworkSelection, RevocationPolicy},
    number::{NumberSource, RandomNumberSource},
    requests::{
        AttachRequest, IssuanceTicket, IssueCertificateRequest, LedgerCheck, MetadataPayload,
        NetworkBinding, PublicCertificate, RevokeRequest, VerificationOutcome,
    },
};

/// Coordinates certificate issuance, linkage, verification and revocation
/// across the registry and, for ledger-first revocation, the ledger.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
///
/// use certledger_coordinator::{CoordinatorConfig, LifecycleCoordinator};
/// use certledger_core::MemoryRegistry;
///
/// let coordinator = LifecycleCoordinator::builder()
///     .registry(Arc::new(MemoryRegistry::new()))
///     .config(CoordinatorConfig::from_env().expect("valid environment"))
///     .build()
///     .expect("valid coordinator");
/// ```
pub struct LifecycleCoordinator {
    registry: Arc<dyn CertificateRegistry>,
    numbers: Arc<dyn NumberSource>,
    ledger: Option<Arc<dyn LedgerGateway>>,
    audit: Arc<dyn AuditLogger>,
    config: CoordinatorConfig,
}

impl std::fmt::Debug for LifecycleCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleCoordinator")
            .field("config", &self.config)
            .field("has_ledger", &self.ledger.is_some())
            .finish_non_exhaustive()
    }
}

#[bon::bon]
impl LifecycleCoordinator {
    /// Creates a coordinator.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] if the revocation policy is
    /// [`RevocationPolicy::LedgerFirst`] and no ledger gateway is given.
    #[builder]
    pub fn new(
        registry: Arc<dyn CertificateRegistry>,
        #[builder(default)] config: CoordinatorConfig,
        ledger: Option<Arc<dyn LedgerGateway>>,
        #[builder(default = default_numbers())] numbers: Arc<dyn NumberSource>,
        #[builder(default = default_audit())] audit: Arc<dyn AuditLogger>,
    ) -> Result<Self, ConfigError> {
        if config.revocation_policy == RevocationPolicy::LedgerFirst && ledger.is_none() {
            return Err(ConfigError::Missing { field: "ledger" });
        }
        Ok(Self { registry, numbers, ledger, audit, config })
    }

    /// The configuration in use.
    #[must_use]
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Issuance step 1: validates the request, resolves the referenced rows
    /// and the network, and persists a pending certificate.
    ///
    /// # Errors
    ///
    /// - [`CertError::InvalidInput`] for an empty course or grade
    /// - [`CertError::NotFound`] for an unknown student, issuer or an
    ///   unknown or inactive certificate type
    /// - [`CertError::ConfigurationMissing`] if the selected network has no
    ///   active configuration
    /// - [`CertError::ExternalDependency`] (registry) if every generated
    ///   number collided
    #[tracing::instrument(
        skip(self, request),
        fields(student_id = %request.student_id, issuer_id = %request.issuer_id)
    )]
    pub async fn issue_certificate(
        &self,
        request: &IssueCertificateRequest,
    ) -> CertResult<IssuanceTicket> {
        request.validate()?;

        let student = self.require_actor(request.student_id, Entity::Student).await?;
        let issuer = self.require_actor(request.issuer_id, Entity::Issuer).await?;
        let certificate_type = self
            .registry
            .find_type(request.certificate_type_id)
            .await?
            .filter(|ty| ty.active)
            .ok_or_else(|| CertError::not_found(Entity::CertificateType, request.certificate_type_id))?;
        let network = self.resolve_network().await?;

        let (certificate_id, number, issue_date) =
            self.create_pending_row(request, &network).await?;

        tracing::debug!(certificate_id = %certificate_id, number = %number, "pending certificate created");
        self.audit
            .log(
                &AuditEvent::builder()
                    .actor(AuditActor::Actor(issuer.id))
                    .action(AuditAction::Issue)
                    .certificate_id(certificate_id)
                    .build()
                    .with("number", &number)
                    .with("network", &network.network_name),
            )
            .await;

        let metadata = MetadataPayload {
            certificate_number: number.clone(),
            student_id: student.id,
            student_name: student.name,
            student_email: student.email,
            certificate_type_id: certificate_type.id,
            certificate_type: certificate_type.name,
            course_name: request.course_name.trim().to_owned(),
            grade: request.grade.trim().to_owned(),
            issue_date,
            issuer_id: issuer.id,
            issuer_name: issuer.name,
            description: request.description.clone().unwrap_or_default(),
            network: network.network_name.clone(),
            contract_address: network.contract_address.clone(),
        };

        Ok(IssuanceTicket {
            certificate_id,
            certificate_number: number,
            metadata,
            network: NetworkBinding::from(&network),
            student_wallet: student.wallet_address,
        })
    }

    /// Issuance step 3: records the ledger and metadata linkage.
    ///
    /// Re-attaching identical data is a no-op. Different data overwrites the
    /// linkage and is logged at `warn`. Revoked certificates stay revoked.
    ///
    /// # Errors
    ///
    /// - [`CertError::InvalidInput`] if any of the four fields is missing
    /// - [`CertError::NotFound`] if the certificate does not exist
    #[tracing::instrument(
        skip(self, request),
        fields(certificate_id = %request.certificate_id, ledger_id = %request.ledger_id)
    )]
    pub async fn attach_anchor_data(&self, request: &AttachRequest) -> CertResult<Certificate> {
        request.validate()?;
        let anchor = request.anchor();
        let current = self.require_certificate(request.certificate_id).await?.certificate;

        match current.anchor() {
            Some(existing) if existing == anchor => {
                tracing::debug!("identical anchor data already recorded");
                return Ok(current);
            },
            Some(existing) => {
                tracing::warn!(
                    previous_ledger_id = %existing.ledger_id,
                    previous_tx = %existing.transaction_hash,
                    new_tx = %anchor.transaction_hash,
                    "overwriting anchor data with different values"
                );
                self.audit_anchor(AuditAction::OverwriteAnchor, current.id, &anchor).await;
            },
            None => {},
        }

        let updated = self.registry.attach_anchor_data(current.id, &anchor).await?;
        self.audit_anchor(AuditAction::AttachAnchor, updated.id, &anchor).await;
        Ok(updated)
    }

    /// Public verification by certificate number.
    ///
    /// Exactly one verification record is appended per call, hit or miss.
    ///
    /// # Errors
    ///
    /// [`CertError::NotFound`] if no certificate has this number.
    #[tracing::instrument(skip(self, verifier), fields(verifier = %verifier))]
    pub async fn verify_certificate(
        &self,
        number: &str,
        verifier: &Verifier,
    ) -> CertResult<VerificationOutcome> {
        let view = self.lookup_and_record(number, verifier, VerificationMethod::CertificateNumber).await?;
        Ok(outcome(&view, None))
    }

    /// Verification that also reads the ledger record of an anchored
    /// certificate.
    ///
    /// The registry result is authoritative. Ledger failures and
    /// divergences are reported in [`VerificationOutcome::ledger`], never
    /// as errors.
    ///
    /// # Errors
    ///
    /// [`CertError::NotFound`] if no certificate has this number.
    #[tracing::instrument(skip(self, verifier), fields(verifier = %verifier))]
    pub async fn verify_with_ledger(
        &self,
        number: &str,
        verifier: &Verifier,
    ) -> CertResult<VerificationOutcome> {
        let view = self.lookup_and_record(number, verifier, VerificationMethod::LedgerCrossCheck).await?;
        let check = self.ledger_check(&view.certificate).await;
        Ok(outcome(&view, Some(check)))
    }

    /// Revokes a certificate under the configured [`RevocationPolicy`].
    ///
    /// # Errors
    ///
    /// - [`CertError::InvalidInput`] for a blank reason
    /// - [`CertError::NotFound`] if the certificate does not exist
    /// - [`CertError::InvalidState`] if it is already revoked; nothing is written
    /// - ledger errors and [`CertError::Timeout`] under
    ///   [`RevocationPolicy::LedgerFirst`], in which case the registry is untouched
    #[tracing::instrument(
        skip(self, request),
        fields(certificate_id = %request.certificate_id, revoked_by = %request.revoked_by)
    )]
    pub async fn revoke_certificate(&self, request: &RevokeRequest) -> CertResult<Certificate> {
        request.validate()?;
        let reason = request.reason.trim().to_owned();
        let current = self.require_certificate(request.certificate_id).await?.certificate;
        if current.is_revoked {
            return Err(already_revoked(current.id));
        }

        if self.config.revocation_policy == RevocationPolicy::LedgerFirst
            && let Some(anchor) = current.anchor()
        {
            self.revoke_on_ledger(&current, &anchor, &reason, request).await?;
        }

        let revocation =
            Revocation { revoked_by: request.revoked_by, reason: reason.clone(), revoked_at: Utc::now() };
        let revoked = self.registry.revoke(current.id, &revocation).await?;

        tracing::debug!("certificate revoked");
        self.audit
            .log(
                &AuditEvent::builder()
                    .actor(AuditActor::Actor(request.revoked_by))
                    .action(AuditAction::Revoke)
                    .certificate_id(revoked.id)
                    .build()
                    .with("reason", &reason),
            )
            .await;
        Ok(revoked)
    }

    /// Lists certificates matching `filter`, newest first.
    ///
    /// # Errors
    ///
    /// Registry failures.
    #[tracing::instrument(skip(self))]
    pub async fn list_certificates(&self, filter: &CertificateFilter) -> CertResult<Vec<CertificateView>> {
        self.registry.list(filter).await
    }

    /// Reads one certificate.
    ///
    /// # Errors
    ///
    /// [`CertError::NotFound`] if it does not exist.
    #[tracing::instrument(skip(self))]
    pub async fn get_certificate(&self, id: CertificateId) -> CertResult<CertificateView> {
        self.require_certificate(id).await
    }

    /// Lists active certificate types.
    ///
    /// # Errors
    ///
    /// Registry failures.
    #[tracing::instrument(skip(self))]
    pub async fn list_certificate_types(&self) -> CertResult<Vec<CertificateType>> {
        self.registry.list_types().await
    }

    async fn require_actor(&self, id: ActorId, entity: Entity) -> CertResult<Actor> {
        self.registry.find_actor(id).await?.ok_or_else(|| CertError::not_found(entity, id))
    }

    async fn require_certificate(&self, id: CertificateId) -> CertResult<CertificateView> {
        self.registry.find_by_id(id).await?.ok_or_else(|| CertError::not_found(Entity::Certificate, id))
    }

    async fn resolve_network(&self) -> CertResult<NetworkConfig> {
        let found = match &self.config.network {
            NetworkSelection::Named { name } => self.registry.network_config(name).await?,
            NetworkSelection::Active => self.registry.active_network_config().await?,
        };
        found.ok_or_else(|| CertError::configuration_missing(self.config.network.label()))
    }

    /// Generates numbers until one is accepted or attempts run out.
    async fn create_pending_row(
        &self,
        request: &IssueCertificateRequest,
        network: &NetworkConfig,
    ) -> CertResult<(CertificateId, String, DateTime<Utc>)> {
        let retry = &self.config.number_retry;
        for attempt in 0..retry.max_attempts {
            let issue_date = Utc::now();
            let number = self.numbers.next_number(issue_date);
            let draft = CertificateDraft::builder()
                .certificate_number(number.clone())
                .student_id(request.student_id)
                .certificate_type_id(request.certificate_type_id)
                .issuer_id(request.issuer_id)
                .course_name(request.course_name.trim())
                .grade(request.grade.trim())
                .maybe_description(request.description.clone())
                .issue_date(issue_date)
                .network(network.network_name.clone())
                .contract_address(network.contract_address.clone())
                .build();

            match self.registry.create(&draft).await {
                Ok(id) => return Ok((id, number, issue_date)),
                Err(err) if err.kind() == ErrorKind::Conflict => {
                    let delay = retry.backoff(attempt);
                    tracing::debug!(
                        number = %number,
                        attempt = attempt + 1,
                        delay = ?delay,
                        "certificate number collided, regenerating"
                    );
                    if attempt + 1 < retry.max_attempts {
                        tokio::time::sleep(delay).await;
                    }
                },
                Err(err) => return Err(err),
            }
        }
        Err(CertError::external(
            Dependency::Registry,
            format!("certificate number space exhausted after {} attempts", retry.max_attempts),
        ))
    }

    async fn lookup_and_record(
        &self,
        number: &str,
        verifier: &Verifier,
        method: VerificationMethod,
    ) -> CertResult<CertificateView> {
        let number = number.trim();
        let found = self.registry.find_by_number(number).await?;
        let entry = NewVerification {
            certificate_id: found.as_ref().map(|view| view.certificate.id),
            verified_by: verifier.to_string(),
            method,
            result: found.is_some(),
        };
        self.registry.log_verification(&entry).await?;

        found.ok_or_else(|| {
            tracing::debug!(number = %number, "verification miss");
            CertError::not_found(Entity::Certificate, number)
        })
    }

    async fn ledger_check(&self, certificate: &Certificate) -> LedgerCheck {
        let Some(anchor) = certificate.anchor() else {
            return LedgerCheck::NotAnchored;
        };
        let Some(ledger) = &self.ledger else {
            return LedgerCheck::Unavailable { reason: "no ledger gateway configured".to_owned() };
        };

        match ledger.get_certificate(anchor.ledger_id).await {
            Ok(Some(record)) => {
                let content_id_matches = record.content_id == anchor.content_id;
                let diverged = !content_id_matches || record.revoked != certificate.is_revoked;
                if diverged {
                    tracing::warn!(
                        certificate_id = %certificate.id,
                        ledger_id = %anchor.ledger_id,
                        content_id_matches,
                        ledger_revoked = record.revoked,
                        registry_revoked = certificate.is_revoked,
                        "ledger record diverges from registry"
                    );
                }
                LedgerCheck::Checked {
                    ledger_id: anchor.ledger_id,
                    content_id_matches,
                    ledger_revoked: record.revoked,
                    diverged,
                }
            },
            Ok(None) => {
                tracing::warn!(
                    certificate_id = %certificate.id,
                    ledger_id = %anchor.ledger_id,
                    "linked ledger record does not exist"
                );
                LedgerCheck::Missing { ledger_id: anchor.ledger_id }
            },
            Err(err) => {
                tracing::debug!(error = %err, "ledger read failed during verification");
                LedgerCheck::Unavailable { reason: err.to_string() }
            },
        }
    }

    /// Revokes on the ledger and waits for the receipt. A record already
    /// revoked on chain counts as success.
    async fn revoke_on_ledger(
        &self,
        certificate: &Certificate,
        anchor: &AnchorData,
        reason: &str,
        request: &RevokeRequest,
    ) -> CertResult<()> {
        let ledger = self
            .ledger
            .as_ref()
            .ok_or_else(|| CertError::internal("ledger-first revocation without a ledger gateway"))?;

        let record = ledger
            .get_certificate(anchor.ledger_id)
            .await?
            .ok_or_else(|| CertError::not_found(Entity::LedgerCertificate, anchor.ledger_id))?;
        if record.revoked {
            tracing::debug!(ledger_id = %anchor.ledger_id, "already revoked on ledger");
            return Ok(());
        }

        let tx = ledger.submit_revocation(anchor.ledger_id, reason).await?;
        let wait = &self.config.ledger;
        let receipt = tokio::time::timeout(wait.receipt_timeout, ledger.await_receipt(tx, wait.confirmations))
            .await
            .map_err(|_| CertError::timeout("ledger revocation receipt", wait.receipt_timeout))??;
        if !receipt.success {
            return Err(CertError::external(
                Dependency::Ledger,
                format!("revocation transaction {} reverted", receipt.transaction_hash),
            ));
        }

        self.audit
            .log(
                &AuditEvent::builder()
                    .actor(AuditActor::Actor(request.revoked_by))
                    .action(AuditAction::LedgerRevoke)
                    .certificate_id(certificate.id)
                    .build()
                    .with("ledger_id", anchor.ledger_id)
                    .with("tx_hash", receipt.transaction_hash),
            )
            .await;
        Ok(())
    }

    async fn audit_anchor(&self, action: AuditAction, id: CertificateId, anchor: &AnchorData) {
        self.audit
            .log(
                &AuditEvent::builder()
                    .actor(AuditActor::System("coordinator"))
                    .action(action)
                    .certificate_id(id)
                    .build()
                    .with("ledger_id", anchor.ledger_id)
                    .with("tx_hash", &anchor.transaction_hash)
                    .with("content_id", &anchor.content_id),
            )
            .await;
    }
}

fn default_numbers() -> Arc<dyn NumberSource> {
    Arc::new(RandomNumberSource)
}

fn default_audit() -> Arc<dyn AuditLogger> {
    Arc::new(NoopAuditLogger)
}

fn already_revoked(id: CertificateId) -> CertError {
    CertError::invalid_state(format!("certificate {id} is already revoked"))
}

fn outcome(view: &CertificateView, ledger: Option<LedgerCheck>) -> VerificationOutcome {
    VerificationOutcome {
        is_valid: !view.certificate.is_revoked,
        certificate: PublicCertificate::from(view),
        ledger,
    }
}
