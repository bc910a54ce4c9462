//! SQLite-backed certificate registry.
//!
//! A single connection guarded by a [`parking_lot::Mutex`] serves every
//! call. Statements run on the blocking pool via
//! [`tokio::task::spawn_blocking`] so the async runtime never waits on disk.
//!
//! Certificate number uniqueness is a `UNIQUE` column constraint and
//! revocation is `UPDATE ... WHERE is_revoked = 0`, so both invariants hold
//! even when several processes share the database file.

use std::{path::Path, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, ErrorCode, OpenFlags, OptionalExtension, Row, params};

use crate::{
    error::{CertError, CertResult, Dependency, Entity},
    model::{
        Actor, AnchorData, Certificate, CertificateDraft, CertificateFilter, CertificateType,
        CertificateView, NetworkConfig, NewVerification, Revocation, VerificationMethod,
        VerificationRecord, VerificationScope,
    },
    registry::CertificateRegistry,
    types::{ActorId, CertificateId, CertificateTypeId, LedgerId, NetworkConfigId, VerificationId},
};

const SCHEMA_SQL: &str = include_str!("schema.sql");

/// How long a writer waits on another connection's lock before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const CERTIFICATE_COLUMNS: &str = "c.id, c.certificate_number, c.student_id, \
     c.certificate_type_id, c.issuer_id, c.course_name, c.grade, c.description, c.issue_date, \
     c.created_at, c.updated_at, c.blockchain_id, c.transaction_hash, c.contract_address, \
     c.network, c.ipfs_hash, c.metadata_url, c.is_revoked, c.revoked_at, c.revoked_by, \
     c.revoked_reason";

const VIEW_SELECT: &str = "SELECT c.id, c.certificate_number, c.student_id, \
     c.certificate_type_id, c.issuer_id, c.course_name, c.grade, c.description, c.issue_date, \
     c.created_at, c.updated_at, c.blockchain_id, c.transaction_hash, c.contract_address, \
     c.network, c.ipfs_hash, c.metadata_url, c.is_revoked, c.revoked_at, c.revoked_by, \
     c.revoked_reason, s.name, s.email, t.name, i.name, r.name \
     FROM certificates c \
     LEFT JOIN actors s ON s.id = c.student_id \
     LEFT JOIN certificate_types t ON t.id = c.certificate_type_id \
     LEFT JOIN actors i ON i.id = c.issuer_id \
     LEFT JOIN actors r ON r.id = c.revoked_by";

const NETWORK_COLUMNS: &str = "id, network_name, contract_address, chain_id, rpc_url, \
     block_explorer, is_active, is_testnet";

impl From<rusqlite::Error> for CertError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => {
                CertError::external_with_source(Dependency::Registry, "database busy", true, err)
            },
            _ => CertError::internal_with_source("registry query failed", err),
        }
    }
}

fn to_nanos(at: DateTime<Utc>) -> CertResult<i64> {
    at.timestamp_nanos_opt()
        .ok_or_else(|| CertError::invalid_input("timestamp", format!("{at} is out of range")))
}

fn to_sql_ledger_id(id: LedgerId) -> CertResult<i64> {
    i64::try_from(id.0).map_err(|_| CertError::invalid_input("ledgerId", "exceeds storage range"))
}

fn from_sql_ledger_id(value: i64) -> rusqlite::Result<LedgerId> {
    u64::try_from(value).map(LedgerId).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(11, rusqlite::types::Type::Integer, Box::new(e))
    })
}

fn row_to_certificate(row: &Row<'_>) -> rusqlite::Result<Certificate> {
    Ok(Certificate {
        id: CertificateId(row.get(0)?),
        certificate_number: row.get(1)?,
        student_id: ActorId(row.get(2)?),
        certificate_type_id: CertificateTypeId(row.get(3)?),
        issuer_id: ActorId(row.get(4)?),
        course_name: row.get(5)?,
        grade: row.get(6)?,
        description: row.get(7)?,
        issue_date: DateTime::from_timestamp_nanos(row.get(8)?),
        created_at: DateTime::from_timestamp_nanos(row.get(9)?),
        updated_at: DateTime::from_timestamp_nanos(row.get(10)?),
        ledger_id: row.get::<_, Option<i64>>(11)?.map(from_sql_ledger_id).transpose()?,
        transaction_hash: row.get(12)?,
        contract_address: row.get(13)?,
        network: row.get(14)?,
        content_id: row.get(15)?,
        metadata_url: row.get(16)?,
        is_revoked: row.get(17)?,
        revoked_at: row.get::<_, Option<i64>>(18)?.map(DateTime::from_timestamp_nanos),
        revoked_by: row.get::<_, Option<i64>>(19)?.map(ActorId),
        revoked_reason: row.get(20)?,
    })
}

fn row_to_view(row: &Row<'_>) -> rusqlite::Result<CertificateView> {
    Ok(CertificateView {
        certificate: row_to_certificate(row)?,
        student_name: row.get(21)?,
        student_email: row.get(22)?,
        certificate_type: row.get(23)?,
        issuer_name: row.get(24)?,
        revoked_by_name: row.get(25)?,
    })
}

fn row_to_network(row: &Row<'_>) -> rusqlite::Result<NetworkConfig> {
    Ok(NetworkConfig {
        id: NetworkConfigId(row.get(0)?),
        network_name: row.get(1)?,
        contract_address: row.get(2)?,
        chain_id: u64::try_from(row.get::<_, i64>(3)?).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Integer, Box::new(e))
        })?,
        rpc_url: row.get(4)?,
        block_explorer: row.get(5)?,
        active: row.get(6)?,
        testnet: row.get(7)?,
    })
}

fn row_to_verification(row: &Row<'_>) -> rusqlite::Result<(VerificationRecord, String)> {
    let method: String = row.get(3)?;
    let record = VerificationRecord {
        id: VerificationId(row.get(0)?),
        certificate_id: row.get::<_, Option<i64>>(1)?.map(CertificateId),
        verified_by: row.get(2)?,
        method: VerificationMethod::CertificateNumber,
        result: row.get(4)?,
        verified_at: DateTime::from_timestamp_nanos(row.get(5)?),
    };
    Ok((record, method))
}

fn load_certificate(conn: &Connection, id: CertificateId) -> CertResult<Option<Certificate>> {
    let sql = format!("SELECT {CERTIFICATE_COLUMNS} FROM certificates c WHERE c.id = ?1");
    Ok(conn.query_row(&sql, params![id.0], row_to_certificate).optional()?)
}

/// [`CertificateRegistry`] backed by a SQLite database.
#[derive(Clone)]
pub struct SqliteRegistry {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteRegistry").finish_non_exhaustive()
    }
}

impl SqliteRegistry {
    /// Opens or creates a registry database at `path` in WAL mode.
    ///
    /// # Errors
    ///
    /// Returns [`CertError::Internal`] if the file cannot be opened or the
    /// schema cannot be applied.
    pub fn open(path: impl AsRef<Path>) -> CertResult<Self> {
        let conn = Connection::open_with_flags(
            path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        tracing::debug!(path = %path.as_ref().display(), journal_mode = %mode, "opened registry");
        Self::initialize(conn)
    }

    /// Creates a private in-memory registry database.
    ///
    /// # Errors
    ///
    /// Returns [`CertError::Internal`] if the schema cannot be applied.
    pub fn open_in_memory() -> CertResult<Self> {
        Self::initialize(Connection::open_in_memory()?)
    }

    fn initialize(conn: Connection) -> CertResult<Self> {
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    /// Runs `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> CertResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> CertResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            f(&mut guard)
        })
        .await
        .map_err(|e| CertError::internal_with_source("registry task failed", e))?
    }
}

#[async_trait]
impl CertificateRegistry for SqliteRegistry {
    #[tracing::instrument(skip(self))]
    async fn find_actor(&self, id: ActorId) -> CertResult<Option<Actor>> {
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT id, name, email, wallet_address FROM actors WHERE id = ?1",
                    params![id.0],
                    |row| {
                        Ok(Actor {
                            id: ActorId(row.get(0)?),
                            name: row.get(1)?,
                            email: row.get(2)?,
                            wallet_address: row.get(3)?,
                        })
                    },
                )
                .optional()?)
        })
        .await
    }

    #[tracing::instrument(skip(self))]
    async fn find_by_id(&self, id: CertificateId) -> CertResult<Option<CertificateView>> {
        self.with_conn(move |conn| {
            let sql = format!("{VIEW_SELECT} WHERE c.id = ?1");
            Ok(conn.query_row(&sql, params![id.0], row_to_view).optional()?)
        })
        .await
    }

    #[tracing::instrument(skip(self))]
    async fn find_by_number(&self, number: &str) -> CertResult<Option<CertificateView>> {
        let number = number.to_owned();
        self.with_conn(move |conn| {
            let sql = format!("{VIEW_SELECT} WHERE c.certificate_number = ?1");
            Ok(conn.query_row(&sql, params![number], row_to_view).optional()?)
        })
        .await
    }

    #[tracing::instrument(skip(self))]
    async fn list(&self, filter: &CertificateFilter) -> CertResult<Vec<CertificateView>> {
        let filter = filter.clone();
        self.with_conn(move |conn| {
            let sql = format!(
                "{VIEW_SELECT} WHERE (?1 IS NULL OR c.student_id = ?1) \
                 AND (?2 IS NULL OR c.certificate_type_id = ?2) \
                 AND (?3 IS NULL OR c.is_revoked = ?3) \
                 ORDER BY c.issue_date DESC, c.id DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    params![
                        filter.student_id.map(i64::from),
                        filter.certificate_type_id.map(i64::from),
                        filter.revoked,
                    ],
                    row_to_view,
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    #[tracing::instrument(skip(self))]
    async fn list_pending(&self, created_before: DateTime<Utc>) -> CertResult<Vec<Certificate>> {
        let watermark = to_nanos(created_before)?;
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {CERTIFICATE_COLUMNS} FROM certificates c \
                 WHERE c.is_revoked = 0 AND c.created_at < ?1 \
                 AND (c.blockchain_id IS NULL OR c.transaction_hash IS NULL \
                      OR c.ipfs_hash IS NULL OR c.metadata_url IS NULL) \
                 ORDER BY c.created_at, c.id"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![watermark], row_to_certificate)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    #[tracing::instrument(skip(self, draft), fields(number = %draft.certificate_number))]
    async fn create(&self, draft: &CertificateDraft) -> CertResult<CertificateId> {
        let draft = draft.clone();
        let issue_date = to_nanos(draft.issue_date)?;
        let now = to_nanos(Utc::now())?;
        self.with_conn(move |conn| {
            let inserted = conn.execute(
                "INSERT INTO certificates (certificate_number, student_id, certificate_type_id, \
                 issuer_id, course_name, grade, description, issue_date, created_at, updated_at, \
                 contract_address, network) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9, ?10, ?11)",
                params![
                    draft.certificate_number,
                    draft.student_id.0,
                    draft.certificate_type_id.0,
                    draft.issuer_id.0,
                    draft.course_name,
                    draft.grade,
                    draft.description,
                    issue_date,
                    now,
                    draft.contract_address,
                    draft.network,
                ],
            );
            match inserted {
                Ok(_) => Ok(CertificateId(conn.last_insert_rowid())),
                Err(err) if err.sqlite_error_code() == Some(ErrorCode::ConstraintViolation) => {
                    Err(CertError::duplicate_number(draft.certificate_number))
                },
                Err(err) => Err(err.into()),
            }
        })
        .await
    }

    #[tracing::instrument(skip(self, anchor), fields(ledger_id = %anchor.ledger_id))]
    async fn attach_anchor_data(
        &self,
        id: CertificateId,
        anchor: &AnchorData,
    ) -> CertResult<Certificate> {
        let anchor = anchor.clone();
        let ledger_id = to_sql_ledger_id(anchor.ledger_id)?;
        let now = to_nanos(Utc::now())?;
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE certificates SET blockchain_id = ?2, transaction_hash = ?3, \
                 ipfs_hash = ?4, metadata_url = ?5, updated_at = ?6 WHERE id = ?1",
                params![
                    id.0,
                    ledger_id,
                    anchor.transaction_hash,
                    anchor.content_id,
                    anchor.metadata_url,
                    now
                ],
            )?;
            if changed == 0 {
                return Err(CertError::not_found(Entity::Certificate, id));
            }
            load_certificate(conn, id)?.ok_or_else(|| CertError::not_found(Entity::Certificate, id))
        })
        .await
    }

    #[tracing::instrument(skip(self, revocation), fields(revoked_by = %revocation.revoked_by))]
    async fn revoke(&self, id: CertificateId, revocation: &Revocation) -> CertResult<Certificate> {
        let revocation = revocation.clone();
        let at = to_nanos(revocation.revoked_at)?;
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE certificates SET is_revoked = 1, revoked_at = ?2, revoked_by = ?3, \
                 revoked_reason = ?4, updated_at = ?2 WHERE id = ?1 AND is_revoked = 0",
                params![id.0, at, revocation.revoked_by.0, revocation.reason],
            )?;
            if changed == 0 {
                return match load_certificate(conn, id)? {
                    Some(_) => {
                        Err(CertError::invalid_state(format!("certificate {id} is already revoked")))
                    },
                    None => Err(CertError::not_found(Entity::Certificate, id)),
                };
            }
            load_certificate(conn, id)?.ok_or_else(|| CertError::not_found(Entity::Certificate, id))
        })
        .await
    }

    #[tracing::instrument(skip(self, entry), fields(method = entry.method.as_str(), result = entry.result))]
    async fn log_verification(&self, entry: &NewVerification) -> CertResult<VerificationRecord> {
        let entry = entry.clone();
        let verified_at = Utc::now();
        let at = to_nanos(verified_at)?;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO verification_logs (certificate_id, verified_by, \
                 verification_method, verification_result, verified_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    entry.certificate_id.map(i64::from),
                    entry.verified_by,
                    entry.method.as_str(),
                    entry.result,
                    at
                ],
            )?;
            Ok(VerificationRecord {
                id: VerificationId(conn.last_insert_rowid()),
                certificate_id: entry.certificate_id,
                verified_by: entry.verified_by,
                method: entry.method,
                result: entry.result,
                verified_at: DateTime::from_timestamp_nanos(at),
            })
        })
        .await
    }

    #[tracing::instrument(skip(self))]
    async fn verifications(&self, scope: VerificationScope) -> CertResult<Vec<VerificationRecord>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, certificate_id, verified_by, verification_method, \
                 verification_result, verified_at FROM verification_logs ORDER BY id",
            )?;
            let rows = stmt
                .query_map([], row_to_verification)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            let mut records = Vec::with_capacity(rows.len());
            for (mut record, method) in rows {
                record.method = VerificationMethod::parse(&method)?;
                if scope.includes(&record) {
                    records.push(record);
                }
            }
            Ok(records)
        })
        .await
    }

    #[tracing::instrument(skip(self))]
    async fn list_types(&self) -> CertResult<Vec<CertificateType>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, description, is_active FROM certificate_types \
                 WHERE is_active = 1 ORDER BY name, id",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(CertificateType {
                        id: CertificateTypeId(row.get(0)?),
                        name: row.get(1)?,
                        description: row.get(2)?,
                        active: row.get(3)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    #[tracing::instrument(skip(self))]
    async fn find_type(&self, id: CertificateTypeId) -> CertResult<Option<CertificateType>> {
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT id, name, description, is_active FROM certificate_types WHERE id = ?1",
                    params![id.0],
                    |row| {
                        Ok(CertificateType {
                            id: CertificateTypeId(row.get(0)?),
                            name: row.get(1)?,
                            description: row.get(2)?,
                            active: row.get(3)?,
                        })
                    },
                )
                .optional()?)
        })
        .await
    }

    #[tracing::instrument(skip(self))]
    async fn active_network_config(&self) -> CertResult<Option<NetworkConfig>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {NETWORK_COLUMNS} FROM network_config WHERE is_active = 1 \
                 ORDER BY is_testnet DESC, id DESC LIMIT 1"
            );
            Ok(conn.query_row(&sql, [], row_to_network).optional()?)
        })
        .await
    }

    #[tracing::instrument(skip(self))]
    async fn network_config(&self, name: &str) -> CertResult<Option<NetworkConfig>> {
        let name = name.to_owned();
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {NETWORK_COLUMNS} FROM network_config \
                 WHERE network_name = ?1 AND is_active = 1 ORDER BY id DESC LIMIT 1"
            );
            Ok(conn.query_row(&sql, params![name], row_to_network).optional()?)
        })
        .await
    }

    #[tracing::instrument(skip(self, actor), fields(actor_id = %actor.id))]
    async fn register_actor(&self, actor: &Actor) -> CertResult<()> {
        let actor = actor.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO actors (id, name, email, wallet_address) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![actor.id.0, actor.name, actor.email, actor.wallet_address],
            )?;
            Ok(())
        })
        .await
    }

    #[tracing::instrument(skip(self, certificate_type), fields(type_id = %certificate_type.id))]
    async fn register_type(&self, certificate_type: &CertificateType) -> CertResult<()> {
        let ty = certificate_type.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO certificate_types (id, name, description, is_active) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![ty.id.0, ty.name, ty.description, ty.active],
            )?;
            Ok(())
        })
        .await
    }

    #[tracing::instrument(skip(self, network), fields(network = %network.network_name))]
    async fn register_network(&self, network: &NetworkConfig) -> CertResult<()> {
        let network = network.clone();
        let chain_id = i64::try_from(network.chain_id)
            .map_err(|_| CertError::invalid_input("chainId", "exceeds storage range"))?;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO network_config (id, network_name, contract_address, \
                 chain_id, rpc_url, block_explorer, is_active, is_testnet) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    network.id.0,
                    network.network_name,
                    network.contract_address,
                    chain_id,
                    network.rpc_url,
                    network.block_explorer,
                    network.active,
                    network.testnet,
                ],
            )?;
            Ok(())
        })
        .await
    }
}
