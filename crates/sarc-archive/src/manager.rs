//! Archive manager: orchestrates session export, key derivation, encryption,
//! object storage and metadata, gated by the retention policy.

use chrono::{DateTime, Datelike, Duration, Utc};
use sarc_core::config::{SarcConfig, MAX_RETENTION_DAYS};
use sarc_core::{RetentionTier, StorageLocation};
use sarc_crypto::{
    decrypt, derive_key, encrypt_with, plaintext_checksum, verify_checksum, ArchiveSalt,
    CipherSuite, CryptoError, DerivedKey, EncryptedEnvelope, KdfParams, MasterKey,
};
use sarc_storage::ObjectStore;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::audit::{AuditAction, AuditEvent, AuditSink};
use crate::clock::{Clock, SystemClock};
use crate::error::{ArchiveError, ArchiveResult};
use crate::metadata::{MetadataError, MetadataStore};
use crate::model::{Archive, ArchiveStats, ArchiveStatus, StatusCheck};
use crate::payload::ArchivePayload;
use crate::policy::RetentionPolicy;
use crate::session::SessionStore;

/// Read-modify-write attempts before an update gives up with `Conflict`.
pub const MAX_UPDATE_ATTEMPTS: u32 = 3;

/// Window reported as "expiring soon" by [`ArchiveManager::stats`].
pub const EXPIRING_SOON_DAYS: i64 = 30;

#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub bucket: String,
    /// Object key prefix, without trailing slash
    pub key_prefix: String,
    /// Argon2id parameters for new archives
    pub kdf: KdfParams,
    pub policy: RetentionPolicy,
    /// Cipher suite for new archives
    pub suite: CipherSuite,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self::from_config(&SarcConfig::default())
    }
}

impl ManagerSettings {
    pub fn from_config(cfg: &SarcConfig) -> Self {
        Self {
            bucket: cfg.storage.bucket.clone(),
            key_prefix: cfg.storage.key_prefix.trim_matches('/').to_string(),
            kdf: KdfParams {
                mem_cost_kib: cfg.kdf.mem_cost_kib,
                time_cost: cfg.kdf.time_cost,
                parallelism: cfg.kdf.parallelism,
            },
            policy: RetentionPolicy::from_config(&cfg.retention),
            suite: CipherSuite::Aes256Gcm,
        }
    }

    /// Object key for a new archive: `{prefix}/{year}/{session_id}/{archive_id}`.
    pub fn object_key(&self, year: i32, session_id: &str, archive_id: &str) -> String {
        if self.key_prefix.is_empty() {
            format!("{year}/{session_id}/{archive_id}")
        } else {
            format!("{}/{year}/{session_id}/{archive_id}", self.key_prefix)
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DeleteOptions {
    /// Allow deleting a standard/extended archive before it expires.
    pub admin_override: bool,
    pub reason: Option<String>,
}

/// Entry point for every archive operation. Cheap to clone.
#[derive(Clone)]
pub struct ArchiveManager {
    pub(crate) metadata: Arc<dyn MetadataStore>,
    pub(crate) objects: Arc<dyn ObjectStore>,
    pub(crate) sessions: Arc<dyn SessionStore>,
    pub(crate) audit: Arc<dyn AuditSink>,
    master_key: Option<Arc<MasterKey>>,
    pub(crate) settings: ManagerSettings,
    pub(crate) clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for ArchiveManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveManager")
            .field("settings", &self.settings)
            .field("master_key_loaded", &self.master_key.is_some())
            .finish_non_exhaustive()
    }
}

impl ArchiveManager {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        objects: Arc<dyn ObjectStore>,
        sessions: Arc<dyn SessionStore>,
        audit: Arc<dyn AuditSink>,
        master_key: Option<Arc<MasterKey>>,
        settings: ManagerSettings,
    ) -> Self {
        Self {
            metadata,
            objects,
            sessions,
            audit,
            master_key,
            settings,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    pub fn policy(&self) -> &RetentionPolicy {
        &self.settings.policy
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn master_key(&self) -> ArchiveResult<Arc<MasterKey>> {
        self.master_key.clone().ok_or(ArchiveError::KeyUnavailable)
    }

    /// Argon2id on the blocking pool.
    async fn derive(
        &self,
        master: Arc<MasterKey>,
        salt: ArchiveSalt,
        params: KdfParams,
    ) -> ArchiveResult<DerivedKey> {
        tokio::task::spawn_blocking(move || derive_key(&master, salt.as_bytes(), &params))
            .await
            .map_err(|e| ArchiveError::Internal(format!("key derivation task failed: {e}")))?
            .map_err(|e| ArchiveError::KeyDerivation(e.to_string()))
    }

    // ── archive ──────────────────────────────────────────────────────────

    /// Encrypt a closed session and store it under `tier`.
    ///
    /// The metadata row is reserved in `creating` before the object is
    /// written; a failed write releases the reservation. Success is only
    /// reported once the row is `stored`.
    pub async fn archive(
        &self,
        session_id: &str,
        tier: RetentionTier,
        actor: &str,
    ) -> ArchiveResult<Archive> {
        let master = self.master_key()?;
        validate_session_id(session_id)?;

        if let Some(existing) = self.metadata.get_by_session(session_id).await? {
            return Err(ArchiveError::PreconditionFailed(format!(
                "session {session_id} is already archived as {}",
                existing.id
            )));
        }

        let session = self
            .sessions
            .get_session(session_id)
            .await
            .map_err(|e| ArchiveError::Session(format!("{e:#}")))?
            .ok_or_else(|| {
                ArchiveError::PreconditionFailed(format!("session {session_id} not found"))
            })?;
        if !session.is_closed() {
            return Err(ArchiveError::PreconditionFailed(format!(
                "session {session_id} is not closed"
            )));
        }

        let plaintext = ArchivePayload::new(session)
            .to_bytes()
            .map_err(|e| ArchiveError::Serialization(e.to_string()))?;
        let checksum = plaintext_checksum(&plaintext);

        let salt = ArchiveSalt::generate();
        let kdf = self.settings.kdf;
        let key = self.derive(master, salt.clone(), kdf).await?;
        let envelope = encrypt_with(self.settings.suite, &plaintext, &key)
            .map_err(|e| ArchiveError::Internal(e.to_string()))?;
        let sealed = envelope.to_bytes();
        drop(key);

        let now = self.clock.now();
        let archive_id = uuid::Uuid::new_v4().to_string();
        let location = StorageLocation::new(
            self.settings.bucket.clone(),
            self.settings.object_key(now.year(), session_id, &archive_id),
        );

        let reserved = Archive {
            id: archive_id.clone(),
            session_id: session_id.to_string(),
            salt,
            kdf,
            retention_tier: tier,
            status: ArchiveStatus::Creating,
            created_at: now,
            expires_at: self.policy().compute_expiry(tier, now),
            storage_location: location.clone(),
            plaintext_checksum: checksum,
            size_bytes: sealed.len() as u64,
            archived_by: actor.to_string(),
            version: 1,
            updated_at: now,
        };

        self.metadata.insert(&reserved).await.map_err(|e| match e {
            MetadataError::DuplicateSession(s) => {
                ArchiveError::PreconditionFailed(format!("session {s} is already archived"))
            }
            other => other.into(),
        })?;
        debug!(archive_id = %archive_id, session_id, "archive row reserved");

        if let Err(e) = self
            .objects
            .put(&location.bucket, &location.key, sealed)
            .await
        {
            warn!(archive_id = %archive_id, session_id, "ciphertext write failed: {e}");
            self.release_reservation(&reserved).await;
            return Err(e.into());
        }

        let mut promoted = reserved.clone();
        promoted.status = ArchiveStatus::Stored;
        let stored = match self.metadata.update(&promoted, reserved.version).await {
            Ok(stored) => stored,
            Err(e) => {
                error!(archive_id = %archive_id, session_id, "promoting archive row failed: {e}");
                self.release_reservation(&reserved).await;
                return Err(e.into());
            }
        };

        info!(
            archive_id = %stored.id,
            session_id,
            tier = %tier,
            suite = self.settings.suite.name(),
            bytes = stored.size_bytes,
            "session archived"
        );
        self.audit_logged(
            AuditEvent::new(AuditAction::ArchiveCreate, &stored.id, actor, now).with_new(json!({
                "session_id": stored.session_id,
                "retention_tier": stored.retention_tier,
                "expires_at": stored.expires_at,
                "storage_location": stored.storage_location,
                "size_bytes": stored.size_bytes,
            })),
        )
        .await;
        Ok(stored)
    }

    /// Undo a reservation: object first (it may have been written), then row.
    async fn release_reservation(&self, reserved: &Archive) {
        let loc = &reserved.storage_location;
        if let Err(e) = self.objects.delete(&loc.bucket, &loc.key).await {
            warn!(archive_id = %reserved.id, key = %loc.key, "orphan cleanup deferred to sweep: {e}");
            return;
        }
        if let Err(e) = self.metadata.delete(&reserved.id).await {
            warn!(archive_id = %reserved.id, "reservation release deferred to sweep: {e}");
        }
    }

    // ── retrieve ─────────────────────────────────────────────────────────

    /// Fetch, authenticate and decrypt an archive. Returns the exact bytes
    /// that were encrypted.
    pub async fn retrieve(&self, archive_id: &str, actor: &str) -> ArchiveResult<Vec<u8>> {
        let master = self.master_key()?;
        let archive = self.load_stored(archive_id).await?;
        let loc = &archive.storage_location;

        let sealed = match self.objects.get(&loc.bucket, &loc.key).await {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => {
                return Err(self.integrity_failure(&archive, "ciphertext object missing".into()))
            }
            Err(e) => return Err(e.into()),
        };
        if sealed.len() as u64 != archive.size_bytes {
            return Err(self.integrity_failure(
                &archive,
                format!(
                    "object size {} does not match recorded {}",
                    sealed.len(),
                    archive.size_bytes
                ),
            ));
        }

        let envelope = EncryptedEnvelope::from_bytes(&sealed)
            .map_err(|e| self.integrity_failure(&archive, format!("malformed envelope: {e}")))?;
        let key = self
            .derive(master, archive.salt.clone(), archive.kdf)
            .await?;
        let plaintext = decrypt(&envelope, &key).map_err(|e| match e {
            CryptoError::Integrity(reason) => self.integrity_failure(&archive, reason),
            other => self.integrity_failure(&archive, other.to_string()),
        })?;
        if !verify_checksum(&plaintext, &archive.plaintext_checksum) {
            return Err(self.integrity_failure(&archive, "plaintext checksum mismatch".into()));
        }

        self.audit
            .record(AuditEvent::new(
                AuditAction::ArchiveDownload,
                &archive.id,
                actor,
                self.clock.now(),
            ))
            .await
            .map_err(|e| ArchiveError::Audit(format!("{e:#}")))?;
        info!(archive_id = %archive.id, session_id = %archive.session_id, "archive retrieved");
        Ok(plaintext)
    }

    /// [`retrieve`](Self::retrieve) and parse back into the session record.
    pub async fn retrieve_payload(
        &self,
        archive_id: &str,
        actor: &str,
    ) -> ArchiveResult<ArchivePayload> {
        let bytes = self.retrieve(archive_id, actor).await?;
        ArchivePayload::from_bytes(&bytes).map_err(|e| ArchiveError::Serialization(e.to_string()))
    }

    fn integrity_failure(&self, archive: &Archive, reason: String) -> ArchiveError {
        error!(
            archive_id = %archive.id,
            session_id = %archive.session_id,
            key = %archive.storage_location.key,
            op = "retrieve",
            "archive integrity failure: {reason}"
        );
        ArchiveError::Integrity {
            archive_id: archive.id.clone(),
            reason,
        }
    }

    // ── metadata ─────────────────────────────────────────────────────────

    pub async fn get_metadata(&self, archive_id: &str) -> ArchiveResult<Archive> {
        self.metadata
            .get(archive_id)
            .await?
            .ok_or_else(|| ArchiveError::ArchiveNotFound(archive_id.to_string()))
    }

    /// Row for `archive_id`, only if it is fully stored.
    async fn load_stored(&self, archive_id: &str) -> ArchiveResult<Archive> {
        let archive = self.get_metadata(archive_id).await?;
        if archive.status != ArchiveStatus::Stored {
            return Err(ArchiveError::ArchiveNotFound(format!(
                "{archive_id} (status: {})",
                archive.status
            )));
        }
        Ok(archive)
    }

    pub async fn check_status(&self, session_id: &str) -> ArchiveResult<StatusCheck> {
        let row = self.metadata.get_by_session(session_id).await?;
        Ok(StatusCheck {
            session_id: session_id.to_string(),
            archived: row
                .as_ref()
                .is_some_and(|a| a.status == ArchiveStatus::Stored),
            archive: row.map(|a| a.view()),
        })
    }

    pub async fn stats(&self) -> ArchiveResult<ArchiveStats> {
        let now = self.clock.now();
        let soon = now + Duration::days(EXPIRING_SOON_DAYS);
        let mut stats = ArchiveStats::default();

        for a in self.metadata.list().await? {
            if a.status != ArchiveStatus::Stored {
                stats.pending += 1;
                continue;
            }
            stats.total += 1;
            stats.total_size_bytes += a.size_bytes;
            match a.retention_tier {
                RetentionTier::Standard => stats.standard += 1,
                RetentionTier::Extended => stats.extended += 1,
                RetentionTier::Permanent => stats.permanent += 1,
            }
            match a.expires_at {
                Some(t) if t <= now => stats.expired += 1,
                Some(t) if t <= soon => stats.expiring_soon += 1,
                _ => {}
            }
        }
        Ok(stats)
    }

    /// Stored archives whose expiry falls within `days` from now, including
    /// those already past expiry, soonest first.
    pub async fn expiring_within(&self, days: i64) -> ArchiveResult<Vec<Archive>> {
        let out_of_range = || {
            ArchiveError::PreconditionFailed(format!(
                "days must be between 0 and {MAX_RETENTION_DAYS}, got {days}"
            ))
        };
        if !(0..=MAX_RETENTION_DAYS).contains(&days) {
            return Err(out_of_range());
        }
        let cutoff = self
            .clock
            .now()
            .checked_add_signed(Duration::days(days))
            .ok_or_else(out_of_range)?;
        Ok(self
            .metadata
            .list_expiring(cutoff)
            .await?
            .into_iter()
            .filter(|a| a.status == ArchiveStatus::Stored)
            .collect())
    }

    // ── retention ────────────────────────────────────────────────────────

    /// Move an archive up the tier lattice.
    pub async fn update_retention_tier(
        &self,
        archive_id: &str,
        tier: RetentionTier,
        actor: &str,
    ) -> ArchiveResult<Archive> {
        let policy = self.settings.policy;
        let (before, after) = self
            .update_with_retry(archive_id, |current| {
                let expires_at = policy.upgraded_expiry(current, tier)?;
                let mut next = current.clone();
                next.retention_tier = tier;
                next.expires_at = expires_at;
                Ok(next)
            })
            .await?;

        info!(archive_id, from = %before.retention_tier, to = %tier, "retention tier updated");
        self.audit_logged(
            AuditEvent::new(AuditAction::TierUpdate, archive_id, actor, after.updated_at)
                .with_old(json!({
                    "retention_tier": before.retention_tier,
                    "expires_at": before.expires_at,
                }))
                .with_new(json!({
                    "retention_tier": after.retention_tier,
                    "expires_at": after.expires_at,
                })),
        )
        .await;
        Ok(after)
    }

    /// Push expiry out by `days`.
    pub async fn extend_retention(
        &self,
        archive_id: &str,
        days: i64,
        actor: &str,
    ) -> ArchiveResult<Archive> {
        let policy = self.settings.policy;
        let (before, after) = self
            .update_with_retry(archive_id, |current| {
                let expires_at = policy.extended_expiry(current.expires_at, days)?;
                let mut next = current.clone();
                next.expires_at = Some(expires_at);
                Ok(next)
            })
            .await?;

        info!(archive_id, days, "retention extended");
        self.audit_logged(
            AuditEvent::new(AuditAction::Extend, archive_id, actor, after.updated_at)
                .with_old(json!({ "expires_at": before.expires_at }))
                .with_new(json!({ "expires_at": after.expires_at, "days": days })),
        )
        .await;
        Ok(after)
    }

    /// Optimistic read-modify-write on a stored row.
    ///
    /// `change` is re-applied to a fresh read after every version conflict,
    /// so a concurrent extension is never overwritten by a stale value.
    /// Returns the row before and after the change.
    pub(crate) async fn update_with_retry<F>(
        &self,
        archive_id: &str,
        mut change: F,
    ) -> ArchiveResult<(Archive, Archive)>
    where
        F: FnMut(&Archive) -> ArchiveResult<Archive>,
    {
        for attempt in 1..=MAX_UPDATE_ATTEMPTS {
            let current = self.load_stored(archive_id).await?;
            let mut next = change(&current)?;
            next.updated_at = self.clock.now();

            match self.metadata.update(&next, current.version).await {
                Ok(stored) => return Ok((current, stored)),
                Err(MetadataError::VersionConflict { .. }) => {
                    debug!(archive_id, attempt, "version conflict, re-reading");
                }
                Err(MetadataError::RetentionShortened(_)) => {
                    return Err(ArchiveError::PolicyViolation(
                        "retention can only be lengthened".into(),
                    ))
                }
                Err(MetadataError::NotFound(id)) => return Err(ArchiveError::ArchiveNotFound(id)),
                Err(e) => return Err(e.into()),
            }
        }
        warn!(archive_id, "update abandoned after {MAX_UPDATE_ATTEMPTS} conflicting attempts");
        Err(ArchiveError::Conflict(format!(
            "archive {archive_id} changed concurrently {MAX_UPDATE_ATTEMPTS} times"
        )))
    }

    // ── delete ───────────────────────────────────────────────────────────

    /// Delete an archive once retention allows it.
    ///
    /// Order: mark the row `deleting`, delete the object, delete the row. A
    /// failure after the mark leaves a row the sweep will finish.
    pub async fn delete_archive(
        &self,
        archive_id: &str,
        actor: &str,
        opts: DeleteOptions,
    ) -> ArchiveResult<()> {
        let row = self.get_metadata(archive_id).await?;
        match row.status {
            ArchiveStatus::Deleting => {
                info!(archive_id, "resuming interrupted delete");
                return self
                    .finish_delete(&row, actor, AuditAction::Delete)
                    .await
                    .map(|_| ());
            }
            ArchiveStatus::Creating => {
                return Err(ArchiveError::PreconditionFailed(format!(
                    "archive {archive_id} is still being created"
                )))
            }
            ArchiveStatus::Stored => {}
        }

        let now = self.clock.now();
        let policy = self.settings.policy;
        let early = !policy.can_delete(&row, now, false);
        if early {
            if !opts.admin_override || !policy.can_delete(&row, now, true) {
                return Err(ArchiveError::RetentionLocked {
                    archive_id: archive_id.to_string(),
                    expires_at: row.expires_at,
                });
            }
            // The override only proceeds once it is on the audit record.
            self.audit
                .record(
                    AuditEvent::new(AuditAction::DeleteOverride, archive_id, actor, now)
                        .with_old(json!({
                            "retention_tier": row.retention_tier,
                            "expires_at": row.expires_at,
                        }))
                        .with_new(json!({ "reason": opts.reason })),
                )
                .await
                .map_err(|e| ArchiveError::Audit(format!("{e:#}")))?;
            warn!(archive_id, actor, reason = ?opts.reason, "early delete by administrative override");
        }

        let (_, marked) = self
            .update_with_retry(archive_id, |current| {
                if !policy.can_delete(current, now, opts.admin_override) {
                    return Err(ArchiveError::RetentionLocked {
                        archive_id: current.id.clone(),
                        expires_at: current.expires_at,
                    });
                }
                let mut next = current.clone();
                next.status = ArchiveStatus::Deleting;
                Ok(next)
            })
            .await?;

        self.finish_delete(&marked, actor, AuditAction::Delete)
            .await
            .map(|_| ())
    }

    /// Remove the object, then the row, of an archive already marked
    /// `deleting`. Returns false when another caller removed the row first;
    /// only the caller that removes the row records the audit event.
    pub(crate) async fn finish_delete(
        &self,
        archive: &Archive,
        actor: &str,
        action: AuditAction,
    ) -> ArchiveResult<bool> {
        let loc = &archive.storage_location;
        self.objects.delete(&loc.bucket, &loc.key).await?;
        if !self.metadata.delete(&archive.id).await? {
            debug!(archive_id = %archive.id, "delete already finished elsewhere");
            return Ok(false);
        }

        info!(archive_id = %archive.id, session_id = %archive.session_id, "archive deleted");
        self.audit_logged(
            AuditEvent::new(action, &archive.id, actor, self.clock.now()).with_old(json!({
                "session_id": archive.session_id,
                "retention_tier": archive.retention_tier,
                "expires_at": archive.expires_at,
                "storage_location": archive.storage_location,
            })),
        )
        .await;
        Ok(true)
    }

    /// Record an event for a change that has already committed. A failing
    /// sink is logged, not surfaced.
    pub(crate) async fn audit_logged(&self, event: AuditEvent) {
        let action = event.action;
        let entity_id = event.entity_id.clone();
        if let Err(e) = self.audit.record(event).await {
            error!(%action, archive_id = %entity_id, "audit record failed: {e:#}");
        }
    }
}

/// Session ids become part of the object key.
fn validate_session_id(session_id: &str) -> ArchiveResult<()> {
    let ok = !session_id.is_empty()
        && session_id.len() <= 128
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(ArchiveError::PreconditionFailed(format!(
            "invalid session id: {session_id:?}"
        )))
    }
}
