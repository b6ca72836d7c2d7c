//! Background reconciliation between object storage and metadata
//!
//! `reconcile_orphans` lists objects before rows. Because the archive flow
//! reserves its row before writing the object, any object seen by the
//! listing already has its row visible (or had it released), so a live
//! archive is never mistaken for an orphan.

use chrono::Duration;
use serde::Serialize;
use std::collections::HashSet;
use tracing::{error, info, warn};

use crate::audit::{AuditAction, AuditEvent};
use crate::error::{ArchiveError, ArchiveResult};
use crate::manager::ArchiveManager;
use crate::model::{Archive, ArchiveStatus};

/// Actor recorded on audit events raised by the sweep itself.
pub const SWEEP_ACTOR: &str = "system:sweep";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub objects_scanned: u64,
    /// Objects with no metadata row
    pub orphans_removed: u64,
    /// `creating` rows older than the grace period, with their objects
    pub stale_reservations_removed: u64,
    /// `deleting` rows whose delete was interrupted
    pub deletes_finished: u64,
    /// Stored standard/extended archives past expiry
    pub expired_found: u64,
    pub expired_purged: u64,
    pub errors: u64,
}

impl SweepReport {
    pub fn merge(&mut self, other: SweepReport) {
        self.objects_scanned += other.objects_scanned;
        self.orphans_removed += other.orphans_removed;
        self.stale_reservations_removed += other.stale_reservations_removed;
        self.deletes_finished += other.deletes_finished;
        self.expired_found += other.expired_found;
        self.expired_purged += other.expired_purged;
        self.errors += other.errors;
    }
}

impl ArchiveManager {
    /// Run both sweeps.
    pub async fn sweep(
        &self,
        creating_grace: Duration,
        purge_expired: bool,
    ) -> ArchiveResult<SweepReport> {
        let mut report = self.reconcile_orphans(creating_grace).await?;
        report.merge(self.lifecycle_sweep(purge_expired).await?);
        info!(
            orphans = report.orphans_removed,
            stale = report.stale_reservations_removed,
            finished = report.deletes_finished,
            expired = report.expired_found,
            purged = report.expired_purged,
            errors = report.errors,
            "sweep complete"
        );
        Ok(report)
    }

    /// Delete orphaned objects, release stale reservations and finish
    /// interrupted deletes.
    pub async fn reconcile_orphans(&self, creating_grace: Duration) -> ArchiveResult<SweepReport> {
        let bucket = self.settings.bucket.clone();
        let mut report = SweepReport::default();

        // without a prefix every unrelated object in the bucket would look orphaned
        if self.settings.key_prefix.trim_matches('/').is_empty() {
            return Err(ArchiveError::PreconditionFailed(
                "refusing to reconcile: no key prefix configured".into(),
            ));
        }

        let keys = self.objects.list(&bucket, &self.settings.key_prefix).await?;
        let rows = self.metadata.list().await?;
        let now = self.clock.now();
        report.objects_scanned = keys.len() as u64;

        let referenced: HashSet<&str> = rows
            .iter()
            .filter(|a| a.storage_location.bucket == bucket)
            .map(|a| a.storage_location.key.as_str())
            .collect();

        for key in keys.iter().filter(|k| !referenced.contains(k.as_str())) {
            match self.objects.delete(&bucket, key).await {
                Ok(()) => {
                    report.orphans_removed += 1;
                    warn!(bucket = %bucket, key = %key, "removed orphaned archive object");
                    let entity = key.rsplit('/').next().unwrap_or(key);
                    self.audit_logged(
                        AuditEvent::new(AuditAction::OrphanRemoved, entity, SWEEP_ACTOR, now)
                            .with_old(serde_json::json!({ "bucket": bucket, "key": key })),
                    )
                    .await;
                }
                Err(e) => {
                    report.errors += 1;
                    error!(bucket = %bucket, key = %key, "orphan delete failed: {e}");
                }
            }
        }

        for row in &rows {
            match row.status {
                ArchiveStatus::Creating if row.updated_at + creating_grace < now => {
                    match self.release_stale(row).await {
                        Ok(()) => report.stale_reservations_removed += 1,
                        Err(e) => {
                            report.errors += 1;
                            error!(archive_id = %row.id, "stale reservation cleanup failed: {e}");
                        }
                    }
                }
                ArchiveStatus::Deleting => {
                    match self.finish_delete(row, SWEEP_ACTOR, AuditAction::Delete).await {
                        Ok(true) => report.deletes_finished += 1,
                        Ok(false) => {}
                        Err(e) => {
                            report.errors += 1;
                            error!(archive_id = %row.id, "finishing delete failed: {e}");
                        }
                    }
                }
                _ => {}
            }
        }

        Ok(report)
    }

    async fn release_stale(&self, row: &Archive) -> ArchiveResult<()> {
        let loc = &row.storage_location;
        self.objects.delete(&loc.bucket, &loc.key).await?;
        self.metadata.delete(&row.id).await?;
        warn!(archive_id = %row.id, session_id = %row.session_id, "released stale archive reservation");
        Ok(())
    }

    /// Report expired standard/extended archives; delete them if `purge`.
    pub async fn lifecycle_sweep(&self, purge: bool) -> ArchiveResult<SweepReport> {
        let now = self.clock.now();
        let mut report = SweepReport::default();
        let policy = self.settings.policy;

        let expired = self
            .metadata
            .list_expiring(now)
            .await?
            .into_iter()
            .filter(|a| a.status == ArchiveStatus::Stored && policy.can_delete(a, now, false));

        for archive in expired {
            report.expired_found += 1;
            if !purge {
                info!(
                    archive_id = %archive.id,
                    tier = %archive.retention_tier,
                    expires_at = ?archive.expires_at,
                    "archive past retention"
                );
                continue;
            }

            let marked = self
                .update_with_retry(&archive.id, |current| {
                    if !policy.can_delete(current, now, false) {
                        return Err(ArchiveError::RetentionLocked {
                            archive_id: current.id.clone(),
                            expires_at: current.expires_at,
                        });
                    }
                    let mut next = current.clone();
                    next.status = ArchiveStatus::Deleting;
                    Ok(next)
                })
                .await;

            let result = match marked {
                Ok((_, marked)) => {
                    self.finish_delete(&marked, SWEEP_ACTOR, AuditAction::ExpiredPurged)
                        .await
                }
                // extended concurrently; nothing to purge
                Err(ArchiveError::RetentionLocked { .. }) => continue,
                Err(e) => Err(e),
            };
            match result {
                Ok(true) => report.expired_purged += 1,
                Ok(false) => {}
                Err(e) => {
                    report.errors += 1;
                    error!(archive_id = %archive.id, "purging expired archive failed: {e}");
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge() {
        let mut a = SweepReport {
            orphans_removed: 1,
            errors: 1,
            ..Default::default()
        };
        a.merge(SweepReport {
            orphans_removed: 2,
            expired_found: 3,
            ..Default::default()
        });
        assert_eq!(a.orphans_removed, 3);
        assert_eq!(a.expired_found, 3);
        assert_eq!(a.errors, 1);
    }
}
