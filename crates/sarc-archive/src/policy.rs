//! Retention policy: expiry computation and transition rules
//!
//! Pure functions, no I/O. Retention may only ever lengthen: tiers move up
//! the `Standard → Extended → Permanent` lattice and extensions add time.

use chrono::{DateTime, Duration, Utc};
use sarc_core::config::RetentionConfig;
use sarc_core::RetentionTier;

use crate::error::{ArchiveError, ArchiveResult};
use crate::model::Archive;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub standard_days: i64,
    pub extended_days: i64,
    pub max_extension_days: i64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::from_config(&RetentionConfig::default())
    }
}

impl RetentionPolicy {
    pub fn from_config(cfg: &RetentionConfig) -> Self {
        Self {
            standard_days: cfg.standard_days,
            extended_days: cfg.extended_days,
            max_extension_days: cfg.max_extension_days,
        }
    }

    /// Lifetime of a tier, `None` for permanent.
    pub fn lifetime(&self, tier: RetentionTier) -> Option<Duration> {
        match tier {
            RetentionTier::Standard => Some(days_saturating(self.standard_days)),
            RetentionTier::Extended => Some(days_saturating(self.extended_days)),
            RetentionTier::Permanent => None,
        }
    }

    pub fn compute_expiry(
        &self,
        tier: RetentionTier,
        created_at: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        self.lifetime(tier).map(|d| {
            created_at
                .checked_add_signed(d)
                .unwrap_or(DateTime::<Utc>::MAX_UTC)
        })
    }

    /// True if adding `requested_days` to `current_expiry` does not shorten
    /// retention. Permanent archives (`None`) have nothing to extend.
    pub fn can_extend(&self, current_expiry: Option<DateTime<Utc>>, requested_days: i64) -> bool {
        current_expiry.is_some() && (0..=self.max_extension_days).contains(&requested_days)
    }

    /// New expiry after extending by `days`.
    pub fn extended_expiry(
        &self,
        current_expiry: Option<DateTime<Utc>>,
        days: i64,
    ) -> ArchiveResult<DateTime<Utc>> {
        let Some(current) = current_expiry else {
            return Err(ArchiveError::PolicyViolation(
                "permanent archives have no expiry to extend".into(),
            ));
        };
        if !self.can_extend(current_expiry, days) {
            return Err(ArchiveError::PolicyViolation(format!(
                "extension must be between 0 and {} days, got {days}",
                self.max_extension_days
            )));
        }
        Duration::try_days(days)
            .and_then(|d| current.checked_add_signed(d))
            .ok_or_else(|| {
                ArchiveError::PolicyViolation(format!(
                    "extending by {days} days overflows the calendar"
                ))
            })
    }

    /// Tiers only move up the lattice; same-tier and downgrades are rejected.
    pub fn can_upgrade_tier(&self, from: RetentionTier, to: RetentionTier) -> bool {
        to > from
    }

    /// Expiry after moving `archive` to tier `to`.
    ///
    /// Never earlier than the current expiry: an archive already extended
    /// past the new tier's natural lifetime keeps its later date.
    pub fn upgraded_expiry(
        &self,
        archive: &Archive,
        to: RetentionTier,
    ) -> ArchiveResult<Option<DateTime<Utc>>> {
        if !self.can_upgrade_tier(archive.retention_tier, to) {
            return Err(ArchiveError::PolicyViolation(format!(
                "cannot change retention tier from {} to {}",
                archive.retention_tier, to
            )));
        }
        let computed = self.compute_expiry(to, archive.created_at);
        Ok(match (archive.expires_at, computed) {
            (_, None) => None,
            (Some(current), Some(new)) => Some(current.max(new)),
            // unreachable for consistent rows: a permanent archive cannot upgrade
            (None, Some(_)) => None,
        })
    }

    /// Deletion is allowed for expired standard/extended archives, or
    /// earlier with an administrative override. Permanent archives are never
    /// deletable.
    pub fn can_delete(&self, archive: &Archive, now: DateTime<Utc>, admin_override: bool) -> bool {
        match archive.retention_tier {
            RetentionTier::Permanent => false,
            RetentionTier::Standard | RetentionTier::Extended => {
                admin_override || archive.is_expired(now)
            }
        }
    }
}

fn days_saturating(days: i64) -> Duration {
    Duration::try_days(days).unwrap_or(if days < 0 { Duration::MIN } else { Duration::MAX })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ArchiveStatus;
    use chrono::TimeZone;
    use sarc_core::StorageLocation;
    use sarc_crypto::{ArchiveSalt, KdfParams};

    fn day0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, 9, 30, 0).unwrap()
    }

    fn archive(tier: RetentionTier) -> Archive {
        let policy = RetentionPolicy::default();
        Archive {
            id: "a1".into(),
            session_id: "s1".into(),
            salt: ArchiveSalt::generate(),
            kdf: KdfParams::insecure_fast(),
            retention_tier: tier,
            status: ArchiveStatus::Stored,
            created_at: day0(),
            expires_at: policy.compute_expiry(tier, day0()),
            storage_location: StorageLocation::new("b", "k"),
            plaintext_checksum: "sha256:00".into(),
            size_bytes: 1,
            archived_by: "tester".into(),
            version: 1,
            updated_at: day0(),
        }
    }

    #[test]
    fn test_compute_expiry() {
        let p = RetentionPolicy::default();
        assert_eq!(
            p.compute_expiry(RetentionTier::Standard, day0()),
            Some(day0() + Duration::days(365))
        );
        assert_eq!(
            p.compute_expiry(RetentionTier::Extended, day0()),
            Some(day0() + Duration::days(3 * 365))
        );
        assert_eq!(p.compute_expiry(RetentionTier::Permanent, day0()), None);
    }

    #[test]
    fn test_can_extend() {
        let p = RetentionPolicy::default();
        let exp = Some(day0());
        assert!(p.can_extend(exp, 30));
        assert!(p.can_extend(exp, 0));
        assert!(!p.can_extend(exp, -1), "negative extension shortens retention");
        assert!(!p.can_extend(exp, p.max_extension_days + 1));
        assert!(!p.can_extend(None, 30));
    }

    #[test]
    fn test_extended_expiry_permanent_rejected() {
        let p = RetentionPolicy::default();
        assert!(matches!(
            p.extended_expiry(None, 10),
            Err(ArchiveError::PolicyViolation(_))
        ));
    }

    #[test]
    fn test_tier_lattice() {
        use RetentionTier::*;
        let p = RetentionPolicy::default();
        assert!(p.can_upgrade_tier(Standard, Extended));
        assert!(p.can_upgrade_tier(Standard, Permanent));
        assert!(p.can_upgrade_tier(Extended, Permanent));
        assert!(!p.can_upgrade_tier(Extended, Standard));
        assert!(!p.can_upgrade_tier(Permanent, Extended));
        assert!(!p.can_upgrade_tier(Standard, Standard));
    }

    #[test]
    fn test_downgrade_is_policy_violation() {
        let p = RetentionPolicy::default();
        let a = archive(RetentionTier::Extended);
        assert!(matches!(
            p.upgraded_expiry(&a, RetentionTier::Standard),
            Err(ArchiveError::PolicyViolation(_))
        ));
    }

    #[test]
    fn test_upgrade_keeps_later_extension() {
        let p = RetentionPolicy::default();
        let mut a = archive(RetentionTier::Standard);
        a.expires_at = Some(day0() + Duration::days(2000));

        let new = p.upgraded_expiry(&a, RetentionTier::Extended).unwrap();
        assert_eq!(new, Some(day0() + Duration::days(2000)));
    }

    #[test]
    fn test_can_delete() {
        let p = RetentionPolicy::default();
        let std = archive(RetentionTier::Standard);
        let expiry = std.expires_at.unwrap();

        assert!(!p.can_delete(&std, expiry - Duration::seconds(1), false));
        assert!(p.can_delete(&std, expiry, false));
        assert!(p.can_delete(&std, day0(), true), "override allows early delete");

        let perm = archive(RetentionTier::Permanent);
        assert!(!p.can_delete(&perm, day0() + Duration::days(100_000), false));
        assert!(!p.can_delete(&perm, day0(), true), "override never unlocks permanent");
    }

    #[test]
    fn test_huge_lifetimes_do_not_overflow() {
        let p = RetentionPolicy {
            standard_days: 1_000_000_000,
            extended_days: i64::MAX,
            max_extension_days: i64::MAX,
        };
        assert_eq!(
            p.compute_expiry(RetentionTier::Standard, day0()),
            Some(DateTime::<Utc>::MAX_UTC)
        );
        assert_eq!(
            p.compute_expiry(RetentionTier::Extended, day0()),
            Some(DateTime::<Utc>::MAX_UTC)
        );

        let err = p
            .extended_expiry(Some(day0()), 1_000_000_000_000)
            .unwrap_err();
        assert!(matches!(err, ArchiveError::PolicyViolation(_)));
        let err = p.extended_expiry(Some(day0()), i64::MAX).unwrap_err();
        assert!(matches!(err, ArchiveError::PolicyViolation(_)));
    }
}
