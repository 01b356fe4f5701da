//! Account records and feature configuration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default free-tier upload limit (200 MiB).
pub const DEFAULT_FREE_MAX_BYTES: u64 = 200 * 1024 * 1024;

/// Default number of referrals that unlocks premium.
pub const DEFAULT_REFERRALS_FOR_PREMIUM: u64 = 5;

/// Length of generated referral codes.
pub const REF_CODE_LEN: usize = 6;

/// Length of generated premium keys.
pub const PREMIUM_KEY_LEN: usize = 8;

/// Per-user bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    #[serde(default)]
    pub is_premium: bool,
    #[serde(default)]
    pub uploads: u64,
    #[serde(default)]
    pub referrals: u64,
    pub ref_code: String,
    #[serde(default)]
    pub referred_by: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl UserRecord {
    pub fn new(ref_code: impl Into<String>, referred_by: Option<String>) -> Self {
        Self {
            is_premium: false,
            uploads: 0,
            referrals: 0,
            ref_code: ref_code.into(),
            referred_by,
            created_at: Utc::now(),
        }
    }
}

/// Which bookkeeping features are active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FeatureSet {
    /// Free users are limited to the free-tier size.
    #[serde(default)]
    pub quota: bool,
    /// Referral codes are issued and credited.
    #[serde(default)]
    pub referrals: bool,
    /// Admins can mint single-use premium keys.
    #[serde(default)]
    pub premium_keys: bool,
}

impl FeatureSet {
    /// Upload only, no bookkeeping rules.
    pub fn plain() -> Self {
        Self::default()
    }

    /// Size limit for free users.
    pub fn quota() -> Self {
        Self {
            quota: true,
            ..Self::default()
        }
    }

    /// Size limit plus referrals and premium keys.
    pub fn economy() -> Self {
        Self {
            quota: true,
            referrals: true,
            premium_keys: true,
        }
    }
}

/// Limits applied when [`FeatureSet::quota`] and [`FeatureSet::referrals`]
/// are enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaPolicy {
    pub free_max_bytes: u64,
    pub referrals_for_premium: u64,
}

impl Default for QuotaPolicy {
    fn default() -> Self {
        Self {
            free_max_bytes: DEFAULT_FREE_MAX_BYTES,
            referrals_for_premium: DEFAULT_REFERRALS_FOR_PREMIUM,
        }
    }
}
