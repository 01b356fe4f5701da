//! Account operations on top of a [`RecordStore`].
//!
//! Records live under three key namespaces:
//! - `user/<id>`: the [`UserRecord`]
//! - `refcode/<code>`: id of the user owning a referral code
//! - `key/<key>`: an unredeemed premium key

use chrono::Utc;
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::record::{FeatureSet, PREMIUM_KEY_LEN, QuotaPolicy, REF_CODE_LEN, UserRecord};
use crate::store::{RecordStore, StoreError};

/// Attempts at drawing an unused random code before giving up.
const CODE_ATTEMPTS: usize = 32;

/// Errors from account operations.
#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    #[error("file of {size} bytes exceeds the free limit of {limit} bytes")]
    QuotaExceeded { size: u64, limit: u64 },

    #[error("invalid or already used key")]
    InvalidKey,

    #[error("user {0} is not allowed to do this")]
    Unauthorized(String),

    #[error("unknown user {0}")]
    UnknownUser(String),

    #[error("{0} are disabled")]
    FeatureDisabled(&'static str),

    #[error("could not allocate an unused code")]
    CodeExhausted,

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("corrupt record: {0}")]
    Record(#[from] serde_json::Error),
}

/// Outcome of [`Accounts::register`].
#[derive(Debug, Clone)]
pub struct Registration {
    pub record: UserRecord,
    /// False when the user already existed.
    pub created: bool,
    /// User credited for the referral, if any.
    pub referrer: Option<String>,
}

/// Referral status shown to a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReferralInfo {
    pub ref_code: String,
    pub referrals: u64,
    pub is_premium: bool,
    pub referrals_for_premium: u64,
}

/// Upload bookkeeping: quotas, referrals and premium keys.
pub struct Accounts<S> {
    store: S,
    features: FeatureSet,
    policy: QuotaPolicy,
    admin_id: Option<String>,
}

impl<S: RecordStore> Accounts<S> {
    pub fn new(store: S, features: FeatureSet) -> Self {
        Self {
            store,
            features,
            policy: QuotaPolicy::default(),
            admin_id: None,
        }
    }

    pub fn with_policy(mut self, policy: QuotaPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the only user allowed to grant premium and mint keys.
    pub fn with_admin(mut self, admin_id: impl Into<String>) -> Self {
        self.admin_id = Some(admin_id.into());
        self
    }

    pub fn features(&self) -> FeatureSet {
        self.features
    }

    pub fn policy(&self) -> QuotaPolicy {
        self.policy
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Creates a user record if none exists.
    ///
    /// A valid referral code from another user credits that user, who becomes
    /// premium once their referral count reaches the policy threshold. Codes
    /// are ignored for existing users and when referrals are disabled.
    pub fn register(
        &self,
        user_id: &str,
        referral_code: Option<&str>,
    ) -> Result<Registration, AccountError> {
        if let Some(record) = self.user(user_id)? {
            return Ok(Registration {
                record,
                created: false,
                referrer: None,
            });
        }

        let referrer = match referral_code {
            Some(code) if self.features.referrals => self.resolve_referrer(code, user_id)?,
            Some(_) => {
                debug!(user = user_id, "referrals disabled, ignoring code");
                None
            }
            None => None,
        };

        let ref_code = self.claim_code(REF_CODE_LEN, "refcode", json!(user_id))?;
        let record = UserRecord::new(ref_code.clone(), referrer.clone());
        let value = serde_json::to_value(&record)?;

        let mut inserted = false;
        let stored = match self.store.update(&user_key(user_id), &mut |current| match current {
            Some(existing) => Some(existing),
            None => {
                inserted = true;
                Some(value.clone())
            }
        }) {
            Ok(stored) => stored,
            Err(e) => {
                self.release_code("refcode", &ref_code);
                return Err(e.into());
            }
        };

        if !inserted {
            // Lost a race with a concurrent registration.
            self.release_code("refcode", &ref_code);
            let record = parse_user(stored, user_id)?;
            return Ok(Registration {
                record,
                created: false,
                referrer: None,
            });
        }

        if let Some(referrer_id) = &referrer {
            self.credit_referrer(referrer_id)?;
        }

        info!(user = user_id, referred_by = ?referrer, "registered user");
        Ok(Registration {
            record,
            created: true,
            referrer,
        })
    }

    /// Returns the user's record, creating it without a referral if missing.
    pub fn ensure_user(&self, user_id: &str) -> Result<UserRecord, AccountError> {
        Ok(self.register(user_id, None)?.record)
    }

    pub fn user(&self, user_id: &str) -> Result<Option<UserRecord>, AccountError> {
        match self.store.get(&user_key(user_id))? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub fn referral_info(&self, user_id: &str) -> Result<ReferralInfo, AccountError> {
        if !self.features.referrals {
            return Err(AccountError::FeatureDisabled("referrals"));
        }
        let record = self
            .user(user_id)?
            .ok_or_else(|| AccountError::UnknownUser(user_id.to_string()))?;
        Ok(ReferralInfo {
            ref_code: record.ref_code,
            referrals: record.referrals,
            is_premium: record.is_premium,
            referrals_for_premium: self.policy.referrals_for_premium,
        })
    }

    /// Checks whether `user_id` may upload a file of `size` bytes.
    pub fn check_upload(&self, user_id: &str, size: u64) -> Result<UserRecord, AccountError> {
        let record = self.ensure_user(user_id)?;
        if self.features.quota && !record.is_premium && size > self.policy.free_max_bytes {
            debug!(user = user_id, size, "upload over free limit");
            return Err(AccountError::QuotaExceeded {
                size,
                limit: self.policy.free_max_bytes,
            });
        }
        Ok(record)
    }

    /// Counts one completed upload. Returns the new total.
    pub fn record_upload(&self, user_id: &str) -> Result<u64, AccountError> {
        self.ensure_user(user_id)?;
        let uploads = self.store.increment(&user_key(user_id), "uploads", 1)?;
        Ok(u64::try_from(uploads).unwrap_or_default())
    }

    /// Consumes a premium key and upgrades the user.
    pub fn redeem_key(&self, user_id: &str, key: &str) -> Result<UserRecord, AccountError> {
        if !self.features.premium_keys {
            return Err(AccountError::FeatureDisabled("premium keys"));
        }
        self.ensure_user(user_id)?;
        if self.store.remove(&code_key("key", key))?.is_none() {
            warn!(user = user_id, "invalid premium key");
            return Err(AccountError::InvalidKey);
        }
        let record = self
            .set_premium(user_id)?
            .ok_or_else(|| AccountError::UnknownUser(user_id.to_string()))?;
        info!(user = user_id, "premium activated by key");
        Ok(record)
    }

    /// Upgrades an existing user. Admin only.
    pub fn grant_premium(&self, actor: &str, user_id: &str) -> Result<UserRecord, AccountError> {
        self.authorize(actor)?;
        let record = self
            .set_premium(user_id)?
            .ok_or_else(|| AccountError::UnknownUser(user_id.to_string()))?;
        info!(user = user_id, by = actor, "premium granted");
        Ok(record)
    }

    /// Mints a single-use premium key. Admin only.
    pub fn generate_key(&self, actor: &str) -> Result<String, AccountError> {
        self.authorize(actor)?;
        if !self.features.premium_keys {
            return Err(AccountError::FeatureDisabled("premium keys"));
        }
        let key = self.claim_code(
            PREMIUM_KEY_LEN,
            "key",
            json!({ "created_by": actor, "created_at": Utc::now() }),
        )?;
        info!(by = actor, "premium key generated");
        Ok(key)
    }

    fn authorize(&self, actor: &str) -> Result<(), AccountError> {
        match &self.admin_id {
            Some(admin) if admin == actor => Ok(()),
            _ => Err(AccountError::Unauthorized(actor.to_string())),
        }
    }

    /// Frees a claimed code whose owner was never stored.
    fn release_code(&self, namespace: &str, code: &str) {
        if let Err(e) = self.store.remove(&code_key(namespace, code)) {
            warn!(namespace, error = %e, "failed to release unused code");
        }
    }

    fn resolve_referrer(&self, code: &str, user_id: &str) -> Result<Option<String>, AccountError> {
        let owner = self
            .store
            .get(&code_key("refcode", code))?
            .and_then(|v| v.as_str().map(str::to_string));
        match owner {
            Some(owner) if owner != user_id => Ok(Some(owner)),
            Some(_) => Ok(None),
            None => {
                debug!(user = user_id, "unknown referral code");
                Ok(None)
            }
        }
    }

    fn credit_referrer(&self, referrer_id: &str) -> Result<(), AccountError> {
        let threshold = self.policy.referrals_for_premium;
        let updated = self.modify_user(referrer_id, |record| {
            record.referrals += 1;
            if record.referrals >= threshold {
                record.is_premium = true;
            }
        })?;
        if let Some(record) = updated {
            debug!(user = referrer_id, referrals = record.referrals, "referral credited");
            if record.is_premium && record.referrals == threshold {
                info!(user = referrer_id, "premium unlocked by referrals");
            }
        }
        Ok(())
    }

    fn set_premium(&self, user_id: &str) -> Result<Option<UserRecord>, AccountError> {
        self.modify_user(user_id, |record| record.is_premium = true)
    }

    /// Read-modify-write of an existing user record under the store lock.
    fn modify_user(
        &self,
        user_id: &str,
        mut f: impl FnMut(&mut UserRecord),
    ) -> Result<Option<UserRecord>, AccountError> {
        let mut outcome: Result<Option<UserRecord>, AccountError> = Ok(None);
        self.store.update(&user_key(user_id), &mut |current| {
            let value = current?;
            match serde_json::from_value::<UserRecord>(value.clone()) {
                Ok(mut record) => {
                    f(&mut record);
                    match serde_json::to_value(&record) {
                        Ok(next) => {
                            outcome = Ok(Some(record));
                            Some(next)
                        }
                        Err(e) => {
                            outcome = Err(e.into());
                            Some(value)
                        }
                    }
                }
                Err(e) => {
                    outcome = Err(e.into());
                    Some(value)
                }
            }
        })?;
        outcome
    }

    /// Draws random codes until one is unused in `namespace`, then stores
    /// `value` under it.
    fn claim_code(&self, len: usize, namespace: &str, value: Value) -> Result<String, AccountError> {
        for _ in 0..CODE_ATTEMPTS {
            let code = random_code(len);
            let mut claimed = false;
            self.store.update(&code_key(namespace, &code), &mut |current| match current {
                Some(existing) => Some(existing),
                None => {
                    claimed = true;
                    Some(value.clone())
                }
            })?;
            if claimed {
                return Ok(code);
            }
        }
        Err(AccountError::CodeExhausted)
    }
}

fn user_key(user_id: &str) -> String {
    format!("user/{user_id}")
}

fn code_key(namespace: &str, code: &str) -> String {
    format!("{namespace}/{code}")
}

fn parse_user(value: Option<Value>, user_id: &str) -> Result<UserRecord, AccountError> {
    let value = value.ok_or_else(|| AccountError::UnknownUser(user_id.to_string()))?;
    Ok(serde_json::from_value(value)?)
}

/// Mixed-case alphanumeric code of `len` characters.
fn random_code(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
