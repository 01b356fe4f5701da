//! Per-user upload bookkeeping.
//!
//! Tracks upload counts, free-tier size limits, referral codes and
//! single-use premium keys on top of a small key-value [`RecordStore`].
//! Which rules apply is selected with a [`FeatureSet`]. The upload core
//! never depends on this crate.

pub mod record;
pub mod service;
pub mod store;

pub use record::{
    DEFAULT_FREE_MAX_BYTES, DEFAULT_REFERRALS_FOR_PREMIUM, FeatureSet, QuotaPolicy, UserRecord,
};
pub use service::{AccountError, Accounts, ReferralInfo, Registration};
pub use store::{JsonFileStore, MemoryStore, RecordStore, StoreError};
