use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use time::{Duration, OffsetDateTime};
use tracing::info;

use crate::auth::redact;
use crate::clock::{Clock, SystemClock};

/// How long a credential stays excluded after a confirmed upstream error.
pub const BLACKLIST_COOLDOWN: Duration = Duration::hours(24);

const FINGERPRINT_PREFIX: &str = "device";

#[derive(Debug, Clone)]
pub struct FingerprintEntry {
    pub value: String,
    pub created_at: OffsetDateTime,
}

/// Process-wide credential state: blacklist, usage counters and fingerprints.
///
/// All three maps are keyed by the credential secret itself. The registry is
/// shared by every in-flight request; counters are only approximate under
/// concurrency, which is accepted. Clock and RNG are injectable so expiry and
/// tie-break behavior are deterministic under test.
pub struct CredentialRegistry {
    blacklist: DashMap<String, OffsetDateTime>,
    usage: DashMap<String, u64>,
    fingerprints: DashMap<String, FingerprintEntry>,
    default_fingerprint: Option<String>,
    clock: Arc<dyn Clock>,
    rng: Mutex<StdRng>,
}

impl CredentialRegistry {
    pub fn new(default_fingerprint: Option<String>) -> Self {
        Self::with_parts(
            default_fingerprint,
            Arc::new(SystemClock),
            StdRng::from_os_rng(),
        )
    }

    pub fn with_parts(
        default_fingerprint: Option<String>,
        clock: Arc<dyn Clock>,
        rng: StdRng,
    ) -> Self {
        Self {
            blacklist: DashMap::new(),
            usage: DashMap::new(),
            fingerprints: DashMap::new(),
            default_fingerprint,
            clock,
            rng: Mutex::new(rng),
        }
    }

    pub fn now(&self) -> OffsetDateTime {
        self.clock.now()
    }

    /// Liveness check with lazy expiry: an expired blacklist entry is removed
    /// the first time it is read past its deadline.
    pub fn is_usable(&self, credential: &str) -> bool {
        let expired = match self.blacklist.get(credential) {
            Some(expiry) => {
                if self.clock.now() < *expiry {
                    return false;
                }
                true
            }
            None => return true,
        };
        if expired {
            self.blacklist.remove(credential);
        }
        true
    }

    /// Filters parsed candidates down to those not currently blacklisted.
    pub fn usable_pool(&self, candidates: Vec<String>) -> Vec<String> {
        candidates
            .into_iter()
            .filter(|credential| self.is_usable(credential))
            .collect()
    }

    /// Least-usage selection with a uniformly random tie-break.
    ///
    /// A single survivor is used directly. Otherwise all candidates tied at
    /// the minimum usage count are collected and one is drawn at random,
    /// approximating round-robin without deterministic hotspotting.
    ///
    /// Usage counts are snapshotted once per call; concurrent attempts
    /// recorded mid-selection cannot empty the tied set.
    pub fn select<'a>(&self, pool: &'a [String]) -> Option<&'a String> {
        match pool {
            [] => None,
            [only] => Some(only),
            _ => {
                let counts: Vec<(&'a String, u64)> = pool
                    .iter()
                    .map(|credential| (credential, self.usage_count(credential)))
                    .collect();
                let minimum = counts.iter().map(|(_, count)| *count).min()?;
                let tied: Vec<&'a String> = counts
                    .into_iter()
                    .filter(|(_, count)| *count == minimum)
                    .map(|(credential, _)| credential)
                    .collect();
                let mut rng = self.rng.lock().unwrap();
                let pick = rng.random_range(0..tied.len());
                Some(tied[pick])
            }
        }
    }

    pub fn usage_count(&self, credential: &str) -> u64 {
        self.usage
            .get(credential)
            .map(|count| *count)
            .unwrap_or_default()
    }

    /// Counts an attempt as started. Called before the network call, never
    /// rolled back.
    pub fn record_attempt(&self, credential: &str) {
        *self.usage.entry(credential.to_string()).or_insert(0) += 1;
    }

    pub fn blacklist_credential(&self, credential: &str) {
        let expiry = self.clock.now() + BLACKLIST_COOLDOWN;
        info!(
            event = "credential_blacklisted",
            credential = %redact(credential),
            expiry = %expiry,
        );
        self.blacklist.insert(credential.to_string(), expiry);
    }

    /// Stable per-credential upstream session fingerprint.
    ///
    /// Cached write-once for the process lifetime; derivation order is request
    /// override, then the process default, then a generated value. The cache
    /// is not invalidated when the credential is blacklisted.
    pub fn fingerprint(&self, credential: &str, request_override: Option<&str>) -> String {
        let entry = self
            .fingerprints
            .entry(credential.to_string())
            .or_insert_with(|| {
                let value = request_override
                    .map(str::to_string)
                    .or_else(|| self.default_fingerprint.clone())
                    .unwrap_or_else(|| self.generate_fingerprint());
                FingerprintEntry {
                    value,
                    created_at: self.clock.now(),
                }
            });
        entry.value.clone()
    }

    fn generate_fingerprint(&self) -> String {
        let mut rng = self.rng.lock().unwrap();
        let (a, b): (u64, u64) = (rng.random(), rng.random());
        format!("{FINGERPRINT_PREFIX}-{a:016x}-{b:016x}")
    }
}
