//! Shared-secret admission control with per-address failure throttling.
//!
//! The gate owns its failure table; it is built once at start-up, handed to
//! the router through application state, and pruned after every sweep.

use crate::clock::SharedClock;
use parking_lot::Mutex;
use std::collections::HashMap;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{debug, warn};

/// Tunables for [`AdmissionGate`].
#[derive(Clone)]
pub struct AdmissionSettings {
    /// Upload password. `None` (or empty) denies everything.
    pub secret: Option<String>,
    /// Failures tolerated inside one window before the address is blocked.
    pub max_failures: u32,
    /// Window length in seconds, counted from the first failure.
    pub window_secs: i64,
    /// Upper bound on addresses tracked at once.
    pub max_tracked: usize,
}

impl Default for AdmissionSettings {
    fn default() -> Self {
        Self {
            secret: None,
            max_failures: 5,
            window_secs: 60,
            max_tracked: 10_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Denied(DenyReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DenyReason {
    #[error("invalid password")]
    InvalidSecret,
    #[error("too many failed attempts, try again later")]
    RateLimited,
}

#[derive(Debug, Clone, Copy)]
struct FailureWindow {
    failure_count: u32,
    window_reset_at: i64,
}

impl FailureWindow {
    fn is_open(&self, now: i64) -> bool {
        now <= self.window_reset_at
    }
}

pub struct AdmissionGate {
    secret: Option<Vec<u8>>,
    max_failures: u32,
    window_secs: i64,
    max_tracked: usize,
    clock: SharedClock,
    failures: Mutex<HashMap<String, FailureWindow>>,
}

impl AdmissionGate {
    pub fn new(settings: AdmissionSettings, clock: SharedClock) -> Self {
        let secret = settings
            .secret
            .filter(|s| !s.is_empty())
            .map(String::into_bytes);
        if secret.is_none() {
            warn!("no upload password configured; every upload will be rejected");
        }

        Self {
            secret,
            max_failures: settings.max_failures.max(1),
            window_secs: settings.window_secs.max(1),
            max_tracked: settings.max_tracked.max(1),
            clock,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Decide whether `client` may proceed with `supplied` as the password.
    ///
    /// `supplied` is compared as raw bytes, so any encoding the client sent
    /// in the header works as long as it matches the configured secret's
    /// UTF-8 bytes. A blocked address is refused before the secret is looked at. A
    /// successful attempt leaves the failure counter untouched; only the
    /// window running out clears it.
    pub fn authorize(&self, client: &str, supplied: impl AsRef<[u8]>) -> Decision {
        let now = self.clock.now();

        if self.is_rate_limited(client, now) {
            debug!(client, "admission refused: rate limited");
            return Decision::Denied(DenyReason::RateLimited);
        }

        let matches = self
            .secret
            .as_deref()
            .is_some_and(|expected| secrets_match(supplied.as_ref(), expected));
        if matches {
            return Decision::Allowed;
        }

        self.record_failure(client, now);
        debug!(client, "admission refused: invalid secret");
        Decision::Denied(DenyReason::InvalidSecret)
    }

    fn is_rate_limited(&self, client: &str, now: i64) -> bool {
        self.failures
            .lock()
            .get(client)
            .is_some_and(|w| w.is_open(now) && w.failure_count >= self.max_failures)
    }

    fn record_failure(&self, client: &str, now: i64) {
        let mut failures = self.failures.lock();

        if !failures.contains_key(client) && failures.len() >= self.max_tracked {
            failures.retain(|_, w| w.is_open(now));
            if failures.len() >= self.max_tracked {
                let oldest = failures
                    .iter()
                    .min_by_key(|(_, w)| w.window_reset_at)
                    .map(|(addr, _)| addr.clone());
                if let Some(addr) = oldest {
                    failures.remove(&addr);
                }
            }
        }

        let window_secs = self.window_secs;
        failures
            .entry(client.to_string())
            .and_modify(|w| {
                if w.is_open(now) {
                    w.failure_count = w.failure_count.saturating_add(1);
                } else {
                    *w = FailureWindow {
                        failure_count: 1,
                        window_reset_at: now.saturating_add(window_secs),
                    };
                }
            })
            .or_insert(FailureWindow {
                failure_count: 1,
                window_reset_at: now.saturating_add(window_secs),
            });
    }

    /// Drop entries whose window has elapsed. Returns how many went away.
    pub fn prune(&self) -> usize {
        let now = self.clock.now();
        let mut failures = self.failures.lock();
        let before = failures.len();
        failures.retain(|_, w| w.is_open(now));
        before - failures.len()
    }

    /// Number of addresses currently tracked.
    pub fn tracked(&self) -> usize {
        self.failures.lock().len()
    }
}

/// Constant-time password comparison.
///
/// Lengths are compared first; equal-length inputs are always scanned in
/// full, so the position of the first differing byte does not show up in
/// the running time.
pub fn secrets_match(supplied: &[u8], expected: &[u8]) -> bool {
    supplied.ct_eq(expected).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use proptest::prelude::*;
    use std::sync::Arc;

    const SECRET: &str = "hunter2-correct-horse";

    fn gate_at(clock: Arc<ManualClock>) -> AdmissionGate {
        AdmissionGate::new(
            AdmissionSettings {
                secret: Some(SECRET.into()),
                ..AdmissionSettings::default()
            },
            clock,
        )
    }

    #[test]
    fn correct_secret_is_allowed() {
        let gate = gate_at(ManualClock::at(0));
        assert_eq!(gate.authorize("10.0.0.1", SECRET), Decision::Allowed);
        assert_eq!(gate.tracked(), 0);
    }

    #[test]
    fn wrong_secret_is_denied_and_recorded() {
        let gate = gate_at(ManualClock::at(0));
        assert_eq!(
            gate.authorize("10.0.0.1", "nope"),
            Decision::Denied(DenyReason::InvalidSecret)
        );
        assert_eq!(gate.tracked(), 1);
    }

    #[test]
    fn missing_secret_denies_everything() {
        for secret in [None, Some(String::new())] {
            let gate = AdmissionGate::new(
                AdmissionSettings {
                    secret,
                    ..AdmissionSettings::default()
                },
                ManualClock::at(0),
            );
            assert_eq!(
                gate.authorize("10.0.0.1", ""),
                Decision::Denied(DenyReason::InvalidSecret)
            );
            assert_eq!(
                gate.authorize("10.0.0.1", "anything"),
                Decision::Denied(DenyReason::InvalidSecret)
            );
        }
    }

    #[test]
    fn sixth_attempt_is_rate_limited_even_with_correct_secret() {
        let clock = ManualClock::at(1_000);
        let gate = gate_at(clock.clone());

        for _ in 0..5 {
            assert_eq!(
                gate.authorize("10.0.0.1", "wrong"),
                Decision::Denied(DenyReason::InvalidSecret)
            );
            clock.advance(5);
        }
        assert_eq!(
            gate.authorize("10.0.0.1", SECRET),
            Decision::Denied(DenyReason::RateLimited)
        );

        // Other addresses are unaffected.
        assert_eq!(gate.authorize("10.0.0.2", SECRET), Decision::Allowed);

        // Window opened at t=1000 and ends at t=1060.
        clock.set(1_060);
        assert_eq!(
            gate.authorize("10.0.0.1", SECRET),
            Decision::Denied(DenyReason::RateLimited)
        );
        clock.set(1_061);
        assert_eq!(gate.authorize("10.0.0.1", SECRET), Decision::Allowed);
    }

    #[test]
    fn success_does_not_reset_the_counter() {
        let clock = ManualClock::at(0);
        let gate = gate_at(clock.clone());

        for _ in 0..4 {
            gate.authorize("10.0.0.1", "wrong");
        }
        assert_eq!(gate.authorize("10.0.0.1", SECRET), Decision::Allowed);
        gate.authorize("10.0.0.1", "wrong");
        assert_eq!(
            gate.authorize("10.0.0.1", SECRET),
            Decision::Denied(DenyReason::RateLimited)
        );
    }

    #[test]
    fn failures_after_the_window_start_a_fresh_count() {
        let clock = ManualClock::at(0);
        let gate = gate_at(clock.clone());

        for _ in 0..4 {
            gate.authorize("10.0.0.1", "wrong");
        }
        clock.set(61);
        for _ in 0..4 {
            gate.authorize("10.0.0.1", "wrong");
        }
        assert_eq!(gate.authorize("10.0.0.1", SECRET), Decision::Allowed);
    }

    #[test]
    fn prune_drops_elapsed_windows_only() {
        let clock = ManualClock::at(0);
        let gate = gate_at(clock.clone());

        gate.authorize("old", "wrong");
        clock.set(30);
        gate.authorize("new", "wrong");

        clock.set(61);
        assert_eq!(gate.prune(), 1);
        assert_eq!(gate.tracked(), 1);
        clock.set(91);
        assert_eq!(gate.prune(), 1);
        assert_eq!(gate.tracked(), 0);
    }

    #[test]
    fn table_is_bounded() {
        let clock = ManualClock::at(0);
        let gate = AdmissionGate::new(
            AdmissionSettings {
                secret: Some(SECRET.into()),
                max_tracked: 3,
                ..AdmissionSettings::default()
            },
            clock.clone(),
        );

        for i in 0..10 {
            clock.advance(1);
            gate.authorize(&format!("10.0.0.{i}"), "wrong");
            assert!(gate.tracked() <= 3);
        }
        // The most recent offender is still tracked.
        for _ in 0..4 {
            gate.authorize("10.0.0.9", "wrong");
        }
        assert_eq!(
            gate.authorize("10.0.0.9", SECRET),
            Decision::Denied(DenyReason::RateLimited)
        );
    }

    #[test]
    fn non_ascii_secret_is_compared_bytewise() {
        let clock = ManualClock::at(0);
        let gate = AdmissionGate::new(
            AdmissionSettings {
                secret: Some("pässwörd".into()),
                ..AdmissionSettings::default()
            },
            clock,
        );
        assert_eq!(
            gate.authorize("10.0.0.1", "pässwörd".as_bytes()),
            Decision::Allowed
        );
        assert_eq!(
            gate.authorize("10.0.0.1", b"p\xe4ssw\xf6rd"),
            Decision::Denied(DenyReason::InvalidSecret)
        );
    }

    #[test]
    fn enormous_window_does_not_overflow() {
        let clock = ManualClock::at(i64::MAX - 10);
        let gate = AdmissionGate::new(
            AdmissionSettings {
                secret: Some(SECRET.into()),
                window_secs: i64::MAX,
                ..AdmissionSettings::default()
            },
            clock.clone(),
        );
        for _ in 0..5 {
            gate.authorize("10.0.0.1", "wrong");
        }
        assert_eq!(
            gate.authorize("10.0.0.1", SECRET),
            Decision::Denied(DenyReason::RateLimited)
        );
        clock.advance(5);
        assert_eq!(gate.prune(), 0);
    }

    #[test]
    fn length_mismatch_never_matches() {
        assert!(!secrets_match(b"abc", b"abcd"));
        assert!(!secrets_match(b"", b"a"));
        assert!(secrets_match(b"", b""));
    }

    proptest! {
        #[test]
        fn identical_secrets_match(secret in proptest::collection::vec(any::<u8>(), 0..64)) {
            prop_assert!(secrets_match(&secret, &secret.clone()));
        }

        #[test]
        fn any_single_byte_difference_is_detected(
            secret in proptest::collection::vec(any::<u8>(), 1..64),
            pos in any::<proptest::sample::Index>(),
            flip in 1u8..=255,
        ) {
            let idx = pos.index(secret.len());
            let mut tampered = secret.clone();
            tampered[idx] ^= flip;
            prop_assert!(!secrets_match(&tampered, &secret));
        }

        #[test]
        fn first_and_last_byte_mismatches_are_both_rejected(
            secret in proptest::collection::vec(any::<u8>(), 2..64),
        ) {
            let mut first = secret.clone();
            first[0] = first[0].wrapping_add(1);
            let mut last = secret.clone();
            let end = last.len() - 1;
            last[end] = last[end].wrapping_add(1);

            prop_assert_eq!(secrets_match(&first, &secret), secrets_match(&last, &secret));
            prop_assert!(!secrets_match(&first, &secret));
        }
    }
}
