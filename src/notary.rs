//! Star notary workflow
//!
//! An address proves ownership before it may write to the ledger:
//!
//! 1. [`NotaryWorkflow::request_challenge`] issues a message bound to the
//!    address and the issue time.
//! 2. The owner signs that message off-band and submits the signature to
//!    [`NotaryWorkflow::verify_challenge`].
//! 3. [`NotaryWorkflow::commit_claim`] spends the verified challenge on
//!    exactly one ledger append.
//!
//! Every step must happen within the validation window of the issue time.
//! Expiry is evaluated against the caller-supplied `now` on each access;
//! nothing runs in the background.

use crate::blockchain::{Block, Ledger};
use crate::crypto::SignatureVerifier;
use crate::error::{ChainError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub const VALIDATION_WINDOW_SECS: i64 = 300;

/// The exact text an address owner must sign.
pub fn challenge_message(address: &str, issued_at: i64) -> String {
    format!("{}:{}:starRegistry", address, issued_at)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeState {
    pub address: String,
    pub issued_at: i64,
    pub window_secs: i64,
    pub signature_valid: bool,
    pub consumed: bool,
}

impl ChallengeState {
    fn issue(address: &str, now: i64, window_secs: i64) -> Self {
        ChallengeState {
            address: address.to_string(),
            issued_at: now,
            window_secs,
            signature_valid: false,
            consumed: false,
        }
    }

    pub fn message(&self) -> String {
        challenge_message(&self.address, self.issued_at)
    }

    pub fn remaining_secs(&self, now: i64) -> i64 {
        self.window_secs - (now - self.issued_at)
    }

    pub fn is_expired(&self, now: i64) -> bool {
        now - self.issued_at > self.window_secs
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeResponse {
    pub address: String,
    #[serde(rename = "requestTimeStamp")]
    pub issued_at: i64,
    pub message: String,
    #[serde(rename = "validationWindow")]
    pub remaining_seconds: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VerificationOutcome {
    pub valid: bool,
    pub remaining_seconds: i64,
}

pub struct NotaryWorkflow {
    ledger: Arc<Ledger>,
    verifier: Box<dyn SignatureVerifier>,
    window_secs: i64,
    challenges: Mutex<HashMap<String, ChallengeState>>,
}

impl NotaryWorkflow {
    pub fn new(ledger: Arc<Ledger>, verifier: Box<dyn SignatureVerifier>) -> Self {
        Self::with_window(ledger, verifier, VALIDATION_WINDOW_SECS)
    }

    pub fn with_window(
        ledger: Arc<Ledger>,
        verifier: Box<dyn SignatureVerifier>,
        window_secs: i64,
    ) -> Self {
        NotaryWorkflow {
            ledger,
            verifier,
            window_secs,
            challenges: Mutex::new(HashMap::new()),
        }
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn window_secs(&self) -> i64 {
        self.window_secs
    }

    /// Snapshot of the challenge currently held for `address`, if any.
    pub fn challenge(&self, address: &str) -> Option<ChallengeState> {
        self.challenges.lock().get(address).cloned()
    }

    /// Returns the live challenge for `address`, or issues a new one when
    /// there is none, it has run out, or it was already spent. A live
    /// challenge keeps its original issue time.
    pub fn request_challenge(&self, address: &str, now: i64) -> ChallengeResponse {
        let mut challenges = self.challenges.lock();
        let live = challenges
            .get(address)
            .filter(|state| !state.consumed && state.remaining_secs(now) > 0)
            .cloned();

        let state = match live {
            Some(state) => state,
            None => {
                let state = ChallengeState::issue(address, now, self.window_secs);
                challenges.insert(address.to_string(), state.clone());
                tracing::info!(address = %address, issued_at = now, "notary.challenge_issued");
                state
            }
        };

        ChallengeResponse {
            address: state.address.clone(),
            issued_at: state.issued_at,
            message: state.message(),
            remaining_seconds: state.remaining_secs(now),
        }
    }

    /// Checks `signature` against the challenge message for `address`. A bad
    /// signature is reported as `valid: false`, not as an error.
    pub fn verify_challenge(
        &self,
        address: &str,
        signature: &str,
        now: i64,
    ) -> Result<VerificationOutcome> {
        let (message, issued_at) = {
            let mut challenges = self.challenges.lock();
            let state = challenges
                .get(address)
                .ok_or_else(|| ChainError::NoChallenge(address.to_string()))?;

            if state.consumed {
                return Err(ChainError::AlreadyConsumed(address.to_string()));
            }
            if state.is_expired(now) {
                challenges.remove(address);
                tracing::info!(address = %address, "notary.challenge_expired");
                return Err(ChainError::ChallengeExpired(address.to_string()));
            }
            (state.message(), state.issued_at)
        };

        // Signature recovery runs without the lock held.
        let valid = self.verifier.verify(&message, address, signature);

        let mut challenges = self.challenges.lock();
        let state = challenges
            .get_mut(address)
            .filter(|state| state.issued_at == issued_at)
            .ok_or_else(|| ChainError::NoChallenge(address.to_string()))?;
        if state.consumed {
            return Err(ChainError::AlreadyConsumed(address.to_string()));
        }

        if valid {
            state.signature_valid = true;
        }
        tracing::info!(address = %address, valid, "notary.signature_checked");

        Ok(VerificationOutcome {
            valid,
            remaining_seconds: state.remaining_secs(now),
        })
    }

    /// Spends the verified challenge for `address` on one ledger append.
    ///
    /// The challenge is marked consumed before the append starts, so it is
    /// spent even if the append fails.
    pub fn commit_claim(&self, address: &str, body: Value, now: i64) -> Result<Block> {
        {
            let mut challenges = self.challenges.lock();
            let state = challenges
                .get_mut(address)
                .ok_or_else(|| ChainError::NotAuthorized(address.to_string()))?;

            if state.consumed {
                return Err(ChainError::AlreadyConsumed(address.to_string()));
            }
            if state.is_expired(now) {
                challenges.remove(address);
                return Err(ChainError::NotAuthorized(address.to_string()));
            }
            if !state.signature_valid {
                return Err(ChainError::NotAuthorized(address.to_string()));
            }
            state.consumed = true;
        }

        match self.ledger.append(body) {
            Ok(block) => {
                tracing::info!(address = %address, height = block.height, "notary.claim_committed");
                Ok(block)
            }
            Err(e) => {
                tracing::error!(address = %address, error = %e, "notary.claim_append_failed");
                Err(e)
            }
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryPersistence;
    use serde_json::json;

    /// Accepts exactly one signature string.
    struct FixedVerifier(&'static str);

    impl SignatureVerifier for FixedVerifier {
        fn verify(&self, _message: &str, _address: &str, signature: &str) -> bool {
            signature == self.0
        }
    }

    fn notary() -> NotaryWorkflow {
        let ledger = Ledger::open(Box::new(InMemoryPersistence::new())).unwrap();
        NotaryWorkflow::new(Arc::new(ledger), Box::new(FixedVerifier("good")))
    }

    #[test]
    fn test_request_issues_message() {
        let notary = notary();
        let response = notary.request_challenge("addrA", 1_000);
        assert_eq!(response.issued_at, 1_000);
        assert_eq!(response.message, "addrA:1000:starRegistry");
        assert_eq!(response.remaining_seconds, VALIDATION_WINDOW_SECS);
        assert_eq!(notary.ledger().get_height(), 0);
    }

    #[test]
    fn test_rerequest_keeps_issue_time() {
        let notary = notary();
        notary.request_challenge("addrC", 0);
        let again = notary.request_challenge("addrC", 100);
        assert_eq!(again.issued_at, 0);
        assert_eq!(again.remaining_seconds, 200);
    }

    #[test]
    fn test_rerequest_after_window_reissues() {
        let notary = notary();
        notary.request_challenge("addrC", 0);
        let again = notary.request_challenge("addrC", 300);
        assert_eq!(again.issued_at, 300);
        assert_eq!(again.remaining_seconds, 300);
    }

    #[test]
    fn test_verify_without_request() {
        let notary = notary();
        assert!(matches!(
            notary.verify_challenge("nobody", "good", 0),
            Err(ChainError::NoChallenge(_))
        ));
    }

    #[test]
    fn test_verify_expired_clears_state() {
        let notary = notary();
        notary.request_challenge("addrB", 0);
        assert!(matches!(
            notary.verify_challenge("addrB", "good", 301),
            Err(ChainError::ChallengeExpired(_))
        ));
        assert!(notary.challenge("addrB").is_none());
    }

    #[test]
    fn test_bad_signature_is_not_an_error() {
        let notary = notary();
        notary.request_challenge("addrA", 0);
        let outcome = notary.verify_challenge("addrA", "bad", 10).unwrap();
        assert!(!outcome.valid);
        assert_eq!(outcome.remaining_seconds, 290);
        assert!(!notary.challenge("addrA").unwrap().signature_valid);
    }

    #[test]
    fn test_verify_is_idempotent() {
        let notary = notary();
        notary.request_challenge("addrA", 0);
        assert!(notary.verify_challenge("addrA", "good", 10).unwrap().valid);
        let again = notary.verify_challenge("addrA", "good", 20).unwrap();
        assert!(again.valid);
        assert_eq!(again.remaining_seconds, 280);
    }

    #[test]
    fn test_full_claim_cycle() {
        let notary = notary();
        notary.request_challenge("addrA", 0);
        assert!(notary.verify_challenge("addrA", "good", 100).unwrap().valid);

        let block = notary.commit_claim("addrA", json!({"n": 1}), 150).unwrap();
        assert_eq!(block.height, 1);

        assert!(matches!(
            notary.commit_claim("addrA", json!({"n": 2}), 151),
            Err(ChainError::AlreadyConsumed(_))
        ));
        assert!(matches!(
            notary.verify_challenge("addrA", "good", 152),
            Err(ChainError::AlreadyConsumed(_))
        ));
        assert_eq!(notary.ledger().get_height(), 1);
    }

    #[test]
    fn test_commit_requires_verified_signature() {
        let notary = notary();
        assert!(matches!(
            notary.commit_claim("addrA", json!(1), 0),
            Err(ChainError::NotAuthorized(_))
        ));

        notary.request_challenge("addrA", 0);
        notary.verify_challenge("addrA", "bad", 1).unwrap();
        assert!(matches!(
            notary.commit_claim("addrA", json!(1), 2),
            Err(ChainError::NotAuthorized(_))
        ));
    }

    #[test]
    fn test_commit_after_window_not_authorized() {
        let notary = notary();
        notary.request_challenge("addrA", 0);
        notary.verify_challenge("addrA", "good", 10).unwrap();
        assert!(matches!(
            notary.commit_claim("addrA", json!(1), 301),
            Err(ChainError::NotAuthorized(_))
        ));
        assert!(notary.challenge("addrA").is_none());
    }

    #[test]
    fn test_new_cycle_after_consumption() {
        let notary = notary();
        notary.request_challenge("addrA", 0);
        notary.verify_challenge("addrA", "good", 1).unwrap();
        notary.commit_claim("addrA", json!(1), 2).unwrap();

        let fresh = notary.request_challenge("addrA", 3);
        assert_eq!(fresh.issued_at, 3);
        notary.verify_challenge("addrA", "good", 4).unwrap();
        assert_eq!(notary.commit_claim("addrA", json!(2), 5).unwrap().height, 2);
    }

    #[test]
    fn test_addresses_are_independent() {
        let notary = notary();
        notary.request_challenge("a", 0);
        notary.request_challenge("b", 50);
        notary.verify_challenge("a", "good", 60).unwrap();
        assert!(matches!(
            notary.commit_claim("b", json!(1), 61),
            Err(ChainError::NotAuthorized(_))
        ));
        assert!(notary.commit_claim("a", json!(1), 62).is_ok());
    }

    #[test]
    fn test_spent_claim_unaffected_by_other_addresses() {
        let quiet = notary();
        let busy = notary();
        for notary in [&quiet, &busy] {
            notary.request_challenge("addrA", 0);
            notary.verify_challenge("addrA", "good", 100).unwrap();
            notary.commit_claim("addrA", json!(1), 150).unwrap();
        }
        busy.request_challenge("someoneElse", 399);

        for notary in [&quiet, &busy] {
            assert!(matches!(
                notary.commit_claim("addrA", json!(2), 400),
                Err(ChainError::AlreadyConsumed(_))
            ));
        }
        assert!(busy.challenge("addrA").unwrap().consumed);
    }

    #[test]
    fn test_verify_reports_claim_spent_during_recovery() {
        struct SpendingVerifier(Arc<Mutex<Option<Arc<NotaryWorkflow>>>>);

        impl SignatureVerifier for SpendingVerifier {
            fn verify(&self, _message: &str, address: &str, _signature: &str) -> bool {
                if let Some(notary) = self.0.lock().take() {
                    notary.commit_claim(address, json!("raced"), 20).unwrap();
                }
                true
            }
        }

        let slot = Arc::new(Mutex::new(None));
        let ledger = Ledger::open(Box::new(InMemoryPersistence::new())).unwrap();
        let notary = Arc::new(NotaryWorkflow::new(
            Arc::new(ledger),
            Box::new(SpendingVerifier(slot.clone())),
        ));
        notary.request_challenge("addrA", 0);
        notary.verify_challenge("addrA", "sig", 10).unwrap();

        *slot.lock() = Some(notary.clone());
        assert!(matches!(
            notary.verify_challenge("addrA", "sig", 20),
            Err(ChainError::AlreadyConsumed(_))
        ));
        assert_eq!(notary.ledger().get_height(), 1);
    }
}
