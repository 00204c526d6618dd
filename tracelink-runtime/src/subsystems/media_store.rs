//! Content-hash → reference-id store shared by every upload worker.
//!
//! A worker claims a hash before uploading it. While the claim is held, other
//! workers asking for the same hash get a receiver and wait for the outcome
//! instead of uploading the bytes a second time.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use tokio::sync::watch;

type Outcome = Option<Result<String, String>>;

enum Slot {
    Ready(String),
    InFlight(watch::Sender<Outcome>),
}

/// Result of [`MediaStore::claim`].
pub enum Claim<'a> {
    /// Already uploaded.
    Hit(String),
    /// The caller owns the upload and must commit or release the claim.
    Owner(HashClaim<'a>),
    /// Another worker is uploading the same bytes.
    Wait(watch::Receiver<Outcome>),
}

#[derive(Default)]
pub struct MediaStore {
    slots: Mutex<HashMap<String, Slot>>,
}

impl MediaStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Committed reference for `hash`. In-flight uploads are not visible.
    pub fn get(&self, hash: &str) -> Option<String> {
        match self.slots().get(hash) {
            Some(Slot::Ready(reference)) => Some(reference.clone()),
            _ => None,
        }
    }

    pub fn insert(&self, hash: impl Into<String>, reference: impl Into<String>) {
        self.resolve(hash.into(), Ok(reference.into()));
    }

    pub fn claim(&self, hash: &str) -> Claim<'_> {
        let mut slots = self.slots();
        match slots.get(hash) {
            Some(Slot::Ready(reference)) => Claim::Hit(reference.clone()),
            Some(Slot::InFlight(sender)) => Claim::Wait(sender.subscribe()),
            None => {
                let (sender, _) = watch::channel(None);
                slots.insert(hash.to_string(), Slot::InFlight(sender));
                Claim::Owner(HashClaim {
                    store: self,
                    hash: hash.to_string(),
                    settled: false,
                })
            }
        }
    }

    /// Wait for the owner of an in-flight claim to settle it.
    pub async fn wait(mut receiver: watch::Receiver<Outcome>) -> Result<String, String> {
        match receiver.wait_for(Option::is_some).await {
            Ok(outcome) => (*outcome)
                .clone()
                .unwrap_or_else(|| Err("upload abandoned".to_string())),
            Err(_) => Err("upload abandoned".to_string()),
        }
    }

    /// Number of committed references.
    pub fn len(&self) -> usize {
        self.slots()
            .values()
            .filter(|slot| matches!(slot, Slot::Ready(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn resolve(&self, hash: String, outcome: Result<String, String>) {
        let mut slots = self.slots();
        let previous = match &outcome {
            Ok(reference) => slots.insert(hash, Slot::Ready(reference.clone())),
            Err(_) => slots.remove(&hash),
        };
        if let Some(Slot::InFlight(sender)) = previous {
            sender.send_replace(Some(outcome));
        }
    }
}

/// An upload claim on one content hash. Dropping it unsettled releases it.
pub struct HashClaim<'a> {
    store: &'a MediaStore,
    hash: String,
    settled: bool,
}

impl HashClaim<'_> {
    pub fn commit(mut self, reference: &str) {
        self.settled = true;
        self.store
            .resolve(std::mem::take(&mut self.hash), Ok(reference.to_string()));
    }

    pub fn release(mut self, error: &str) {
        self.settled = true;
        self.store
            .resolve(std::mem::take(&mut self.hash), Err(error.to_string()));
    }
}

impl Drop for HashClaim<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.store.resolve(
                std::mem::take(&mut self.hash),
                Err("upload abandoned".to_string()),
            );
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_claim_owns_and_commit_publishes() {
        let store = MediaStore::new();
        let claim = match store.claim("abc") {
            Claim::Owner(claim) => claim,
            _ => panic!("first claim should own the hash"),
        };
        assert_eq!(store.get("abc"), None);
        assert!(matches!(store.claim("abc"), Claim::Wait(_)));

        claim.commit("ref-1");
        assert_eq!(store.get("abc").as_deref(), Some("ref-1"));
        assert!(matches!(store.claim("abc"), Claim::Hit(r) if r == "ref-1"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_release_frees_hash_for_next_claim() {
        let store = MediaStore::new();
        if let Claim::Owner(claim) = store.claim("abc") {
            claim.release("boom");
        }
        assert!(store.is_empty());
        assert!(matches!(store.claim("abc"), Claim::Owner(_)));
    }

    #[test]
    fn test_dropped_claim_is_released() {
        let store = MediaStore::new();
        {
            let _claim = store.claim("abc");
        }
        assert!(matches!(store.claim("abc"), Claim::Owner(_)));
    }

    #[tokio::test]
    async fn test_waiter_sees_commit() {
        let store = MediaStore::new();
        let owner = match store.claim("abc") {
            Claim::Owner(claim) => claim,
            _ => panic!("expected owner"),
        };
        let receiver = match store.claim("abc") {
            Claim::Wait(receiver) => receiver,
            _ => panic!("expected waiter"),
        };

        owner.commit("ref-9");
        assert_eq!(MediaStore::wait(receiver).await, Ok("ref-9".to_string()));
    }

    #[tokio::test]
    async fn test_waiter_sees_release() {
        let store = MediaStore::new();
        let owner = match store.claim("abc") {
            Claim::Owner(claim) => claim,
            _ => panic!("expected owner"),
        };
        let receiver = match store.claim("abc") {
            Claim::Wait(receiver) => receiver,
            _ => panic!("expected waiter"),
        };

        owner.release("server said no");
        assert_eq!(
            MediaStore::wait(receiver).await,
            Err("server said no".to_string())
        );
    }
}
