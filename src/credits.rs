//! Usage credits keyed by account email.
//!
//! Balances live behind [`CreditStore`] so they survive restarts and stay
//! consistent across concurrent requests.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use crate::error::{Error, Result};

/// Credits granted by one purchased pack.
pub const CREDIT_PACK_SIZE: u32 = 100;

/// Narrow interface to the credit ledger.
pub trait CreditStore: Send + Sync {
    /// Current balance; unknown accounts have zero.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be read.
    fn balance(&self, email: &str) -> Result<u32>;

    /// Add `delta` (possibly negative) and return the new balance.
    ///
    /// Balances saturate at zero and at `u32::MAX`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be updated.
    fn adjust(&self, email: &str, delta: i64) -> Result<u32>;

    /// Take one credit if the balance allows it, as a single step.
    ///
    /// Returns `false` and leaves the balance untouched when it is zero.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be updated.
    fn try_debit(&self, email: &str) -> Result<bool>;

    /// Credit a purchased pack.
    ///
    /// # Errors
    ///
    /// As [`CreditStore::adjust`].
    fn grant(&self, email: &str, credits: u32) -> Result<u32> {
        self.adjust(email, i64::from(credits))
    }
}

/// Ledger persisted as a JSON object of `email -> credits`.
///
/// Every adjustment is written through to disk before it returns.
#[derive(Debug)]
pub struct FileCreditStore {
    path: PathBuf,
    balances: Mutex<BTreeMap<String, u32>>,
}

impl FileCreditStore {
    /// Open a ledger file, starting empty if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file exists but cannot be read or parsed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let balances = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            serde_json::from_str(&content)?
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path,
            balances: Mutex::new(balances),
        })
    }

    fn persist(&self, balances: &BTreeMap<String, u32>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(balances)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<String, u32>>> {
        self.balances
            .lock()
            .map_err(|_| Error::Io(std::io::Error::other("credit ledger lock poisoned")))
    }

    /// Write `updated` for `key` to disk, then to memory.
    fn commit(
        &self,
        balances: &mut BTreeMap<String, u32>,
        key: String,
        updated: u32,
    ) -> Result<()> {
        let mut next = balances.clone();
        next.insert(key, updated);
        self.persist(&next)?;
        *balances = next;
        Ok(())
    }
}

fn normalize(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

impl CreditStore for FileCreditStore {
    fn balance(&self, email: &str) -> Result<u32> {
        let balances = self.lock()?;
        Ok(balances.get(&normalize(email)).copied().unwrap_or(0))
    }

    fn adjust(&self, email: &str, delta: i64) -> Result<u32> {
        let mut balances = self.lock()?;
        let key = normalize(email);
        let current = i64::from(balances.get(&key).copied().unwrap_or(0));
        let updated = u32::try_from(current.saturating_add(delta).max(0)).unwrap_or(u32::MAX);
        self.commit(&mut balances, key, updated)?;
        Ok(updated)
    }

    fn try_debit(&self, email: &str) -> Result<bool> {
        let mut balances = self.lock()?;
        let key = normalize(email);
        match balances.get(&key).copied().unwrap_or(0) {
            0 => Ok(false),
            current => {
                self.commit(&mut balances, key, current - 1)?;
                Ok(true)
            }
        }
    }
}
