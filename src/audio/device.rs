//! Process-wide registry of claimed input devices.
//!
//! A session holds a `DeviceClaim` for as long as its Frame Source is open.
//! A second claim on the same device name fails with `DeviceBusy` until the
//! first claim is dropped.

use crate::error::{HeyvoxError, Result};
use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard};

static CLAIMED: Mutex<BTreeSet<String>> = Mutex::new(BTreeSet::new());

fn claimed() -> MutexGuard<'static, BTreeSet<String>> {
    // The set stays consistent even if a holder panicked mid-insert.
    CLAIMED.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Exclusive claim on an input device. Released on drop.
#[derive(Debug)]
pub struct DeviceClaim {
    name: String,
}

impl DeviceClaim {
    /// Claim `name`, failing with `DeviceBusy` if another session holds it.
    pub fn acquire(name: &str) -> Result<Self> {
        let mut set = claimed();
        if !set.insert(name.to_string()) {
            return Err(HeyvoxError::DeviceBusy {
                device: name.to_string(),
            });
        }
        tracing::debug!(device = name, "device claimed");
        Ok(Self {
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for DeviceClaim {
    fn drop(&mut self) {
        claimed().remove(&self.name);
        tracing::debug!(device = %self.name, "device released");
    }
}

/// True if some session currently holds `name`.
pub fn is_claimed(name: &str) -> bool {
    claimed().contains(name)
}
