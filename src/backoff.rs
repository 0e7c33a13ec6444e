//! Persisted cooldown gate armed when the site serves a captcha challenge.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::codec::unix_millis;
use crate::store::StringSetStore;

/// Store key holding the cooldown expiry in unix millis.
const COOLDOWN_KEY: &str = "captcha_cooldown_until";

/// Gate that suppresses fetching for a fixed window after a captcha.
///
/// The expiry is persisted, so a restart does not reset the window.
#[derive(Clone)]
pub struct CaptchaBackoff {
    store: Arc<dyn StringSetStore>,
    cooldown: Duration,
}

impl CaptchaBackoff {
    /// Creates a gate with the given cooldown window.
    #[must_use]
    pub fn new(store: Arc<dyn StringSetStore>, cooldown: Duration) -> Self {
        Self { store, cooldown }
    }

    /// Returns true while the cooldown window is still open.
    #[must_use]
    pub fn is_active(&self) -> bool {
        unix_millis() < self.store.get_millis(COOLDOWN_KEY)
    }

    /// Re-arms the gate: the window now ends one full cooldown from now.
    pub fn arm(&self) {
        let millis = i64::try_from(self.cooldown.as_millis()).unwrap_or(i64::MAX);
        let until = unix_millis().saturating_add(millis);
        warn!(until, "captcha cooldown armed");
        self.store.put_millis(COOLDOWN_KEY, until);
    }

    /// The configured cooldown window.
    #[must_use]
    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }
}
