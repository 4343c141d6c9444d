//! Session persistence, role capabilities and the failed-login lockout.

use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::model::{Role, User};

/// What a role may do. Call sites ask for a capability, never a role name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub can_add: bool,
    pub can_edit: bool,
    pub can_delete: bool,
    pub can_check_in: bool,
    pub can_manage_events: bool,
    pub can_manage_users: bool,
    pub can_unpay_fines: bool,
}

impl Role {
    pub fn capabilities(self) -> Capabilities {
        match self {
            Role::Administrator => Capabilities {
                can_add: true,
                can_edit: true,
                can_delete: true,
                can_check_in: true,
                can_manage_events: true,
                can_manage_users: true,
                can_unpay_fines: true,
            },
            Role::Moderator => Role::Administrator.capabilities(),
            Role::Viewer => Capabilities {
                can_add: false,
                can_edit: false,
                can_delete: false,
                can_check_in: false,
                can_manage_events: false,
                can_manage_users: false,
                can_unpay_fines: false,
            },
        }
    }
}

/// Logged-in user plus bearer token, persisted as `{token, user}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub user: User,
}

impl Session {
    pub fn capabilities(&self) -> Capabilities {
        self.user.role.capabilities()
    }

    /// Fails with `Forbidden(action)` unless `allowed` holds for this role.
    pub fn require(&self, allowed: fn(&Capabilities) -> bool, action: &'static str) -> Result<()> {
        if allowed(&self.capabilities()) {
            Ok(())
        } else {
            Err(Error::Forbidden(action))
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginAttempts {
    pub count: u32,
    #[serde(rename = "lastAttempt")]
    pub last_attempt: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginTimeout {
    #[serde(rename = "blockedUntil")]
    pub blocked_until: i64,
}

const SESSION_FILE: &str = "user.json";
const ATTEMPTS_FILE: &str = "rollcall-login-attempts.json";
const TIMEOUT_FILE: &str = "rollcall-login-timeout.json";

/// Small JSON files under the state directory, one per key.
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn read<T: for<'de> Deserialize<'de>>(&self, name: &str) -> Result<Option<T>> {
        let path = self.dir.join(name);
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn write<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        fs::write(self.dir.join(name), serde_json::to_vec_pretty(value)?)?;
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<()> {
        match fs::remove_file(self.dir.join(name)) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    /// The stored session, if any. A corrupt or tokenless file is removed.
    pub fn load_session(&self) -> Result<Option<Session>> {
        match self.read::<Session>(SESSION_FILE) {
            Ok(Some(s)) if !s.token.is_empty() => Ok(Some(s)),
            Ok(Some(_)) | Err(Error::Json(_)) => {
                warn!("discarding unreadable stored session");
                self.remove(SESSION_FILE)?;
                Ok(None)
            }
            Ok(None) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn save_session(&self, session: &Session) -> Result<()> {
        self.write(SESSION_FILE, session)
    }

    pub fn clear_session(&self) -> Result<()> {
        self.remove(SESSION_FILE)
    }

    /// Reads `name`, removing it with a warning if it does not parse.
    fn read_or_discard<T: for<'de> Deserialize<'de>>(&self, name: &str) -> Result<Option<T>> {
        match self.read(name) {
            Err(Error::Json(e)) => {
                warn!(file = name, error = %e, "discarding unreadable login state");
                self.remove(name)?;
                Ok(None)
            }
            other => other,
        }
    }

    pub fn load_attempts(&self) -> Result<LoginAttempts> {
        Ok(self.read_or_discard(ATTEMPTS_FILE)?.unwrap_or_default())
    }

    pub fn save_attempts(&self, attempts: &LoginAttempts) -> Result<()> {
        self.write(ATTEMPTS_FILE, attempts)
    }

    pub fn load_timeout(&self) -> Result<Option<LoginTimeout>> {
        self.read_or_discard(TIMEOUT_FILE)
    }

    pub fn save_timeout(&self, timeout: &LoginTimeout) -> Result<()> {
        self.write(TIMEOUT_FILE, timeout)
    }

    pub fn clear_timeout(&self) -> Result<()> {
        self.remove(TIMEOUT_FILE)
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Client-side brake on password guessing: after `max_attempts` consecutive
/// failures, further attempts are refused until the lockout passes.
#[derive(Debug, Clone)]
pub struct LoginGuard {
    store: StateStore,
    max_attempts: u32,
    lockout: Duration,
}

impl LoginGuard {
    pub fn new(store: StateStore, max_attempts: u32, lockout: Duration) -> Self {
        Self {
            store,
            max_attempts: max_attempts.max(1),
            lockout,
        }
    }

    /// Errors with `LockedOut` while blocked. An expired block is cleared
    /// along with the failure counter.
    pub fn check(&self, now: DateTime<Utc>) -> Result<()> {
        if let Some(t) = self.store.load_timeout()? {
            let until = from_millis(t.blocked_until);
            if now < until {
                return Err(Error::LockedOut { until });
            }
            debug!("login lockout expired");
            self.store.clear_timeout()?;
            self.store.save_attempts(&LoginAttempts::default())?;
        }
        Ok(())
    }

    /// Counts a failed attempt; returns the lockout end if this one
    /// triggered it.
    pub fn record_failure(&self, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        let mut attempts = self.store.load_attempts()?;
        attempts.count += 1;
        attempts.last_attempt = now.timestamp_millis();
        self.store.save_attempts(&attempts)?;
        if attempts.count >= self.max_attempts {
            let until = now + self.lockout;
            self.store.save_timeout(&LoginTimeout {
                blocked_until: until.timestamp_millis(),
            })?;
            warn!(attempts = attempts.count, %until, "login locked");
            return Ok(Some(until));
        }
        Ok(None)
    }

    pub fn record_success(&self) -> Result<()> {
        self.store.save_attempts(&LoginAttempts::default())?;
        self.store.clear_timeout()
    }

    pub fn remaining_attempts(&self) -> Result<u32> {
        let attempts = self.store.load_attempts()?;
        Ok(self.max_attempts.saturating_sub(attempts.count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::UserId;

    fn session() -> Session {
        Session {
            token: "tok".into(),
            user: User {
                id: UserId::from("1"),
                username: "pres".into(),
                role: Role::Administrator,
            },
        }
    }

    #[test]
    fn session_round_trips_through_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        assert!(store.load_session().unwrap().is_none());
        store.save_session(&session()).unwrap();
        assert_eq!(store.load_session().unwrap(), Some(session()));
        store.clear_session().unwrap();
        assert!(store.load_session().unwrap().is_none());
    }

    #[test]
    fn corrupt_session_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("user.json"), "{not json").unwrap();
        let store = StateStore::new(dir.path());
        assert!(store.load_session().unwrap().is_none());
        assert!(!dir.path().join("user.json").exists());
    }

    #[test]
    fn viewer_cannot_mutate() {
        let caps = Role::Viewer.capabilities();
        assert!(!caps.can_add && !caps.can_edit && !caps.can_delete);
        assert!(!caps.can_unpay_fines);
        let mod_caps = Role::Moderator.capabilities();
        assert!(mod_caps.can_delete && mod_caps.can_manage_users);
        assert!(!caps.can_manage_users);
        let mut s = session();
        s.user.role = Role::Viewer;
        assert!(matches!(
            s.require(|c| c.can_delete, "delete students"),
            Err(Error::Forbidden("delete students"))
        ));
    }

    #[test]
    fn five_failures_lock_until_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let guard = LoginGuard::new(StateStore::new(dir.path()), 5, Duration::minutes(5));
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        for i in 0..4 {
            guard.check(t0).unwrap();
            assert_eq!(guard.record_failure(t0 + Duration::seconds(i)).unwrap(), None);
        }
        let until = guard.record_failure(t0 + Duration::seconds(4)).unwrap();
        assert_eq!(until, Some(t0 + Duration::seconds(4) + Duration::minutes(5)));

        assert!(matches!(
            guard.check(t0 + Duration::minutes(1)),
            Err(Error::LockedOut { .. })
        ));

        guard.check(t0 + Duration::minutes(6)).unwrap();
        assert_eq!(guard.remaining_attempts().unwrap(), 5);
    }

    #[test]
    fn corrupt_lockout_file_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(TIMEOUT_FILE), "{\"blockedUntil\":").unwrap();
        std::fs::write(dir.path().join(ATTEMPTS_FILE), "[]").unwrap();
        let store = StateStore::new(dir.path());
        assert_eq!(store.load_timeout().unwrap(), None);
        assert_eq!(store.load_attempts().unwrap(), LoginAttempts::default());
        assert!(!dir.path().join(TIMEOUT_FILE).exists());
        assert!(!dir.path().join(ATTEMPTS_FILE).exists());
    }

    #[test]
    fn unreadable_lockout_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(TIMEOUT_FILE)).unwrap();
        let store = StateStore::new(dir.path());
        assert!(matches!(store.load_timeout(), Err(Error::Io(_))));
    }

    #[test]
    fn success_resets_counter() {
        let dir = tempfile::tempdir().unwrap();
        let guard = LoginGuard::new(StateStore::new(dir.path()), 5, Duration::minutes(5));
        let now = Utc::now();
        guard.record_failure(now).unwrap();
        guard.record_failure(now).unwrap();
        assert_eq!(guard.remaining_attempts().unwrap(), 3);
        guard.record_success().unwrap();
        assert_eq!(guard.remaining_attempts().unwrap(), 5);
    }
}
