//! Account management and the login/logout flow.

use chrono::{DateTime, Utc};
use tracing::{info, instrument};

use crate::api::{AttendanceApi, Credentials};
use crate::auth::{LoginGuard, Session, StateStore};
use crate::error::{Error, Result};
use crate::forms::UserForm;
use crate::model::{User, UserId};

/// Highest role first, then by name.
pub fn sort_by_role(users: &mut [User]) {
    users.sort_by(|a, b| {
        a.role
            .priority()
            .cmp(&b.role.priority())
            .then_with(|| a.username.cmp(&b.username))
    });
}

pub async fn list(api: &dyn AttendanceApi, session: &Session) -> Result<Vec<User>> {
    session.require(|c| c.can_manage_users, "manage accounts")?;
    let mut users = api.list_users().await?;
    sort_by_role(&mut users);
    Ok(users)
}

pub async fn create(api: &dyn AttendanceApi, session: &Session, form: &UserForm) -> Result<()> {
    session.require(|c| c.can_manage_users, "manage accounts")?;
    let payload = form.validate(true)?;
    api.create_user(&payload).await?;
    info!(username = %payload.username, role = payload.role.as_str(), "account created");
    Ok(())
}

pub async fn update(
    api: &dyn AttendanceApi,
    session: &Session,
    id: &UserId,
    form: &UserForm,
) -> Result<()> {
    session.require(|c| c.can_manage_users, "manage accounts")?;
    let payload = form.validate(false)?;
    api.update_user(id, &payload).await?;
    info!(%id, "account updated");
    Ok(())
}

pub async fn delete(api: &dyn AttendanceApi, session: &Session, id: &UserId) -> Result<()> {
    session.require(|c| c.can_manage_users, "manage accounts")?;
    api.delete_user(id).await?;
    info!(%id, "account deleted");
    Ok(())
}

/// Signs in and persists the session. A lockout is enforced before any
/// request; only rejections from the server count as failed attempts.
#[instrument(skip_all, fields(username = %credentials.username))]
pub async fn login(
    api: &dyn AttendanceApi,
    guard: &LoginGuard,
    store: &StateStore,
    credentials: &Credentials,
    now: DateTime<Utc>,
) -> Result<Session> {
    guard.check(now)?;
    match api.login(credentials).await {
        Ok(session) => {
            guard.record_success()?;
            store.save_session(&session)?;
            info!(role = session.user.role.as_str(), "logged in");
            Ok(session)
        }
        Err(e @ Error::Api { .. }) => match guard.record_failure(now)? {
            Some(until) => Err(Error::LockedOut { until }),
            None => Err(e),
        },
        Err(e) => Err(e),
    }
}

pub fn logout(store: &StateStore) -> Result<()> {
    store.clear_session()?;
    info!("logged out");
    Ok(())
}
