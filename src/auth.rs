use std::future::{ready, Ready};
use std::sync::Arc;

use actix_web::cookie::{time::Duration as CookieDuration, Cookie, SameSite};
use actix_web::{dev::Payload, web, FromRequest, HttpRequest};
use once_cell::sync::Lazy;
use tracing::info;

use crate::error::ApiError;
use crate::models::{Id, NewUser, PublicUser, UpdateUser};
use crate::repo::{Repo, RepoError};
use crate::routes::AppState;
use crate::session::{SessionStore, SESSION_COOKIE};

pub const MIN_BCRYPT_COST: u32 = 10;

// Verified against when the username is unknown, so both login failures cost one bcrypt round.
static DUMMY_HASH: Lazy<String> =
    Lazy::new(|| bcrypt::hash("pacepal-login-guard", MIN_BCRYPT_COST).unwrap_or_default());

/// Salted bcrypt hash, computed on the blocking pool.
pub async fn hash_password(password: String, cost: u32) -> Result<String, ApiError> {
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(ApiError::internal)?
        .map_err(ApiError::internal)
}

pub async fn verify_password(password: String, hash: String) -> Result<bool, ApiError> {
    tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(ApiError::internal)?
        .map_err(ApiError::internal)
}

/// Credential checks and session lifecycle on top of the user store.
#[derive(Clone)]
pub struct AuthService {
    repo: Arc<dyn Repo>,
    sessions: SessionStore,
    bcrypt_cost: u32,
    cookie_secure: bool,
}

impl AuthService {
    /// `bcrypt_cost` below [`MIN_BCRYPT_COST`] is raised to it.
    pub fn new(repo: Arc<dyn Repo>, sessions: SessionStore, bcrypt_cost: u32) -> Self {
        Self { repo, sessions, bcrypt_cost: bcrypt_cost.max(MIN_BCRYPT_COST), cookie_secure: false }
    }

    pub fn with_secure_cookie(mut self, secure: bool) -> Self {
        self.cookie_secure = secure;
        self
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Returns the user and a fresh session id. Unknown user and wrong password
    /// are indistinguishable to the caller.
    pub async fn login(&self, username: &str, password: &str) -> Result<(PublicUser, String), ApiError> {
        let Some(user) = self.repo.get_user_by_username(username).await? else {
            let _ = verify_password(password.to_owned(), DUMMY_HASH.clone()).await;
            return Err(ApiError::InvalidCredentials);
        };
        if !verify_password(password.to_owned(), user.password.clone()).await? {
            return Err(ApiError::InvalidCredentials);
        }
        let sid = self.sessions.create(user.id);
        info!(user_id = user.id, "user logged in");
        Ok((user.into(), sid))
    }

    /// Creates the account and logs it in.
    pub async fn register(&self, mut new: NewUser) -> Result<(PublicUser, String), ApiError> {
        new.validate()?;
        if self.repo.get_user_by_email(&new.email).await?.is_some() {
            return Err(ApiError::Conflict("Email already in use".into()));
        }
        if self.repo.get_user_by_phone(&new.phone).await?.is_some() {
            return Err(ApiError::Conflict("Phone number already in use".into()));
        }
        if self.repo.get_user_by_username(&new.username).await?.is_some() {
            return Err(ApiError::Conflict("Username already taken".into()));
        }
        new.password = hash_password(std::mem::take(&mut new.password), self.bcrypt_cost).await?;
        let user = self.repo.create_user(new).await.map_err(|e| match e {
            RepoError::Conflict => ApiError::Conflict("Username, email or phone already in use".into()),
            other => other.into(),
        })?;
        let sid = self.sessions.create(user.id);
        info!(user_id = user.id, "user registered");
        Ok((user.into(), sid))
    }

    pub fn logout(&self, sid: Option<&str>) {
        if let Some(sid) = sid {
            self.sessions.destroy(sid);
        }
    }

    pub async fn current_user(&self, sid: Option<&str>) -> Result<PublicUser, ApiError> {
        let user_id = sid
            .and_then(|sid| self.sessions.user_id(sid))
            .ok_or(ApiError::Unauthenticated)?;
        let user = self.repo.get_user(user_id).await?.ok_or(ApiError::Unauthenticated)?;
        Ok(user.into())
    }

    /// Profile/settings update; email and phone must stay unique, a new password is re-hashed.
    pub async fn update_profile(&self, user_id: Id, mut upd: UpdateUser) -> Result<PublicUser, ApiError> {
        upd.validate()?;
        if let Some(email) = &upd.email {
            if self.repo.get_user_by_email(email).await?.is_some_and(|u| u.id != user_id) {
                return Err(ApiError::Conflict("Email already in use".into()));
            }
        }
        if let Some(phone) = &upd.phone {
            if self.repo.get_user_by_phone(phone).await?.is_some_and(|u| u.id != user_id) {
                return Err(ApiError::Conflict("Phone number already in use".into()));
            }
        }
        if let Some(password) = upd.password.take() {
            upd.password = Some(hash_password(password, self.bcrypt_cost).await?);
        }
        let user = self.repo.update_user(user_id, upd).await?.ok_or(ApiError::NotFound("User"))?;
        Ok(user.into())
    }

    pub fn session_cookie(&self, sid: &str) -> Cookie<'static> {
        let max_age = i64::try_from(self.sessions.ttl().as_secs()).unwrap_or(i64::MAX);
        Cookie::build(SESSION_COOKIE, sid.to_owned())
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(self.cookie_secure)
            .max_age(CookieDuration::seconds(max_age))
            .finish()
    }

    pub fn removal_cookie(&self) -> Cookie<'static> {
        let mut cookie = Cookie::build(SESSION_COOKIE, "").path("/").finish();
        cookie.make_removal();
        cookie
    }
}

/// Session id carried by the request cookie, if any.
pub fn session_id(req: &HttpRequest) -> Option<String> {
    req.cookie(SESSION_COOKIE).map(|c| c.value().to_owned())
}

/// Extractor yielding the authenticated user id. Rejects with `401`.
#[derive(Debug, Clone)]
pub struct Auth {
    pub user_id: Id,
    pub session_id: String,
}

impl Auth {
    fn resolve(req: &HttpRequest) -> Result<Self, ApiError> {
        let state = req
            .app_data::<web::Data<AppState>>()
            .ok_or_else(|| ApiError::internal("AppState not registered"))?;
        let sid = session_id(req).ok_or(ApiError::Unauthenticated)?;
        let user_id = state.auth.sessions().user_id(&sid).ok_or(ApiError::Unauthenticated)?;
        Ok(Auth { user_id, session_id: sid })
    }
}

impl FromRequest for Auth {
    type Error = ApiError;
    type Future = Ready<Result<Self, ApiError>>;

    fn from_request(req: &HttpRequest, _pl: &mut Payload) -> Self::Future {
        ready(Self::resolve(req))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[actix_web::test]
    async fn hash_is_salted_and_verifies() {
        let a = hash_password("secret1".into(), MIN_BCRYPT_COST).await.unwrap();
        let b = hash_password("secret1".into(), MIN_BCRYPT_COST).await.unwrap();
        assert_ne!(a, "secret1");
        assert_ne!(a, b);
        assert!(a.starts_with("$2b$10$"));
        assert!(verify_password("secret1".into(), a.clone()).await.unwrap());
        assert!(!verify_password("wrong".into(), a).await.unwrap());
    }

    #[test]
    fn dummy_hash_is_usable() {
        assert!(bcrypt::verify("pacepal-login-guard", &DUMMY_HASH).unwrap());
    }
}
