#![cfg(feature = "inmem-store")]

use actix_web::{dev::Payload, test, web, FromRequest};
use pacepal::auth::{Auth, AuthService};
use pacepal::error::ApiError;
use pacepal::models::{NewUser, UpdateUser};
use pacepal::repo::inmem::InMemRepo;
use pacepal::session::{SessionStore, SESSION_COOKIE};
use pacepal::AppState;
use std::sync::Arc;
use std::time::Duration;

fn service() -> AuthService {
    AuthService::new(Arc::new(InMemRepo::new()), SessionStore::new(Duration::from_secs(60)), 10)
}

fn registration(tag: &str) -> NewUser {
    NewUser {
        first_name: "Grace".into(),
        last_name: "Hopper".into(),
        username: format!("grace{tag}"),
        email: format!("grace{tag}@example.com"),
        phone: format!("+1555{tag}"),
        password: "cobol-rules".into(),
        notifications_enabled: true,
    }
}

#[actix_web::test]
async fn register_then_login() {
    let auth = service();
    let (user, sid) = auth.register(registration("1")).await.unwrap();
    assert_eq!(auth.sessions().user_id(&sid), Some(user.id));
    assert_eq!(auth.current_user(Some(&sid)).await.unwrap().username, "grace1");

    let (again, sid2) = auth.login("grace1", "cobol-rules").await.unwrap();
    assert_eq!(again.id, user.id);
    assert_ne!(sid, sid2);
}

#[actix_web::test]
async fn login_failures_look_the_same() {
    let auth = service();
    auth.register(registration("1")).await.unwrap();
    let wrong = auth.login("grace1", "fortran").await.unwrap_err();
    let unknown = auth.login("nobody", "cobol-rules").await.unwrap_err();
    assert_eq!(wrong.to_string(), unknown.to_string());
    assert!(matches!(wrong, ApiError::InvalidCredentials));
}

#[actix_web::test]
async fn register_conflicts_are_reported_in_order() {
    let auth = service();
    auth.register(registration("1")).await.unwrap();

    let err = auth.register(registration("1")).await.unwrap_err();
    assert_eq!(err.to_string(), "Email already in use");

    let mut same_phone = registration("2");
    same_phone.phone = "+15551".into();
    assert_eq!(auth.register(same_phone).await.unwrap_err().to_string(), "Phone number already in use");

    let mut same_name = registration("3");
    same_name.username = "grace1".into();
    assert_eq!(auth.register(same_name).await.unwrap_err().to_string(), "Username already taken");

    let mut invalid = registration("4");
    invalid.email = "not-an-email".into();
    assert!(matches!(auth.register(invalid).await.unwrap_err(), ApiError::Validation(_)));
}

#[actix_web::test]
async fn logout_and_profile_update() {
    let auth = service();
    let (user, sid) = auth.register(registration("1")).await.unwrap();
    auth.register(registration("2")).await.unwrap();

    let taken = UpdateUser { email: Some("grace2@example.com".into()), ..Default::default() };
    assert!(matches!(auth.update_profile(user.id, taken).await.unwrap_err(), ApiError::Conflict(_)));

    let upd = UpdateUser { password: Some("new-secret".into()), ..Default::default() };
    auth.update_profile(user.id, upd).await.unwrap();
    assert!(auth.login("grace1", "new-secret").await.is_ok());

    auth.logout(Some(&sid));
    auth.logout(None);
    assert!(matches!(auth.current_user(Some(&sid)).await.unwrap_err(), ApiError::Unauthenticated));
}

#[actix_web::test]
async fn session_cookie_attributes() {
    let auth = service().with_secure_cookie(true);
    let c = auth.session_cookie("abc");
    assert_eq!(c.name(), SESSION_COOKIE);
    assert_eq!(c.http_only(), Some(true));
    assert_eq!(c.secure(), Some(true));
    assert_eq!(c.max_age().map(|d| d.whole_seconds()), Some(60));
    assert_eq!(auth.removal_cookie().value(), "");
}

#[actix_web::test]
async fn extractor_resolves_session_cookie() {
    let state = AppState::new(Arc::new(InMemRepo::new()), SessionStore::new(Duration::from_secs(60)), 10);
    let (user, sid) = state.auth.register(registration("1")).await.unwrap();
    let data = web::Data::new(state);

    let req = test::TestRequest::default()
        .app_data(data.clone())
        .cookie(actix_web::cookie::Cookie::new(SESSION_COOKIE, sid.clone()))
        .to_http_request();
    let auth = Auth::from_request(&req, &mut Payload::None).await.unwrap();
    assert_eq!(auth.user_id, user.id);

    let anon = test::TestRequest::default().app_data(data.clone()).to_http_request();
    assert!(matches!(Auth::from_request(&anon, &mut Payload::None).await, Err(ApiError::Unauthenticated)));

    let forged = test::TestRequest::default()
        .app_data(data)
        .cookie(actix_web::cookie::Cookie::new(SESSION_COOKIE, "deadbeef"))
        .to_http_request();
    assert!(Auth::from_request(&forged, &mut Payload::None).await.is_err());
}
