use std::sync::Arc;

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::{session_id, Auth, AuthService};
use crate::error::ApiError;
use crate::models::*;
use crate::repo::Repo;
use crate::session::SessionStore;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::JsonConfig::default()
            .error_handler(|err, _req| ApiError::Validation(err.to_string()).into()),
    )
    .app_data(
        web::QueryConfig::default()
            .error_handler(|err, _req| ApiError::Validation(err.to_string()).into()),
    );
    cfg.service(
        web::scope("/api")
            .service(web::resource("/auth/login").route(web::post().to(login)))
            .service(web::resource("/auth/register").route(web::post().to(register)))
            .service(web::resource("/auth/logout").route(web::post().to(logout)))
            .service(web::resource("/auth/me").route(web::get().to(auth_me)))
            .service(web::resource("/users/{id}").route(web::put().to(update_user)))
            .service(
                web::resource("/habits")
                    .route(web::get().to(list_habits))
                    .route(web::post().to(create_habit)),
            )
            .service(
                web::resource("/habits/{id}")
                    .route(web::get().to(get_habit))
                    .route(web::put().to(update_habit))
                    .route(web::delete().to(delete_habit)),
            )
            .service(
                web::resource("/routines")
                    .route(web::get().to(list_routines))
                    .route(web::post().to(create_routine)),
            )
            .service(
                web::resource("/routines/{id}")
                    .route(web::get().to(get_routine))
                    .route(web::put().to(update_routine))
                    .route(web::delete().to(delete_routine)),
            )
            .service(web::resource("/routines/{id}/habits").route(web::get().to(list_routine_habits)))
            .service(
                web::resource("/habit-logs")
                    .route(web::get().to(list_habit_logs))
                    .route(web::post().to(create_habit_log)),
            )
            .service(web::resource("/habit-logs/{id}").route(web::put().to(update_habit_log)))
            .service(
                web::resource("/notifications")
                    .route(web::get().to(list_notifications))
                    .route(web::post().to(create_notification)),
            )
            // registered before /notifications/{id} so "pending" is not taken as an id
            .service(web::resource("/notifications/pending").route(web::get().to(list_pending_notifications)))
            .service(
                web::resource("/notifications/{id}")
                    .route(web::put().to(update_notification))
                    .route(web::delete().to(delete_notification)),
            )
            .service(web::resource("/sms/test").route(web::post().to(sms_test))),
    );
}

#[derive(Clone)]
pub struct AppState { pub repo: Arc<dyn Repo>, pub auth: AuthService }

impl AppState {
    pub fn new(repo: Arc<dyn Repo>, sessions: SessionStore, bcrypt_cost: u32) -> Self {
        let auth = AuthService::new(repo.clone(), sessions, bcrypt_cost);
        Self { repo, auth }
    }

    pub fn with_secure_cookie(mut self, secure: bool) -> Self {
        self.auth = self.auth.with_secure_cookie(secure);
        self
    }
}

/// Create payload: the record plus an optional `userId` that must name the caller.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequest<T> {
    #[serde(default)]
    pub user_id: Option<Id>,
    #[serde(flatten)]
    pub record: T,
}

impl<T> CreateRequest<T> {
    fn owned_by(self, auth: &Auth) -> Result<T, ApiError> {
        match self.user_id {
            Some(uid) if uid != auth.user_id => Err(ApiError::Forbidden),
            _ => Ok(self.record),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct UserEnvelope {
    pub user: PublicUser,
}

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    fn new(message: &str) -> Self {
        Self { message: message.to_string() }
    }
}

// ---------------- ownership helpers -------------------------------
macro_rules! ensure_owner {
    ($auth:expr, $record:expr) => {
        if $record.user_id != $auth.user_id {
            return Err(ApiError::Forbidden);
        }
    };
}

async fn owned_habit(data: &AppState, auth: &Auth, id: Id) -> Result<Habit, ApiError> {
    let habit = data.repo.get_habit(id).await?.ok_or(ApiError::NotFound("Habit"))?;
    ensure_owner!(auth, habit);
    Ok(habit)
}

async fn owned_routine(data: &AppState, auth: &Auth, id: Id) -> Result<Routine, ApiError> {
    let routine = data.repo.get_routine(id).await?.ok_or(ApiError::NotFound("Routine"))?;
    ensure_owner!(auth, routine);
    Ok(routine)
}

async fn owned_habit_log(data: &AppState, auth: &Auth, id: Id) -> Result<HabitLog, ApiError> {
    let log = data.repo.get_habit_log(id).await?.ok_or(ApiError::NotFound("Habit log"))?;
    ensure_owner!(auth, log);
    Ok(log)
}

async fn owned_notification(data: &AppState, auth: &Auth, id: Id) -> Result<Notification, ApiError> {
    let n = data.repo.get_notification(id).await?.ok_or(ApiError::NotFound("Notification"))?;
    ensure_owner!(auth, n);
    Ok(n)
}

/// A referenced habit must exist (400) and belong to the caller (403).
async fn check_habit_ref(data: &AppState, auth: &Auth, habit_id: Option<Id>) -> Result<(), ApiError> {
    let Some(id) = habit_id else { return Ok(()) };
    let habit = data.repo.get_habit(id).await?
        .ok_or_else(|| ApiError::Validation(format!("habit {id} does not exist")))?;
    ensure_owner!(auth, habit);
    Ok(())
}

async fn check_routine_ref(data: &AppState, auth: &Auth, routine_id: Option<Id>) -> Result<(), ApiError> {
    let Some(id) = routine_id else { return Ok(()) };
    let routine = data.repo.get_routine(id).await?
        .ok_or_else(|| ApiError::Validation(format!("routine {id} does not exist")))?;
    ensure_owner!(auth, routine);
    Ok(())
}
// ------------------------------------------------------------------

// ---------------- auth --------------------------------------------

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in; session cookie set", body = UserEnvelope),
        (status = 401, description = "Incorrect username or password")
    )
)]
pub async fn login(req: HttpRequest, data: web::Data<AppState>, payload: web::Json<LoginRequest>) -> Result<HttpResponse, ApiError> {
    let (user, sid) = data.auth.login(&payload.username, &payload.password).await?;
    data.auth.logout(session_id(&req).as_deref()); // never reuse a pre-login session id
    Ok(HttpResponse::Ok().cookie(data.auth.session_cookie(&sid)).json(UserEnvelope { user }))
}

#[utoipa::path(
    post,
    path = "/api/auth/register",
    request_body = NewUser,
    responses(
        (status = 201, description = "Registered and logged in", body = UserEnvelope),
        (status = 400, description = "Validation error or email/phone/username in use")
    )
)]
pub async fn register(req: HttpRequest, data: web::Data<AppState>, payload: web::Json<NewUser>) -> Result<HttpResponse, ApiError> {
    let (user, sid) = data.auth.register(payload.into_inner()).await?;
    data.auth.logout(session_id(&req).as_deref());
    Ok(HttpResponse::Created().cookie(data.auth.session_cookie(&sid)).json(UserEnvelope { user }))
}

#[utoipa::path(
    post,
    path = "/api/auth/logout",
    responses((status = 200, description = "Session destroyed", body = MessageResponse))
)]
pub async fn logout(req: HttpRequest, data: web::Data<AppState>) -> HttpResponse {
    data.auth.logout(session_id(&req).as_deref());
    HttpResponse::Ok()
        .cookie(data.auth.removal_cookie())
        .json(MessageResponse::new("Logged out successfully"))
}

#[utoipa::path(
    get,
    path = "/api/auth/me",
    responses(
        (status = 200, description = "Current user", body = UserEnvelope),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn auth_me(req: HttpRequest, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let user = data.auth.current_user(session_id(&req).as_deref()).await?;
    Ok(HttpResponse::Ok().json(UserEnvelope { user }))
}

#[utoipa::path(
    put,
    path = "/api/users/{id}",
    request_body = UpdateUser,
    params(("id" = i64, Path, description = "User id (must be the caller)")),
    responses(
        (status = 200, description = "Profile updated", body = UserEnvelope),
        (status = 400, description = "Validation error or email/phone in use"),
        (status = 403, description = "Forbidden")
    )
)]
pub async fn update_user(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>, payload: web::Json<UpdateUser>) -> Result<HttpResponse, ApiError> {
    if path.into_inner() != auth.user_id {
        return Err(ApiError::Forbidden);
    }
    let user = data.auth.update_profile(auth.user_id, payload.into_inner()).await?;
    Ok(HttpResponse::Ok().json(UserEnvelope { user }))
}

// ---------------- habits ------------------------------------------

#[utoipa::path(
    get,
    path = "/api/habits",
    responses((status = 200, description = "Caller's habits", body = [Habit]), (status = 401, description = "Unauthorized"))
)]
pub async fn list_habits(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let habits = data.repo.list_habits_by_user(auth.user_id).await?;
    Ok(HttpResponse::Ok().json(habits))
}

#[utoipa::path(
    post,
    path = "/api/habits",
    request_body = NewHabit,
    responses(
        (status = 201, description = "Habit created", body = Habit),
        (status = 400, description = "Validation error"),
        (status = 403, description = "userId or routineId not owned by caller")
    )
)]
pub async fn create_habit(auth: Auth, data: web::Data<AppState>, payload: web::Json<CreateRequest<NewHabit>>) -> Result<HttpResponse, ApiError> {
    let new = payload.into_inner().owned_by(&auth)?.validated()?;
    check_routine_ref(&data, &auth, new.routine_id).await?;
    let habit = data.repo.create_habit(auth.user_id, new).await?;
    Ok(HttpResponse::Created().json(habit))
}

#[utoipa::path(
    get,
    path = "/api/habits/{id}",
    params(("id" = i64, Path, description = "Habit id")),
    responses(
        (status = 200, description = "Habit", body = Habit),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Habit not found")
    )
)]
pub async fn get_habit(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let habit = owned_habit(&data, &auth, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(habit))
}

#[utoipa::path(
    put,
    path = "/api/habits/{id}",
    request_body = UpdateHabit,
    params(("id" = i64, Path, description = "Habit id")),
    responses(
        (status = 200, description = "Habit updated", body = Habit),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Habit not found")
    )
)]
pub async fn update_habit(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>, payload: web::Json<UpdateHabit>) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    owned_habit(&data, &auth, id).await?;
    let upd = payload.into_inner().validated()?;
    if let Some(routine_id) = upd.routine_id {
        check_routine_ref(&data, &auth, routine_id).await?;
    }
    let habit = data.repo.update_habit(id, upd).await?.ok_or(ApiError::NotFound("Habit"))?;
    Ok(HttpResponse::Ok().json(habit))
}

#[utoipa::path(
    delete,
    path = "/api/habits/{id}",
    params(("id" = i64, Path, description = "Habit id")),
    responses(
        (status = 204, description = "Habit deleted with its logs"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Habit not found")
    )
)]
pub async fn delete_habit(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    owned_habit(&data, &auth, id).await?;
    if !data.repo.delete_habit(id).await? {
        return Err(ApiError::NotFound("Habit"));
    }
    Ok(HttpResponse::NoContent().finish())
}

// ---------------- routines ----------------------------------------

#[utoipa::path(
    get,
    path = "/api/routines",
    responses((status = 200, description = "Caller's routines", body = [Routine]), (status = 401, description = "Unauthorized"))
)]
pub async fn list_routines(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let routines = data.repo.list_routines_by_user(auth.user_id).await?;
    Ok(HttpResponse::Ok().json(routines))
}

#[utoipa::path(
    post,
    path = "/api/routines",
    request_body = NewRoutine,
    responses(
        (status = 201, description = "Routine created", body = Routine),
        (status = 400, description = "Validation error"),
        (status = 403, description = "userId not the caller")
    )
)]
pub async fn create_routine(auth: Auth, data: web::Data<AppState>, payload: web::Json<CreateRequest<NewRoutine>>) -> Result<HttpResponse, ApiError> {
    let new = payload.into_inner().owned_by(&auth)?;
    new.validate()?;
    let routine = data.repo.create_routine(auth.user_id, new).await?;
    Ok(HttpResponse::Created().json(routine))
}

#[utoipa::path(
    get,
    path = "/api/routines/{id}",
    params(("id" = i64, Path, description = "Routine id")),
    responses(
        (status = 200, description = "Routine", body = Routine),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Routine not found")
    )
)]
pub async fn get_routine(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let routine = owned_routine(&data, &auth, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(routine))
}

#[utoipa::path(
    put,
    path = "/api/routines/{id}",
    request_body = UpdateRoutine,
    params(("id" = i64, Path, description = "Routine id")),
    responses(
        (status = 200, description = "Routine updated", body = Routine),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Routine not found")
    )
)]
pub async fn update_routine(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>, payload: web::Json<UpdateRoutine>) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    owned_routine(&data, &auth, id).await?;
    let upd = payload.into_inner();
    upd.validate()?;
    let routine = data.repo.update_routine(id, upd).await?.ok_or(ApiError::NotFound("Routine"))?;
    Ok(HttpResponse::Ok().json(routine))
}

#[utoipa::path(
    delete,
    path = "/api/routines/{id}",
    params(("id" = i64, Path, description = "Routine id")),
    responses(
        (status = 204, description = "Routine deleted"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Routine not found")
    )
)]
pub async fn delete_routine(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    owned_routine(&data, &auth, id).await?;
    if !data.repo.delete_routine(id).await? {
        return Err(ApiError::NotFound("Routine"));
    }
    Ok(HttpResponse::NoContent().finish())
}

#[utoipa::path(
    get,
    path = "/api/routines/{id}/habits",
    params(("id" = i64, Path, description = "Routine id")),
    responses(
        (status = 200, description = "Caller's habits assigned to the routine", body = [Habit]),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Routine not found")
    )
)]
pub async fn list_routine_habits(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let routine = owned_routine(&data, &auth, path.into_inner()).await?;
    let mut habits = data.repo.list_habits_by_routine(routine.id).await?;
    habits.retain(|h| h.user_id == auth.user_id);
    Ok(HttpResponse::Ok().json(habits))
}

// ---------------- habit logs --------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HabitLogQuery {
    pub date: Option<NaiveDate>,
    pub habit_id: Option<Id>,
}

#[utoipa::path(
    get,
    path = "/api/habit-logs",
    params(
        ("date" = Option<String>, Query, description = "Only logs dated on this day (YYYY-MM-DD, UTC)"),
        ("habitId" = Option<i64>, Query, description = "Only logs of this habit")
    ),
    responses(
        (status = 200, description = "Caller's habit logs", body = [HabitLog]),
        (status = 403, description = "Habit not owned by caller"),
        (status = 404, description = "Habit not found")
    )
)]
pub async fn list_habit_logs(auth: Auth, data: web::Data<AppState>, query: web::Query<HabitLogQuery>) -> Result<HttpResponse, ApiError> {
    let HabitLogQuery { date, habit_id } = query.into_inner();
    let mut logs = match (date, habit_id) {
        (Some(day), _) => data.repo.list_habit_logs_for_date(auth.user_id, day).await?,
        (None, Some(hid)) => {
            owned_habit(&data, &auth, hid).await?;
            data.repo.list_habit_logs_by_habit(hid).await?
        }
        (None, None) => data.repo.list_habit_logs_by_user(auth.user_id).await?,
    };
    if let Some(hid) = habit_id {
        logs.retain(|l| l.habit_id == hid);
    }
    logs.retain(|l| l.user_id == auth.user_id);
    Ok(HttpResponse::Ok().json(logs))
}

#[utoipa::path(
    post,
    path = "/api/habit-logs",
    request_body = NewHabitLog,
    responses(
        (status = 201, description = "Habit log created", body = HabitLog),
        (status = 400, description = "Unknown habit"),
        (status = 403, description = "Habit or userId not owned by caller")
    )
)]
pub async fn create_habit_log(auth: Auth, data: web::Data<AppState>, payload: web::Json<CreateRequest<NewHabitLog>>) -> Result<HttpResponse, ApiError> {
    let new = payload.into_inner().owned_by(&auth)?;
    check_habit_ref(&data, &auth, Some(new.habit_id)).await?;
    let log = data.repo.create_habit_log(auth.user_id, new).await?;
    Ok(HttpResponse::Created().json(log))
}

#[utoipa::path(
    put,
    path = "/api/habit-logs/{id}",
    request_body = UpdateHabitLog,
    params(("id" = i64, Path, description = "Habit log id")),
    responses(
        (status = 200, description = "Habit log updated", body = HabitLog),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Habit log not found")
    )
)]
pub async fn update_habit_log(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>, payload: web::Json<UpdateHabitLog>) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    owned_habit_log(&data, &auth, id).await?;
    let log = data.repo.update_habit_log(id, payload.into_inner()).await?.ok_or(ApiError::NotFound("Habit log"))?;
    Ok(HttpResponse::Ok().json(log))
}

// ---------------- notifications -----------------------------------

#[utoipa::path(
    get,
    path = "/api/notifications",
    responses((status = 200, description = "Caller's notifications", body = [Notification]), (status = 401, description = "Unauthorized"))
)]
pub async fn list_notifications(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let notifications = data.repo.list_notifications_by_user(auth.user_id).await?;
    Ok(HttpResponse::Ok().json(notifications))
}

#[utoipa::path(
    get,
    path = "/api/notifications/pending",
    responses((status = 200, description = "Caller's unsent notifications that are due", body = [Notification]))
)]
pub async fn list_pending_notifications(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let mut pending = data.repo.list_pending_notifications(Utc::now()).await?;
    pending.retain(|n| n.user_id == auth.user_id);
    Ok(HttpResponse::Ok().json(pending))
}

#[utoipa::path(
    post,
    path = "/api/notifications",
    request_body = NewNotification,
    responses(
        (status = 201, description = "Notification scheduled", body = Notification),
        (status = 400, description = "Validation error or unknown habit/routine"),
        (status = 403, description = "Referenced record or userId not owned by caller")
    )
)]
pub async fn create_notification(auth: Auth, data: web::Data<AppState>, payload: web::Json<CreateRequest<NewNotification>>) -> Result<HttpResponse, ApiError> {
    let new = payload.into_inner().owned_by(&auth)?;
    new.validate()?;
    check_habit_ref(&data, &auth, new.habit_id).await?;
    check_routine_ref(&data, &auth, new.routine_id).await?;
    let n = data.repo.create_notification(auth.user_id, new).await?;
    Ok(HttpResponse::Created().json(n))
}

#[utoipa::path(
    put,
    path = "/api/notifications/{id}",
    request_body = UpdateNotification,
    params(("id" = i64, Path, description = "Notification id")),
    responses(
        (status = 200, description = "Notification updated", body = Notification),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Notification not found")
    )
)]
pub async fn update_notification(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>, payload: web::Json<UpdateNotification>) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    owned_notification(&data, &auth, id).await?;
    let upd = payload.into_inner();
    upd.validate()?;
    if let Some(habit_id) = upd.habit_id {
        check_habit_ref(&data, &auth, habit_id).await?;
    }
    if let Some(routine_id) = upd.routine_id {
        check_routine_ref(&data, &auth, routine_id).await?;
    }
    let n = data.repo.update_notification(id, upd).await?.ok_or(ApiError::NotFound("Notification"))?;
    Ok(HttpResponse::Ok().json(n))
}

#[utoipa::path(
    delete,
    path = "/api/notifications/{id}",
    params(("id" = i64, Path, description = "Notification id")),
    responses(
        (status = 204, description = "Notification deleted"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Notification not found")
    )
)]
pub async fn delete_notification(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    owned_notification(&data, &auth, id).await?;
    if !data.repo.delete_notification(id).await? {
        return Err(ApiError::NotFound("Notification"));
    }
    Ok(HttpResponse::NoContent().finish())
}

// ---------------- sms ---------------------------------------------

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct SmsTestRequest {
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub message: String,
}

/// Simulated delivery: the message is only logged.
#[utoipa::path(
    post,
    path = "/api/sms/test",
    request_body = SmsTestRequest,
    responses(
        (status = 200, description = "Message logged", body = MessageResponse),
        (status = 400, description = "Phone number and message are required")
    )
)]
pub async fn sms_test(auth: Auth, payload: web::Json<SmsTestRequest>) -> Result<HttpResponse, ApiError> {
    if payload.phone.trim().is_empty() || payload.message.trim().is_empty() {
        return Err(ApiError::Validation("Phone number and message are required".into()));
    }
    tracing::info!(target: "sms", user_id = auth.user_id, to = %payload.phone, message = %payload.message, "SMS notification (simulated)");
    Ok(HttpResponse::Ok().json(MessageResponse::new("SMS sent successfully (simulated)")))
}
