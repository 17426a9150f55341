use std::collections::BTreeSet;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use utoipa::ToSchema;

pub type Id = i64;

/// Rejected input, reported to clients as `400`.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ValidationError(pub String);

impl ValidationError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

fn default_true() -> bool {
    true
}

/// Distinguishes an omitted field (`None`) from an explicit `null` (`Some(None)`).
fn double_option<'de, T, D>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(de).map(Some)
}

fn require_text(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new(format!("{field} is required")));
    }
    Ok(())
}

/// Accepts 24-hour `HH:MM` only.
pub fn validate_clock(field: &str, value: &str) -> Result<(), ValidationError> {
    let ok = value.len() == 5 && NaiveTime::parse_from_str(value, "%H:%M").is_ok();
    if !ok {
        return Err(ValidationError::new(format!("{field} must be a time in HH:MM format")));
    }
    Ok(())
}

fn validate_email(value: &str) -> Result<(), ValidationError> {
    require_text("email", value)?;
    match value.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(()),
        _ => Err(ValidationError::new("email is not a valid address")),
    }
}

/// Half-open UTC range `[start, next_start)` of a calendar day. At millisecond
/// precision this is `00:00:00.000` through `23:59:59.999` inclusive; finer
/// timestamps past `.999` still land in exactly one day.
pub fn day_bounds(day: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = Utc.from_utc_datetime(&day.and_time(NaiveTime::MIN));
    (start, start + Duration::days(1))
}

// ---------------------------------------------------------------- weekdays

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Weekday {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

/// Sorts Monday→Sunday and drops duplicates; an empty schedule is rejected.
pub fn normalize_frequency(days: Vec<Weekday>) -> Result<Vec<Weekday>, ValidationError> {
    let set: BTreeSet<Weekday> = days.into_iter().collect();
    if set.is_empty() {
        return Err(ValidationError::new("frequency must name at least one day"));
    }
    Ok(set.into_iter().collect())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum RoutineType {
    Morning,
    Work,
    Evening,
    Custom,
}

impl RoutineType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutineType::Morning => "morning",
            RoutineType::Work => "work",
            RoutineType::Evening => "evening",
            RoutineType::Custom => "custom",
        }
    }
}

impl TryFrom<String> for RoutineType {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "morning" => Ok(RoutineType::Morning),
            "work" => Ok(RoutineType::Work),
            "evening" => Ok(RoutineType::Evening),
            "custom" => Ok(RoutineType::Custom),
            other => Err(ValidationError::new(format!("unknown routine type '{other}'"))),
        }
    }
}

// ---------------------------------------------------------------- users

/// Stored user row. Carries the password hash, so it is never serialized to clients;
/// handlers respond with [`PublicUser`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Id,
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    pub password: String,
    pub email: String,
    pub phone: String,
    pub notifications_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: Id,
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    pub email: String,
    pub phone: String,
    pub notifications_enabled: bool,
}

impl From<User> for PublicUser {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            first_name: u.first_name,
            last_name: u.last_name,
            username: u.username,
            email: u.email,
            phone: u.phone,
            notifications_enabled: u.notifications_enabled,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    pub email: String,
    pub phone: String,
    pub password: String,
    #[serde(default = "default_true")]
    pub notifications_enabled: bool,
}

impl NewUser {
    pub fn validate(&self) -> Result<(), ValidationError> {
        require_text("firstName", &self.first_name)?;
        require_text("lastName", &self.last_name)?;
        require_text("username", &self.username)?;
        validate_email(&self.email)?;
        require_text("phone", &self.phone)?;
        require_text("password", &self.password)?;
        Ok(())
    }

    pub fn into_user(self, id: Id) -> User {
        User {
            id,
            first_name: self.first_name,
            last_name: self.last_name,
            username: self.username,
            password: self.password,
            email: self.email,
            phone: self.phone,
            notifications_enabled: self.notifications_enabled,
        }
    }
}

/// Profile/settings changes. Username and id are fixed after registration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUser {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub password: Option<String>,
    pub notifications_enabled: Option<bool>,
}

impl UpdateUser {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(v) = &self.first_name { require_text("firstName", v)?; }
        if let Some(v) = &self.last_name { require_text("lastName", v)?; }
        if let Some(v) = &self.email { validate_email(v)?; }
        if let Some(v) = &self.phone { require_text("phone", v)?; }
        if let Some(v) = &self.password { require_text("password", v)?; }
        Ok(())
    }

    pub fn apply_to(self, user: &mut User) {
        if let Some(v) = self.first_name { user.first_name = v; }
        if let Some(v) = self.last_name { user.last_name = v; }
        if let Some(v) = self.email { user.email = v; }
        if let Some(v) = self.phone { user.phone = v; }
        if let Some(v) = self.password { user.password = v; }
        if let Some(v) = self.notifications_enabled { user.notifications_enabled = v; }
    }
}

// ---------------------------------------------------------------- habits

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Habit {
    pub id: Id,
    pub user_id: Id,
    pub name: String,
    pub description: Option<String>,
    pub start_date: DateTime<Utc>,
    pub routine_id: Option<Id>, // weak reference, not cascaded
    pub time_of_day: String,
    pub completed: bool,
    #[sqlx(json)]
    pub frequency: Vec<Weekday>,
    pub reminder_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewHabit {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub start_date: DateTime<Utc>,
    #[serde(default)]
    pub routine_id: Option<Id>,
    pub time_of_day: String,
    #[serde(default)]
    pub completed: bool,
    pub frequency: Vec<Weekday>,
    #[serde(default = "default_true")]
    pub reminder_enabled: bool,
}

impl NewHabit {
    pub fn validated(mut self) -> Result<Self, ValidationError> {
        require_text("name", &self.name)?;
        validate_clock("timeOfDay", &self.time_of_day)?;
        self.frequency = normalize_frequency(self.frequency)?;
        Ok(self)
    }

    pub fn into_habit(self, id: Id, user_id: Id) -> Habit {
        Habit {
            id,
            user_id,
            name: self.name,
            description: self.description,
            start_date: self.start_date,
            routine_id: self.routine_id,
            time_of_day: self.time_of_day,
            completed: self.completed,
            frequency: self.frequency,
            reminder_enabled: self.reminder_enabled,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateHabit {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<String>)]
    pub description: Option<Option<String>>,
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<i64>)]
    pub routine_id: Option<Option<Id>>,
    pub time_of_day: Option<String>,
    pub completed: Option<bool>,
    pub frequency: Option<Vec<Weekday>>,
    pub reminder_enabled: Option<bool>,
}

impl UpdateHabit {
    pub fn validated(mut self) -> Result<Self, ValidationError> {
        if let Some(v) = &self.name { require_text("name", v)?; }
        if let Some(v) = &self.time_of_day { validate_clock("timeOfDay", v)?; }
        if let Some(days) = self.frequency.take() {
            self.frequency = Some(normalize_frequency(days)?);
        }
        Ok(self)
    }

    pub fn apply_to(self, habit: &mut Habit) {
        if let Some(v) = self.name { habit.name = v; }
        if let Some(v) = self.description { habit.description = v; }
        if let Some(v) = self.start_date { habit.start_date = v; }
        if let Some(v) = self.routine_id { habit.routine_id = v; }
        if let Some(v) = self.time_of_day { habit.time_of_day = v; }
        if let Some(v) = self.completed { habit.completed = v; }
        if let Some(v) = self.frequency { habit.frequency = v; }
        if let Some(v) = self.reminder_enabled { habit.reminder_enabled = v; }
    }
}

// ---------------------------------------------------------------- routines

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Routine {
    pub id: Id,
    pub user_id: Id,
    pub name: String,
    pub description: Option<String>,
    pub time_start: String,
    pub time_end: String,
    #[serde(rename = "type")]
    #[sqlx(rename = "type", try_from = "String")]
    pub kind: RoutineType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewRoutine {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub time_start: String,
    pub time_end: String,
    #[serde(rename = "type")]
    pub kind: RoutineType,
}

impl NewRoutine {
    pub fn validate(&self) -> Result<(), ValidationError> {
        require_text("name", &self.name)?;
        validate_clock("timeStart", &self.time_start)?;
        validate_clock("timeEnd", &self.time_end)?;
        Ok(())
    }

    pub fn into_routine(self, id: Id, user_id: Id) -> Routine {
        Routine {
            id,
            user_id,
            name: self.name,
            description: self.description,
            time_start: self.time_start,
            time_end: self.time_end,
            kind: self.kind,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRoutine {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<String>)]
    pub description: Option<Option<String>>,
    pub time_start: Option<String>,
    pub time_end: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<RoutineType>,
}

impl UpdateRoutine {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(v) = &self.name { require_text("name", v)?; }
        if let Some(v) = &self.time_start { validate_clock("timeStart", v)?; }
        if let Some(v) = &self.time_end { validate_clock("timeEnd", v)?; }
        Ok(())
    }

    pub fn apply_to(self, routine: &mut Routine) {
        if let Some(v) = self.name { routine.name = v; }
        if let Some(v) = self.description { routine.description = v; }
        if let Some(v) = self.time_start { routine.time_start = v; }
        if let Some(v) = self.time_end { routine.time_end = v; }
        if let Some(v) = self.kind { routine.kind = v; }
    }
}

// ---------------------------------------------------------------- habit logs

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct HabitLog {
    pub id: Id,
    pub habit_id: Id,
    pub user_id: Id, // denormalized owner for per-user queries
    pub date: DateTime<Utc>,
    pub completed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewHabitLog {
    pub habit_id: Id,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub completed: bool,
}

impl NewHabitLog {
    pub fn into_log(self, id: Id, user_id: Id) -> HabitLog {
        HabitLog { id, habit_id: self.habit_id, user_id, date: self.date, completed: self.completed }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateHabitLog {
    pub date: Option<DateTime<Utc>>,
    pub completed: Option<bool>,
}

impl UpdateHabitLog {
    pub fn apply_to(self, log: &mut HabitLog) {
        if let Some(v) = self.date { log.date = v; }
        if let Some(v) = self.completed { log.completed = v; }
    }
}

// ---------------------------------------------------------------- notifications

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Id,
    pub user_id: Id,
    pub habit_id: Option<Id>,
    pub routine_id: Option<Id>,
    pub message: String,
    pub scheduled_time: DateTime<Utc>,
    pub sent: bool,
}

impl Notification {
    pub fn is_pending(&self, now: DateTime<Utc>) -> bool {
        !self.sent && self.scheduled_time <= now
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewNotification {
    #[serde(default)]
    pub habit_id: Option<Id>,
    #[serde(default)]
    pub routine_id: Option<Id>,
    pub message: String,
    pub scheduled_time: DateTime<Utc>,
    #[serde(default)]
    pub sent: bool,
}

impl NewNotification {
    pub fn validate(&self) -> Result<(), ValidationError> {
        require_text("message", &self.message)
    }

    pub fn into_notification(self, id: Id, user_id: Id) -> Notification {
        Notification {
            id,
            user_id,
            habit_id: self.habit_id,
            routine_id: self.routine_id,
            message: self.message,
            scheduled_time: self.scheduled_time,
            sent: self.sent,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateNotification {
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<i64>)]
    pub habit_id: Option<Option<Id>>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<i64>)]
    pub routine_id: Option<Option<Id>>,
    pub message: Option<String>,
    pub scheduled_time: Option<DateTime<Utc>>,
    pub sent: Option<bool>,
}

impl UpdateNotification {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(v) = &self.message { require_text("message", v)?; }
        Ok(())
    }

    pub fn apply_to(self, n: &mut Notification) {
        if let Some(v) = self.habit_id { n.habit_id = v; }
        if let Some(v) = self.routine_id { n.routine_id = v; }
        if let Some(v) = self.message { n.message = v; }
        if let Some(v) = self.scheduled_time { n.scheduled_time = v; }
        if let Some(v) = self.sent { n.sent = v; }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn frequency_is_sorted_and_deduplicated() {
        let days = vec![Weekday::Friday, Weekday::Monday, Weekday::Friday];
        assert_eq!(normalize_frequency(days).unwrap(), vec![Weekday::Monday, Weekday::Friday]);
        assert!(normalize_frequency(vec![]).is_err());
    }

    #[test]
    fn unknown_weekday_is_rejected() {
        let v = json!(["monday", "someday"]);
        assert!(serde_json::from_value::<Vec<Weekday>>(v).is_err());
    }

    #[test]
    fn clock_format() {
        assert!(validate_clock("t", "07:30").is_ok());
        assert!(validate_clock("t", "23:59").is_ok());
        assert!(validate_clock("t", "24:00").is_err());
        assert!(validate_clock("t", "7:30").is_err());
        assert!(validate_clock("t", "07:60").is_err());
    }

    #[test]
    fn day_bounds_are_half_open() {
        let day = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        let (start, next) = day_bounds(day);
        assert_eq!(start.to_rfc3339(), "2024-03-10T00:00:00+00:00");
        assert_eq!(next, day_bounds(day.succ_opt().unwrap()).0);
    }

    #[test]
    fn update_distinguishes_null_from_missing() {
        let upd: UpdateHabit = serde_json::from_value(json!({"description": null})).unwrap();
        assert_eq!(upd.description, Some(None));
        let upd: UpdateHabit = serde_json::from_value(json!({"name": "Run"})).unwrap();
        assert_eq!(upd.description, None);
    }

    #[test]
    fn routine_type_uses_type_key() {
        let r: NewRoutine = serde_json::from_value(json!({
            "name": "Morning", "timeStart": "06:00", "timeEnd": "07:00", "type": "morning"
        }))
        .unwrap();
        assert_eq!(r.kind, RoutineType::Morning);
        assert_eq!(RoutineType::try_from("work".to_string()).unwrap(), RoutineType::Work);
        assert!(RoutineType::try_from("nap".to_string()).is_err());
    }

    #[test]
    fn public_user_has_no_password() {
        let user = NewUser {
            first_name: "A".into(),
            last_name: "L".into(),
            username: "alice".into(),
            email: "a@example.com".into(),
            phone: "555".into(),
            password: "hash".into(),
            notifications_enabled: true,
        }
        .into_user(1);
        let v = serde_json::to_value(PublicUser::from(user)).unwrap();
        assert!(v.get("password").is_none());
        assert_eq!(v["firstName"], "A");
    }
}
