use chrono::{DateTime, NaiveDate, Utc};

use crate::models::*;

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    /// A referenced parent row (user, habit, routine) does not exist.
    #[error("not found")] NotFound,
    /// A unique column (username, email, phone) is already taken.
    #[error("conflict")] Conflict,
    #[error("internal: {0}")] Internal(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

use async_trait::async_trait;

#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn get_user(&self, id: Id) -> RepoResult<Option<User>>;
    async fn get_user_by_username(&self, username: &str) -> RepoResult<Option<User>>;
    async fn get_user_by_email(&self, email: &str) -> RepoResult<Option<User>>;
    async fn get_user_by_phone(&self, phone: &str) -> RepoResult<Option<User>>;
    /// `new.password` must already be hashed.
    async fn create_user(&self, new: NewUser) -> RepoResult<User>;
    async fn update_user(&self, id: Id, upd: UpdateUser) -> RepoResult<Option<User>>;
}

#[async_trait]
pub trait HabitRepo: Send + Sync {
    async fn get_habit(&self, id: Id) -> RepoResult<Option<Habit>>;
    async fn list_habits_by_user(&self, user_id: Id) -> RepoResult<Vec<Habit>>;
    async fn list_habits_by_routine(&self, routine_id: Id) -> RepoResult<Vec<Habit>>;
    async fn create_habit(&self, user_id: Id, new: NewHabit) -> RepoResult<Habit>;
    async fn update_habit(&self, id: Id, upd: UpdateHabit) -> RepoResult<Option<Habit>>;
    /// Also removes the habit's logs and detaches its notifications.
    async fn delete_habit(&self, id: Id) -> RepoResult<bool>;
}

#[async_trait]
pub trait RoutineRepo: Send + Sync {
    async fn get_routine(&self, id: Id) -> RepoResult<Option<Routine>>;
    async fn list_routines_by_user(&self, user_id: Id) -> RepoResult<Vec<Routine>>;
    async fn create_routine(&self, user_id: Id, new: NewRoutine) -> RepoResult<Routine>;
    async fn update_routine(&self, id: Id, upd: UpdateRoutine) -> RepoResult<Option<Routine>>;
    /// Detaches notifications; habits keep their (now dangling) routine id.
    async fn delete_routine(&self, id: Id) -> RepoResult<bool>;
}

#[async_trait]
pub trait HabitLogRepo: Send + Sync {
    async fn get_habit_log(&self, id: Id) -> RepoResult<Option<HabitLog>>;
    async fn list_habit_logs_by_user(&self, user_id: Id) -> RepoResult<Vec<HabitLog>>;
    async fn list_habit_logs_by_habit(&self, habit_id: Id) -> RepoResult<Vec<HabitLog>>;
    /// Logs of `user_id` dated on `day` (UTC), per [`day_bounds`].
    async fn list_habit_logs_for_date(&self, user_id: Id, day: NaiveDate) -> RepoResult<Vec<HabitLog>>;
    async fn create_habit_log(&self, user_id: Id, new: NewHabitLog) -> RepoResult<HabitLog>;
    async fn update_habit_log(&self, id: Id, upd: UpdateHabitLog) -> RepoResult<Option<HabitLog>>;
}

#[async_trait]
pub trait NotificationRepo: Send + Sync {
    async fn get_notification(&self, id: Id) -> RepoResult<Option<Notification>>;
    async fn list_notifications_by_user(&self, user_id: Id) -> RepoResult<Vec<Notification>>;
    /// Unsent notifications scheduled at or before `now`, across all users.
    async fn list_pending_notifications(&self, now: DateTime<Utc>) -> RepoResult<Vec<Notification>>;
    async fn create_notification(&self, user_id: Id, new: NewNotification) -> RepoResult<Notification>;
    async fn update_notification(&self, id: Id, upd: UpdateNotification) -> RepoResult<Option<Notification>>;
    async fn delete_notification(&self, id: Id) -> RepoResult<bool>;
}

pub trait Repo: UserRepo + HabitRepo + RoutineRepo + HabitLogRepo + NotificationRepo {}

impl<T> Repo for T where T: UserRepo + HabitRepo + RoutineRepo + HabitLogRepo + NotificationRepo {}

#[cfg(feature = "inmem-store")]
pub mod inmem {
    use super::*;
    use log::{error, info, warn};
    use serde::{Deserialize, Serialize};
    use std::collections::BTreeMap;
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

    const SNAPSHOT_FILE: &str = "state.json";

    #[derive(Default, Serialize, Deserialize)]
    struct Counters {
        users: Id,
        habits: Id,
        routines: Id,
        habit_logs: Id,
        notifications: Id,
    }

    // BTreeMap keeps every listing in id order, matching `ORDER BY id` in Postgres.
    #[derive(Default, Serialize, Deserialize)]
    struct State {
        users: BTreeMap<Id, User>,
        habits: BTreeMap<Id, Habit>,
        routines: BTreeMap<Id, Routine>,
        habit_logs: BTreeMap<Id, HabitLog>,
        notifications: BTreeMap<Id, Notification>,
        counters: Counters,
    }

    fn bump(counter: &mut Id) -> Id {
        *counter += 1;
        *counter
    }

    /// Map-backed store. Clones share the same state.
    #[derive(Clone, Default)]
    pub struct InMemRepo {
        state: Arc<RwLock<State>>,
        snapshot_path: Option<Arc<PathBuf>>,
        // one snapshot writer at a time
        persist_lock: Arc<Mutex<()>>,
    }

    impl InMemRepo {
        pub fn new() -> Self {
            Self::default()
        }

        /// Loads `<dir>/state.json` if present and rewrites it after every mutation.
        pub fn with_snapshot(dir: impl AsRef<Path>) -> Self {
            let path = dir.as_ref().join(SNAPSHOT_FILE);
            let state = Self::load_state_from(&path);
            Self {
                state: Arc::new(RwLock::new(state)),
                snapshot_path: Some(Arc::new(path)),
                persist_lock: Arc::default(),
            }
        }

        fn load_state_from(path: &Path) -> State {
            match std::fs::read(path) {
                Ok(bytes) => match serde_json::from_slice::<State>(&bytes) {
                    Ok(s) => {
                        info!("[inmem] loaded snapshot '{}'", path.display());
                        s
                    }
                    Err(e) => {
                        warn!("[inmem] failed to parse snapshot '{}': {e}. Starting empty.", path.display());
                        State::default()
                    }
                },
                Err(e) => {
                    info!("[inmem] no snapshot at '{}': {e}. Starting empty.", path.display());
                    State::default()
                }
            }
        }

        /// Rewrites the snapshot atomically (temp file, then rename).
        fn persist(&self) {
            let Some(path) = self.snapshot_path.as_ref() else { return };
            let _guard = match self.persist_lock.lock() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            // serialized under the persist lock so the last writer carries the latest state
            let bytes = match self.read() {
                Ok(s) => serde_json::to_vec_pretty(&*s),
                Err(e) => { error!("[inmem] snapshot skipped: {e}"); return; }
            };
            let bytes = match bytes {
                Ok(b) => b,
                Err(e) => { error!("[inmem] failed to serialize snapshot: {e}"); return; }
            };
            if let Some(dir) = path.parent() {
                let _ = std::fs::create_dir_all(dir);
            }
            let tmp = path.with_extension("json.tmp");
            if let Err(e) = std::fs::write(&tmp, bytes).and_then(|_| std::fs::rename(&tmp, path.as_path())) {
                error!("[inmem] failed to write snapshot '{}': {e}", path.display());
            }
        }

        fn read(&self) -> RepoResult<RwLockReadGuard<'_, State>> {
            self.state.read().map_err(|_| RepoError::Internal("state lock poisoned".into()))
        }

        fn write(&self) -> RepoResult<RwLockWriteGuard<'_, State>> {
            self.state.write().map_err(|_| RepoError::Internal("state lock poisoned".into()))
        }

        fn find_user(&self, pred: impl Fn(&User) -> bool) -> RepoResult<Option<User>> {
            let s = self.read()?;
            Ok(s.users.values().find(|&u| pred(u)).cloned())
        }
    }

    #[async_trait]
    impl UserRepo for InMemRepo {
        async fn get_user(&self, id: Id) -> RepoResult<Option<User>> {
            Ok(self.read()?.users.get(&id).cloned())
        }
        async fn get_user_by_username(&self, username: &str) -> RepoResult<Option<User>> {
            self.find_user(|u| u.username == username)
        }
        async fn get_user_by_email(&self, email: &str) -> RepoResult<Option<User>> {
            self.find_user(|u| u.email == email)
        }
        async fn get_user_by_phone(&self, phone: &str) -> RepoResult<Option<User>> {
            self.find_user(|u| u.phone == phone)
        }
        async fn create_user(&self, new: NewUser) -> RepoResult<User> {
            let mut s = self.write()?;
            // mirrors the UNIQUE constraints of the users table
            if s.users.values().any(|u| u.username == new.username || u.email == new.email || u.phone == new.phone) {
                return Err(RepoError::Conflict);
            }
            let id = bump(&mut s.counters.users);
            let user = new.into_user(id);
            s.users.insert(id, user.clone());
            drop(s);                       // release lock before persisting
            self.persist();
            Ok(user)
        }
        async fn update_user(&self, id: Id, upd: UpdateUser) -> RepoResult<Option<User>> {
            let mut s = self.write()?;
            if !s.users.contains_key(&id) { return Ok(None); }

            // uniqueness check before taking the mutable entry
            let clash = s.users.values().any(|u| {
                u.id != id
                    && (upd.email.as_deref() == Some(u.email.as_str())
                        || upd.phone.as_deref() == Some(u.phone.as_str()))
            });
            if clash {
                return Err(RepoError::Conflict);
            }

            let Some(user) = s.users.get_mut(&id) else { return Ok(None) };
            upd.apply_to(user);
            let updated = user.clone();
            drop(s);
            self.persist();
            Ok(Some(updated))
        }
    }

    #[async_trait]
    impl HabitRepo for InMemRepo {
        async fn get_habit(&self, id: Id) -> RepoResult<Option<Habit>> {
            Ok(self.read()?.habits.get(&id).cloned())
        }
        async fn list_habits_by_user(&self, user_id: Id) -> RepoResult<Vec<Habit>> {
            let s = self.read()?;
            Ok(s.habits.values().filter(|h| h.user_id == user_id).cloned().collect())
        }
        async fn list_habits_by_routine(&self, routine_id: Id) -> RepoResult<Vec<Habit>> {
            let s = self.read()?;
            Ok(s.habits.values().filter(|h| h.routine_id == Some(routine_id)).cloned().collect())
        }
        async fn create_habit(&self, user_id: Id, new: NewHabit) -> RepoResult<Habit> {
            let mut s = self.write()?;
            if !s.users.contains_key(&user_id) { return Err(RepoError::NotFound); }
            let id = bump(&mut s.counters.habits);
            let habit = new.into_habit(id, user_id);
            s.habits.insert(id, habit.clone());
            drop(s);
            self.persist();
            Ok(habit)
        }
        async fn update_habit(&self, id: Id, upd: UpdateHabit) -> RepoResult<Option<Habit>> {
            let mut s = self.write()?;
            let Some(habit) = s.habits.get_mut(&id) else { return Ok(None) };
            upd.apply_to(habit);
            let updated = habit.clone();
            drop(s);
            self.persist();
            Ok(Some(updated))
        }
        async fn delete_habit(&self, id: Id) -> RepoResult<bool> {
            let mut s = self.write()?;
            if s.habits.remove(&id).is_none() { return Ok(false); }
            s.habit_logs.retain(|_, l| l.habit_id != id);
            for n in s.notifications.values_mut().filter(|n| n.habit_id == Some(id)) {
                n.habit_id = None;
            }
            drop(s);
            self.persist();
            Ok(true)
        }
    }

    #[async_trait]
    impl RoutineRepo for InMemRepo {
        async fn get_routine(&self, id: Id) -> RepoResult<Option<Routine>> {
            Ok(self.read()?.routines.get(&id).cloned())
        }
        async fn list_routines_by_user(&self, user_id: Id) -> RepoResult<Vec<Routine>> {
            let s = self.read()?;
            Ok(s.routines.values().filter(|r| r.user_id == user_id).cloned().collect())
        }
        async fn create_routine(&self, user_id: Id, new: NewRoutine) -> RepoResult<Routine> {
            let mut s = self.write()?;
            if !s.users.contains_key(&user_id) { return Err(RepoError::NotFound); }
            let id = bump(&mut s.counters.routines);
            let routine = new.into_routine(id, user_id);
            s.routines.insert(id, routine.clone());
            drop(s);
            self.persist();
            Ok(routine)
        }
        async fn update_routine(&self, id: Id, upd: UpdateRoutine) -> RepoResult<Option<Routine>> {
            let mut s = self.write()?;
            let Some(routine) = s.routines.get_mut(&id) else { return Ok(None) };
            upd.apply_to(routine);
            let updated = routine.clone();
            drop(s);
            self.persist();
            Ok(Some(updated))
        }
        async fn delete_routine(&self, id: Id) -> RepoResult<bool> {
            let mut s = self.write()?;
            if s.routines.remove(&id).is_none() { return Ok(false); }
            for n in s.notifications.values_mut().filter(|n| n.routine_id == Some(id)) {
                n.routine_id = None;
            }
            drop(s);
            self.persist();
            Ok(true)
        }
    }

    #[async_trait]
    impl HabitLogRepo for InMemRepo {
        async fn get_habit_log(&self, id: Id) -> RepoResult<Option<HabitLog>> {
            Ok(self.read()?.habit_logs.get(&id).cloned())
        }
        async fn list_habit_logs_by_user(&self, user_id: Id) -> RepoResult<Vec<HabitLog>> {
            let s = self.read()?;
            Ok(s.habit_logs.values().filter(|l| l.user_id == user_id).cloned().collect())
        }
        async fn list_habit_logs_by_habit(&self, habit_id: Id) -> RepoResult<Vec<HabitLog>> {
            let s = self.read()?;
            Ok(s.habit_logs.values().filter(|l| l.habit_id == habit_id).cloned().collect())
        }
        async fn list_habit_logs_for_date(&self, user_id: Id, day: NaiveDate) -> RepoResult<Vec<HabitLog>> {
            let (start, next) = day_bounds(day);
            let s = self.read()?;
            Ok(s.habit_logs
                .values()
                .filter(|l| l.user_id == user_id && l.date >= start && l.date < next)
                .cloned()
                .collect())
        }
        async fn create_habit_log(&self, user_id: Id, new: NewHabitLog) -> RepoResult<HabitLog> {
            let mut s = self.write()?;
            if !s.users.contains_key(&user_id) || !s.habits.contains_key(&new.habit_id) {
                return Err(RepoError::NotFound);
            }
            let id = bump(&mut s.counters.habit_logs);
            let log = new.into_log(id, user_id);
            s.habit_logs.insert(id, log.clone());
            drop(s);
            self.persist();
            Ok(log)
        }
        async fn update_habit_log(&self, id: Id, upd: UpdateHabitLog) -> RepoResult<Option<HabitLog>> {
            let mut s = self.write()?;
            let Some(log) = s.habit_logs.get_mut(&id) else { return Ok(None) };
            upd.apply_to(log);
            let updated = log.clone();
            drop(s);
            self.persist();
            Ok(Some(updated))
        }
    }

    #[async_trait]
    impl NotificationRepo for InMemRepo {
        async fn get_notification(&self, id: Id) -> RepoResult<Option<Notification>> {
            Ok(self.read()?.notifications.get(&id).cloned())
        }
        async fn list_notifications_by_user(&self, user_id: Id) -> RepoResult<Vec<Notification>> {
            let s = self.read()?;
            Ok(s.notifications.values().filter(|n| n.user_id == user_id).cloned().collect())
        }
        async fn list_pending_notifications(&self, now: DateTime<Utc>) -> RepoResult<Vec<Notification>> {
            let s = self.read()?;
            Ok(s.notifications.values().filter(|n| n.is_pending(now)).cloned().collect())
        }
        async fn create_notification(&self, user_id: Id, new: NewNotification) -> RepoResult<Notification> {
            let mut s = self.write()?;
            let habit_ok = new.habit_id.map_or(true, |h| s.habits.contains_key(&h));
            let routine_ok = new.routine_id.map_or(true, |r| s.routines.contains_key(&r));
            if !s.users.contains_key(&user_id) || !habit_ok || !routine_ok {
                return Err(RepoError::NotFound);
            }
            let id = bump(&mut s.counters.notifications);
            let n = new.into_notification(id, user_id);
            s.notifications.insert(id, n.clone());
            drop(s);
            self.persist();
            Ok(n)
        }
        async fn update_notification(&self, id: Id, upd: UpdateNotification) -> RepoResult<Option<Notification>> {
            let mut s = self.write()?;
            let habit_ok = match upd.habit_id { Some(Some(h)) => s.habits.contains_key(&h), _ => true };
            let routine_ok = match upd.routine_id { Some(Some(r)) => s.routines.contains_key(&r), _ => true };
            if !s.notifications.contains_key(&id) { return Ok(None); }
            if !habit_ok || !routine_ok { return Err(RepoError::NotFound); }
            let Some(n) = s.notifications.get_mut(&id) else { return Ok(None) };
            upd.apply_to(n);
            let updated = n.clone();
            drop(s);
            self.persist();
            Ok(Some(updated))
        }
        async fn delete_notification(&self, id: Id) -> RepoResult<bool> {
            let mut s = self.write()?;
            let removed = s.notifications.remove(&id).is_some();
            drop(s);
            if removed { self.persist(); }
            Ok(removed)
        }
    }
}

// Postgres implementation (feature = "postgres-store")
#[cfg(feature = "postgres-store")]
pub mod pg {
    use super::*;
    use sqlx::postgres::PgPoolOptions;
    use sqlx::types::Json;
    use sqlx::{Pool, Postgres};

    macro_rules! user_cols { () => { "id, first_name, last_name, username, password, email, phone, notifications_enabled" }; }
    macro_rules! habit_cols { () => { "id, user_id, name, description, start_date, routine_id, time_of_day, completed, frequency, reminder_enabled" }; }
    macro_rules! routine_cols { () => { "id, user_id, name, description, time_start, time_end, type" }; }
    macro_rules! log_cols { () => { "id, habit_id, user_id, date, completed" }; }
    macro_rules! notification_cols { () => { "id, user_id, habit_id, routine_id, message, scheduled_time, sent" }; }

    /// Unique violations become `Conflict`, foreign-key violations `NotFound`.
    fn db_err(e: sqlx::Error) -> RepoError {
        if let sqlx::Error::Database(db) = &e {
            match db.code().as_deref() {
                Some("23505") => return RepoError::Conflict,
                Some("23503") => return RepoError::NotFound,
                _ => {}
            }
        }
        RepoError::Internal(e.to_string())
    }

    #[derive(Clone)]
    pub struct PgRepo { pool: Pool<Postgres> }

    impl PgRepo {
        pub fn new(pool: Pool<Postgres>) -> Self { Self { pool } }

        /// Lazily connecting pool; the first query opens the connection.
        pub fn connect_lazy(url: &str, max_connections: u32) -> anyhow::Result<Self> {
            let pool = PgPoolOptions::new().max_connections(max_connections).connect_lazy(url)?;
            Ok(Self::new(pool))
        }

        /// Applies the embedded schema migrations.
        pub async fn migrate(&self) -> anyhow::Result<()> {
            sqlx::migrate!("./migrations").run(&self.pool).await?;
            Ok(())
        }

        async fn user_where(&self, sql: &'static str, value: &str) -> RepoResult<Option<User>> {
            sqlx::query_as::<_, User>(sql)
                .bind(value)
                .fetch_optional(&self.pool).await.map_err(db_err)
        }
    }

    #[async_trait]
    impl UserRepo for PgRepo {
        async fn get_user(&self, id: Id) -> RepoResult<Option<User>> {
            sqlx::query_as::<_, User>(concat!("SELECT ", user_cols!(), " FROM users WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool).await.map_err(db_err)
        }
        async fn get_user_by_username(&self, username: &str) -> RepoResult<Option<User>> {
            self.user_where(concat!("SELECT ", user_cols!(), " FROM users WHERE username = $1"), username).await
        }
        async fn get_user_by_email(&self, email: &str) -> RepoResult<Option<User>> {
            self.user_where(concat!("SELECT ", user_cols!(), " FROM users WHERE email = $1"), email).await
        }
        async fn get_user_by_phone(&self, phone: &str) -> RepoResult<Option<User>> {
            self.user_where(concat!("SELECT ", user_cols!(), " FROM users WHERE phone = $1"), phone).await
        }
        async fn create_user(&self, new: NewUser) -> RepoResult<User> {
            sqlx::query_as::<_, User>(concat!(
                "INSERT INTO users (first_name, last_name, username, password, email, phone, notifications_enabled) ",
                "VALUES ($1,$2,$3,$4,$5,$6,$7) RETURNING ", user_cols!()
            ))
            .bind(&new.first_name).bind(&new.last_name).bind(&new.username).bind(&new.password)
            .bind(&new.email).bind(&new.phone).bind(new.notifications_enabled)
            .fetch_one(&self.pool).await.map_err(db_err)
        }
        async fn update_user(&self, id: Id, upd: UpdateUser) -> RepoResult<Option<User>> {
            let mut tx = self.pool.begin().await.map_err(db_err)?;
            let current = sqlx::query_as::<_, User>(concat!("SELECT ", user_cols!(), " FROM users WHERE id = $1 FOR UPDATE"))
                .bind(id)
                .fetch_optional(&mut *tx).await.map_err(db_err)?;
            let Some(mut user) = current else { return Ok(None) };
            upd.apply_to(&mut user);
            let rec = sqlx::query_as::<_, User>(concat!(
                "UPDATE users SET first_name = $2, last_name = $3, password = $4, email = $5, phone = $6, ",
                "notifications_enabled = $7 WHERE id = $1 RETURNING ", user_cols!()
            ))
            .bind(id).bind(&user.first_name).bind(&user.last_name).bind(&user.password)
            .bind(&user.email).bind(&user.phone).bind(user.notifications_enabled)
            .fetch_one(&mut *tx).await.map_err(db_err)?;
            tx.commit().await.map_err(db_err)?;
            Ok(Some(rec))
        }
    }

    #[async_trait]
    impl HabitRepo for PgRepo {
        async fn get_habit(&self, id: Id) -> RepoResult<Option<Habit>> {
            sqlx::query_as::<_, Habit>(concat!("SELECT ", habit_cols!(), " FROM habits WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool).await.map_err(db_err)
        }
        async fn list_habits_by_user(&self, user_id: Id) -> RepoResult<Vec<Habit>> {
            sqlx::query_as::<_, Habit>(concat!("SELECT ", habit_cols!(), " FROM habits WHERE user_id = $1 ORDER BY id"))
                .bind(user_id)
                .fetch_all(&self.pool).await.map_err(db_err)
        }
        async fn list_habits_by_routine(&self, routine_id: Id) -> RepoResult<Vec<Habit>> {
            sqlx::query_as::<_, Habit>(concat!("SELECT ", habit_cols!(), " FROM habits WHERE routine_id = $1 ORDER BY id"))
                .bind(routine_id)
                .fetch_all(&self.pool).await.map_err(db_err)
        }
        async fn create_habit(&self, user_id: Id, new: NewHabit) -> RepoResult<Habit> {
            sqlx::query_as::<_, Habit>(concat!(
                "INSERT INTO habits (user_id, name, description, start_date, routine_id, time_of_day, completed, frequency, reminder_enabled) ",
                "VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9) RETURNING ", habit_cols!()
            ))
            .bind(user_id).bind(&new.name).bind(&new.description).bind(new.start_date).bind(new.routine_id)
            .bind(&new.time_of_day).bind(new.completed).bind(Json(&new.frequency)).bind(new.reminder_enabled)
            .fetch_one(&self.pool).await.map_err(db_err)
        }
        async fn update_habit(&self, id: Id, upd: UpdateHabit) -> RepoResult<Option<Habit>> {
            // read-merge-write keeps partial-update semantics identical to the in-memory store
            let mut tx = self.pool.begin().await.map_err(db_err)?;
            let current = sqlx::query_as::<_, Habit>(concat!("SELECT ", habit_cols!(), " FROM habits WHERE id = $1 FOR UPDATE"))
                .bind(id)
                .fetch_optional(&mut *tx).await.map_err(db_err)?;
            let Some(mut habit) = current else { return Ok(None) };
            upd.apply_to(&mut habit);
            let rec = sqlx::query_as::<_, Habit>(concat!(
                "UPDATE habits SET name = $2, description = $3, start_date = $4, routine_id = $5, time_of_day = $6, ",
                "completed = $7, frequency = $8, reminder_enabled = $9 WHERE id = $1 RETURNING ", habit_cols!()
            ))
            .bind(id).bind(&habit.name).bind(&habit.description).bind(habit.start_date).bind(habit.routine_id)
            .bind(&habit.time_of_day).bind(habit.completed).bind(Json(&habit.frequency)).bind(habit.reminder_enabled)
            .fetch_one(&mut *tx).await.map_err(db_err)?;
            tx.commit().await.map_err(db_err)?;
            Ok(Some(rec))
        }
        async fn delete_habit(&self, id: Id) -> RepoResult<bool> {
            let res = sqlx::query("DELETE FROM habits WHERE id = $1")
                .bind(id)
                .execute(&self.pool).await.map_err(db_err)?;
            Ok(res.rows_affected() > 0)
        }
    }

    #[async_trait]
    impl RoutineRepo for PgRepo {
        async fn get_routine(&self, id: Id) -> RepoResult<Option<Routine>> {
            sqlx::query_as::<_, Routine>(concat!("SELECT ", routine_cols!(), " FROM routines WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool).await.map_err(db_err)
        }
        async fn list_routines_by_user(&self, user_id: Id) -> RepoResult<Vec<Routine>> {
            sqlx::query_as::<_, Routine>(concat!("SELECT ", routine_cols!(), " FROM routines WHERE user_id = $1 ORDER BY id"))
                .bind(user_id)
                .fetch_all(&self.pool).await.map_err(db_err)
        }
        async fn create_routine(&self, user_id: Id, new: NewRoutine) -> RepoResult<Routine> {
            sqlx::query_as::<_, Routine>(concat!(
                "INSERT INTO routines (user_id, name, description, time_start, time_end, type) ",
                "VALUES ($1,$2,$3,$4,$5,$6) RETURNING ", routine_cols!()
            ))
            .bind(user_id).bind(&new.name).bind(&new.description)
            .bind(&new.time_start).bind(&new.time_end).bind(new.kind.as_str())
            .fetch_one(&self.pool).await.map_err(db_err)
        }
        async fn update_routine(&self, id: Id, upd: UpdateRoutine) -> RepoResult<Option<Routine>> {
            let mut tx = self.pool.begin().await.map_err(db_err)?;
            let current = sqlx::query_as::<_, Routine>(concat!("SELECT ", routine_cols!(), " FROM routines WHERE id = $1 FOR UPDATE"))
                .bind(id)
                .fetch_optional(&mut *tx).await.map_err(db_err)?;
            let Some(mut routine) = current else { return Ok(None) };
            upd.apply_to(&mut routine);
            let rec = sqlx::query_as::<_, Routine>(concat!(
                "UPDATE routines SET name = $2, description = $3, time_start = $4, time_end = $5, type = $6 ",
                "WHERE id = $1 RETURNING ", routine_cols!()
            ))
            .bind(id).bind(&routine.name).bind(&routine.description)
            .bind(&routine.time_start).bind(&routine.time_end).bind(routine.kind.as_str())
            .fetch_one(&mut *tx).await.map_err(db_err)?;
            tx.commit().await.map_err(db_err)?;
            Ok(Some(rec))
        }
        async fn delete_routine(&self, id: Id) -> RepoResult<bool> {
            let res = sqlx::query("DELETE FROM routines WHERE id = $1")
                .bind(id)
                .execute(&self.pool).await.map_err(db_err)?;
            Ok(res.rows_affected() > 0)
        }
    }

    #[async_trait]
    impl HabitLogRepo for PgRepo {
        async fn get_habit_log(&self, id: Id) -> RepoResult<Option<HabitLog>> {
            sqlx::query_as::<_, HabitLog>(concat!("SELECT ", log_cols!(), " FROM habit_logs WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool).await.map_err(db_err)
        }
        async fn list_habit_logs_by_user(&self, user_id: Id) -> RepoResult<Vec<HabitLog>> {
            sqlx::query_as::<_, HabitLog>(concat!("SELECT ", log_cols!(), " FROM habit_logs WHERE user_id = $1 ORDER BY id"))
                .bind(user_id)
                .fetch_all(&self.pool).await.map_err(db_err)
        }
        async fn list_habit_logs_by_habit(&self, habit_id: Id) -> RepoResult<Vec<HabitLog>> {
            sqlx::query_as::<_, HabitLog>(concat!("SELECT ", log_cols!(), " FROM habit_logs WHERE habit_id = $1 ORDER BY id"))
                .bind(habit_id)
                .fetch_all(&self.pool).await.map_err(db_err)
        }
        async fn list_habit_logs_for_date(&self, user_id: Id, day: NaiveDate) -> RepoResult<Vec<HabitLog>> {
            let (start, next) = day_bounds(day);
            sqlx::query_as::<_, HabitLog>(concat!(
                "SELECT ", log_cols!(), " FROM habit_logs ",
                "WHERE user_id = $1 AND date >= $2 AND date < $3 ORDER BY id"
            ))
            .bind(user_id).bind(start).bind(next)
            .fetch_all(&self.pool).await.map_err(db_err)
        }
        async fn create_habit_log(&self, user_id: Id, new: NewHabitLog) -> RepoResult<HabitLog> {
            sqlx::query_as::<_, HabitLog>(concat!(
                "INSERT INTO habit_logs (habit_id, user_id, date, completed) VALUES ($1,$2,$3,$4) RETURNING ", log_cols!()
            ))
            .bind(new.habit_id).bind(user_id).bind(new.date).bind(new.completed)
            .fetch_one(&self.pool).await.map_err(db_err)
        }
        async fn update_habit_log(&self, id: Id, upd: UpdateHabitLog) -> RepoResult<Option<HabitLog>> {
            sqlx::query_as::<_, HabitLog>(concat!(
                "UPDATE habit_logs SET date = COALESCE($2, date), completed = COALESCE($3, completed) ",
                "WHERE id = $1 RETURNING ", log_cols!()
            ))
            .bind(id).bind(upd.date).bind(upd.completed)
            .fetch_optional(&self.pool).await.map_err(db_err)
        }
    }

    #[async_trait]
    impl NotificationRepo for PgRepo {
        async fn get_notification(&self, id: Id) -> RepoResult<Option<Notification>> {
            sqlx::query_as::<_, Notification>(concat!("SELECT ", notification_cols!(), " FROM notifications WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool).await.map_err(db_err)
        }
        async fn list_notifications_by_user(&self, user_id: Id) -> RepoResult<Vec<Notification>> {
            sqlx::query_as::<_, Notification>(concat!("SELECT ", notification_cols!(), " FROM notifications WHERE user_id = $1 ORDER BY id"))
                .bind(user_id)
                .fetch_all(&self.pool).await.map_err(db_err)
        }
        async fn list_pending_notifications(&self, now: DateTime<Utc>) -> RepoResult<Vec<Notification>> {
            sqlx::query_as::<_, Notification>(concat!(
                "SELECT ", notification_cols!(), " FROM notifications ",
                "WHERE sent = FALSE AND scheduled_time <= $1 ORDER BY id"
            ))
            .bind(now)
            .fetch_all(&self.pool).await.map_err(db_err)
        }
        async fn create_notification(&self, user_id: Id, new: NewNotification) -> RepoResult<Notification> {
            sqlx::query_as::<_, Notification>(concat!(
                "INSERT INTO notifications (user_id, habit_id, routine_id, message, scheduled_time, sent) ",
                "VALUES ($1,$2,$3,$4,$5,$6) RETURNING ", notification_cols!()
            ))
            .bind(user_id).bind(new.habit_id).bind(new.routine_id)
            .bind(&new.message).bind(new.scheduled_time).bind(new.sent)
            .fetch_one(&self.pool).await.map_err(db_err)
        }
        async fn update_notification(&self, id: Id, upd: UpdateNotification) -> RepoResult<Option<Notification>> {
            let mut tx = self.pool.begin().await.map_err(db_err)?;
            let current = sqlx::query_as::<_, Notification>(concat!("SELECT ", notification_cols!(), " FROM notifications WHERE id = $1 FOR UPDATE"))
                .bind(id)
                .fetch_optional(&mut *tx).await.map_err(db_err)?;
            let Some(mut n) = current else { return Ok(None) };
            upd.apply_to(&mut n);
            let rec = sqlx::query_as::<_, Notification>(concat!(
                "UPDATE notifications SET habit_id = $2, routine_id = $3, message = $4, scheduled_time = $5, sent = $6 ",
                "WHERE id = $1 RETURNING ", notification_cols!()
            ))
            .bind(id).bind(n.habit_id).bind(n.routine_id).bind(&n.message).bind(n.scheduled_time).bind(n.sent)
            .fetch_one(&mut *tx).await.map_err(db_err)?;
            tx.commit().await.map_err(db_err)?;
            Ok(Some(rec))
        }
        async fn delete_notification(&self, id: Id) -> RepoResult<bool> {
            let res = sqlx::query("DELETE FROM notifications WHERE id = $1")
                .bind(id)
                .execute(&self.pool).await.map_err(db_err)?;
            Ok(res.rows_affected() > 0)
        }
    }
}
