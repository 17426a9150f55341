use crate::models::{
    Habit, HabitLog, NewHabit, NewHabitLog, NewNotification, NewRoutine, NewUser, Notification,
    PublicUser, Routine, RoutineType, UpdateHabit, UpdateHabitLog, UpdateNotification,
    UpdateRoutine, UpdateUser, Weekday,
};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::login,
        crate::routes::register,
        crate::routes::logout,
        crate::routes::auth_me,
        crate::routes::update_user,
        crate::routes::list_habits,
        crate::routes::create_habit,
        crate::routes::get_habit,
        crate::routes::update_habit,
        crate::routes::delete_habit,
        crate::routes::list_routines,
        crate::routes::create_routine,
        crate::routes::get_routine,
        crate::routes::update_routine,
        crate::routes::delete_routine,
        crate::routes::list_routine_habits,
        crate::routes::list_habit_logs,
        crate::routes::create_habit_log,
        crate::routes::update_habit_log,
        crate::routes::list_notifications,
        crate::routes::list_pending_notifications,
        crate::routes::create_notification,
        crate::routes::update_notification,
        crate::routes::delete_notification,
        crate::routes::sms_test,
    ),
    components(schemas(
        PublicUser, NewUser, UpdateUser,
        Habit, NewHabit, UpdateHabit, Weekday,
        Routine, NewRoutine, UpdateRoutine, RoutineType,
        HabitLog, NewHabitLog, UpdateHabitLog,
        Notification, NewNotification, UpdateNotification,
        crate::routes::LoginRequest, crate::routes::UserEnvelope,
        crate::routes::MessageResponse, crate::routes::SmsTestRequest,
    )),
    tags(
        (name = "auth", description = "Session login, registration and profile"),
        (name = "habits", description = "Habits, routines and completion logs"),
        (name = "notifications", description = "Scheduled reminders"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn documents_every_resource() {
        let doc = ApiDoc::openapi();
        for path in ["/api/auth/login", "/api/habits/{id}", "/api/habit-logs", "/api/notifications/pending", "/api/sms/test"] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
