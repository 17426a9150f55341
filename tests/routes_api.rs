#![cfg(feature = "inmem-store")]

use actix_web::cookie::Cookie;
use actix_web::{test, web, App};
use pacepal::repo::inmem::InMemRepo;
use pacepal::routes::config;
use pacepal::session::{SessionStore, SESSION_COOKIE};
use pacepal::AppState;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

fn state() -> AppState {
    AppState::new(Arc::new(InMemRepo::new()), SessionStore::new(Duration::from_secs(3600)), 10)
}

fn registration(name: &str) -> Value {
    json!({
        "firstName": "Test",
        "lastName": "User",
        "username": name,
        "email": format!("{name}@example.com"),
        "phone": format!("555-{name}"),
        "password": "password1"
    })
}

fn habit_body() -> Value {
    json!({
        "name": "Meditate",
        "startDate": "2024-05-01T00:00:00Z",
        "timeOfDay": "06:30",
        "frequency": ["friday", "monday", "monday"]
    })
}

macro_rules! app {
    ($state:expr) => {
        test::init_service(App::new().app_data(web::Data::new($state)).configure(config)).await
    };
}

macro_rules! register {
    ($app:expr, $name:expr) => {{
        let req = test::TestRequest::post().uri("/api/auth/register").set_json(registration($name)).to_request();
        let resp = test::call_service(&$app, req).await;
        assert_eq!(resp.status(), 201);
        let cookie = resp
            .response()
            .cookies()
            .find(|c| c.name() == SESSION_COOKIE)
            .map(|c| c.into_owned())
            .expect("session cookie");
        let body: Value = test::read_body_json(resp).await;
        (body["user"]["id"].as_i64().unwrap(), cookie)
    }};
}

// Calls the service with an optional session cookie; returns status and JSON body (Null when empty).
macro_rules! send {
    ($app:expr, $req:expr, $cookie:expr) => {{
        let cookie: Option<&Cookie<'static>> = $cookie;
        let req = match cookie {
            Some(c) => $req.cookie(c.clone()),
            None => $req,
        };
        let resp = test::call_service(&$app, req.to_request()).await;
        let status = resp.status().as_u16();
        let body = test::read_body(resp).await;
        let value: Value = if body.is_empty() { Value::Null } else { serde_json::from_slice(&body).unwrap() };
        (status, value)
    }};
}

#[actix_web::test]
async fn auth_flow_with_session_cookie() {
    let app = app!(state());
    let (id, cookie) = register!(app, "alice");

    let (status, me) = send!(app, test::TestRequest::get().uri("/api/auth/me"), Some(&cookie));
    assert_eq!(status, 200);
    assert_eq!(me["user"]["id"], id);
    assert!(me["user"].get("password").is_none());

    let (status, body) = send!(app, test::TestRequest::get().uri("/api/auth/me"), None);
    assert_eq!(status, 401);
    assert_eq!(body["message"], "Unauthorized");

    let login = json!({"username": "alice", "password": "nope"});
    let (status, body) = send!(app, test::TestRequest::post().uri("/api/auth/login").set_json(login), None);
    assert_eq!(status, 401);
    assert_eq!(body["message"], "Incorrect username or password");

    let (status, _) = send!(app, test::TestRequest::post().uri("/api/auth/logout"), Some(&cookie));
    assert_eq!(status, 200);
    let (status, _) = send!(app, test::TestRequest::get().uri("/api/habits"), Some(&cookie));
    assert_eq!(status, 401);

    let login = json!({"username": "alice", "password": "password1"});
    let req = test::TestRequest::post().uri("/api/auth/login").set_json(login).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    assert!(resp.response().cookies().any(|c| c.name() == SESSION_COOKIE));
}

#[actix_web::test]
async fn register_rejects_duplicates_and_bad_input() {
    let app = app!(state());
    register!(app, "bob");

    let req = test::TestRequest::post().uri("/api/auth/register").set_json(registration("bob"));
    let (status, body) = send!(app, req, None);
    assert_eq!(status, 400);
    assert_eq!(body["message"], "Email already in use");

    let req = test::TestRequest::post().uri("/api/auth/register").set_json(json!({"username": "x"}));
    let (status, body) = send!(app, req, None);
    assert_eq!(status, 400);
    assert!(body["message"].is_string());
}

#[actix_web::test]
async fn habit_lifecycle_and_ownership() {
    let app = app!(state());
    let (alice, alice_c) = register!(app, "alice");
    let (bob, bob_c) = register!(app, "bob");

    let req = test::TestRequest::post().uri("/api/habits").set_json(habit_body());
    let (status, habit) = send!(app, req, Some(&alice_c));
    assert_eq!(status, 201);
    assert_eq!(habit["userId"], alice);
    assert_eq!(habit["frequency"], json!(["monday", "friday"]));
    assert_eq!(habit["reminderEnabled"], true);
    let hid = habit["id"].as_i64().unwrap();

    // creating on someone else's behalf
    let mut body = habit_body();
    body["userId"] = json!(bob);
    let (status, _) = send!(app, test::TestRequest::post().uri("/api/habits").set_json(body), Some(&alice_c));
    assert_eq!(status, 403);

    let mut body = habit_body();
    body["timeOfDay"] = json!("25:00");
    let (status, _) = send!(app, test::TestRequest::post().uri("/api/habits").set_json(body), Some(&alice_c));
    assert_eq!(status, 400);

    let uri = format!("/api/habits/{hid}");
    let (status, _) = send!(app, test::TestRequest::get().uri(&uri), Some(&bob_c));
    assert_eq!(status, 403);
    let hijack = json!({"name": "Nap", "completed": true});
    let (status, _) = send!(app, test::TestRequest::put().uri(&uri).set_json(hijack), Some(&bob_c));
    assert_eq!(status, 403);
    let (_, unchanged) = send!(app, test::TestRequest::get().uri(&uri), Some(&alice_c));
    assert_eq!(unchanged, habit);
    let (status, _) = send!(app, test::TestRequest::delete().uri(&uri), Some(&bob_c));
    assert_eq!(status, 403);
    let (status, list) = send!(app, test::TestRequest::get().uri("/api/habits"), Some(&bob_c));
    assert_eq!(status, 200);
    assert_eq!(list, json!([]));

    let upd = json!({"completed": true, "description": "quiet"});
    let (status, updated) = send!(app, test::TestRequest::put().uri(&uri).set_json(upd), Some(&alice_c));
    assert_eq!(status, 200);
    assert_eq!(updated["completed"], true);
    assert_eq!(updated["name"], "Meditate");

    let (status, _) = send!(app, test::TestRequest::delete().uri(&uri), Some(&alice_c));
    assert_eq!(status, 204);
    let (status, body) = send!(app, test::TestRequest::get().uri(&uri), Some(&alice_c));
    assert_eq!(status, 404);
    assert_eq!(body["message"], "Habit not found");
}

#[actix_web::test]
async fn routines_logs_and_notifications() {
    let app = app!(state());
    let (_, alice_c) = register!(app, "alice");
    let (_, bob_c) = register!(app, "bob");

    let routine = json!({"name": "Morning", "timeStart": "06:00", "timeEnd": "08:00", "type": "morning"});
    let (status, routine) = send!(app, test::TestRequest::post().uri("/api/routines").set_json(routine), Some(&alice_c));
    assert_eq!(status, 201);
    assert_eq!(routine["type"], "morning");
    let rid = routine["id"].as_i64().unwrap();

    let mut body = habit_body();
    body["routineId"] = json!(rid);
    let (_, habit) = send!(app, test::TestRequest::post().uri("/api/habits").set_json(body.clone()), Some(&alice_c));
    let hid = habit["id"].as_i64().unwrap();

    // bob cannot attach his habit to alice's routine, nor to a missing one
    let (status, _) = send!(app, test::TestRequest::post().uri("/api/habits").set_json(body.clone()), Some(&bob_c));
    assert_eq!(status, 403);
    body["routineId"] = json!(999);
    let (status, _) = send!(app, test::TestRequest::post().uri("/api/habits").set_json(body), Some(&bob_c));
    assert_eq!(status, 400);

    let (status, habits) = send!(app, test::TestRequest::get().uri(&format!("/api/routines/{rid}/habits")), Some(&alice_c));
    assert_eq!(status, 200);
    assert_eq!(habits.as_array().unwrap().len(), 1);

    for date in ["2024-05-01T08:00:00Z", "2024-05-02T08:00:00Z"] {
        let log = json!({"habitId": hid, "date": date, "completed": true});
        let (status, _) = send!(app, test::TestRequest::post().uri("/api/habit-logs").set_json(log), Some(&alice_c));
        assert_eq!(status, 201);
    }
    let log = json!({"habitId": hid, "date": "2024-05-01T09:00:00Z"});
    let (status, _) = send!(app, test::TestRequest::post().uri("/api/habit-logs").set_json(log), Some(&bob_c));
    assert_eq!(status, 403);

    let (_, day) = send!(app, test::TestRequest::get().uri("/api/habit-logs?date=2024-05-01"), Some(&alice_c));
    assert_eq!(day.as_array().unwrap().len(), 1);
    let (_, all) = send!(app, test::TestRequest::get().uri(&format!("/api/habit-logs?habitId={hid}")), Some(&alice_c));
    assert_eq!(all.as_array().unwrap().len(), 2);
    let (status, _) = send!(app, test::TestRequest::get().uri("/api/habit-logs?date=may-first"), Some(&alice_c));
    assert_eq!(status, 400);

    let (status, log) = send!(app, test::TestRequest::put().uri("/api/habit-logs/1").set_json(json!({"completed": false})), Some(&alice_c));
    assert_eq!(status, 200);
    assert_eq!(log["completed"], false);

    let due = json!({"habitId": hid, "routineId": rid, "message": "meditate", "scheduledTime": "2000-01-01T00:00:00Z"});
    let (status, n) = send!(app, test::TestRequest::post().uri("/api/notifications").set_json(due), Some(&alice_c));
    assert_eq!(status, 201);
    assert_eq!(n["sent"], false);
    let nid = n["id"].as_i64().unwrap();

    let (_, pending) = send!(app, test::TestRequest::get().uri("/api/notifications/pending"), Some(&alice_c));
    assert_eq!(pending.as_array().unwrap().len(), 1);
    let (_, pending) = send!(app, test::TestRequest::get().uri("/api/notifications/pending"), Some(&bob_c));
    assert_eq!(pending, json!([]));

    // habit deletion cascades to logs and detaches the notification
    send!(app, test::TestRequest::delete().uri(&format!("/api/habits/{hid}")), Some(&alice_c));
    let (_, logs) = send!(app, test::TestRequest::get().uri("/api/habit-logs"), Some(&alice_c));
    assert_eq!(logs, json!([]));
    let (_, list) = send!(app, test::TestRequest::get().uri("/api/notifications"), Some(&alice_c));
    assert_eq!(list[0]["habitId"], Value::Null);

    let uri = format!("/api/notifications/{nid}");
    let (status, n) = send!(app, test::TestRequest::put().uri(&uri).set_json(json!({"routineId": null, "sent": true})), Some(&alice_c));
    assert_eq!(status, 200);
    assert_eq!(n["routineId"], Value::Null);
    assert_eq!(n["sent"], true);
    let (status, _) = send!(app, test::TestRequest::delete().uri(&uri), Some(&bob_c));
    assert_eq!(status, 403);
    let (status, _) = send!(app, test::TestRequest::delete().uri(&uri), Some(&alice_c));
    assert_eq!(status, 204);
}

#[actix_web::test]
async fn user_update_and_sms_test() {
    let app = app!(state());
    let (alice, alice_c) = register!(app, "alice");
    let (bob, _) = register!(app, "bob");

    let upd = json!({"notificationsEnabled": false, "lastName": "Liddell"});
    let (status, body) = send!(app, test::TestRequest::put().uri(&format!("/api/users/{alice}")).set_json(upd.clone()), Some(&alice_c));
    assert_eq!(status, 200);
    assert_eq!(body["user"]["notificationsEnabled"], false);
    assert_eq!(body["user"]["lastName"], "Liddell");
    let (status, _) = send!(app, test::TestRequest::put().uri(&format!("/api/users/{bob}")).set_json(upd), Some(&alice_c));
    assert_eq!(status, 403);

    let sms = json!({"phone": "555-0100", "message": "hello"});
    let (status, body) = send!(app, test::TestRequest::post().uri("/api/sms/test").set_json(sms), Some(&alice_c));
    assert_eq!(status, 200);
    assert_eq!(body["message"], "SMS sent successfully (simulated)");
    let (status, _) = send!(app, test::TestRequest::post().uri("/api/sms/test").set_json(json!({"phone": ""})), Some(&alice_c));
    assert_eq!(status, 400);
}
