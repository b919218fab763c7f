mod helpers;

use helpers::spawn_app;
use saiqa::auth::Role;
use serde_json::{json, Value};

#[tokio::test]
async fn health_reports_ok_without_authentication() {
    let app = spawn_app().await;

    let response = app
        .client
        .get(app.url("/health"))
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(200, response.status().as_u16());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn manager_cannot_promote_a_user_to_admin() {
    let app = spawn_app().await;
    let (_, manager) = app.seed_and_login("manager@test.dev", Role::Manager).await;
    let (_, admin) = app.seed_and_login("admin@test.dev", Role::Admin).await;
    let target = app.seed_user("user@test.dev", Role::User).await;
    let path = format!("/api/users/{}", target.id);

    let denied = app.put(&path, &manager, &json!({ "role": "admin" })).await;
    assert_eq!(403, denied.status().as_u16());
    let body: Value = denied.json().await.unwrap();
    assert_eq!(body["code"], "INSUFFICIENT_PERMISSIONS");

    let allowed = app.put(&path, &admin, &json!({ "role": "admin" })).await;
    assert_eq!(200, allowed.status().as_u16());
    let body: Value = allowed.json().await.unwrap();
    assert_eq!(body["user"]["role"], "admin");
}

#[tokio::test]
async fn manager_cannot_touch_admin_accounts() {
    let app = spawn_app().await;
    let (_, manager) = app.seed_and_login("manager@test.dev", Role::Manager).await;
    let admin = app.seed_user("admin@test.dev", Role::Admin).await;

    let response = app
        .put(
            &format!("/api/users/{}", admin.id),
            &manager,
            &json!({ "firstName": "Renamed" }),
        )
        .await;

    assert_eq!(403, response.status().as_u16());
}

#[tokio::test]
async fn plain_users_are_limited_to_reads() {
    let app = spawn_app().await;
    let (me, session) = app.seed_and_login("user@test.dev", Role::User).await;

    let list = app.get("/api/users", &session).await;
    assert_eq!(200, list.status().as_u16());

    let get = app.get(&format!("/api/users/{}", me.id), &session).await;
    assert_eq!(200, get.status().as_u16());

    let create = app
        .post(
            "/api/units",
            &session,
            &json!({ "name": "Operations", "code": "OPS" }),
        )
        .await;
    assert_eq!(403, create.status().as_u16());

    let update = app
        .put(
            &format!("/api/users/{}", me.id),
            &session,
            &json!({ "firstName": "Me" }),
        )
        .await;
    assert_eq!(403, update.status().as_u16());
}

#[tokio::test]
async fn admin_creates_user_with_generated_password() {
    let app = spawn_app().await;
    let (_, admin) = app.seed_and_login("admin@test.dev", Role::Admin).await;

    let response = app
        .post(
            "/api/users",
            &admin,
            &json!({
                "email": "new@test.dev",
                "firstName": "New",
                "lastName": "Person",
                "role": "user"
            }),
        )
        .await;

    assert_eq!(201, response.status().as_u16());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["user"]["forcePasswordChange"], true);
    assert!(body["user"].get("passwordHash").is_none());
    let generated = body["generatedPassword"].as_str().expect("generated password");
    assert_eq!(generated.len(), 12);

    let login = app.post_login("new@test.dev", generated).await;
    assert_eq!(200, login.status().as_u16());
    let body: Value = login.json().await.unwrap();
    assert_eq!(body["requiresPasswordChange"], true);

    let entries = app.backend.audit.entries();
    assert!(entries
        .iter()
        .any(|e| e.action.as_str() == "CREATE" && e.entity_type.as_str() == "user"));
}

#[tokio::test]
async fn create_user_validates_and_rejects_duplicates() {
    let app = spawn_app().await;
    let (_, admin) = app.seed_and_login("admin@test.dev", Role::Admin).await;

    let duplicate = app
        .post(
            "/api/users",
            &admin,
            &json!({
                "email": "admin@test.dev",
                "password": "Another123!",
                "firstName": "Dup",
                "lastName": "Licate",
                "role": "user"
            }),
        )
        .await;
    assert_eq!(400, duplicate.status().as_u16());
    let body: Value = duplicate.json().await.unwrap();
    assert_eq!(body["error"], "Email already exists");

    let bad_role = app
        .post(
            "/api/users",
            &admin,
            &json!({
                "email": "x@test.dev",
                "firstName": "X",
                "lastName": "Y",
                "role": "superuser"
            }),
        )
        .await;
    assert_eq!(400, bad_role.status().as_u16());

    let unknown_unit = app
        .post(
            "/api/users",
            &admin,
            &json!({
                "email": "x@test.dev",
                "firstName": "X",
                "lastName": "Y",
                "role": "user",
                "unitId": uuid::Uuid::new_v4()
            }),
        )
        .await;
    assert_eq!(400, unknown_unit.status().as_u16());
}

#[tokio::test]
async fn admin_cannot_delete_or_deactivate_self() {
    let app = spawn_app().await;
    let (me, admin) = app.seed_and_login("admin@test.dev", Role::Admin).await;
    let path = format!("/api/users/{}", me.id);

    let delete = app.delete(&path, &admin).await;
    assert_eq!(400, delete.status().as_u16());

    let deactivate = app.put(&path, &admin, &json!({ "isActive": false })).await;
    assert_eq!(400, deactivate.status().as_u16());
}

#[tokio::test]
async fn deleted_user_can_no_longer_log_in() {
    let app = spawn_app().await;
    let (_, admin) = app.seed_and_login("admin@test.dev", Role::Admin).await;
    let target = app.seed_user("user@test.dev", Role::User).await;

    let response = app
        .delete(&format!("/api/users/{}", target.id), &admin)
        .await;
    assert_eq!(200, response.status().as_u16());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], "User deleted successfully");

    let login = app.post_login("user@test.dev", helpers::PASSWORD).await;
    assert_eq!(401, login.status().as_u16());

    let get = app.get(&format!("/api/users/{}", target.id), &admin).await;
    let body: Value = get.json().await.unwrap();
    assert_eq!(body["user"]["isActive"], false);
}

#[tokio::test]
async fn reset_password_forces_a_change_and_ends_sessions() {
    let app = spawn_app().await;
    let (_, admin) = app.seed_and_login("admin@test.dev", Role::Admin).await;
    let (target, _) = app.seed_and_login("user@test.dev", Role::User).await;
    assert_eq!(app.backend.refresh_tokens.count_for_user(target.id), 1);

    let response = app
        .post(
            &format!("/api/users/{}/reset-password", target.id),
            &admin,
            &json!({ "newPassword": "Temporary123!" }),
        )
        .await;
    assert_eq!(200, response.status().as_u16());
    assert_eq!(app.backend.refresh_tokens.count_for_user(target.id), 0);

    let login = app.post_login("user@test.dev", "Temporary123!").await;
    let body: Value = login.json().await.unwrap();
    assert_eq!(body["requiresPasswordChange"], true);
}

#[tokio::test]
async fn invalid_and_unknown_ids() {
    let app = spawn_app().await;
    let (_, admin) = app.seed_and_login("admin@test.dev", Role::Admin).await;

    let invalid = app.get("/api/users/not-a-uuid", &admin).await;
    assert_eq!(400, invalid.status().as_u16());

    let unknown = app
        .get(&format!("/api/units/{}", uuid::Uuid::new_v4()), &admin)
        .await;
    assert_eq!(404, unknown.status().as_u16());
}

#[tokio::test]
async fn unit_lifecycle() {
    let app = spawn_app().await;
    let (_, manager) = app.seed_and_login("manager@test.dev", Role::Manager).await;

    let parent = app
        .post(
            "/api/units",
            &manager,
            &json!({ "name": "Operations", "code": "OPS", "description": "Ops" }),
        )
        .await;
    assert_eq!(201, parent.status().as_u16());
    let parent: Value = parent.json().await.unwrap();
    let parent_id = parent["unit"]["id"].as_str().unwrap().to_string();

    let duplicate = app
        .post("/api/units", &manager, &json!({ "name": "Other", "code": "OPS" }))
        .await;
    assert_eq!(400, duplicate.status().as_u16());
    let body: Value = duplicate.json().await.unwrap();
    assert_eq!(body["error"], "Unit code already exists");

    let child = app
        .post(
            "/api/units",
            &manager,
            &json!({ "name": "Field Ops", "code": "OPS-F", "parentUnitId": parent_id }),
        )
        .await;
    assert_eq!(201, child.status().as_u16());
    let child: Value = child.json().await.unwrap();
    let child_id = child["unit"]["id"].as_str().unwrap().to_string();
    assert_eq!(child["unit"]["parentUnitName"], "Operations");

    let own_parent = app
        .put(
            &format!("/api/units/{}", parent_id),
            &manager,
            &json!({ "parentUnitId": parent_id }),
        )
        .await;
    assert_eq!(400, own_parent.status().as_u16());

    let roots = app.get("/api/units?parentUnitId=null", &manager).await;
    let roots: Value = roots.json().await.unwrap();
    assert_eq!(roots["pagination"]["total"], 1);
    assert_eq!(roots["units"][0]["code"], "OPS");

    let blocked = app
        .delete(&format!("/api/units/{}", parent_id), &manager)
        .await;
    assert_eq!(400, blocked.status().as_u16());
    let body: Value = blocked.json().await.unwrap();
    assert_eq!(body["error"], "Cannot delete unit with child units");

    let removed = app
        .delete(&format!("/api/units/{}", child_id), &manager)
        .await;
    assert_eq!(200, removed.status().as_u16());

    let renamed = app
        .put(
            &format!("/api/units/{}", parent_id),
            &manager,
            &json!({ "name": "Operations HQ", "description": null }),
        )
        .await;
    assert_eq!(200, renamed.status().as_u16());
    let renamed: Value = renamed.json().await.unwrap();
    assert_eq!(renamed["unit"]["name"], "Operations HQ");
    assert!(renamed["unit"]["description"].is_null());

    let nothing = app
        .put(&format!("/api/units/{}", parent_id), &manager, &json!({}))
        .await;
    assert_eq!(400, nothing.status().as_u16());
}

#[tokio::test]
async fn designation_in_use_cannot_be_deleted() {
    let app = spawn_app().await;
    let (_, admin) = app.seed_and_login("admin@test.dev", Role::Admin).await;

    let created = app
        .post(
            "/api/designations",
            &admin,
            &json!({ "title": "Engineer", "code": "ENG", "level": 3 }),
        )
        .await;
    assert_eq!(201, created.status().as_u16());
    let created: Value = created.json().await.unwrap();
    let designation_id = created["designation"]["id"].as_str().unwrap().to_string();
    assert_eq!(created["designation"]["level"], 3);

    let user = app
        .post(
            "/api/users",
            &admin,
            &json!({
                "email": "eng@test.dev",
                "password": "Engineer123!",
                "firstName": "En",
                "lastName": "Gineer",
                "role": "user",
                "designationId": designation_id
            }),
        )
        .await;
    assert_eq!(201, user.status().as_u16());
    let user: Value = user.json().await.unwrap();
    assert_eq!(user["user"]["designationTitle"], "Engineer");
    assert!(user.get("generatedPassword").is_none());

    let blocked = app
        .delete(&format!("/api/designations/{}", designation_id), &admin)
        .await;
    assert_eq!(400, blocked.status().as_u16());
    let body: Value = blocked.json().await.unwrap();
    assert_eq!(body["error"], "Cannot delete designation with assigned users");

    let level_filter = app.get("/api/designations?level=3", &admin).await;
    let body: Value = level_filter.json().await.unwrap();
    assert_eq!(body["pagination"]["total"], 1);
}

#[tokio::test]
async fn users_read_and_replace_their_own_preferences() {
    let app = spawn_app().await;
    let (me, session) = app.seed_and_login("user@test.dev", Role::User).await;

    let initial = app.get("/api/users/me/preferences", &session).await;
    assert_eq!(200, initial.status().as_u16());
    let body: Value = initial.json().await.unwrap();
    assert_eq!(body["preferences"], json!({}));

    let prefs = json!({ "theme": "dark", "pageSize": 25 });
    let updated = app.put("/api/users/me/preferences", &session, &prefs).await;
    assert_eq!(200, updated.status().as_u16());
    let body: Value = updated.json().await.unwrap();
    assert_eq!(body["preferences"], prefs);

    let reread: Value = app
        .get("/api/users/me/preferences", &session)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(reread["preferences"], prefs);

    let entries = app.backend.audit.entries();
    let entry = entries
        .iter()
        .find(|e| e.action.as_str() == "UPDATE_PREFERENCES")
        .expect("preferences audit entry");
    assert_eq!(entry.user_id, Some(me.id));
    assert_eq!(entry.entity_id, Some(me.id));
    let changes = entry.changes.as_ref().expect("changes recorded");
    assert_eq!(changes["old"], json!({}));
    assert_eq!(changes["new"], prefs);
}

#[tokio::test]
async fn preferences_must_be_a_json_object() {
    let app = spawn_app().await;
    let (_, session) = app.seed_and_login("user@test.dev", Role::User).await;

    for body in [json!([1, 2]), json!("dark"), json!(null)] {
        let response = app.put("/api/users/me/preferences", &session, &body).await;
        assert_eq!(400, response.status().as_u16(), "accepted {}", body);
        let error: Value = response.json().await.unwrap();
        assert_eq!(error["error"], "Preferences must be an object");
    }

    let anonymous = app
        .client
        .get(app.url("/api/users/me/preferences"))
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(401, anonymous.status().as_u16());
}

#[tokio::test]
async fn huge_page_numbers_return_an_empty_page() {
    let app = spawn_app().await;
    let (_, session) = app.seed_and_login("user@test.dev", Role::User).await;

    let response = app
        .get(&format!("/api/users?page={}&limit=100", i64::MAX), &session)
        .await;

    assert_eq!(200, response.status().as_u16());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["users"], json!([]));
    assert_eq!(body["pagination"]["total"], 1);
}
