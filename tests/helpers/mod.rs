//! Shared harness: a real server on a random port over in-memory stores.

#![allow(dead_code)]

use reqwest::header::{HeaderMap, COOKIE, SET_COOKIE};
use saiqa::auth::cookies::parse_cookies;
use saiqa::auth::{hash_password, Role};
use saiqa::configuration::{Environment, JwtSettings};
use saiqa::startup::run;
use saiqa::store::memory::MemoryBackend;
use saiqa::store::{NewUser, User, UserStore};
use serde_json::{json, Value};
use std::net::TcpListener;

pub const PASSWORD: &str = "Secret123!";

pub struct TestApp {
    pub address: String,
    pub backend: MemoryBackend,
    pub client: reqwest::Client,
}

/// Cookies captured from a login
#[derive(Debug, Clone)]
pub struct Session {
    pub access: String,
    pub refresh: String,
}

impl Session {
    pub fn header(&self) -> String {
        format!("accessToken={}; refreshToken={}", self.access, self.refresh)
    }

    pub fn access_only(&self) -> String {
        format!("accessToken={}", self.access)
    }

    pub fn refresh_only(&self) -> String {
        format!("refreshToken={}", self.refresh)
    }
}

pub fn jwt_settings() -> JwtSettings {
    JwtSettings::with_secrets(
        "integration-access-secret-32-characters",
        "integration-refresh-secret-32-characters",
    )
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with(jwt_settings()).await
}

pub async fn spawn_app_with(jwt: JwtSettings) -> TestApp {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    let backend = MemoryBackend::new();
    let server = run(listener, backend.stores(), jwt, Environment::Local)
        .expect("Failed to bind address");
    let _ = tokio::spawn(server);

    TestApp {
        address,
        backend,
        client: reqwest::Client::new(),
    }
}

/// All `Set-Cookie` values on a response.
pub fn set_cookies(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(str::to_string)
        .collect()
}

pub fn cookie_value(set_cookies: &[String], name: &str) -> Option<String> {
    set_cookies.iter().find_map(|c| {
        let pair = c.split(';').next()?;
        parse_cookies(pair).remove(name)
    })
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }

    pub async fn seed_user(&self, email: &str, role: Role) -> User {
        self.backend
            .users
            .create(NewUser {
                email: email.to_string(),
                password_hash: hash_password(PASSWORD).unwrap(),
                first_name: "Test".to_string(),
                last_name: "User".to_string(),
                role,
                unit_id: None,
                designation_id: None,
                force_password_change: false,
                metadata: json!({}),
                created_by: None,
            })
            .await
            .expect("Failed to seed user")
    }

    pub async fn post_login(&self, email: &str, password: &str) -> reqwest::Response {
        self.client
            .post(self.url("/api/auth/login"))
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await
            .expect("Failed to execute request.")
    }

    /// Log in and keep the cookies.
    pub async fn login(&self, email: &str, password: &str) -> Session {
        let response = self.post_login(email, password).await;
        assert_eq!(200, response.status().as_u16(), "login failed for {}", email);
        let cookies = set_cookies(response.headers());
        Session {
            access: cookie_value(&cookies, "accessToken").expect("no access cookie"),
            refresh: cookie_value(&cookies, "refreshToken").expect("no refresh cookie"),
        }
    }

    pub async fn seed_and_login(&self, email: &str, role: Role) -> (User, Session) {
        let user = self.seed_user(email, role).await;
        let session = self.login(email, PASSWORD).await;
        (user, session)
    }

    pub async fn get(&self, path: &str, session: &Session) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .header(COOKIE, session.access_only())
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn post(&self, path: &str, session: &Session, body: &Value) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .header(COOKIE, session.access_only())
            .json(body)
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn put(&self, path: &str, session: &Session, body: &Value) -> reqwest::Response {
        self.client
            .put(self.url(path))
            .header(COOKIE, session.access_only())
            .json(body)
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn delete(&self, path: &str, session: &Session) -> reqwest::Response {
        self.client
            .delete(self.url(path))
            .header(COOKIE, session.access_only())
            .send()
            .await
            .expect("Failed to execute request.")
    }
}
