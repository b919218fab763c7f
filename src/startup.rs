use actix_web::dev::Server;
use actix_web::{web, App, HttpServer};
use std::net::TcpListener;

use crate::audit::AuditLog;
use crate::auth::{CookiePolicy, SessionService};
use crate::configuration::{Environment, JwtSettings};
use crate::logger::LoggerMiddleware;
use crate::middleware::Authenticate;
use crate::routes::{
    change_password, create_designation, create_unit, create_user, delete_designation,
    delete_unit, delete_user, get_designation, get_preferences, get_unit, get_user, health,
    json_error_handler, list_designations, list_units, list_users, login, logout, me,
    query_error_handler, refresh, reset_password, update_designation, update_preferences,
    update_unit, update_user,
};
use crate::store::Stores;

pub fn run(
    listener: TcpListener,
    stores: Stores,
    jwt_config: JwtSettings,
    environment: Environment,
) -> Result<Server, std::io::Error> {
    let cookies = CookiePolicy::new(environment.is_production());
    let session = SessionService::new(&stores, &jwt_config, cookies);
    let codec = session.codec().clone();

    let audit = web::Data::new(AuditLog::new(stores.audit.clone()));
    let session = web::Data::new(session);
    let stores = web::Data::new(stores);

    let server = HttpServer::new(move || {
        App::new()
            .wrap(LoggerMiddleware)
            // Shared state
            .app_data(stores.clone())
            .app_data(session.clone())
            .app_data(audit.clone())
            .app_data(web::JsonConfig::default().error_handler(json_error_handler))
            .app_data(web::QueryConfig::default().error_handler(query_error_handler))
            // Public routes (registered ahead of the protected scope so they match first)
            .route("/health", web::get().to(health))
            .route("/api/auth/login", web::post().to(login))
            .route("/api/auth/refresh", web::post().to(refresh))
            .route("/api/auth/logout", web::post().to(logout))
            // Protected routes (require a valid access cookie)
            .service(
                web::scope("/api")
                    .wrap(Authenticate::new(codec.clone()))
                    .route("/auth/change-password", web::post().to(change_password))
                    .route("/auth/me", web::get().to(me))
                    .route("/users/me/preferences", web::get().to(get_preferences))
                    .route("/users/me/preferences", web::put().to(update_preferences))
                    .route("/users", web::get().to(list_users))
                    .route("/users", web::post().to(create_user))
                    .route("/users/{id}", web::get().to(get_user))
                    .route("/users/{id}", web::put().to(update_user))
                    .route("/users/{id}", web::delete().to(delete_user))
                    .route("/users/{id}/reset-password", web::post().to(reset_password))
                    .route("/units", web::get().to(list_units))
                    .route("/units", web::post().to(create_unit))
                    .route("/units/{id}", web::get().to(get_unit))
                    .route("/units/{id}", web::put().to(update_unit))
                    .route("/units/{id}", web::delete().to(delete_unit))
                    .route("/designations", web::get().to(list_designations))
                    .route("/designations", web::post().to(create_designation))
                    .route("/designations/{id}", web::get().to(get_designation))
                    .route("/designations/{id}", web::put().to(update_designation))
                    .route("/designations/{id}", web::delete().to(delete_designation)),
            )
    })
    .listen(listener)?
    .run();

    Ok(server)
}
