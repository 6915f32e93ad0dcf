use actix_web::{web, HttpResponse};
use actix_web_httpauth::extractors::bearer::BearerAuth;
use serde::Serialize;
use tracing::Instrument;
use utoipa::ToSchema;

use crate::bridge::{Bridge, ThreadEvent};
use crate::error::ApiError;
use crate::models::Delivery;
use crate::notification::MailEvent;

pub fn config(cfg: &mut web::ServiceConfig) {
    // malformed trigger bodies get the same JSON error body as every other failure
    cfg.app_data(
        web::JsonConfig::default().error_handler(|e, _req| ApiError::BadRequest(e.to_string()).into()),
    );
    cfg.service(
        web::scope("/api/v1")
            .service(web::resource("/events").route(web::post().to(post_event)))
            .service(web::resource("/notifications/email").route(web::post().to(post_email_notification))),
    );
    cfg.route("/healthz", web::get().to(healthz));
}

#[derive(Clone)]
pub struct AppState {
    pub bridge: Bridge,
    /// When set, trigger endpoints require `Authorization: Bearer <token>`.
    pub trigger_token: Option<String>,
}

impl AppState {
    fn authorize(&self, auth: Option<&BearerAuth>) -> Result<(), ApiError> {
        let Some(expected) = self.trigger_token.as_deref() else { return Ok(()) };
        match auth {
            Some(bearer) if bearer.token() == expected => Ok(()),
            _ => Err(ApiError::Unauthorized),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct EventResponse {
    /// `ok` when the thread was delivered, `ignored` when the trigger named no thread.
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<Delivery>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
}

async fn run(data: &AppState, event: ThreadEvent) -> Result<HttpResponse, ApiError> {
    let span = tracing::info_span!("thread_event", course = %event.course, cid = %event.cid);
    let action = data.bridge.handle(&event).instrument(span).await?;
    Ok(HttpResponse::Ok().json(EventResponse { status: "ok".into(), action: Some(action), cid: Some(event.cid) }))
}

#[utoipa::path(
    post,
    path = "/api/v1/events",
    request_body = ThreadEvent,
    responses(
        (status = 200, description = "Thread posted or updated", body = EventResponse),
        (status = 400, description = "Malformed body, or empty course or content id"),
        (status = 401, description = "Missing or wrong trigger token"),
        (status = 404, description = "Unknown course"),
        (status = 502, description = "Forum or chat platform failure")
    )
)]
pub async fn post_event(
    auth: Option<BearerAuth>,
    data: web::Data<AppState>,
    payload: web::Json<ThreadEvent>,
) -> Result<HttpResponse, ApiError> {
    data.authorize(auth.as_ref())?;
    let event = payload.into_inner();
    if event.course.trim().is_empty() || event.cid.trim().is_empty() {
        return Err(ApiError::BadRequest("course and cid are required".into()));
    }
    run(&data, event).await
}

#[utoipa::path(
    post,
    path = "/api/v1/notifications/email",
    request_body = MailEvent,
    responses(
        (status = 200, description = "Thread delivered, or mail ignored", body = EventResponse),
        (status = 400, description = "Malformed mail event"),
        (status = 401, description = "Missing or wrong trigger token"),
        (status = 404, description = "Unknown course"),
        (status = 502, description = "Forum or chat platform failure")
    )
)]
pub async fn post_email_notification(
    auth: Option<BearerAuth>,
    data: web::Data<AppState>,
    payload: web::Json<MailEvent>,
) -> Result<HttpResponse, ApiError> {
    data.authorize(auth.as_ref())?;
    match payload.thread_event() {
        Some(event) => run(&data, event).await,
        None => {
            tracing::debug!("mail is not a thread notification");
            Ok(HttpResponse::Ok().json(EventResponse { status: "ignored".into(), action: None, cid: None }))
        }
    }
}

pub async fn healthz() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}
