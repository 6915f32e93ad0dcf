use crate::bridge::ThreadEvent;
use crate::models::{Delivery, MessageSegment};
use crate::notification::{CommonHeaders, Mail, MailEvent, SesNotification, SesRecord};
use crate::routes::EventResponse;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::post_event,
        crate::routes::post_email_notification,
    ),
    components(schemas(
        ThreadEvent, EventResponse, Delivery, MessageSegment,
        MailEvent, SesRecord, SesNotification, Mail, CommonHeaders
    )),
    tags(
        (name = "triggers", description = "Thread change notifications"),
    )
)]
pub struct ApiDoc;
