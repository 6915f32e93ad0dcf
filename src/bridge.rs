use std::sync::Arc;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::authors::resolve_authors;
use crate::chat::ChatApi;
use crate::config::{TenantConfig, TenantRegistry};
use crate::delivery::deliver;
use crate::error::BridgeError;
use crate::forum::{ForumApi, Session};
use crate::models::{Delivery, Thread};
use crate::render::{render, RenderContext};
use crate::session::SessionCache;
use crate::store::KvStore;

/// One "this thread changed" notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ThreadEvent {
    /// Course name, also the key of its configuration record.
    pub course: String,
    /// Forum content id of the changed thread.
    pub cid: String,
}

/// Everything one invocation needs, shared by all HTTP workers.
#[derive(Clone)]
pub struct Bridge {
    pub forum: Arc<dyn ForumApi>,
    pub chat: Arc<dyn ChatApi>,
    pub store: Arc<dyn KvStore>,
    pub sessions: SessionCache,
    pub tenants: TenantRegistry,
    pub forum_url: String,
}

impl Bridge {
    /// Authenticate, fetch, resolve, render, deliver, strictly in that
    /// order. Nothing is sent to chat unless every earlier step succeeded.
    pub async fn handle(&self, event: &ThreadEvent) -> Result<Delivery, BridgeError> {
        let course = event.course.as_str();
        let tenant = self.tenants.get(course).await?;
        let (session, thread) = self.fetch(course, &tenant, &event.cid).await?;

        let ids = thread.author_ids();
        let authors = resolve_authors(
            self.forum.as_ref(),
            self.store.as_ref(),
            &session,
            course,
            &tenant.nid,
            &ids,
            &tenant.display_policy(),
        )
        .await?;

        let ctx = RenderContext { forum_url: &self.forum_url, nid: &tenant.nid };
        let segments = render(&thread, &authors, &ctx);
        tracing::debug!(course, cid = %thread.content_id, segments = segments.len(), "rendered thread");

        // the forum's own id, so a cid alias in the event still maps to one message
        deliver(self.chat.as_ref(), self.store.as_ref(), &thread.content_id, &segments, &tenant.chat_target()).await
    }

    /// Fetch with the cached session. A cached session the forum no longer
    /// accepts is discarded and replaced once.
    async fn fetch(&self, course: &str, tenant: &TenantConfig, cid: &str) -> Result<(Session, Thread), BridgeError> {
        let credentials = tenant.credentials();
        let session = self.sessions.get_or_create(course, &credentials).await?;
        match self.forum.fetch_content(&session, &tenant.nid, cid).await {
            Ok(thread) => Ok((session, thread)),
            Err(e) if e.is_unauthenticated() => {
                tracing::info!(course, cid, "forum session expired, logging in again");
                self.sessions.invalidate(course, &session);
                let session = self.sessions.get_or_create(course, &credentials).await?;
                let thread = self.forum.fetch_content(&session, &tenant.nid, cid).await?;
                Ok((session, thread))
            }
            Err(e) => Err(e.into()),
        }
    }
}
