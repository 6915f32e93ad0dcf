use crate::chat::ChatApi;
use crate::error::BridgeError;
use crate::models::{ChatTarget, Delivery, MessageSegment};
use crate::store::{KvStore, HANDLES};

/// Make `target` show exactly one message for `content_id`: edit it when a
/// handle is on record, otherwise post it and record the handle.
///
/// The handle is recorded with a put-if-absent write. When a concurrent
/// delivery recorded its own handle first, the message just posted is a
/// duplicate: it is deleted and the recorded message is edited instead.
pub async fn deliver(
    chat: &dyn ChatApi,
    store: &dyn KvStore,
    content_id: &str,
    segments: &[MessageSegment],
    target: &ChatTarget,
) -> Result<Delivery, BridgeError> {
    if let Some(ts) = store.get(HANDLES, content_id).await? {
        chat.update_message(target, &ts, segments).await?;
        tracing::info!(cid = content_id, %ts, channel = %target.channel, "updated message");
        return Ok(Delivery::Updated);
    }

    let ts = chat.post_message(target, segments).await?;
    let recorded = store.put_if_absent(HANDLES, content_id, &ts).await.map_err(|e| {
        tracing::error!(cid = content_id, %ts, error = %e, "posted message but failed to record its handle");
        e
    })?;
    if recorded == ts {
        tracing::info!(cid = content_id, %ts, channel = %target.channel, "posted message");
        return Ok(Delivery::Posted);
    }

    tracing::warn!(cid = content_id, duplicate = %ts, kept = %recorded, "lost handle race, removing duplicate");
    if let Err(e) = chat.delete_message(target, &ts).await {
        tracing::warn!(cid = content_id, duplicate = %ts, error = %e, "could not delete duplicate message");
    }
    chat.update_message(target, &recorded, segments).await?;
    Ok(Delivery::Updated)
}
