//! Per-action handler bodies (spec.md §4.6 table). Decorators have already
//! run by the time `run` is called, so handlers trust `topic`/`data` are
//! present where required.

use super::HandlerContext;
use crate::error::{BrokerError, StorageError};
use crate::manager::UnregisterTopicError;
use crate::wire::{Request, TopicDescriptor};
use serde_json::Value;
use std::time::Duration;

/// Context deadline applied to `get`, `unregisterTopic`, and the persist
/// watcher behind `publish`/`sendWithoutSave` (spec.md §4.6).
const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// What a handler produced, independent of whether the client actually
/// sees a frame for it — that gating lives in `handlers::shape_response`.
pub enum HandlerSuccess {
    /// No payload; sent only when the request asked for an ack.
    Ack,
    /// No payload; sent unconditionally (`unsubscribeAll`, spec.md §4.6).
    ForcedAck,
    /// Payload that is part of the response's purpose, sent unconditionally
    /// (`get`, `listTopics`).
    AlwaysWithPayload(Value),
    /// Payload attached only when the request asked for an ack
    /// (`registerTopic`): §4.6 says the descriptor is returned iff
    /// `requireAck`, while §7's blanket rule says the action always
    /// responds. Reconciled here: a bare ack when `requireAck=false`, the
    /// descriptor attached when it's `true`.
    ConditionalPayload(Value),
}

#[derive(Debug)]
pub enum HandlerError {
    Broker(BrokerError),
    Storage(StorageError),
}

impl HandlerError {
    pub fn status_code(&self) -> u16 {
        match self {
            HandlerError::Broker(e) => e.status_code(),
            HandlerError::Storage(_) => 500,
        }
    }

    pub fn message(&self) -> String {
        match self {
            HandlerError::Broker(e) => e.to_string(),
            HandlerError::Storage(e) => e.to_string(),
        }
    }
}

impl From<BrokerError> for HandlerError {
    fn from(e: BrokerError) -> Self {
        HandlerError::Broker(e)
    }
}

impl From<StorageError> for HandlerError {
    fn from(e: StorageError) -> Self {
        HandlerError::Storage(e)
    }
}

impl From<UnregisterTopicError> for HandlerError {
    fn from(e: UnregisterTopicError) -> Self {
        match e {
            UnregisterTopicError::TopicNotFound(name) => {
                HandlerError::Broker(BrokerError::TopicNotFound(name))
            }
            UnregisterTopicError::StoragePartial(detail) => {
                HandlerError::Storage(StorageError::StoragePartial(detail))
            }
        }
    }
}

pub async fn run(
    action: &str,
    request: &Request,
    ctx: &HandlerContext,
) -> Result<HandlerSuccess, HandlerError> {
    match action {
        "subscribe" => {
            ctx.manager.subscribe(&request.topic, ctx.session.clone()).await?;
            Ok(HandlerSuccess::Ack)
        }
        "unsubscribe" => {
            ctx.manager.unsubscribe(&request.topic, &ctx.session.id).await?;
            Ok(HandlerSuccess::Ack)
        }
        "unsubscribeAll" => {
            ctx.manager.unsubscribe_all(&ctx.session.id).await;
            Ok(HandlerSuccess::ForcedAck)
        }
        "publish" => do_publish(request, ctx, true).await,
        "sendWithoutSave" => do_publish(request, ctx, false).await,
        "get" => {
            let stored = tokio::time::timeout(REQUEST_TIMEOUT, ctx.manager.get(&request.topic))
                .await
                .map_err(|_| HandlerError::Storage(StorageError::PersistTimeout))??;
            let value = stored.map_or(Value::Null, |s| s.value);
            Ok(HandlerSuccess::AlwaysWithPayload(value))
        }
        "registerTopic" => {
            let shape = request.data.clone().expect("requireData decorator already validated");
            let descriptor = ctx.manager.register_topic(&request.topic, shape).await?;
            Ok(HandlerSuccess::ConditionalPayload(descriptor_to_value(&descriptor)))
        }
        "unregisterTopic" => {
            tokio::time::timeout(REQUEST_TIMEOUT, ctx.manager.unregister_topic(&request.topic))
                .await
                .map_err(|_| HandlerError::Storage(StorageError::PersistTimeout))??;
            Ok(HandlerSuccess::Ack)
        }
        "listTopics" => {
            let topics = ctx.manager.list_topics().await;
            let value = serde_json::to_value(topics).expect("TopicDescriptor always serializes");
            Ok(HandlerSuccess::AlwaysWithPayload(value))
        }
        "updateSchema" => {
            let shape = request.data.clone().expect("requireData decorator already validated");
            ctx.manager.update_schema(&request.topic, shape).await?;
            Ok(HandlerSuccess::Ack)
        }
        _ => Err(HandlerError::Broker(BrokerError::BadAction)),
    }
}

async fn do_publish(
    request: &Request,
    ctx: &HandlerContext,
    persist: bool,
) -> Result<HandlerSuccess, HandlerError> {
    let value = request.data.clone().expect("requireData decorator already validated");
    if !ctx.manager.is_schema_match(&request.topic, &value).await? {
        return Err(HandlerError::Broker(BrokerError::SchemaMismatch));
    }
    ctx.manager
        .publish(
            &request.id,
            &request.action,
            &request.topic,
            &ctx.session,
            value,
            request.self_deliver,
            persist,
        )
        .await?;
    Ok(HandlerSuccess::Ack)
}

fn descriptor_to_value(descriptor: &TopicDescriptor) -> Value {
    serde_json::to_value(descriptor).expect("TopicDescriptor always serializes")
}
