//! Handler Pipeline (spec.md §4.6): action dispatch table plus the
//! decorator chain, wired together in `dispatch`. `metrics` and
//! `injectSenderId` are universal (every row's table entry implies them),
//! so they're applied once here rather than per action.

pub mod actions;
pub mod decorators;

use crate::manager::TopicManager;
use crate::session::ClientSession;
use crate::wire::{Request, Response};
use std::sync::Arc;
use std::time::Instant;

pub struct HandlerContext {
    pub manager: Arc<TopicManager>,
    pub session: Arc<ClientSession>,
}

/// Runs one request through the full pipeline and returns the frame (if
/// any) that should be sent back to the originating client.
pub async fn dispatch(ctx: &HandlerContext, mut request: Request) -> Option<Response> {
    let start = Instant::now();
    let id = request.id.clone();
    let action = request.action.clone();
    let require_ack = request.require_ack;

    decorators::inject_sender_id(&mut request, &ctx.session.id);
    let result = run_pipeline(&action, &request, ctx).await;

    tracing::info!(
        client_id = %ctx.session.id,
        action = %action,
        duration_ms = start.elapsed().as_millis(),
        "handled request"
    );

    shape_response(&id, &action, require_ack, result)
}

async fn run_pipeline(
    action: &str,
    request: &Request,
    ctx: &HandlerContext,
) -> Result<actions::HandlerSuccess, actions::HandlerError> {
    let stack = decorators::for_action(action).ok_or(crate::error::BrokerError::BadAction)?;
    for &decorator in stack {
        decorator.apply(request)?;
    }
    actions::run(action, request, ctx).await
}

fn shape_response(
    id: &str,
    action: &str,
    require_ack: bool,
    result: Result<actions::HandlerSuccess, actions::HandlerError>,
) -> Option<Response> {
    match result {
        Err(e) => Some(Response::error(id, action, e.status_code(), e.message())),
        Ok(actions::HandlerSuccess::Ack) => require_ack.then(|| Response::ok(id, action)),
        Ok(actions::HandlerSuccess::ForcedAck) => Some(Response::ok(id, action)),
        Ok(actions::HandlerSuccess::AlwaysWithPayload(data)) => {
            Some(Response::ok_with_data(id, action, data))
        }
        Ok(actions::HandlerSuccess::ConditionalPayload(data)) => Some(if require_ack {
            Response::ok_with_data(id, action, data)
        } else {
            Response::ok(id, action)
        }),
    }
}
