//! Validation decorators (spec.md §4.6). `for_action` returns the ordered
//! stack for a given action exactly as the handler table lists it; `metrics`
//! and `injectSenderId` are applied uniformly to every action by the
//! dispatcher in `handlers::dispatch` rather than appearing per-row here.

use crate::error::BrokerError;
use crate::wire::Request;
use serde_json::Value;

#[derive(Clone, Copy)]
pub enum Decorator {
    RequireTopic,
    RequireData,
}

impl Decorator {
    pub fn apply(self, request: &Request) -> Result<(), BrokerError> {
        match self {
            Decorator::RequireTopic => {
                if request.topic.trim().is_empty() {
                    return Err(BrokerError::EmptyTopic);
                }
                Ok(())
            }
            Decorator::RequireData => match &request.data {
                None => Err(BrokerError::EmptyData),
                Some(Value::Object(map)) if map.is_empty() => Err(BrokerError::EmptyData),
                Some(Value::Object(_)) => Ok(()),
                Some(other) => Err(BrokerError::MalformedData(format!(
                    "expected a JSON object, got {other}"
                ))),
            },
        }
    }
}

/// `None` means the action itself is unrecognized (400 `BadAction`).
pub fn for_action(action: &str) -> Option<&'static [Decorator]> {
    use Decorator::{RequireData, RequireTopic};
    match action {
        "subscribe" | "unsubscribe" | "get" | "unregisterTopic" => Some(&[RequireTopic]),
        "unsubscribeAll" | "listTopics" => Some(&[]),
        "publish" | "registerTopic" => Some(&[RequireData, RequireTopic]),
        "updateSchema" | "sendWithoutSave" => Some(&[RequireTopic, RequireData]),
        _ => None,
    }
}

pub fn inject_sender_id(request: &mut Request, session_id: &str) {
    request.sender_id = Some(session_id.to_owned());
}
