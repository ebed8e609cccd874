use crate::error::{constants, ProtocolError, Result};
use crate::protocol::message::{Message, TypeCode};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::trace;

type HandlerFn = dyn Fn(&Message) -> Result<Option<Message>> + Send + Sync + 'static;

/// Routes decoded messages to the application's handlers by type code.
/// A handler may return a reply to be sent back on the same connection.
pub struct Dispatcher {
    handlers: Arc<RwLock<HashMap<TypeCode, Box<HandlerFn>>>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register `handler` for `code`, replacing any previous one
    pub fn register<F>(&self, code: TypeCode, handler: F) -> Result<()>
    where
        F: Fn(&Message) -> Result<Option<Message>> + Send + Sync + 'static,
    {
        let mut handlers = self
            .handlers
            .write()
            .map_err(|_| ProtocolError::LockPoisoned(constants::ERR_DISPATCHER_WRITE_LOCK))?;

        handlers.insert(code, Box::new(handler));
        Ok(())
    }

    /// Register one handler for every transfer message kind
    pub fn register_transfer<F>(&self, handler: F) -> Result<()>
    where
        F: Fn(&Message) -> Result<Option<Message>> + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        for code in TypeCode::ALL.into_iter().filter(|c| c.is_transfer()) {
            let handler = Arc::clone(&handler);
            self.register(code, move |msg| handler(msg))?;
        }
        Ok(())
    }

    pub fn dispatch(&self, msg: &Message) -> Result<Option<Message>> {
        let code = msg.type_code();
        trace!(type_code = %code, "Dispatching message");

        let handlers = self
            .handlers
            .read()
            .map_err(|_| ProtocolError::LockPoisoned(constants::ERR_DISPATCHER_READ_LOCK))?;

        handlers
            .get(&code)
            .ok_or(ProtocolError::UnexpectedMessage(code))
            .and_then(|handler| handler(msg))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::protocol::message::{
        ChatMessage, LoginCondition, Presence, TransferEnd, TransferHeader, TransferRequest,
        TransferSegment,
    };
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_dispatch_routes_by_type_code() {
        let dispatcher = Dispatcher::new();
        dispatcher
            .register(TypeCode::Chat, |msg| match msg {
                Message::Chat(chat) => Ok(Some(Message::Chat(ChatMessage::new(
                    "server",
                    chat.body(),
                )?))),
                _ => Ok(None),
            })
            .unwrap();

        let msg = Message::Chat(ChatMessage::new("alice", "hello").unwrap());
        let reply = dispatcher.dispatch(&msg).unwrap().unwrap();
        assert!(matches!(reply, Message::Chat(c) if c.sender() == "server" && c.body() == "hello"));

        let err = dispatcher
            .dispatch(&Message::Login(LoginCondition::Success))
            .unwrap_err();
        assert!(matches!(err, ProtocolError::UnexpectedMessage(TypeCode::Login)));
    }

    #[test]
    fn test_register_transfer_covers_three_codes() {
        let dispatcher = Dispatcher::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        dispatcher
            .register_transfer(move |msg| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Some(msg.clone()))
            })
            .unwrap();

        let header = TransferHeader::new(7, "alice", "bob").unwrap();
        let messages = [
            Message::TransferRequest(TransferRequest::new(header.clone(), "f", 3).unwrap()),
            Message::TransferData(
                TransferSegment::new(header.clone(), 1, 1, Bytes::from_static(b"abc")).unwrap(),
            ),
            Message::TransferError(TransferEnd::aborted(header, "cancelled")),
        ];
        for msg in &messages {
            assert_eq!(dispatcher.dispatch(msg).unwrap().as_ref(), Some(msg));
        }
        assert_eq!(hits.load(Ordering::SeqCst), 3);

        // Nothing else reaches the transfer handler
        let other = Message::Connect(Presence::new("alice").unwrap());
        assert!(matches!(
            dispatcher.dispatch(&other),
            Err(ProtocolError::UnexpectedMessage(TypeCode::Connect))
        ));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }
}
