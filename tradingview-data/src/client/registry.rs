use crate::{error::Error, protocol::Message};
use parking_lot::RwLock;
use std::{collections::HashMap, fmt, sync::Arc};

/// Receiver of frames addressed to one session id.
///
/// Handlers are invoked from the receive loop and must not block.
pub trait SessionHandler: Send + Sync {
    fn on_frame(&self, message: &Message) -> Result<(), Error>;

    /// Called when the socket is torn down, so in-flight requests can be failed.
    fn on_disconnect(&self) {}
}

/// Maps session ids to their [`SessionHandler`]. Entries are only removed explicitly.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<dyn SessionHandler>>>,
}

impl fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.ids())
            .finish()
    }
}

impl SessionRegistry {
    pub fn register(&self, session_id: impl Into<String>, handler: Arc<dyn SessionHandler>) {
        self.sessions.write().insert(session_id.into(), handler);
    }

    pub fn remove(&self, session_id: &str) -> bool {
        self.sessions.write().remove(session_id).is_some()
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.read().contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.sessions.read().keys().cloned().collect()
    }

    /// Route `message` to the handler registered under its session id.
    ///
    /// Returns `None` when the message is not addressed to a registered session, so the
    /// caller treats it as connection level.
    pub fn dispatch(&self, message: &Message) -> Option<Result<(), Error>> {
        let handler = message
            .session_id()
            .and_then(|session_id| self.sessions.read().get(session_id).cloned())?;

        Some(handler.on_frame(message))
    }

    /// Notify every distinct handler that the socket went away.
    pub fn notify_disconnect(&self) {
        let handlers: Vec<_> = self.sessions.read().values().cloned().collect();

        let mut notified: Vec<*const ()> = Vec::with_capacity(handlers.len());
        for handler in handlers {
            let address = Arc::as_ptr(&handler) as *const ();
            if notified.contains(&address) {
                continue;
            }
            notified.push(address);
            handler.on_disconnect();
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    /// Handler recording every frame it receives.
    #[derive(Default)]
    pub(crate) struct Recorder {
        pub frames: Mutex<Vec<Message>>,
        pub disconnects: Mutex<usize>,
        pub fail: bool,
    }

    impl SessionHandler for Recorder {
        fn on_frame(&self, message: &Message) -> Result<(), Error> {
            self.frames.lock().push(message.clone());
            if self.fail {
                return Err(Error::Series("handler failed".to_string()));
            }
            Ok(())
        }

        fn on_disconnect(&self) {
            *self.disconnects.lock() += 1;
        }
    }

    #[test]
    fn test_dispatch_session_isolation() {
        let registry = SessionRegistry::default();
        let session_a = Arc::new(Recorder::default());
        let session_b = Arc::new(Recorder::default());
        registry.register("cs_a", session_a.clone());
        registry.register("cs_b", session_b.clone());

        let message = Message::new("du", vec![json!("cs_a"), json!({})]);
        assert_eq!(registry.dispatch(&message), Some(Ok(())));

        assert_eq!(session_a.frames.lock().as_slice(), &[message]);
        assert!(session_b.frames.lock().is_empty());
    }

    #[test]
    fn test_dispatch() {
        struct TestCase {
            input: Message,
            expected: Option<Result<(), Error>>,
        }

        let registry = SessionRegistry::default();
        registry.register("cs_ok", Arc::new(Recorder::default()));
        registry.register(
            "cs_fail",
            Arc::new(Recorder {
                fail: true,
                ..Default::default()
            }),
        );

        let tests = vec![
            TestCase {
                // TC0: registered session
                input: Message::new("du", vec![json!("cs_ok")]),
                expected: Some(Ok(())),
            },
            TestCase {
                // TC1: unknown session id is connection level
                input: Message::new("du", vec![json!("cs_unknown")]),
                expected: None,
            },
            TestCase {
                // TC2: non string first element is connection level
                input: Message::new("protocol_error", vec![json!(5)]),
                expected: None,
            },
            TestCase {
                // TC3: empty data is connection level
                input: Message::new("du", vec![]),
                expected: None,
            },
            TestCase {
                // TC4: failing handler surfaces its error
                input: Message::new("du", vec![json!("cs_fail")]),
                expected: Some(Err(Error::Series("handler failed".to_string()))),
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = registry.dispatch(&test.input);
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }

        // Failing handler stays registered
        assert!(registry.contains("cs_fail"));
    }

    #[test]
    fn test_notify_disconnect_once_per_handler() {
        let registry = SessionRegistry::default();
        let chart = Arc::new(Recorder::default());
        registry.register("cs_1", chart.clone());
        registry.register("rs_1", chart.clone());

        registry.notify_disconnect();
        assert_eq!(*chart.disconnects.lock(), 1);

        assert!(registry.remove("rs_1"));
        assert!(!registry.remove("rs_1"));
        assert_eq!(registry.len(), 1);
    }
}
