use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use outreach_core::{Error, Result};

use crate::wire::{Inbound, Outbound};

/// Where the router and handlers emit envelopes. Implemented by the
/// transport client; tests substitute a collector.
pub trait OutboundSink: Send + Sync {
    fn send(&self, msg: Outbound);
}

/// Progress hook handed to each handler, pre-bound to the command id so
/// every progress envelope correlates with the inbound command.
#[derive(Clone)]
pub struct ProgressReporter {
    command_id: String,
    sink: Arc<dyn OutboundSink>,
}

impl ProgressReporter {
    pub fn new(command_id: String, sink: Arc<dyn OutboundSink>) -> Self {
        Self { command_id, sink }
    }

    pub fn report(&self, step: u32, total: u32, message: &str) {
        self.sink.send(Outbound::Progress {
            command_id: self.command_id.clone(),
            step,
            total,
            message: message.to_string(),
        });
    }
}

#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn execute(&self, payload: Value, progress: ProgressReporter) -> Result<Value>;
}

/// Single entry point translating inbound execute envelopes into handler
/// invocations and outbound result/error/progress envelopes.
///
/// For any one command id exactly one terminal envelope goes out: either a
/// result or an error, never both.
pub struct CommandRouter {
    handlers: HashMap<String, Arc<dyn CommandHandler>>,
    sink: Arc<dyn OutboundSink>,
}

impl CommandRouter {
    pub fn new(sink: Arc<dyn OutboundSink>) -> Self {
        Self {
            handlers: HashMap::new(),
            sink,
        }
    }

    pub fn register(&mut self, command_type: &str, handler: Arc<dyn CommandHandler>) {
        self.handlers.insert(command_type.to_string(), handler);
    }

    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }

    pub async fn dispatch(&self, msg: Inbound) {
        let Inbound::Execute {
            command_id,
            command_type,
            payload,
        } = msg
        else {
            // Heartbeats are dropped by the transport; tolerate them here too.
            return;
        };

        let Some(handler) = self.handlers.get(&command_type) else {
            warn!(command_id = %command_id, command_type = %command_type, "Unknown command type");
            self.sink.send(Outbound::Error {
                command_id,
                code: "UNKNOWN_COMMAND".to_string(),
                message: format!("Unknown command type: {}", command_type),
                details: None,
            });
            return;
        };

        debug!(command_id = %command_id, command_type = %command_type, "Dispatching command");
        let progress = ProgressReporter {
            command_id: command_id.clone(),
            sink: self.sink.clone(),
        };

        match handler.execute(payload, progress).await {
            Ok(data) => {
                self.sink.send(Outbound::Result { command_id, data });
            }
            Err(e) => {
                warn!(command_id = %command_id, error = %e, "Command failed");
                self.sink.send(error_envelope(command_id, &e));
            }
        }
    }

    /// Dispatch loop: one spawned task per command so a long-running job
    /// never blocks the inbound stream.
    pub async fn run_loop(
        self: Arc<Self>,
        mut inbound_rx: mpsc::Receiver<Inbound>,
        mut shutdown: tokio::sync::broadcast::Receiver<()>,
    ) {
        info!(types = ?self.registered_types(), "Command router started");
        loop {
            tokio::select! {
                msg = inbound_rx.recv() => {
                    match msg {
                        Some(msg) => {
                            let router = self.clone();
                            tokio::spawn(async move { router.dispatch(msg).await });
                        }
                        None => {
                            info!("Inbound channel closed, router stopping");
                            break;
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Command router shutting down");
                    break;
                }
            }
        }
    }
}

fn error_envelope(command_id: String, error: &Error) -> Outbound {
    let details = match error {
        Error::QuotaExceeded { operation, .. } => Some(json!({"operation": operation})),
        _ => None,
    };
    Outbound::Error {
        command_id,
        code: error.code().to_string(),
        message: error.to_string(),
        details,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct CollectorSink {
        sent: Mutex<Vec<Outbound>>,
    }

    impl OutboundSink for CollectorSink {
        fn send(&self, msg: Outbound) {
            self.sent.lock().unwrap().push(msg);
        }
    }

    impl CollectorSink {
        fn drain(&self) -> Vec<Outbound> {
            std::mem::take(&mut *self.sent.lock().unwrap())
        }
    }

    struct EchoHandler;

    #[async_trait]
    impl CommandHandler for EchoHandler {
        async fn execute(&self, payload: Value, _progress: ProgressReporter) -> Result<Value> {
            Ok(json!({"echo": payload}))
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl CommandHandler for FailingHandler {
        async fn execute(&self, _payload: Value, _progress: ProgressReporter) -> Result<Value> {
            Err(Error::QuotaExceeded {
                operation: "send-message".to_string(),
                message: "daily cap".to_string(),
            })
        }
    }

    struct CountingHandler(Arc<AtomicUsize>);

    #[async_trait]
    impl CommandHandler for CountingHandler {
        async fn execute(&self, _payload: Value, _progress: ProgressReporter) -> Result<Value> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Null)
        }
    }

    fn execute(command_id: &str, command_type: &str, payload: Value) -> Inbound {
        Inbound::Execute {
            command_id: command_id.to_string(),
            command_type: command_type.to_string(),
            payload,
        }
    }

    #[tokio::test]
    async fn test_unknown_command_emits_single_error_and_skips_handlers() {
        let sink = Arc::new(CollectorSink::default());
        let invocations = Arc::new(AtomicUsize::new(0));
        let mut router = CommandRouter::new(sink.clone());
        router.register("known", Arc::new(CountingHandler(invocations.clone())));

        router
            .dispatch(execute("cmd-7", "frobnicate", Value::Null))
            .await;

        let sent = sink.drain();
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            Outbound::Error {
                command_id, code, ..
            } => {
                assert_eq!(command_id, "cmd-7");
                assert_eq!(code, "UNKNOWN_COMMAND");
            }
            other => panic!("unexpected envelope: {other:?}"),
        }
        assert_eq!(invocations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_success_emits_one_result_envelope() {
        let sink = Arc::new(CollectorSink::default());
        let mut router = CommandRouter::new(sink.clone());
        router.register("echo", Arc::new(EchoHandler));

        router
            .dispatch(execute("cmd-1", "echo", json!({"x": 1})))
            .await;

        let sent = sink.drain();
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            Outbound::Result { command_id, data } => {
                assert_eq!(command_id, "cmd-1");
                assert_eq!(data["echo"]["x"], 1);
            }
            other => panic!("unexpected envelope: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failure_emits_error_with_code_and_details() {
        let sink = Arc::new(CollectorSink::default());
        let mut router = CommandRouter::new(sink.clone());
        router.register("limited", Arc::new(FailingHandler));

        router
            .dispatch(execute("cmd-2", "limited", Value::Null))
            .await;

        let sent = sink.drain();
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            Outbound::Error {
                command_id,
                code,
                message,
                details,
            } => {
                assert_eq!(command_id, "cmd-2");
                assert_eq!(code, "QUOTA_EXCEEDED");
                assert!(message.contains("daily cap"));
                assert_eq!(details.as_ref().unwrap()["operation"], "send-message");
            }
            other => panic!("unexpected envelope: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_progress_envelopes_carry_command_id() {
        struct ProgressingHandler;

        #[async_trait]
        impl CommandHandler for ProgressingHandler {
            async fn execute(&self, _payload: Value, progress: ProgressReporter) -> Result<Value> {
                progress.report(1, 2, "halfway");
                progress.report(2, 2, "done");
                Ok(Value::Null)
            }
        }

        let sink = Arc::new(CollectorSink::default());
        let mut router = CommandRouter::new(sink.clone());
        router.register("walk", Arc::new(ProgressingHandler));

        router.dispatch(execute("cmd-3", "walk", Value::Null)).await;

        let sent = sink.drain();
        assert_eq!(sent.len(), 3);
        match &sent[0] {
            Outbound::Progress {
                command_id,
                step,
                total,
                message,
            } => {
                assert_eq!(command_id, "cmd-3");
                assert_eq!((*step, *total), (1, 2));
                assert_eq!(message, "halfway");
            }
            other => panic!("unexpected envelope: {other:?}"),
        }
        assert!(matches!(&sent[2], Outbound::Result { .. }));
    }

    #[tokio::test]
    async fn test_heartbeat_is_ignored() {
        let sink = Arc::new(CollectorSink::default());
        let router = CommandRouter::new(sink.clone());
        router.dispatch(Inbound::Heartbeat { echo: true }).await;
        assert!(sink.drain().is_empty());
    }
}
