//! Turn orchestration.
//!
//! One FIFO queue per logical session identity: a session processes one
//! turn at a time, in arrival order, while distinct sessions run in
//! parallel. The queue key is `(channel, conversation_key)` — never the
//! transport chat id, so one transport chat hosting several logical
//! sessions cannot block across them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use lantern_types::error::{FailureKind, FailureSource, LanternError, Result};
use lantern_types::event::{InboundMessage, RuntimeEvent};
use lantern_types::identity::SessionIdentity;
use lantern_types::message::Message;
use lantern_types::response::RoutingOutcome;
use lantern_types::session::SessionState;

use lantern_types::config::TurnBudgets;

use crate::events::EventBus;
use crate::pipeline::Pipeline;
use crate::session_router::SessionRouter;
use crate::sessions::SessionStore;
use crate::turn::TurnContext;

/// Grace added to the cooperative deadline before the hard watchdog
/// aborts a turn.
const WATCHDOG_GRACE: Duration = Duration::from_secs(5);

struct QueuedTurn {
    identity: SessionIdentity,
    msg: InboundMessage,
    done: oneshot::Sender<RoutingOutcome>,
}

struct Inner {
    router: SessionRouter,
    sessions: Arc<SessionStore>,
    pipeline: Arc<Pipeline>,
    events: EventBus,
    budgets: TurnBudgets,
    shutdown: CancellationToken,
}

/// Drives turns with single-flight-per-session scheduling.
#[derive(Clone)]
pub struct TurnOrchestrator {
    inner: Arc<Inner>,
    queues: Arc<Mutex<HashMap<String, mpsc::UnboundedSender<QueuedTurn>>>>,
}

impl TurnOrchestrator {
    /// Create an orchestrator.
    pub fn new(
        router: SessionRouter,
        sessions: Arc<SessionStore>,
        pipeline: Arc<Pipeline>,
        events: EventBus,
        budgets: TurnBudgets,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                router,
                sessions,
                pipeline,
                events,
                budgets,
                shutdown,
            }),
            queues: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Process one inbound message to completion.
    ///
    /// Resolves the session identity, enqueues on that session's FIFO
    /// queue, and resolves with the turn's [`RoutingOutcome`].
    pub async fn process_message(&self, msg: InboundMessage) -> Result<RoutingOutcome> {
        let rx = self.submit(msg).await?;
        rx.await.map_err(|_| LanternError::Cancelled {
            operation: "turn execution".into(),
        })
    }

    /// Enqueue a message and return a receiver for its outcome.
    ///
    /// Useful when the caller wants its own wait policy (the scheduler
    /// watches with a watchdog without cancelling the turn).
    pub async fn submit(&self, msg: InboundMessage) -> Result<oneshot::Receiver<RoutingOutcome>> {
        let identity = self.inner.router.resolve(&msg).await?;
        let (done, rx) = oneshot::channel();
        let turn = QueuedTurn {
            identity: identity.clone(),
            msg,
            done,
        };

        let mut queues = self.queues.lock().await;
        let sender = queues
            .entry(identity.session_id())
            .or_insert_with(|| self.spawn_worker(identity));
        sender.send(turn).map_err(|_| LanternError::Cancelled {
            operation: "turn queue".into(),
        })?;
        Ok(rx)
    }

    /// Stop accepting work and cancel in-flight turns.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    fn spawn_worker(&self, identity: SessionIdentity) -> mpsc::UnboundedSender<QueuedTurn> {
        let (tx, mut rx) = mpsc::unbounded_channel::<QueuedTurn>();
        let inner = self.inner.clone();
        tokio::spawn(async move {
            info!(session = %identity, "session worker started");
            loop {
                let turn = tokio::select! {
                    biased;
                    _ = inner.shutdown.cancelled() => break,
                    turn = rx.recv() => match turn {
                        Some(turn) => turn,
                        None => break,
                    },
                };
                let outcome = run_turn(&inner, &turn.identity, turn.msg).await;
                // The caller may have stopped waiting; that is fine.
                let _ = turn.done.send(outcome);
            }
            info!(session = %identity, "session worker stopped");
        });
        tx
    }
}

async fn run_turn(
    inner: &Inner,
    identity: &SessionIdentity,
    msg: InboundMessage,
) -> RoutingOutcome {
    let session_id = identity.session_id();

    let session = match inner
        .sessions
        .get_or_create(identity, &msg.transport_chat_id)
        .await
    {
        Ok(session) => session,
        Err(e) => {
            error!(session = %session_id, error = %e, "failed to load session");
            return RoutingOutcome {
                error_message: Some(e.to_string()),
                ..Default::default()
            };
        }
    };

    if session.state != SessionState::Active {
        warn!(session = %session_id, state = ?session.state, "session not active, turn rejected");
        return RoutingOutcome {
            error_message: Some(format!("session is {:?}", session.state).to_lowercase()),
            ..Default::default()
        };
    }

    // Per-request deadline override (e.g. webhook timeout_seconds),
    // never above the configured turn deadline.
    let configured = Duration::from_secs(inner.budgets.turn_deadline_secs);
    let deadline = msg
        .metadata
        .get("timeout_seconds")
        .and_then(|v| v.as_u64())
        .map(Duration::from_secs)
        .map(|d| d.min(configured))
        .unwrap_or(configured);

    let cancel = inner.shutdown.child_token();
    let mut ctx = TurnContext::new(session, msg, deadline, cancel);

    // The inbound message joins raw history before any system runs.
    let mut user_msg = Message::user(&ctx.incoming.content);
    for (key, value) in &ctx.incoming.metadata {
        user_msg.metadata.insert(key.clone(), value.clone());
    }
    ctx.session.push_message(user_msg);

    inner.events.emit(RuntimeEvent::TurnStarted {
        session_id: session_id.clone(),
    });

    // Systems check the deadline cooperatively; the watchdog is the
    // hard backstop for a system that never yields control back.
    let finished = tokio::time::timeout(deadline + WATCHDOG_GRACE, inner.pipeline.run(&mut ctx))
        .await
        .is_ok();
    if !finished {
        warn!(session = %session_id, "turn watchdog fired past the deadline");
        ctx.record_failure(
            FailureSource::System,
            "orchestrator",
            FailureKind::Timeout,
            format!("turn exceeded deadline of {}s", deadline.as_secs()),
        );
    }

    if let Err(e) = inner.sessions.save(&ctx.session).await {
        error!(session = %session_id, error = %e, "failed to persist session after turn");
        ctx.record_failure(
            FailureSource::System,
            "session_store",
            FailureKind::Exception,
            e.to_string(),
        );
    }

    match ctx.stop_reason {
        Some(reason) if finished => {
            inner.events.emit(RuntimeEvent::TurnFinished {
                session_id: session_id.clone(),
                reason,
            });
        }
        _ => {
            let message = ctx
                .failures
                .last()
                .map(|f| f.message.clone())
                .unwrap_or_else(|| "turn failed without a recorded cause".to_string());
            inner.events.emit(RuntimeEvent::TurnFailed {
                session_id: session_id.clone(),
                message,
            });
        }
    }

    ctx.routing_outcome.take().unwrap_or_else(|| RoutingOutcome {
        error_message: ctx.failures.last().map(|f| f.message.clone()),
        ..Default::default()
    })
}
