//! Auto-compaction (order 18).
//!
//! Invokes the [`Compactor`] when the session's token estimate exceeds
//! the context budget, before context building reads the history.

use std::sync::Arc;

use async_trait::async_trait;

use lantern_types::error::Result;
use lantern_types::event::RuntimeEvent;

use crate::compactor::Compactor;
use crate::events::EventBus;
use crate::pipeline::{System, order};
use crate::turn::TurnContext;

/// Pipeline wrapper around the compactor.
pub struct AutoCompaction {
    compactor: Arc<Compactor>,
    events: EventBus,
}

impl AutoCompaction {
    /// Create the system.
    pub fn new(compactor: Arc<Compactor>, events: EventBus) -> Self {
        Self { compactor, events }
    }
}

#[async_trait]
impl System for AutoCompaction {
    fn name(&self) -> &str {
        "auto_compaction"
    }

    fn order(&self) -> u32 {
        order::AUTO_COMPACTION
    }

    fn should_process(&self, ctx: &TurnContext) -> bool {
        self.compactor.needs_compaction(&ctx.session)
    }

    async fn process(&self, ctx: &mut TurnContext) -> Result<()> {
        let session_id = ctx.session_id();
        self.events.emit(RuntimeEvent::CompactionStarted {
            session_id: session_id.clone(),
        });
        if let Some(report) = self.compactor.compact(&mut ctx.session).await? {
            self.events.emit(RuntimeEvent::CompactionFinished { session_id, report });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sessions::SessionStore;
    use crate::storage::MemStorage;
    use lantern_types::config::CompactionConfig;
    use lantern_types::event::InboundMessage;
    use lantern_types::identity::SessionIdentity;
    use lantern_types::message::{Message, MessageRole};
    use lantern_types::session::Session;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn system(max_tokens: usize) -> (AutoCompaction, EventBus) {
        let sessions = Arc::new(SessionStore::new(Arc::new(MemStorage::new())));
        let compactor = Arc::new(Compactor::new(
            CompactionConfig {
                max_context_tokens: max_tokens,
                keep_last_messages: 2,
                chars_per_token: 3.5,
                system_prompt_overhead: 0,
            },
            sessions,
            None,
            "summary-model",
        ));
        let events = EventBus::default();
        (AutoCompaction::new(compactor, events.clone()), events)
    }

    fn ctx(message_count: usize) -> TurnContext {
        let mut session = Session::new(SessionIdentity::new("web", "abcd1234").unwrap(), "42");
        for i in 0..message_count {
            session.push_message(Message::user(format!("message {i} with padding text")));
        }
        TurnContext::new(
            session,
            InboundMessage::new("web", "u1", "42", "hello"),
            Duration::from_secs(60),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn small_history_not_compacted() {
        let (system, _) = system(100_000);
        let ctx = ctx(4);
        assert!(!system.should_process(&ctx));
    }

    #[tokio::test]
    async fn oversized_history_compacted_with_events() {
        let (system, events) = system(30);
        let mut rx = events.subscribe();
        let mut ctx = ctx(20);
        assert!(system.should_process(&ctx));
        system.process(&mut ctx).await.unwrap();

        assert_eq!(ctx.session.messages.len(), 3);
        assert_eq!(ctx.session.messages[0].role, MessageRole::System);

        assert!(matches!(
            rx.try_recv().unwrap(),
            RuntimeEvent::CompactionStarted { .. }
        ));
        match rx.try_recv().unwrap() {
            RuntimeEvent::CompactionFinished { report, .. } => {
                assert_eq!(report.summarized_count, 18);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
