//! Turn execution engine for the lantern agent runtime.
//!
//! This crate composes the engine: session identity resolution, the
//! ordered pipeline of processing systems, the bounded LLM/tool loop,
//! request-time conversation views, compaction, scoped memory, response
//! routing with a feedback guarantee, plan mode, and the autonomous
//! scheduler.
//!
//! ```text
//! InboundMessage
//!   |
//!   v
//! SessionRouter -> ActivePointerRegistry   (identity resolution)
//!   |
//!   v
//! TurnOrchestrator                         (single-flight per session)
//!   |
//!   v
//! Pipeline: sanitize -> skill -> compaction -> context -> tier
//!        -> tool loop -> memory persist -> rag -> prepare -> deliver
//!   |
//!   v
//! OutgoingResponse -> ChannelPort          (routing outcome recorded)
//! ```

pub mod auto;
pub mod compactor;
pub mod events;
pub mod memory;
pub mod orchestrator;
pub mod pipeline;
pub mod plan;
pub mod pointers;
pub mod ports;
pub mod routing;
pub mod runtime;
pub mod scheduler;
pub mod session_router;
pub mod sessions;
pub mod storage;
pub mod tool_loop;
pub mod tools;
pub mod turn;
pub mod view;

pub use orchestrator::TurnOrchestrator;
pub use runtime::{Runtime, RuntimeBuilder};
pub use storage::{MemStorage, NativeStorage, Storage};
pub use turn::TurnContext;
