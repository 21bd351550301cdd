//! Response routing system (order 60).
//!
//! Thin pipeline wrapper: delivery lives in
//! [`ResponseRouter`](crate::routing::ResponseRouter). This is the only
//! system that mutates transport state.

use std::sync::Arc;

use async_trait::async_trait;

use lantern_types::error::Result;

use crate::pipeline::{System, order};
use crate::routing::ResponseRouter;
use crate::turn::TurnContext;

/// Delivers the outgoing response through the channel registry.
pub struct ResponseRouting {
    router: Arc<ResponseRouter>,
}

impl ResponseRouting {
    /// Create the system.
    pub fn new(router: Arc<ResponseRouter>) -> Self {
        Self { router }
    }
}

#[async_trait]
impl System for ResponseRouting {
    fn name(&self) -> &str {
        "response_routing"
    }

    fn order(&self) -> u32 {
        order::RESPONSE_ROUTING
    }

    async fn process(&self, ctx: &mut TurnContext) -> Result<()> {
        self.router.route(ctx).await;
        Ok(())
    }
}
