//! Channel registry.
//!
//! Maps channel type names to [`ChannelPort`] instances. Safe for
//! concurrent readers; registration is serialized through the write
//! lock and normally happens once at startup.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::error::ChannelError;
use crate::traits::ChannelPort;

/// Name → channel lookup used by response routing.
#[derive(Default)]
pub struct ChannelRegistry {
    channels: RwLock<HashMap<String, Arc<dyn ChannelPort>>>,
}

impl ChannelRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel under its own name. Replaces any previous
    /// registration for the same name.
    pub fn register(&self, channel: Arc<dyn ChannelPort>) {
        let name = channel.name().to_string();
        debug!(channel = %name, "registering channel");
        self.channels.write().unwrap().insert(name, channel);
    }

    /// Look up a channel by type name.
    pub fn get(&self, name: &str) -> Result<Arc<dyn ChannelPort>, ChannelError> {
        self.channels
            .read()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| ChannelError::NotFound(name.to_string()))
    }

    /// Names of all registered channels, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.read().unwrap().keys().cloned().collect();
        names.sort();
        names
    }
}
