//! Settings handed over by the external configuration loader.

use crate::error::Result;
use crate::types::{IdManager, IdScheme, LongIdManager, StringIdManager};
use serde::Deserialize;
use std::sync::Arc;

/// Core settings.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CoreSettings {
    /// Base URL prepended to canonical path text.
    /// Default: empty
    pub service_root_url: String,

    /// Prefix every MQTT topic must carry (None = no prefix).
    pub topic_prefix: Option<String>,

    /// Primary-key scheme of the backing store.
    pub id_scheme: IdScheme,

    /// Max buffered messages per subscriber before it is dropped.
    /// Default: 1000
    pub subscription_buffer_size: usize,
}

impl Default for CoreSettings {
    fn default() -> Self {
        Self {
            service_root_url: String::new(),
            topic_prefix: None,
            id_scheme: IdScheme::Long,
            subscription_buffer_size: 1000,
        }
    }
}

impl CoreSettings {
    /// Read settings from a JSON document; absent keys keep their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Build the id strategy for the configured scheme.
    pub fn id_manager(&self) -> Arc<dyn IdManager> {
        match self.id_scheme {
            IdScheme::Long => Arc::new(LongIdManager),
            IdScheme::String => Arc::new(StringIdManager),
        }
    }

    /// The configured prefix, treating an empty string as none.
    pub fn effective_topic_prefix(&self) -> Option<&str> {
        self.topic_prefix.as_deref().filter(|p| !p.is_empty())
    }
}
