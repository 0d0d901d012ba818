//! Gateway settings

use crate::error::DraftError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    /// bech32 human readable part used for draft ids.
    pub id_prefix: String,
    pub draft_number_prefix: String,
    pub default_page_limit: usize,
    pub max_page_limit: usize,
    /// Buffered events per subscriber before slow receivers start lagging.
    pub event_capacity: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            id_prefix: "draft_".into(),
            draft_number_prefix: "DRF".into(),
            default_page_limit: 20,
            max_page_limit: 100,
            event_capacity: 64,
        }
    }
}

impl GatewayConfig {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.id_prefix = prefix.into();
        self
    }
    pub fn set_draft_number_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.draft_number_prefix = prefix.into();
        self
    }
    pub fn set_page_limits(mut self, default_limit: usize, max_limit: usize) -> Self {
        self.default_page_limit = default_limit;
        self.max_page_limit = max_limit;
        self
    }
    pub fn set_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn validate(&self) -> Result<(), DraftError> {
        bech32::Hrp::parse(&self.id_prefix)
            .map_err(|e| DraftError::Config(format!("id_prefix '{}': {e}", self.id_prefix)))?;
        if self.draft_number_prefix.trim().is_empty() {
            return Err(DraftError::Config("draft_number_prefix is empty".into()));
        }
        if self.default_page_limit == 0 || self.default_page_limit > self.max_page_limit {
            return Err(DraftError::Config(format!(
                "default_page_limit {} must be within 1..={}",
                self.default_page_limit, self.max_page_limit
            )));
        }
        if self.event_capacity == 0 {
            return Err(DraftError::Config("event_capacity must be positive".into()));
        }
        Ok(())
    }
}
