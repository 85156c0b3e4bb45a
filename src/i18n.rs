//! Message localisation.
//!
//! Status names shown in notifications resolve through a [`Localizer`] so
//! deployments can swap in translated tables.

use std::collections::HashMap;

/// Resolves message IDs to display strings.
pub trait Localizer: Send + Sync {
    /// Look up `id`, falling back to the ID itself when missing.
    fn must_localize(&self, id: &str) -> String;
}

/// In-memory message table, preloaded with the English defaults.
pub struct StaticLocalizer {
    messages: HashMap<&'static str, String>,
}

impl Default for StaticLocalizer {
    fn default() -> Self {
        let mut messages = HashMap::new();
        messages.insert("StatusNoData", "No Data".to_string());
        messages.insert("StatusGood", "Good".to_string());
        messages.insert("StatusLowAvailability", "Low Availability".to_string());
        messages.insert("StatusDown", "Down".to_string());
        Self { messages }
    }
}

impl StaticLocalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override or extend the message table.
    pub fn with_message(mut self, id: &'static str, text: &str) -> Self {
        self.messages.insert(id, text.to_string());
        self
    }
}

impl Localizer for StaticLocalizer {
    fn must_localize(&self, id: &str) -> String {
        match self.messages.get(id) {
            Some(text) => text.clone(),
            None => id.to_string(),
        }
    }
}
