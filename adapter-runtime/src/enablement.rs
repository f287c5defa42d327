//! Enablement filter
//!
//! Decides whether a message may reach an adapter at all. Checks run in a
//! fixed order: replay, instance override, message-level disable, unbundled
//! client delivery, then the channel whitelist.

use crate::error::Error;
use crate::mapping::is_truthy;
use crate::message::Facade;
use serde_json::Value;
use tracing::debug;

/// Everything the filter needs to know about the adapter instance
#[derive(Debug, Clone, Copy)]
pub struct Enablement<'a> {
    /// Adapter name
    pub name: &'a str,
    /// Channel whitelist
    pub channels: &'a [String],
    /// Instance-level override
    pub override_enabled: Option<bool>,
}

impl Enablement<'_> {
    /// `None` when the message may be delivered
    pub fn check(&self, message: &dyn Facade) -> Option<Error> {
        if message.attribute("replay").map(is_truthy).unwrap_or(false) {
            return None;
        }

        match self.override_enabled {
            Some(true) => return None,
            Some(false) => {
                return Some(Error::rejected(
                    self.name,
                    format!("{} has been explicitly disabled.", self.name),
                ))
            }
            None => {}
        }

        if !message.enabled(self.name) {
            return Some(Error::rejected(
                self.name,
                format!(
                    "{} has been explicitly disabled in the event payload in the `integrations` object.",
                    self.name
                ),
            ));
        }

        let channel = message.channel();

        if channel == Some("client") && self.unbundled(message) {
            return None;
        }

        if channel.map(|c| self.channels.iter().any(|allowed| allowed == c)).unwrap_or(false) {
            return None;
        }

        debug!(adapter = self.name, channel = ?channel, "Message sent on unsupported channel");
        Some(Error::UnsupportedChannel {
            integration: self.name.to_string(),
            channel: channel.map(str::to_string),
        })
    }

    fn unbundled(&self, message: &dyn Facade) -> bool {
        message
            .attribute("_metadata.unbundled")
            .and_then(Value::as_array)
            .map(|names| names.iter().any(|n| n.as_str() == Some(self.name)))
            .unwrap_or(false)
    }
}
