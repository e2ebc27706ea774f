//! Push notifications through the Pushover messages API.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::blocking::Client;
use tracing::{info, warn};

use super::collaborators::Notifier;
use crate::config::NotificationPreset;

pub const PUSHOVER_ENDPOINT: &str = "https://api.pushover.net/1/messages.json";

/// Emergency pushes repeat until acknowledged; these bound the repetition.
const EMERGENCY_PRIORITY: i64 = 2;
const EMERGENCY_RETRY_SECS: u32 = 60;
const EMERGENCY_EXPIRE_SECS: u32 = 60;

/// Form fields of one push, `None` when the preset carries no credentials.
pub fn pushover_form(preset: &NotificationPreset) -> Option<Vec<(&'static str, String)>> {
    let (token, user) = (preset.token.as_deref()?, preset.user.as_deref()?);
    let mut form = vec![
        ("token", token.to_string()),
        ("user", user.to_string()),
        ("message", preset.message.clone()),
        ("priority", preset.priority.to_string()),
    ];
    if preset.priority == EMERGENCY_PRIORITY {
        form.push(("expire", EMERGENCY_EXPIRE_SECS.to_string()));
        form.push(("retry", EMERGENCY_RETRY_SECS.to_string()));
    }
    Some(form)
}

/// Sends presets that carry a token and user key to Pushover. Blocking, so it
/// lives on the engine's worker thread like the other collaborators.
pub struct PushoverNotifier {
    client: Client,
    endpoint: String,
    presets: BTreeMap<String, NotificationPreset>,
}

impl PushoverNotifier {
    pub fn new(presets: BTreeMap<String, NotificationPreset>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            endpoint: PUSHOVER_ENDPOINT.to_string(),
            presets,
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn post(&self, form: &[(&'static str, String)]) -> Result<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .form(form)
            .send()
            .context("Failed to reach Pushover")?;
        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let body = response.text().unwrap_or_default();
            bail!("Pushover answered {status}: {body}");
        }
        Ok(())
    }
}

impl Notifier for PushoverNotifier {
    fn send(&mut self, name: &str) -> bool {
        let Some(preset) = self.presets.get(name) else {
            warn!(
                target: "aimacro::notify",
                notification = %name,
                known = ?self.presets.keys().collect::<Vec<_>>(),
                "Notification not found"
            );
            return false;
        };
        let Some(form) = pushover_form(preset) else {
            warn!(
                target: "aimacro::notify",
                notification = %name,
                message = %preset.message,
                "Notification has no token or user, not sent"
            );
            return false;
        };
        match self.post(&form) {
            Ok(()) => {
                info!(target: "aimacro::notify", notification = %name, priority = preset.priority, "Sent notification");
                true
            }
            Err(err) => {
                warn!(target: "aimacro::notify", notification = %name, error = %format!("{err:#}"), "Failed to send notification");
                false
            }
        }
    }
}
