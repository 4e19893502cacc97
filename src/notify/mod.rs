//! Best-effort notification delivery (webhook, ntfy, Pushover).
//!
//! [`Notify::notify`] never fails from the caller's point of view: the
//! outcome of a speed test or watchdog cycle must not depend on whether a
//! push service is reachable.

use std::time::Duration;

use chrono::Local;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::NotifyConfig;
use crate::storage::settings::{load_notification_settings, NotificationSettings, Provider};
use crate::storage::Pool;

const PUSHOVER_URL: &str = "https://api.pushover.net/1/messages.json";

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Missing {0}")]
    MissingField(&'static str),

    #[error("delivery failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// What triggered a notification. Drives the webhook `type` field, ntfy tags
/// and Pushover priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Speedtest,
    WatchdogUp,
    WatchdogDown,
    Test,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Speedtest => "speedtest",
            Category::WatchdogUp => "watchdog_up",
            Category::WatchdogDown => "watchdog_down",
            Category::Test => "test",
        }
    }

    fn ntfy_tags(&self) -> &'static str {
        match self {
            Category::WatchdogDown => "warning",
            Category::Test => "tada",
            _ => "white_check_mark",
        }
    }

    fn pushover_priority(&self) -> i8 {
        match self {
            Category::WatchdogDown => 1,
            _ => 0,
        }
    }
}

#[async_trait::async_trait]
pub trait Notify: Send + Sync {
    /// Fire and forget. Implementations log failures and swallow them.
    async fn notify(&self, title: &str, body: &str, category: Category);
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    title: &'a str,
    message: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    timestamp: String,
}

#[derive(Serialize)]
struct NtfyPayload<'a> {
    topic: &'a str,
    title: &'a str,
    message: &'a str,
    tags: [&'a str; 1],
}

/// Delivers through the provider stored in `notification_settings`.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    pool: Pool,
    client: reqwest::Client,
    default_ntfy_server: String,
}

impl Dispatcher {
    pub fn new(pool: Pool, config: &NotifyConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("speedtestlog/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            pool,
            client,
            default_ntfy_server: config.default_ntfy_server.clone(),
        })
    }

    /// Send through `settings` regardless of the stored `enabled` flag.
    /// Used by the explicit "send test" action, which reports failures.
    pub async fn send_test(&self, settings: &NotificationSettings, lang: &str) -> Result<(), NotifyError> {
        let msgs = crate::i18n::messages(lang);
        self.deliver(settings, msgs.test_title, msgs.test_body, Category::Test).await
    }

    async fn deliver(
        &self,
        settings: &NotificationSettings,
        title: &str,
        body: &str,
        category: Category,
    ) -> Result<(), NotifyError> {
        match settings.provider {
            // Rendered client-side from polled state.
            Provider::Browser => Ok(()),
            Provider::Webhook => {
                let url = required(&settings.webhook_url, "Webhook URL")?;
                let payload = WebhookPayload {
                    title,
                    message: body,
                    kind: category.as_str(),
                    timestamp: Local::now().to_rfc3339(),
                };
                self.client.post(url).json(&payload).send().await?.error_for_status()?;
                info!("Notification sent via Webhook");
                Ok(())
            }
            Provider::Ntfy => {
                let topic = required(&settings.ntfy_topic, "Ntfy Topic")?;
                let server = settings
                    .ntfy_server
                    .as_deref()
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or(&self.default_ntfy_server);
                // JSON publishing keeps non-ASCII titles out of HTTP headers.
                let payload = NtfyPayload {
                    topic,
                    title,
                    message: body,
                    tags: [category.ntfy_tags()],
                };
                self.client
                    .post(server.trim_end_matches('/'))
                    .json(&payload)
                    .send()
                    .await?
                    .error_for_status()?;
                info!("Notification sent via Ntfy");
                Ok(())
            }
            Provider::Pushover => {
                let user = required(&settings.pushover_user_key, "Pushover User Key")?;
                let token = required(&settings.pushover_api_token, "Pushover API Token")?;
                let priority = category.pushover_priority().to_string();
                let form = [
                    ("token", token),
                    ("user", user),
                    ("title", title),
                    ("message", body),
                    ("priority", priority.as_str()),
                ];
                self.client
                    .post(PUSHOVER_URL)
                    .form(&form)
                    .send()
                    .await?
                    .error_for_status()?;
                info!("Notification sent via Pushover");
                Ok(())
            }
        }
    }
}

#[async_trait::async_trait]
impl Notify for Dispatcher {
    async fn notify(&self, title: &str, body: &str, category: Category) {
        let settings = match load_notification_settings(&self.pool) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "Could not load notification settings");
                return;
            }
        };
        if !settings.enabled {
            debug!(category = category.as_str(), "Notifications disabled");
            return;
        }
        if let Err(e) = self.deliver(&settings, title, body, category).await {
            warn!(provider = settings.provider.as_str(), error = %e, "Notification send error");
        }
    }
}

fn required<'a>(value: &'a Option<String>, what: &'static str) -> Result<&'a str, NotifyError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(NotifyError::MissingField(what))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use axum::{routing::post, Json, Router};
    use serde_json::Value;

    use crate::storage::settings::save_notification_settings;

    fn dispatcher() -> (tempfile::TempDir, Dispatcher) {
        let dir = tempfile::TempDir::new().unwrap();
        let pool = crate::storage::open_pool(dir.path().join("notify.db")).unwrap();
        let d = Dispatcher::new(pool, &NotifyConfig::default()).unwrap();
        (dir, d)
    }

    /// Local HTTP endpoint that records every JSON body it receives.
    async fn capture_server() -> (String, Arc<Mutex<Vec<Value>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let app = Router::new().route(
            "/hook",
            post(move |Json(body): Json<Value>| {
                let sink = sink.clone();
                async move {
                    sink.lock().unwrap().push(body);
                    "ok"
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/hook"), seen)
    }

    #[test]
    fn test_category_mapping() {
        assert_eq!(Category::WatchdogDown.ntfy_tags(), "warning");
        assert_eq!(Category::WatchdogUp.ntfy_tags(), "white_check_mark");
        assert_eq!(Category::Speedtest.ntfy_tags(), "white_check_mark");
        assert_eq!(Category::Test.ntfy_tags(), "tada");
        assert_eq!(Category::WatchdogDown.pushover_priority(), 1);
        assert_eq!(Category::Speedtest.pushover_priority(), 0);
    }

    #[tokio::test]
    async fn test_ntfy_publishes_json_with_unicode_title() {
        let (url, seen) = capture_server().await;
        let (_dir, d) = dispatcher();
        let settings = NotificationSettings {
            provider: Provider::Ntfy,
            ntfy_topic: Some("home".into()),
            ntfy_server: Some(format!("{url}/")),
            ..Default::default()
        };
        d.deliver(&settings, "🔴 Watchdog OFFLINE", "Cel: 8.8.8.8", Category::WatchdogDown)
            .await
            .unwrap();

        let bodies = seen.lock().unwrap();
        assert_eq!(bodies.len(), 1);
        assert_eq!(bodies[0]["topic"], "home");
        assert_eq!(bodies[0]["title"], "🔴 Watchdog OFFLINE");
        assert_eq!(bodies[0]["tags"][0], "warning");
    }

    #[tokio::test]
    async fn test_send_test_reports_missing_fields() {
        let (_dir, d) = dispatcher();
        let settings = NotificationSettings {
            provider: Provider::Ntfy,
            ntfy_topic: Some("  ".into()),
            ..Default::default()
        };
        let err = d.send_test(&settings, "en").await.unwrap_err();
        assert!(matches!(err, NotifyError::MissingField("Ntfy Topic")));
    }

    #[tokio::test]
    async fn test_browser_provider_sends_nothing() {
        let (_dir, d) = dispatcher();
        d.send_test(&NotificationSettings::default(), "pl").await.unwrap();
    }

    #[tokio::test]
    async fn test_webhook_payload() {
        let (url, seen) = capture_server().await;
        let (_dir, d) = dispatcher();
        let settings = NotificationSettings {
            provider: Provider::Webhook,
            webhook_url: Some(url),
            ..Default::default()
        };
        d.send_test(&settings, "en").await.unwrap();

        let bodies = seen.lock().unwrap();
        assert_eq!(bodies.len(), 1);
        assert_eq!(bodies[0]["title"], "Notification Test");
        assert_eq!(bodies[0]["type"], "test");
        assert!(bodies[0]["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_notify_respects_enabled_flag() {
        let (url, seen) = capture_server().await;
        let (_dir, d) = dispatcher();
        let mut settings = NotificationSettings {
            enabled: false,
            provider: Provider::Webhook,
            webhook_url: Some(url),
            ..Default::default()
        };
        save_notification_settings(&d.pool, &settings).unwrap();
        d.notify("t", "b", Category::Speedtest).await;
        assert!(seen.lock().unwrap().is_empty());

        settings.enabled = true;
        save_notification_settings(&d.pool, &settings).unwrap();
        d.notify("t", "b", Category::WatchdogDown).await;
        let bodies = seen.lock().unwrap();
        assert_eq!(bodies.len(), 1);
        assert_eq!(bodies[0]["type"], "watchdog_down");
    }

    #[tokio::test]
    async fn test_notify_swallows_delivery_errors() {
        let (_dir, d) = dispatcher();
        let settings = NotificationSettings {
            enabled: true,
            provider: Provider::Webhook,
            // Nothing listens on the discard port.
            webhook_url: Some("http://127.0.0.1:9/hook".into()),
            ..Default::default()
        };
        save_notification_settings(&d.pool, &settings).unwrap();
        d.notify("t", "b", Category::Speedtest).await;
    }
}
