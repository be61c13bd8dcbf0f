use reqwest::Client;
use serde::Serialize;
use std::{env, fmt};
use tracing::{debug, warn};

pub const BOT_TOKEN_ENV: &str = "TELEGRAM_BOT_TOKEN";
pub const CHAT_ID_ENV: &str = "TELEGRAM_CHAT_ID";

const DEFAULT_BASE_URL: &str = "https://api.telegram.org";

/// Optional Telegram delivery for city summaries and failure notices.
///
/// When unconfigured every send is a silent no-op, and delivery problems are
/// logged and swallowed, so the notifier can never abort a pipeline run.
#[derive(Debug, Clone)]
pub struct Notifier {
    http: Client,
    base_url: String,
    settings: Option<NotifySettings>,
}

#[derive(Clone)]
pub(crate) struct NotifySettings {
    bot_token: String,
    chat_id: String,
}

impl fmt::Debug for NotifySettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotifySettings")
            .field("bot_token", &"<redacted>")
            .field("chat_id", &self.chat_id)
            .finish()
    }
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
}

impl Notifier {
    /// Read Telegram settings from the environment. If either variable is
    /// missing or empty, notifications stay disabled.
    pub fn from_env() -> Self {
        let settings = match (env::var(BOT_TOKEN_ENV), env::var(CHAT_ID_ENV)) {
            (Ok(bot_token), Ok(chat_id)) if !bot_token.is_empty() && !chat_id.is_empty() => {
                Some(NotifySettings { bot_token, chat_id })
            }
            _ => None,
        };

        if settings.is_none() {
            debug!("telegram settings absent, notifications disabled");
        }

        Self::new(DEFAULT_BASE_URL, settings)
    }

    pub fn disabled() -> Self {
        Self::new(DEFAULT_BASE_URL, None)
    }

    pub fn with_base_url(
        base_url: impl Into<String>,
        bot_token: impl Into<String>,
        chat_id: impl Into<String>,
    ) -> Self {
        let settings = NotifySettings { bot_token: bot_token.into(), chat_id: chat_id.into() };
        Self::new(base_url, Some(settings))
    }

    pub(crate) fn new(base_url: impl Into<String>, settings: Option<NotifySettings>) -> Self {
        Self { http: Client::new(), base_url: base_url.into(), settings }
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.is_some()
    }

    /// Send `text` to the configured chat.
    pub async fn send(&self, text: &str) {
        let Some(settings) = &self.settings else {
            return;
        };

        let url = format!("{}/bot{}/sendMessage", self.base_url, settings.bot_token);
        let payload = SendMessage { chat_id: &settings.chat_id, text };

        match self.http.post(&url).json(&payload).send().await {
            Ok(res) if res.status().is_success() => {
                debug!("telegram message delivered");
            }
            Ok(res) => {
                warn!(status = %res.status(), "telegram rejected the message");
            }
            Err(err) => {
                warn!(error = %err, "failed to reach telegram");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_string_contains, method, path},
    };

    #[tokio::test]
    async fn disabled_notifier_makes_no_requests() {
        let server = MockServer::start().await;

        let notifier = Notifier::new(server.uri(), None);
        notifier.send("Moscow: -5.2°C, light snow").await;

        let requests = server.received_requests().await.unwrap();
        assert!(requests.is_empty());
    }

    #[tokio::test]
    async fn send_posts_to_the_configured_chat() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/bot123:ABC/sendMessage"))
            .and(body_string_contains("\"chat_id\":\"42\""))
            .and(body_string_contains("light snow"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = Notifier::with_base_url(server.uri(), "123:ABC", "42");
        notifier.send("Moscow: -5.2°C, light snow").await;
    }

    #[tokio::test]
    async fn delivery_failure_is_swallowed() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = Notifier::with_base_url(server.uri(), "123:ABC", "42");
        notifier.send("anything").await;
    }

    #[test]
    fn debug_output_redacts_bot_token() {
        let notifier = Notifier::with_base_url("http://localhost", "123:SECRET", "42");
        let rendered = format!("{notifier:?}");

        assert!(!rendered.contains("SECRET"));
        assert!(rendered.contains("<redacted>"));
    }
}
