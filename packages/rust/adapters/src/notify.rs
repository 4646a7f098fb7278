//! Notifiers.
//!
//! [`LogNotifier`] writes a tracing event per notification and never logs
//! credential material. [`HttpNotifier`] posts JSON to operator webhooks and,
//! when configured, to an email relay; without a relay, email targets fall
//! back to the log.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{info, warn};
use url::Url;

use sitegen_core::{Notification, NotificationChannel, Notifier};
use sitegen_shared::{NotifyConfig, Result, SiteGenError};

const USER_AGENT: &str = concat!("sitegen/", env!("CARGO_PKG_VERSION"));
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Logs notifications instead of delivering them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, channel: &NotificationChannel, notification: &Notification) -> bool {
        info!(
            channel = channel.kind(),
            target = channel.target(),
            record_id = %notification.record_id,
            business = %notification.business_name,
            preview_url = %notification.preview_url,
            has_login = notification.login.is_some(),
            "site ready notification"
        );
        true
    }
}

/// Operator webhook body. Carries no credential material.
#[derive(Debug, Serialize)]
struct WebhookEvent<'a> {
    event: &'static str,
    record_id: String,
    business_name: &'a str,
    preview_url: &'a str,
}

/// Email relay body.
#[derive(Debug, Serialize)]
struct RelayMessage<'a> {
    to: &'a str,
    subject: String,
    text: String,
}

/// Delivers over HTTP.
pub struct HttpNotifier {
    client: Client,
    email_relay: Option<Url>,
}

impl HttpNotifier {
    pub fn new(config: &NotifyConfig) -> Result<Self> {
        let email_relay = config
            .email_relay_url
            .as_deref()
            .map(|raw| {
                Url::parse(raw)
                    .map_err(|e| SiteGenError::config(format!("invalid email_relay_url '{raw}': {e}")))
            })
            .transpose()?;
        for hook in &config.operator_webhooks {
            Url::parse(hook)
                .map_err(|e| SiteGenError::config(format!("invalid operator webhook '{hook}': {e}")))?;
        }

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| SiteGenError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            email_relay,
        })
    }

    async fn post<T: Serialize + ?Sized>(&self, url: &str, body: &T) -> Result<()> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| SiteGenError::Network(format!("{url}: {e}")))?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(SiteGenError::Network(format!("{url}: HTTP {status}")))
        }
    }

    async fn deliver(&self, channel: &NotificationChannel, notification: &Notification) -> Result<()> {
        match channel {
            NotificationChannel::Webhook(url) => {
                let event = WebhookEvent {
                    event: "site.generated",
                    record_id: notification.record_id.to_string(),
                    business_name: &notification.business_name,
                    preview_url: &notification.preview_url,
                };
                self.post(url, &event).await
            }
            NotificationChannel::Email(address) => {
                let Some(relay) = &self.email_relay else {
                    LogNotifier.notify(channel, notification).await;
                    return Ok(());
                };
                let message = RelayMessage {
                    to: address,
                    subject: format!("Your {} website is ready", notification.business_name),
                    text: email_text(notification),
                };
                self.post(relay.as_str(), &message).await
            }
        }
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn notify(&self, channel: &NotificationChannel, notification: &Notification) -> bool {
        match self.deliver(channel, notification).await {
            Ok(()) => {
                info!(%channel, record_id = %notification.record_id, "notification delivered");
                true
            }
            Err(e) => {
                warn!(%channel, record_id = %notification.record_id, error = %e, "notification failed");
                false
            }
        }
    }
}

fn email_text(notification: &Notification) -> String {
    let mut text = format!(
        "Hello,\n\nthe website for {} has been generated.\nPreview it here: {}\n",
        notification.business_name, notification.preview_url
    );
    if let Some(login) = &notification.login {
        text.push_str(&format!(
            "\nSign in to review and publish it:\n  login: {}\n  password: {}\n",
            login.contact_address,
            login.credential.expose()
        ));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use sitegen_core::{Credential, LoginDetails};
    use sitegen_shared::RecordId;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn notification() -> Notification {
        Notification {
            record_id: RecordId::new(),
            business_name: "Harbor Bakery".into(),
            preview_url: "http://localhost:8080/preview/abc/".into(),
            login: Some(LoginDetails {
                principal_id: "p-1".into(),
                contact_address: "owner@harbor.test".into(),
                credential: Credential::from_secret("Zq81secret"),
            }),
        }
    }

    fn body_text(request: &wiremock::Request) -> String {
        String::from_utf8_lossy(&request.body).into_owned()
    }

    #[tokio::test]
    async fn webhook_delivery_excludes_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = HttpNotifier::new(&NotifyConfig::default()).unwrap();
        let channel = NotificationChannel::Webhook(format!("{}/hook", server.uri()));
        assert!(notifier.notify(&channel, &notification()).await);

        let requests = server.received_requests().await.unwrap();
        let body = body_text(&requests[0]);
        assert!(body.contains("site.generated"));
        assert!(!body.contains("Zq81secret"));
    }

    #[tokio::test]
    async fn failed_webhook_returns_false() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let notifier = HttpNotifier::new(&NotifyConfig::default()).unwrap();
        let channel = NotificationChannel::Webhook(format!("{}/hook", server.uri()));
        assert!(!notifier.notify(&channel, &notification()).await);
    }

    #[tokio::test]
    async fn unreachable_target_returns_false() {
        let notifier = HttpNotifier::new(&NotifyConfig::default()).unwrap();
        let channel = NotificationChannel::Webhook("http://127.0.0.1:9/hook".into());
        assert!(!notifier.notify(&channel, &notification()).await);
    }

    #[tokio::test]
    async fn email_goes_through_relay_with_login() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/send"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let config = NotifyConfig {
            email_relay_url: Some(format!("{}/send", server.uri())),
            ..NotifyConfig::default()
        };
        let notifier = HttpNotifier::new(&config).unwrap();
        let channel = NotificationChannel::Email("owner@harbor.test".into());
        assert!(notifier.notify(&channel, &notification()).await);

        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["to"], "owner@harbor.test");
        assert!(body["text"].as_str().unwrap().contains("Zq81secret"));
    }

    #[tokio::test]
    async fn email_without_relay_is_logged() {
        let notifier = HttpNotifier::new(&NotifyConfig::default()).unwrap();
        let channel = NotificationChannel::Email("owner@harbor.test".into());
        assert!(notifier.notify(&channel, &notification()).await);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = NotifyConfig {
            operator_webhooks: vec!["not a url".into()],
            email_relay_url: None,
        };
        assert!(matches!(
            HttpNotifier::new(&config),
            Err(SiteGenError::Config { .. })
        ));
    }
}
