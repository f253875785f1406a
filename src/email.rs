use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{instrument, warn};

use crate::error::AppError;

const MAIL_API_URL_ENV: &str = "FITTRACK_MAIL_API_URL";
const MAIL_API_KEY_ENV: &str = "FITTRACK_MAIL_API_KEY";
const MAIL_SENDER_ENV: &str = "FITTRACK_MAIL_SENDER";

/// Outbound one-time-code delivery. Fire-and-forget: the caller learns
/// success or failure and nothing else.
#[async_trait]
pub trait CodeSender: Send + Sync {
    async fn send_code(&self, to: &str, code: &str) -> bool;
}

/// HTTP mail-API implementation.
pub struct Mailer {
    client: Client,
    api_url: String,
    api_key: String,
    sender: String,
}

impl Mailer {
    pub fn new(api_url: String, api_key: String, sender: String) -> Self {
        Self {
            client: Client::new(),
            api_url,
            api_key,
            sender,
        }
    }

    pub fn from_env() -> Result<Self, AppError> {
        let api_url = require_env(MAIL_API_URL_ENV)?;
        let api_key = require_env(MAIL_API_KEY_ENV)?;
        let sender = require_env(MAIL_SENDER_ENV)?;
        Ok(Self::new(api_url, api_key, sender))
    }
}

fn require_env(name: &str) -> Result<String, AppError> {
    std::env::var(name)
        .map_err(|_| AppError::Internal(format!("{} environment variable not set", name)))
}

#[async_trait]
impl CodeSender for Mailer {
    #[instrument(skip_all)]
    async fn send_code(&self, to: &str, code: &str) -> bool {
        let body = json!({
            "from": self.sender,
            "to": to,
            "subject": "Your fittrack verification code",
            "text": format!("Your one-time verification code is {}.", code),
        });

        let result = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!(status = %response.status(), "Mail API rejected the send");
                false
            }
            Err(e) => {
                warn!(error = %e, "Mail API request failed");
                false
            }
        }
    }
}
