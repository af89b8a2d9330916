/// Discord REST client: the three channel calls the boom store needs plus
/// gateway URL discovery.
///
/// The bot token is sent as `Authorization: Bot <token>`; never log it.
use std::time::Duration;

use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;

use crate::error::DiscordError;

pub const DEFAULT_BASE_URL: &str = "https://discord.com/api/v10";

/// Attempts made for a request that keeps getting 429.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Longest `retry_after` honoured; larger values are clamped.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Wait advertised by a 429 body, in fractional seconds. Missing means one
/// second; negative or NaN means none.
fn retry_wait(retry_after: Option<f64>) -> Duration {
    let secs = retry_after.unwrap_or(1.0);
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs)
        .unwrap_or(MAX_RETRY_AFTER)
        .min(MAX_RETRY_AFTER)
}

/// A message as returned by `GET /channels/{id}/messages`.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiMessage {
    pub id: String,
    #[serde(default)]
    pub reactions: Vec<ApiReaction>,
}

impl ApiMessage {
    /// Total reactions across every emoji.
    pub fn reaction_count(&self) -> usize {
        self.reactions.iter().map(|r| r.count).sum()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiReaction {
    pub count: usize,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
    /// Seconds, fractional.
    #[serde(default)]
    retry_after: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct GatewayBot {
    url: String,
}

#[derive(Debug, Clone)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl RestClient {
    pub fn new(token: String) -> Self {
        Self::new_with_base_url(token, DEFAULT_BASE_URL.to_string())
    }

    pub fn new_with_base_url(token: String, base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    pub(crate) fn token(&self) -> &str {
        &self.token
    }

    /// One page of history, newest first.
    pub async fn channel_messages(
        &self,
        channel_id: &str,
        before: Option<&str>,
        limit: u8,
    ) -> Result<Vec<ApiMessage>, DiscordError> {
        let url = format!("{}/channels/{channel_id}/messages", self.base_url);
        let limit = limit.to_string();
        let resp = self
            .send(|| {
                let mut query = vec![("limit", limit.as_str())];
                if let Some(before) = before {
                    query.push(("before", before));
                }
                self.http.get(&url).query(&query)
            })
            .await?;
        Ok(resp.json().await?)
    }

    pub async fn message(&self, channel_id: &str, message_id: &str) -> Result<ApiMessage, DiscordError> {
        let url = format!("{}/channels/{channel_id}/messages/{message_id}", self.base_url);
        let resp = self.send(|| self.http.get(&url)).await?;
        Ok(resp.json().await?)
    }

    pub async fn delete_message(&self, channel_id: &str, message_id: &str) -> Result<(), DiscordError> {
        let url = format!("{}/channels/{channel_id}/messages/{message_id}", self.base_url);
        self.send(|| self.http.delete(&url)).await?;
        Ok(())
    }

    /// Websocket URL to connect to.
    pub async fn gateway_url(&self) -> Result<String, DiscordError> {
        let url = format!("{}/gateway/bot", self.base_url);
        let resp = self.send(|| self.http.get(&url)).await?;
        let body: GatewayBot = resp.json().await?;
        Ok(body.url)
    }

    /// Send with auth, retrying 429s after the advertised delay.
    async fn send<F>(&self, build: F) -> Result<Response, DiscordError>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let resp = build()
                .header("Authorization", format!("Bot {}", self.token))
                .send()
                .await?;

            let status = resp.status();
            if status.is_success() {
                return Ok(resp);
            }

            // Error bodies are JSON but may be empty (e.g. some 404s).
            let body: ApiErrorBody = resp
                .json()
                .await
                .unwrap_or(ApiErrorBody {
                    message: String::new(),
                    retry_after: None,
                });

            if status == StatusCode::TOO_MANY_REQUESTS {
                let wait = retry_wait(body.retry_after);
                if attempt >= MAX_RATE_LIMIT_RETRIES {
                    return Err(DiscordError::RateLimited {
                        retry_after_ms: u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                    });
                }
                tracing::debug!(attempt, ?wait, "rate limited by discord");
                tokio::time::sleep(wait).await;
                continue;
            }

            let message = if body.message.is_empty() {
                status.canonical_reason().unwrap_or("unknown").to_string()
            } else {
                body.message
            };
            return Err(DiscordError::Status {
                status: status.as_u16(),
                message,
            });
        }
    }
}
