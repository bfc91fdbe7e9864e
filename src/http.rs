use std::thread;
use std::time::Duration;

use thiserror::Error;

const USER_AGENT: &str = concat!("podvoice/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub(crate) struct RetryPolicy {
    pub(crate) connect_timeout: Duration,
    pub(crate) read_timeout: Duration,
    pub(crate) attempts: usize,
    pub(crate) retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(20),
            attempts: 3,
            retry_delay: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Error)]
pub(crate) enum HttpError {
    #[error("HTTP status {status}{detail} after {attempts} attempt(s)")]
    Status {
        status: u16,
        detail: String,
        attempts: usize,
    },
    #[error("transport error after {attempts} attempt(s): {message}")]
    Transport { message: String, attempts: usize },
    #[error("response decode failed: {0}")]
    Decode(String),
}

fn should_retry_http_status(status: u16) -> bool {
    status == 408 || status == 429 || (500..=599).contains(&status)
}

fn status_detail(body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        String::new()
    } else {
        let truncated = body.chars().take(240).collect::<String>();
        format!(" ({truncated})")
    }
}

/// GETs `url` as text, retrying throttling, server errors and transport failures.
pub(crate) fn get_text_with_retries(url: &str, policy: &RetryPolicy) -> Result<String, HttpError> {
    let attempts = policy.attempts.max(1);
    let agent = ureq::AgentBuilder::new()
        .timeout_connect(policy.connect_timeout)
        .timeout_read(policy.read_timeout)
        .timeout_write(policy.read_timeout)
        .user_agent(USER_AGENT)
        .build();

    let mut attempt = 1;
    loop {
        match agent.get(url).call() {
            Ok(response) => {
                return response
                    .into_string()
                    .map_err(|err| HttpError::Decode(err.to_string()));
            }
            Err(ureq::Error::Status(status, response)) => {
                if should_retry_http_status(status) && attempt < attempts {
                    thread::sleep(policy.retry_delay);
                    attempt += 1;
                    continue;
                }
                let body = response.into_string().ok().unwrap_or_default();
                return Err(HttpError::Status {
                    status,
                    detail: status_detail(&body),
                    attempts: attempt,
                });
            }
            Err(ureq::Error::Transport(err)) => {
                if attempt < attempts {
                    thread::sleep(policy.retry_delay);
                    attempt += 1;
                    continue;
                }
                return Err(HttpError::Transport {
                    message: err.to_string(),
                    attempts: attempt,
                });
            }
        }
    }
}
