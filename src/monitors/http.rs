//! HTTP endpoint check
//!
//! ```text
//! request → status code in expected set? ─no─→ connection failed
//!                 │ yes
//!                 ▼
//!          body matches pattern? ─no─→ content failed
//!                 │ yes
//!                 ▼
//!          connection + content succeeded
//! ```

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tracing::{instrument, trace, warn};

use crate::check::{Check, CheckContext, Sample};
use crate::event::EventKind;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Head,
}

pub struct HttpCheck {
    url: String,
    method: HttpMethod,
    expected_status: Option<Vec<u16>>,
    body_pattern: Option<Regex>,
    client: reqwest::Client,
}

impl HttpCheck {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            url: url.into(),
            method: HttpMethod::Get,
            expected_status: None,
            body_pattern: None,
            client: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }

    pub fn method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    pub fn expect_status(mut self, codes: Vec<u16>) -> Self {
        self.expected_status = Some(codes);
        self
    }

    pub fn body_pattern(mut self, pattern: Regex) -> Self {
        self.body_pattern = Some(pattern);
        self
    }

    /// Returns (status_code, body)
    async fn execute_request(&self) -> Result<(u16, String)> {
        let method = match self.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Head => reqwest::Method::HEAD,
        };

        let response = self
            .client
            .request(method, &self.url)
            .send()
            .await
            .context("HTTP request failed")?;

        let status_code = response.status().as_u16();

        let body = if self.method == HttpMethod::Head {
            String::new()
        } else {
            response
                .text()
                .await
                .context("failed to read response body")?
        };

        Ok((status_code, body))
    }

    fn status_ok(&self, status_code: u16) -> bool {
        match &self.expected_status {
            Some(expected) => expected.contains(&status_code),
            None => (200..300).contains(&status_code),
        }
    }
}

#[async_trait]
impl Check for HttpCheck {
    fn name(&self) -> &str {
        &self.url
    }

    #[instrument(skip(self, ctx), fields(service = %ctx.service, url = %self.url))]
    async fn run(&self, ctx: &CheckContext) -> Vec<Sample> {
        let start = Instant::now();

        let (status_code, body) = match self.execute_request().await {
            Ok(response) => response,
            Err(e) => {
                warn!("check failed: {e:#}");
                return vec![Sample::failed(
                    EventKind::Connection,
                    format!("failed, cannot connect to {} -- {e:#}", self.url),
                )];
            }
        };
        let elapsed = start.elapsed();
        trace!("{} answered {status_code} in {elapsed:?}", self.url);

        if !self.status_ok(status_code) {
            return vec![Sample::failed(
                EventKind::Connection,
                format!("unexpected status code {status_code} from {}", self.url),
            )];
        }

        let mut samples = vec![Sample::succeeded(
            EventKind::Connection,
            format!("connection succeeded to {} ({elapsed:.3?})", self.url),
        )];

        if let Some(pattern) = &self.body_pattern {
            if pattern.is_match(&body) {
                samples.push(Sample::succeeded(
                    EventKind::Content,
                    format!("content matches '{pattern}'"),
                ));
            } else {
                samples.push(Sample::failed(
                    EventKind::Content,
                    format!("content doesn't match '{pattern}'"),
                ));
            }
        }

        samples
    }
}

// ============================================================================
// Tests
// ============================================================================
