use super::{build_sample, ProbeRequest, Prober};
use crate::types::{MetricSample, Outcome};
use async_trait::async_trait;
use isahc::config::{Configurable, RedirectPolicy};
use isahc::error::ErrorKind;
use isahc::{AsyncReadResponseExt, HttpClient, Request};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Production [`Prober`] backed by `isahc`, following up to five redirects
/// (§4.2) and measuring TTFB as time-to-headers, total time as time-to-
/// full-body.
pub struct IsahcProber {
    client: HttpClient,
}

impl IsahcProber {
    pub fn new() -> Result<Self, isahc::Error> {
        let client = HttpClient::builder()
            .redirect_policy(RedirectPolicy::Limit(5))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Prober for IsahcProber {
    async fn probe(
        &self,
        req: &ProbeRequest,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> (MetricSample, Option<Vec<u8>>) {
        let start = Instant::now();

        let request = match Request::get(&req.url).timeout(timeout).body(()) {
            Ok(r) => r,
            Err(_) => {
                return (build_sample(req, Outcome::Other, None, start.elapsed().as_millis() as u32, 0), None);
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                (build_sample(req, Outcome::Other, None, start.elapsed().as_millis() as u32, 0), None)
            }
            result = self.client.send_async(request) => match result {
                Ok(mut response) => {
                    let ttfb_ms = start.elapsed().as_millis() as u32;
                    let status = response.status().as_u16();

                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            (build_sample(req, Outcome::Other, Some(ttfb_ms), start.elapsed().as_millis() as u32, 0), None)
                        }
                        body = response.bytes() => match body {
                            Ok(bytes) => {
                                let total_ms = start.elapsed().as_millis() as u32;
                                let sample = build_sample(req, classify_status(status), Some(ttfb_ms), total_ms, bytes.len() as u64);
                                let body = sample.outcome.is_ok().then(|| bytes.to_vec());
                                (sample, body)
                            }
                            Err(_) => (build_sample(
                                req,
                                Outcome::Other,
                                Some(ttfb_ms),
                                start.elapsed().as_millis() as u32,
                                0,
                            ), None),
                        },
                    }
                }
                Err(e) => (classify_transport_error(req, &e, start), None),
            },
        }
    }
    async fn fetch_body(
        &self,
        url: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Option<Vec<u8>> {
        let request = Request::get(url).timeout(timeout).body(()).ok()?;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.client.send_async(request) => {
                let mut response = result.ok()?;
                if !response.status().is_success() {
                    return None;
                }
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    body = response.bytes() => body.ok().map(|b| b.to_vec()),
                }
            }
        }
    }
}

fn classify_status(status: u16) -> Outcome {
    match status {
        200..=299 => Outcome::Ok,
        code => Outcome::HttpError(code),
    }
}

fn classify_transport_error(req: &ProbeRequest, e: &isahc::Error, start: Instant) -> MetricSample {
    let elapsed = start.elapsed().as_millis() as u32;
    let outcome = match e.kind() {
        ErrorKind::Timeout => Outcome::Timeout,
        ErrorKind::ConnectionFailed => Outcome::Connect,
        ErrorKind::NameResolution => Outcome::Dns,
        ErrorKind::TooManyRedirects => Outcome::HttpError(0),
        _ => Outcome::Other,
    };
    build_sample(req, outcome, None, elapsed, 0)
}
