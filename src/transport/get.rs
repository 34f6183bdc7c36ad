//! Ranged chunk download over the shared HTTP client.

use std::sync::OnceLock;

use bytes::Bytes;
use regex::Regex;
use reqwest::{Client, Response};
use tokio::time::timeout;

use crate::common::errors::{Seconds, StoreError};
use crate::config::TimeoutConfig;
use crate::storage::range::{RangeBound, format_http_range};

/// Opens a chunk GET, optionally ranged. Accepts 200 and 206; any other
/// status is a target failure with the status recorded.
pub async fn get_chunk(
    client: &Client,
    url: &str,
    range: Option<(RangeBound, RangeBound)>,
    extra_headers: &[(String, String)],
    timeouts: &TimeoutConfig,
) -> Result<Response, StoreError> {
    let mut request = client.get(url);
    if let Some(range) = range {
        request = request.header(reqwest::header::RANGE, format_http_range(&[range]));
    }
    for (name, value) in extra_headers {
        request = request.header(name, value);
    }

    match timeout(timeouts.connection_timeout(), request.send()).await {
        Err(_) => Err(StoreError::ConnectTimeout(Seconds(timeouts.connection))),
        Ok(Err(e)) => Err(StoreError::TargetUnreachable {
            reason: e.to_string(),
        }),
        Ok(Ok(response)) => {
            let status = response.status().as_u16();
            if status == 200 || status == 206 {
                Ok(response)
            } else {
                Err(StoreError::TargetHttpError { status })
            }
        }
    }
}

/// One body read step, bounded by the chunk timeout. `Ok(None)` is a
/// clean end of body.
pub async fn read_body_chunk(
    response: &mut Response,
    timeouts: &TimeoutConfig,
) -> Result<Option<Bytes>, StoreError> {
    match timeout(timeouts.chunk_timeout(), response.chunk()).await {
        Err(_) => Err(StoreError::ChunkReadTimeout(Seconds(timeouts.chunk))),
        Ok(Err(e)) => Err(StoreError::TargetUnreachable {
            reason: e.to_string(),
        }),
        Ok(Ok(chunk)) => Ok(chunk),
    }
}

/// Parses `Content-Range: bytes a-b/total`.
pub fn parse_content_range(raw: &str) -> Result<(u64, u64, u64), StoreError> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| Regex::new(r"^bytes (\d+)-(\d+)/(\d+)$").unwrap());

    let captures = pattern
        .captures(raw)
        .ok_or_else(|| StoreError::InvalidRange(format!("invalid content-range {:?}", raw)))?;
    let parse = |i: usize| {
        captures[i]
            .parse::<u64>()
            .map_err(|_| StoreError::InvalidRange(format!("invalid content-range {:?}", raw)))
    };
    Ok((parse(1)?, parse(2)?, parse(3)?))
}
