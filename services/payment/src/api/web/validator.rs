use std::result::Result;

use actix_web::web::{BytesMut, Payload};
use futures_util::StreamExt;

const ACCEPTED_CONTENT_TYPES: [&str; 2] = ["application/json", "text/plain"];

#[derive(Debug, PartialEq)]
pub enum ReqValidationError {
    BodyTooLarge { limit: usize },
    MissingContentType,
    UnsupportedContentType(String),
    PayloadRead(String),
}

/// media type only, parameters such as `charset` are ignored
pub fn check_content_type(raw: Option<&str>) -> Result<(), ReqValidationError> {
    let raw = raw
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(ReqValidationError::MissingContentType)?;
    let media = raw.split(';').next().unwrap_or("").trim().to_lowercase();
    if ACCEPTED_CONTENT_TYPES.contains(&media.as_str()) {
        Ok(())
    } else {
        Err(ReqValidationError::UnsupportedContentType(raw.to_string()))
    }
}

pub fn check_body_size(nbytes: usize, limit: usize) -> Result<(), ReqValidationError> {
    if nbytes > limit {
        Err(ReqValidationError::BodyTooLarge { limit })
    } else {
        Ok(())
    }
}

/// collects the request body, stops as soon as it grows beyond the limit
pub(super) async fn read_limited_body(
    mut payload: Payload,
    declared_len: Option<usize>,
    limit: usize,
) -> Result<Vec<u8>, ReqValidationError> {
    if let Some(n) = declared_len {
        check_body_size(n, limit)?;
    }
    let mut collected = BytesMut::new();
    while let Some(chunk) = payload.next().await {
        let chunk = chunk.map_err(|e| ReqValidationError::PayloadRead(e.to_string()))?;
        check_body_size(collected.len() + chunk.len(), limit)?;
        collected.extend_from_slice(&chunk);
    }
    Ok(collected.to_vec())
}
