use std::sync::Arc;

use actix_web::http::header::{HeaderValue, CONTENT_LENGTH, CONTENT_TYPE, RETRY_AFTER};
use actix_web::http::StatusCode;
use actix_web::web::{Data as AppData, Payload};
use actix_web::{HttpRequest, HttpResponse, Result as ActixResult};
use chrono::Utc;

use school_common::logging::{app_log_event, AppLogLevel};

use super::dto::{ErrorRespDto, WebhookAckDto};
use super::validator::{check_content_type, read_limited_body, ReqValidationError};
use super::{json_response, webhook_err_status};
use crate::adapter::repository::app_repo_ledger;
use crate::model::PaySource;
use crate::usecase::WebhookEventUseCase;
use crate::AppSharedState;

const STRIPE_SIGNATURE_HEADERS: [&str; 1] = ["stripe-signature"];
const CHAPA_SIGNATURE_HEADERS: [&str; 2] = ["x-chapa-signature", "chapa-signature"];

pub(super) async fn stripe_webhook(
    req: HttpRequest,
    payload: Payload,
    shr_state: AppData<AppSharedState>,
) -> ActixResult<HttpResponse> {
    let resp = receive_event(
        PaySource::Stripe,
        &STRIPE_SIGNATURE_HEADERS,
        req,
        payload,
        shr_state,
    )
    .await;
    Ok(resp)
}

pub(super) async fn chapa_webhook(
    req: HttpRequest,
    payload: Payload,
    shr_state: AppData<AppSharedState>,
) -> ActixResult<HttpResponse> {
    let resp = receive_event(
        PaySource::Chapa,
        &CHAPA_SIGNATURE_HEADERS,
        req,
        payload,
        shr_state,
    )
    .await;
    Ok(resp)
}

fn header_str<'a>(req: &'a HttpRequest, name: &str) -> Option<&'a str> {
    req.headers().get(name).and_then(|v| v.to_str().ok())
}

fn validation_failure(e: ReqValidationError) -> HttpResponse {
    let (status, detail) = match e {
        ReqValidationError::BodyTooLarge { limit } => (
            StatusCode::PAYLOAD_TOO_LARGE,
            format!("body-exceeds-{limit}-bytes"),
        ),
        ReqValidationError::MissingContentType => (
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "missing-content-type".to_string(),
        ),
        ReqValidationError::UnsupportedContentType(v) => (
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            format!("unsupported-content-type:{v}"),
        ),
        ReqValidationError::PayloadRead(_) => {
            (StatusCode::BAD_REQUEST, "payload-read-error".to_string())
        }
    };
    json_response(status, &ErrorRespDto { error: detail })
}

async fn receive_event(
    source: PaySource,
    sig_headers: &[&str],
    req: HttpRequest,
    payload: Payload,
    shr_state: AppData<AppSharedState>,
) -> HttpResponse {
    let logctx = shr_state.log_context();
    let logctx_p = &logctx;
    let cfg = shr_state.config();
    let limit = cfg.api_server.limit_req_body_in_bytes;

    // throttled clients are answered before any body is buffered
    let client_key = {
        let conn = req.connection_info();
        let ip = conn.realip_remote_addr().unwrap_or("unknown");
        format!("{}:{ip}", source.as_str())
    };
    match shr_state.rate_limit().hit(client_key.as_str(), Utc::now()).await {
        Ok(verdict) if !verdict.allowed => {
            app_log_event!(
                logctx_p,
                AppLogLevel::WARNING,
                "rate-limited, key:{client_key}, retry-after:{}",
                verdict.retry_after_secs
            );
            let body = ErrorRespDto {
                error: "too-many-requests".to_string(),
            };
            let mut resp = json_response(StatusCode::TOO_MANY_REQUESTS, &body);
            let value = HeaderValue::from(verdict.retry_after_secs);
            let _old = resp.headers_mut().insert(RETRY_AFTER, value);
            return resp;
        }
        Ok(_allowed) => {}
        Err(e) => {
            // counter backend unavailable, events are still accepted
            app_log_event!(logctx_p, AppLogLevel::ERROR, "rate-limit-store, {:?}", e);
        }
    }

    if let Err(e) = check_content_type(header_str(&req, CONTENT_TYPE.as_str())) {
        app_log_event!(logctx_p, AppLogLevel::INFO, "{}, {:?}", source.as_str(), e);
        return validation_failure(e);
    }
    let declared_len =
        header_str(&req, CONTENT_LENGTH.as_str()).and_then(|v| v.trim().parse::<usize>().ok());
    let body = match read_limited_body(payload, declared_len, limit).await {
        Ok(v) => v,
        Err(e) => {
            app_log_event!(logctx_p, AppLogLevel::INFO, "{}, {:?}", source.as_str(), e);
            return validation_failure(e);
        }
    };

    let signature = sig_headers.iter().find_map(|name| header_str(&req, name));
    let repo = match app_repo_ledger(shr_state.datastore()).await {
        Ok(v) => v,
        Err(e) => {
            app_log_event!(logctx_p, AppLogLevel::ERROR, "repo-init-error {:?}", e);
            let body = ErrorRespDto {
                error: "ledger-unavailable".to_string(),
            };
            return json_response(StatusCode::SERVICE_UNAVAILABLE, &body);
        }
    };
    let uc = WebhookEventUseCase {
        repo: Arc::new(repo),
        processors: shr_state.processor_context(),
        logctx: logctx.clone(),
        max_generated_months: cfg.api_server.allocation.max_generated_months,
    };
    match uc.execute(source, signature, body.as_slice()).await {
        Ok(dispatched) => json_response(StatusCode::OK, &WebhookAckDto::from(&dispatched)),
        Err(e) => {
            let status = webhook_err_status(&e);
            app_log_event!(
                logctx_p,
                AppLogLevel::WARNING,
                "{}-webhook, status:{}, {:?}",
                source.as_str(),
                status.as_u16(),
                e
            );
            let body = ErrorRespDto {
                error: status.canonical_reason().unwrap_or("error").to_string(),
            };
            json_response(status, &body)
        }
    }
} // end of fn receive_event
