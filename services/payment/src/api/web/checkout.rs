use std::sync::Arc;

use actix_web::http::StatusCode;
use actix_web::web::{Data as AppData, Path as ExtPath};
use actix_web::{HttpResponse, Result as ActixResult};

use school_common::logging::{app_log_event, AppLogLevel};

use super::dto::VerifyPaymentRespDto;
use super::{json_response, verify_err_status};
use crate::adapter::repository::app_repo_ledger;
use crate::usecase::VerifyPaymentUseCase;
use crate::AppSharedState;

pub(super) async fn verify_checkout(
    path_segms: ExtPath<String>,
    shr_state: AppData<AppSharedState>,
) -> ActixResult<HttpResponse> {
    let tx_ref = path_segms.into_inner();
    let logctx = shr_state.log_context();
    let logctx_p = &logctx;
    app_log_event!(logctx_p, AppLogLevel::DEBUG, "verify-checkout, tx_ref:{tx_ref}");

    let repo = match app_repo_ledger(shr_state.datastore()).await {
        Ok(v) => v,
        Err(e) => {
            app_log_event!(logctx_p, AppLogLevel::ERROR, "repo-init-error {:?}", e);
            let body = VerifyPaymentRespDto::error("ledger-unavailable");
            return Ok(json_response(StatusCode::SERVICE_UNAVAILABLE, &body));
        }
    };
    let uc = VerifyPaymentUseCase {
        repo: Arc::new(repo),
        processors: shr_state.processor_context(),
        logctx: logctx.clone(),
        max_generated_months: shr_state.config().api_server.allocation.max_generated_months,
    };
    let resp = match uc.execute(tx_ref.as_str()).await {
        Ok(outcome) => {
            let body = VerifyPaymentRespDto::from(&outcome);
            json_response(StatusCode::OK, &body)
        }
        Err(e) => {
            let status = verify_err_status(&e);
            app_log_event!(
                logctx_p,
                AppLogLevel::WARNING,
                "tx_ref:{tx_ref}, status:{}, {:?}",
                status.as_u16(),
                e
            );
            let detail = if status == StatusCode::NOT_FOUND {
                "checkout-not-found"
            } else if status.is_server_error() {
                "verification-unavailable"
            } else {
                "verification-rejected"
            };
            json_response(status, &VerifyPaymentRespDto::error(detail))
        }
    };
    Ok(resp)
} // end of fn verify_checkout
