mod checkout;
pub mod dto;
pub mod validator;
mod webhook;

use std::collections::HashMap;

use actix_http::Method;
use actix_web::http::header::{ContentType, CONTENT_TYPE};
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, HttpResponseBuilder, Route};
use serde::Serialize;

use crate::adapter::processor::{AppProcessorError, AppProcessorErrorReason};
use crate::usecase::{
    AllocateDepositUcError, FinalizePaymentUcError, FinalizeSubscriptionUcError,
    VerifyPaymentUcError, WebhookUcError,
};

use checkout::verify_checkout;
use webhook::{chapa_webhook, stripe_webhook};

pub struct AppRouteTable {
    pub version: String,
    pub entries: HashMap<String, Route>,
}

impl AppRouteTable {
    pub fn get(ver_req: &str) -> Self {
        let (version, entries) = match ver_req {
            "0.1.0" => (format!("v{ver_req}"), Self::v0_1_0_entries()),
            _others => (String::new(), HashMap::new()),
        };
        Self { version, entries }
    }
    fn v0_1_0_entries() -> HashMap<String, Route> {
        let data = [
            (
                "stripe_webhook".to_string(),
                Route::new().method(Method::POST).to(stripe_webhook),
            ),
            (
                "chapa_webhook".to_string(),
                Route::new().method(Method::POST).to(chapa_webhook),
            ),
            (
                "verify_checkout".to_string(),
                Route::new().method(Method::PATCH).to(verify_checkout),
            ),
        ];
        HashMap::from(data)
    }
} // end of impl AppRouteTable

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> HttpResponse {
    match serde_json::to_vec(body) {
        Ok(serial) => {
            let mut r = HttpResponseBuilder::new(status);
            r.append_header((CONTENT_TYPE, ContentType::json()));
            r.body(serial)
        }
        Err(_e) => HttpResponse::InternalServerError().finish(),
    }
}

// any 5xx makes the gateway redeliver the event later
fn processor_err_status(e: &AppProcessorError) -> StatusCode {
    if e.is_config_fault() {
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    match &e.reason {
        AppProcessorErrorReason::InvalidSignature(_) => StatusCode::BAD_REQUEST,
        AppProcessorErrorReason::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        AppProcessorErrorReason::NotSupport => StatusCode::NOT_IMPLEMENTED,
        AppProcessorErrorReason::LowLvlNet(_)
        | AppProcessorErrorReason::GatewayResponse { .. }
        | AppProcessorErrorReason::CorruptedResponse(_) => StatusCode::SERVICE_UNAVAILABLE,
        _others => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn finalize_err_status(e: &FinalizePaymentUcError) -> StatusCode {
    match e {
        FinalizePaymentUcError::CheckoutNotExist(_)
        | FinalizePaymentUcError::PaymentNotExist(_)
        | FinalizePaymentUcError::StudentNotExist(_) => StatusCode::NOT_FOUND,
        FinalizePaymentUcError::Allocation(ae) => match ae {
            AllocateDepositUcError::StudentNotExist(_) => StatusCode::NOT_FOUND,
            AllocateDepositUcError::DataStore(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _others => StatusCode::UNPROCESSABLE_ENTITY,
        },
        FinalizePaymentUcError::AmountOverflow(_) => StatusCode::UNPROCESSABLE_ENTITY,
        FinalizePaymentUcError::DataStore(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn verify_err_status(e: &VerifyPaymentUcError) -> StatusCode {
    match e {
        VerifyPaymentUcError::CheckoutNotExist(_) => StatusCode::NOT_FOUND,
        VerifyPaymentUcError::ExternalProcessor(pe) => processor_err_status(pe),
        VerifyPaymentUcError::Finalize(fe) => finalize_err_status(fe),
        VerifyPaymentUcError::DataStore(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn subscription_err_status(e: &FinalizeSubscriptionUcError) -> StatusCode {
    match e {
        FinalizeSubscriptionUcError::StudentNotExist(_)
        | FinalizeSubscriptionUcError::PackageNotExist(_) => StatusCode::NOT_FOUND,
        FinalizeSubscriptionUcError::OwnerMismatch(_) => StatusCode::CONFLICT,
        FinalizeSubscriptionUcError::MissingMetadata { .. }
        | FinalizeSubscriptionUcError::ZeroMonthsGenerated { .. }
        | FinalizeSubscriptionUcError::AmountOverflow(_) => StatusCode::UNPROCESSABLE_ENTITY,
        FinalizeSubscriptionUcError::ExternalProcessor(pe) => processor_err_status(pe),
        FinalizeSubscriptionUcError::MonthsNotLinked { .. }
        | FinalizeSubscriptionUcError::DataStore(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn webhook_err_status(e: &WebhookUcError) -> StatusCode {
    match e {
        WebhookUcError::MissingSignature | WebhookUcError::MalformedPayload(_) => {
            StatusCode::BAD_REQUEST
        }
        WebhookUcError::Signature(pe) => processor_err_status(pe),
        WebhookUcError::Verify(ve) => verify_err_status(ve),
        WebhookUcError::Finalize(fe) => finalize_err_status(fe),
        WebhookUcError::Subscription(se) => subscription_err_status(se),
    }
}
