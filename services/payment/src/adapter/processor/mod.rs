mod chapa;
mod gateway_client;
pub mod signature;
mod stripe;

use std::boxed::Box;
use std::marker::{Send, Sync};
use std::result::Result;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hyper::StatusCode;
use rust_decimal::Decimal;
use serde::Deserialize;

use school_common::confidentiality::{try_get_typed, AbstractConfidentiality};
use school_common::config::App3rdPartyCfg;
use school_common::error::AppErrorCode;
use school_common::logging::{app_log_event, AppLogContext, AppLogLevel};

pub use self::gateway_client::GatewayNetError;
use self::chapa::{AbstChapaContext, AppProcessorChapaCtx, MockProcessorChapaCtx};
use self::signature::SignatureError;
use self::stripe::{AbstStripeContext, AppProcessorStripeCtx, MockProcessorStripeCtx};
use crate::model::{
    CheckoutModel, GatewayOutcome, GatewaySubscriptionModel, GatewayVerifyResult, PaySource,
};

/// Thin verification interface to payment gateways. Every operation is a
/// read against the gateway, nothing here mutates remote state.
#[async_trait]
pub trait AbstractPaymentProcessor: Send + Sync {
    /// authoritative status of the checkout, queried from the gateway
    /// recorded in the checkout
    async fn verify_transaction(
        &self,
        checkout: &CheckoutModel,
    ) -> Result<GatewayVerifyResult, AppProcessorError>;

    /// recurring billing is offered only through Stripe
    async fn retrieve_subscription(
        &self,
        gateway_sub_id: &str,
    ) -> Result<GatewaySubscriptionModel, AppProcessorError>;

    /// amount of the most recent paid invoice, `None` if nothing has been
    /// paid yet
    async fn latest_invoice_amount(
        &self,
        gateway_sub_id: &str,
    ) -> Result<Option<Decimal>, AppProcessorError>;

    fn verify_webhook_signature(
        &self,
        source: PaySource,
        signature: &str,
        payload: &[u8],
        now: DateTime<Utc>,
    ) -> Result<(), AppProcessorError>;
}

#[derive(Debug)]
pub enum AppProcessorErrorReason {
    InvalidConfig,
    MissingCredential,
    CredentialCorrupted,
    NotSupport,
    LowLvlNet(GatewayNetError),
    InvalidRequest(String),
    GatewayResponse { status: u16, detail: String },
    CorruptedResponse(String),
    InvalidSignature(SignatureError),
}

#[derive(Debug)]
pub enum AppProcessorFnLabel {
    TryBuild,
    VerifyTransaction,
    RetrieveSubscription,
    LatestInvoice,
    VerifyWebhook,
}

#[derive(Debug)]
pub struct AppProcessorError {
    pub reason: AppProcessorErrorReason,
    pub fn_label: AppProcessorFnLabel,
}

impl AppProcessorError {
    /// gateway missing or its credential unusable, retrying does not help
    pub fn is_config_fault(&self) -> bool {
        matches!(
            self.reason,
            AppProcessorErrorReason::InvalidConfig
                | AppProcessorErrorReason::MissingCredential
                | AppProcessorErrorReason::CredentialCorrupted
        )
    }
}

impl From<GatewayNetError> for AppProcessorErrorReason {
    fn from(value: GatewayNetError) -> Self {
        match value {
            GatewayNetError::Decode { status, detail } => {
                Self::CorruptedResponse(format!("status:{status}, {detail}"))
            }
            others => Self::LowLvlNet(others),
        }
    }
}

#[derive(Deserialize)]
pub(crate) struct GatewaySecret {
    api_key: String,
    #[serde(default)]
    webhook_secret: String,
}

fn load_secret(
    cfdntl: &Arc<Box<dyn AbstractConfidentiality>>,
    path: &str,
) -> Result<GatewaySecret, AppProcessorErrorReason> {
    try_get_typed::<GatewaySecret>(&***cfdntl, path).map_err(|e| match e.code {
        AppErrorCode::DataCorruption => AppProcessorErrorReason::CredentialCorrupted,
        _others => AppProcessorErrorReason::MissingCredential,
    })
}

/// identifiers placed in request path of gateway API
pub(super) fn check_path_segment(v: &str) -> Result<(), AppProcessorErrorReason> {
    let valid = !v.is_empty()
        && v
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(AppProcessorErrorReason::InvalidRequest(format!(
            "path-segment:{v}"
        )))
    }
}

pub(super) fn gateway_failure(status: StatusCode, raw: Vec<u8>) -> AppProcessorErrorReason {
    AppProcessorErrorReason::GatewayResponse {
        status: status.as_u16(),
        detail: String::from_utf8_lossy(raw.as_slice()).to_string(),
    }
}

/// canned outcome of mock gateways in test mode, picked by the reference
pub(super) fn mock_outcome(reference: &str) -> GatewayOutcome {
    let lower = reference.to_lowercase();
    if lower.contains("fail") {
        GatewayOutcome::Failed
    } else if lower.contains("pend") {
        GatewayOutcome::Pending
    } else {
        GatewayOutcome::Success
    }
}

// a configured gateway whose credential cannot be loaded is kept, the failure
// is reported when the gateway is actually used
enum GatewaySlot<T: ?Sized> {
    Ready(Box<T>),
    Unusable(AppProcessorErrorReason),
    Absent,
}

impl<T: ?Sized> GatewaySlot<T> {
    fn get(&self) -> Result<&T, AppProcessorErrorReason> {
        match self {
            Self::Ready(c) => Ok(c.as_ref()),
            Self::Unusable(reason) => Err(match reason {
                AppProcessorErrorReason::MissingCredential => {
                    AppProcessorErrorReason::MissingCredential
                }
                AppProcessorErrorReason::CredentialCorrupted => {
                    AppProcessorErrorReason::CredentialCorrupted
                }
                _others => AppProcessorErrorReason::InvalidConfig,
            }),
            Self::Absent => Err(AppProcessorErrorReason::InvalidConfig),
        }
    }

    fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }
}

struct AppProcessorContext {
    _stripe: GatewaySlot<dyn AbstStripeContext>,
    _chapa: GatewaySlot<dyn AbstChapaContext>,
    _logctx: Arc<AppLogContext>,
    sig_tolerance_secs: u32,
}

fn into_slot<T: ?Sized>(
    result: Result<Box<T>, AppProcessorErrorReason>,
    label: &str,
    logctx: &Arc<AppLogContext>,
) -> GatewaySlot<T> {
    match result {
        Ok(c) => GatewaySlot::Ready(c),
        Err(reason) => {
            app_log_event!(logctx, AppLogLevel::ERROR, "3pty:{label}, {:?}", reason);
            GatewaySlot::Unusable(reason)
        }
    }
}

impl AppProcessorContext {
    fn new(
        cfgs3pt: &[Arc<App3rdPartyCfg>],
        cfdntl: Arc<Box<dyn AbstractConfidentiality>>,
        sig_tolerance_secs: u32,
        _logctx: Arc<AppLogContext>,
    ) -> Self {
        let mut _stripe: GatewaySlot<dyn AbstStripeContext> = GatewaySlot::Absent;
        let mut _chapa: GatewaySlot<dyn AbstChapaContext> = GatewaySlot::Absent;
        for c in cfgs3pt {
            let label = c.name().to_lowercase();
            match label.as_str() {
                "stripe" if _stripe.is_absent() => {
                    _stripe = Self::build_stripe(c.as_ref(), &cfdntl, &_logctx);
                }
                "chapa" if _chapa.is_absent() => {
                    _chapa = Self::build_chapa(c.as_ref(), &cfdntl, &_logctx);
                }
                _others => {
                    let logctx_p = &_logctx;
                    app_log_event!(logctx_p, AppLogLevel::WARNING, "3pty-ignored:{label}");
                }
            }
        }
        Self {
            _stripe,
            _chapa,
            _logctx,
            sig_tolerance_secs,
        }
    } // end of fn new

    fn build_stripe(
        cfg: &App3rdPartyCfg,
        cfdntl: &Arc<Box<dyn AbstractConfidentiality>>,
        logctx: &Arc<AppLogContext>,
    ) -> GatewaySlot<dyn AbstStripeContext> {
        let result = match cfg {
            App3rdPartyCfg::dev {
                host,
                port,
                confidentiality_path,
                ..
            } => load_secret(cfdntl, confidentiality_path.as_str()).and_then(|secret| {
                AppProcessorStripeCtx::try_build(host.as_str(), *port, secret, logctx.clone())
            }),
            App3rdPartyCfg::test { data_src, .. } => {
                load_secret(cfdntl, data_src.as_str()).map(MockProcessorStripeCtx::build)
            }
        };
        into_slot(result, "stripe", logctx)
    }

    fn build_chapa(
        cfg: &App3rdPartyCfg,
        cfdntl: &Arc<Box<dyn AbstractConfidentiality>>,
        logctx: &Arc<AppLogContext>,
    ) -> GatewaySlot<dyn AbstChapaContext> {
        let result = match cfg {
            App3rdPartyCfg::dev {
                host,
                port,
                confidentiality_path,
                ..
            } => load_secret(cfdntl, confidentiality_path.as_str()).and_then(|secret| {
                AppProcessorChapaCtx::try_build(host.as_str(), *port, secret, logctx.clone())
            }),
            App3rdPartyCfg::test { data_src, .. } => {
                load_secret(cfdntl, data_src.as_str()).map(MockProcessorChapaCtx::build)
            }
        };
        into_slot(result, "chapa", logctx)
    }

    fn _map_err(
        &self,
        fn_label: AppProcessorFnLabel,
        reason: AppProcessorErrorReason,
    ) -> AppProcessorError {
        let logctx_p = &self._logctx;
        let e = AppProcessorError { reason, fn_label };
        app_log_event!(logctx_p, AppLogLevel::ERROR, "{:?}", e);
        e
    }
} // end of impl AppProcessorContext

#[async_trait]
impl AbstractPaymentProcessor for AppProcessorContext {
    async fn verify_transaction(
        &self,
        checkout: &CheckoutModel,
    ) -> Result<GatewayVerifyResult, AppProcessorError> {
        let tx_ref = checkout.tx_ref.as_str();
        let result = match checkout.source {
            PaySource::Stripe => match self._stripe.get() {
                Ok(ctx) => ctx.verify_checkout(tx_ref, checkout.session_id()).await,
                Err(reason) => Err(reason),
            },
            PaySource::Chapa => match self._chapa.get() {
                Ok(ctx) => ctx.verify_transaction(tx_ref).await,
                Err(reason) => Err(reason),
            },
        };
        result.map_err(|reason| self._map_err(AppProcessorFnLabel::VerifyTransaction, reason))
    }

    async fn retrieve_subscription(
        &self,
        gateway_sub_id: &str,
    ) -> Result<GatewaySubscriptionModel, AppProcessorError> {
        let result = match self._stripe.get() {
            Ok(ctx) => ctx.retrieve_subscription(gateway_sub_id).await,
            Err(reason) => Err(reason),
        };
        result.map_err(|reason| self._map_err(AppProcessorFnLabel::RetrieveSubscription, reason))
    }

    async fn latest_invoice_amount(
        &self,
        gateway_sub_id: &str,
    ) -> Result<Option<Decimal>, AppProcessorError> {
        let result = match self._stripe.get() {
            Ok(ctx) => ctx.latest_paid_invoice(gateway_sub_id).await,
            Err(reason) => Err(reason),
        };
        result.map_err(|reason| self._map_err(AppProcessorFnLabel::LatestInvoice, reason))
    }

    fn verify_webhook_signature(
        &self,
        source: PaySource,
        signature: &str,
        payload: &[u8],
        now: DateTime<Utc>,
    ) -> Result<(), AppProcessorError> {
        let result = match source {
            PaySource::Stripe => self._stripe.get().and_then(|ctx| {
                signature::verify_stripe(
                    ctx.webhook_secret(),
                    signature,
                    payload,
                    now.timestamp(),
                    self.sig_tolerance_secs,
                )
                .map_err(AppProcessorErrorReason::InvalidSignature)
            }),
            PaySource::Chapa => self._chapa.get().and_then(|ctx| {
                signature::verify_chapa(ctx.webhook_secret(), signature, payload)
                    .map_err(AppProcessorErrorReason::InvalidSignature)
            }),
        };
        result.map_err(|reason| self._map_err(AppProcessorFnLabel::VerifyWebhook, reason))
    }
} // end of impl AppProcessorContext

/// Gateways are looked up by name (`stripe`, `chapa`) in the 3rd-party
/// configuration, `test` entries select the mock gateways.
pub(crate) fn app_processor_context(
    cfg_3pt: &[Arc<App3rdPartyCfg>],
    cfdntl: Arc<Box<dyn AbstractConfidentiality>>,
    sig_tolerance_secs: u32,
    logctx: Arc<AppLogContext>,
) -> Result<Box<dyn AbstractPaymentProcessor>, AppProcessorError> {
    let proc = AppProcessorContext::new(cfg_3pt, cfdntl, sig_tolerance_secs, logctx);
    if proc._stripe.is_absent() && proc._chapa.is_absent() {
        Err(AppProcessorError {
            reason: AppProcessorErrorReason::InvalidConfig,
            fn_label: AppProcessorFnLabel::TryBuild,
        })
    } else {
        Ok(Box::new(proc))
    }
}
