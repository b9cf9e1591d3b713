use std::boxed::Box;
use std::result::Result;
use std::sync::Arc;

use school_common::logging::{app_log_event, AppLogContext, AppLogLevel};

use crate::adapter::processor::{AbstractPaymentProcessor, AppProcessorError};
use crate::adapter::repository::{AbstractLedgerRepo, AppRepoError};
use crate::model::{GatewayOutcome, GatewayVerifyResult, PayIntent};

use super::finalize_payment::{FinalizePaymentUcError, FinalizePaymentUseCase, FinalizedCheckout};

#[derive(Debug)]
pub enum VerifyPaymentUcError {
    CheckoutNotExist(String),
    ExternalProcessor(AppProcessorError),
    Finalize(FinalizePaymentUcError),
    DataStore(AppRepoError),
}

impl From<AppRepoError> for VerifyPaymentUcError {
    fn from(value: AppRepoError) -> Self {
        Self::DataStore(value)
    }
}
impl From<AppProcessorError> for VerifyPaymentUcError {
    fn from(value: AppProcessorError) -> Self {
        Self::ExternalProcessor(value)
    }
}
impl From<FinalizePaymentUcError> for VerifyPaymentUcError {
    fn from(value: FinalizePaymentUcError) -> Self {
        match value {
            FinalizePaymentUcError::CheckoutNotExist(tx_ref) => Self::CheckoutNotExist(tx_ref),
            FinalizePaymentUcError::DataStore(e) => Self::DataStore(e),
            others => Self::Finalize(others),
        }
    }
}

#[derive(Debug)]
pub enum VerifyPaymentOutcome {
    /// completed by earlier call, the gateway is not queried again
    AlreadyFinalized(FinalizedCheckout),
    Finalized(FinalizedCheckout),
    Failed(FinalizedCheckout),
    Pending(GatewayVerifyResult),
}

/// Polls the gateway for the authoritative status of a checkout, then
/// finalizes it once the status is definitive. Safe to call repeatedly
/// for the same `tx_ref`, which is how missed webhook deliveries are
/// recovered.
pub struct VerifyPaymentUseCase {
    pub repo: Arc<Box<dyn AbstractLedgerRepo>>,
    pub processors: Arc<Box<dyn AbstractPaymentProcessor>>,
    pub logctx: Arc<AppLogContext>,
    pub max_generated_months: u16,
}

impl VerifyPaymentUseCase {
    pub async fn execute(&self, tx_ref: &str) -> Result<VerifyPaymentOutcome, VerifyPaymentUcError> {
        let logctx_p = &self.logctx;
        let checkout = self
            .repo
            .fetch_checkout(tx_ref)
            .await?
            .ok_or(VerifyPaymentUcError::CheckoutNotExist(tx_ref.to_string()))?;
        let finalizer = FinalizePaymentUseCase {
            repo: self.repo.clone(),
            logctx: self.logctx.clone(),
            max_generated_months: self.max_generated_months,
        };
        if checkout.already_finalized() {
            app_log_event!(logctx_p, AppLogLevel::DEBUG, "tx_ref:{tx_ref}, already finalized");
            let done = if matches!(checkout.intent, PayIntent::Deposit) {
                // local check only, re-applies allocation if no month was linked
                let result = GatewayVerifyResult::new(GatewayOutcome::Success);
                finalizer.execute(tx_ref, result).await?
            } else {
                let payment = match checkout.payment_id {
                    Some(pid) => self.repo.fetch_payment(pid).await?,
                    None => None,
                };
                FinalizedCheckout {
                    checkout,
                    payment,
                    already_processed: true,
                    allocation: None,
                    months_written: Vec::new(),
                }
            };
            return Ok(VerifyPaymentOutcome::AlreadyFinalized(done));
        }

        let result = self.processors.verify_transaction(&checkout).await?;
        app_log_event!(
            logctx_p,
            AppLogLevel::INFO,
            "tx_ref:{tx_ref}, source:{}, outcome:{:?}, provider-status:{:?}",
            checkout.source.as_str(),
            result.outcome,
            result.provider_status
        );
        match result.outcome {
            GatewayOutcome::Success => {
                let done = finalizer.execute(tx_ref, result).await?;
                Ok(VerifyPaymentOutcome::Finalized(done))
            }
            GatewayOutcome::Failed => {
                let done = finalizer.execute(tx_ref, result).await?;
                Ok(VerifyPaymentOutcome::Failed(done))
            }
            GatewayOutcome::Pending => Ok(VerifyPaymentOutcome::Pending(result)),
        }
    } // end of fn execute
} // end of impl VerifyPaymentUseCase
