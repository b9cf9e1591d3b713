
use std::boxed::Box;
use std::collections::HashMap;
use std::env;
use std::result::Result;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;

use school_common::confidentiality::{self, AbstractConfidentiality};
use school_common::config::{AppCfgInitArgs, AppConfig};
use school_common::constant::env_vars::{
    CFG_FILEPATH, EXPECTED_LABELS, SERVICE_BASEPATH, SYS_BASEPATH,
};
use school_common::logging::AppLogContext;

use tuition_payment::adapter::datastore::AppDataStoreContext;
use tuition_payment::adapter::processor::signature::{verify_chapa, verify_stripe};
use tuition_payment::adapter::processor::{
    AbstractPaymentProcessor, AppProcessorError, AppProcessorErrorReason, AppProcessorFnLabel,
};
use tuition_payment::adapter::repository::{AbstractLedgerRepo, LedgerInMemRepo};
use tuition_payment::hard_limit;
use tuition_payment::model::{
    BillingMonth, CheckoutModel, CheckoutStatus, GatewaySubscriptionModel, GatewayVerifyResult,
    MonthLedgerModel, PackageModel, PayIntent, PaySource, PayStatus, PaymentModel, StudentModel,
};

pub(crate) const EXAMPLE_REL_PATH: &str = "tests/unit/examples/";
pub(crate) const UT_STRIPE_WEBHOOK_SECRET: &str = "whsec_unit_test_0001";
pub(crate) const UT_CHAPA_WEBHOOK_SECRET: &str = "chapa-unit-secret";
pub(crate) const UT_SIGNATURE_TOLERANCE: u32 = 300;

fn ut_setup_config(cfg_filename: &str) -> AppConfig {
    let iter = env::vars().filter(|(k, _v)| EXPECTED_LABELS.contains(&k.as_str()));
    let mut env_var_map: HashMap<String, String> = HashMap::from_iter(iter);
    let manifest_dir = env!("CARGO_MANIFEST_DIR").to_string();
    for label in [SYS_BASEPATH, SERVICE_BASEPATH] {
        let _ = env_var_map
            .entry(label.to_string())
            .or_insert(manifest_dir.clone());
    }
    let _old = env_var_map.insert(
        CFG_FILEPATH.to_string(),
        EXAMPLE_REL_PATH.to_string() + cfg_filename,
    );
    let args = AppCfgInitArgs {
        env_var_map,
        limit: hard_limit::cfg_limit(),
    };
    AppConfig::new(args).unwrap()
}

fn ut_setup_confidential(cfg: &AppConfig) -> Box<dyn AbstractConfidentiality> {
    confidentiality::build_context(cfg).unwrap()
}

/// fresh in-memory ledger for each test case
pub(crate) struct UtLedger {
    pub cfg: AppConfig,
    pub logctx: Arc<AppLogContext>,
    pub dstore: Arc<AppDataStoreContext>,
    pub importer: LedgerInMemRepo,
    pub repo: Arc<Box<dyn AbstractLedgerRepo>>,
}

pub(crate) fn ut_setup_ledger(cfg_filename: &str) -> UtLedger {
    let cfg = ut_setup_config(cfg_filename);
    let logctx = Arc::new(AppLogContext::new(&cfg.basepath, &cfg.api_server.logging));
    let cfdntl = Arc::new(ut_setup_confidential(&cfg));
    let dstore = AppDataStoreContext::new(&cfg.api_server.data_store, cfdntl, logctx.clone());
    let dstore = Arc::new(dstore.unwrap());
    let importer = LedgerInMemRepo::new(dstore.clone()).unwrap();
    let repo: Box<dyn AbstractLedgerRepo> = Box::new(LedgerInMemRepo::new(dstore.clone()).unwrap());
    UtLedger {
        cfg,
        logctx,
        dstore,
        importer,
        repo: Arc::new(repo),
    }
}

pub(crate) fn ut_month(label: &str) -> BillingMonth {
    label.parse::<BillingMonth>().unwrap()
}

pub(crate) fn ut_time(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw).unwrap().to_utc()
}

pub(crate) fn ut_student(id: &str, class_fee: i64, start: Option<(i32, u32, u32)>) -> StudentModel {
    StudentModel {
        id: id.to_string(),
        class_fee: Decimal::from(class_fee),
        start_date: start.and_then(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d)),
    }
}

pub(crate) fn ut_package(id: &str, duration_months: u16, price: Decimal) -> PackageModel {
    PackageModel {
        id: id.to_string(),
        duration_months,
        price,
        currency: "USD".to_string(),
    }
}

pub(crate) fn ut_checkout(
    tx_ref: &str,
    student_id: &str,
    intent: PayIntent,
    months: &[&str],
    amount: Decimal,
    source: PaySource,
) -> CheckoutModel {
    CheckoutModel {
        tx_ref: tx_ref.to_string(),
        student_id: student_id.to_string(),
        intent,
        months: months.iter().map(|m| ut_month(m)).collect(),
        amount,
        currency: "USD".to_string(),
        source,
        status: CheckoutStatus::Pending,
        payment_id: None,
        metadata: serde_json::json!({}),
        create_time: Utc::now(),
    }
}

pub(crate) fn ut_payment(
    student_id: &str,
    amount: Decimal,
    intent: PayIntent,
    transaction_id: &str,
) -> PaymentModel {
    PaymentModel {
        id: 0,
        student_id: student_id.to_string(),
        amount,
        currency: "USD".to_string(),
        status: PayStatus::Approved,
        source: PaySource::Stripe,
        intent,
        transaction_id: transaction_id.to_string(),
        idempotency_key: None,
        reason: None,
        provider_reference: None,
        provider_status: None,
        provider_fee: None,
        provider_payload: serde_json::Value::Null,
        subscription_id: None,
        create_time: Utc::now(),
    }
}

pub(crate) fn ut_ledger_month(student_id: &str, month: &str, paid: i64, is_free: bool) -> MonthLedgerModel {
    let mut m = MonthLedgerModel::new(student_id, ut_month(month), Utc::now());
    m.paid_amount = paid;
    m.is_free = is_free;
    m
}

pub(crate) fn ut_gateway_subscription(
    id: &str,
    metadata: &[(&str, &str)],
    period_start: &str,
) -> GatewaySubscriptionModel {
    let start = ut_time(period_start);
    GatewaySubscriptionModel {
        id: id.to_string(),
        status: "active".to_string(),
        metadata: metadata
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        current_period_start: start,
        current_period_end: start + chrono::Duration::days(90),
        latest_invoice: Some(format!("in_{id}")),
        raw: serde_json::json!({"id": id, "object": "subscription"}),
    }
}

/// Gateway double, answers with whatever the test case loaded into it.
/// Webhook signatures are checked for real with the secrets of the
/// test fixture.
pub(crate) struct UtMockProcessor {
    pub verify_result: Mutex<Option<GatewayVerifyResult>>,
    pub subscription: Mutex<Option<GatewaySubscriptionModel>>,
    pub invoice_amount: Mutex<Option<Decimal>>,
    pub counter: UtCallCounter,
}

#[derive(Clone, Default)]
pub(crate) struct UtCallCounter {
    verify: Arc<AtomicU32>,
    subscription: Arc<AtomicU32>,
}

impl UtCallCounter {
    pub(crate) fn verify_calls(&self) -> u32 {
        self.verify.load(Ordering::SeqCst)
    }
    pub(crate) fn subscription_calls(&self) -> u32 {
        self.subscription.load(Ordering::SeqCst)
    }
}

impl UtMockProcessor {
    pub(crate) fn new() -> Self {
        Self {
            verify_result: Mutex::new(None),
            subscription: Mutex::new(None),
            invoice_amount: Mutex::new(None),
            counter: UtCallCounter::default(),
        }
    }
    pub(crate) fn with_verify(self, result: GatewayVerifyResult) -> Self {
        *self.verify_result.lock().unwrap() = Some(result);
        self
    }
    pub(crate) fn with_subscription(self, sub: GatewaySubscriptionModel) -> Self {
        *self.subscription.lock().unwrap() = Some(sub);
        self
    }
    pub(crate) fn with_invoice_amount(self, amount: Decimal) -> Self {
        *self.invoice_amount.lock().unwrap() = Some(amount);
        self
    }
    /// hands the double over to the code under test, the returned
    /// counter keeps track of gateway calls
    pub(crate) fn into_shared(self) -> (Arc<Box<dyn AbstractPaymentProcessor>>, UtCallCounter) {
        let (obj, counter) = self.into_boxed();
        (Arc::new(obj), counter)
    }
    pub(crate) fn into_boxed(self) -> (Box<dyn AbstractPaymentProcessor>, UtCallCounter) {
        let counter = self.counter.clone();
        (Box::new(self), counter)
    }
}

fn ut_processor_error(fn_label: AppProcessorFnLabel) -> AppProcessorError {
    AppProcessorError {
        reason: AppProcessorErrorReason::NotSupport,
        fn_label,
    }
}

#[async_trait]
impl AbstractPaymentProcessor for UtMockProcessor {
    async fn verify_transaction(
        &self,
        _checkout: &CheckoutModel,
    ) -> Result<GatewayVerifyResult, AppProcessorError> {
        let _ = self.counter.verify.fetch_add(1, Ordering::SeqCst);
        let g = self.verify_result.lock().unwrap();
        g.clone()
            .ok_or(ut_processor_error(AppProcessorFnLabel::VerifyTransaction))
    }

    async fn retrieve_subscription(
        &self,
        _gateway_sub_id: &str,
    ) -> Result<GatewaySubscriptionModel, AppProcessorError> {
        let _ = self.counter.subscription.fetch_add(1, Ordering::SeqCst);
        let g = self.subscription.lock().unwrap();
        g.clone()
            .ok_or(ut_processor_error(AppProcessorFnLabel::RetrieveSubscription))
    }

    async fn latest_invoice_amount(
        &self,
        _gateway_sub_id: &str,
    ) -> Result<Option<Decimal>, AppProcessorError> {
        Ok(*self.invoice_amount.lock().unwrap())
    }

    fn verify_webhook_signature(
        &self,
        source: PaySource,
        signature: &str,
        payload: &[u8],
        now: DateTime<Utc>,
    ) -> Result<(), AppProcessorError> {
        let result = match source {
            PaySource::Stripe => verify_stripe(
                UT_STRIPE_WEBHOOK_SECRET,
                signature,
                payload,
                now.timestamp(),
                UT_SIGNATURE_TOLERANCE,
            ),
            PaySource::Chapa => verify_chapa(UT_CHAPA_WEBHOOK_SECRET, signature, payload),
        };
        result.map_err(|e| AppProcessorError {
            reason: AppProcessorErrorReason::InvalidSignature(e),
            fn_label: AppProcessorFnLabel::VerifyWebhook,
        })
    }
} // end of impl UtMockProcessor
