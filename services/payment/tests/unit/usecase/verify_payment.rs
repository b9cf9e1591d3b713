use std::sync::Arc;

use rust_decimal::Decimal;

use tuition_payment::adapter::processor::{AbstractPaymentProcessor, AppProcessorErrorReason};
use tuition_payment::model::{
    CheckoutStatus, GatewayOutcome, PayIntent, PaySource, PayStatus,
};
use tuition_payment::usecase::{VerifyPaymentOutcome, VerifyPaymentUcError, VerifyPaymentUseCase};

use super::{ut_gateway_result, ut_month_amounts};
use crate::{ut_checkout, ut_payment, ut_setup_ledger, ut_student, UtLedger, UtMockProcessor};

const CFG_FNAME: &str = "config_ok.json";

fn ut_usecase(ut: &UtLedger, processors: Arc<Box<dyn AbstractPaymentProcessor>>) -> VerifyPaymentUseCase {
    VerifyPaymentUseCase {
        repo: ut.repo.clone(),
        processors,
        logctx: ut.logctx.clone(),
        max_generated_months: ut.cfg.api_server.allocation.max_generated_months,
    }
}

async fn ut_setup_deposit(ut: &UtLedger, tx_ref: &str, amount: i64) {
    let student = ut_student("stu-7", 25, Some((2025, 9, 1)));
    ut.importer.import_student(&student).await.unwrap();
    let checkout = ut_checkout(
        tx_ref,
        "stu-7",
        PayIntent::Deposit,
        &[],
        Decimal::from(amount),
        PaySource::Chapa,
    );
    ut.importer.import_checkout(&checkout).await.unwrap();
}

#[actix_web::test]
async fn pending_writes_nothing() {
    let ut = ut_setup_ledger(CFG_FNAME);
    ut_setup_deposit(&ut, "tx-v-01", 50).await;
    let (procs, counter) = UtMockProcessor::new()
        .with_verify(ut_gateway_result(GatewayOutcome::Pending, "APv01"))
        .into_shared();
    let outcome = ut_usecase(&ut, procs).execute("tx-v-01").await.unwrap();
    assert!(matches!(outcome, VerifyPaymentOutcome::Pending(_)));
    assert_eq!(counter.verify_calls(), 1);
    let saved = ut.repo.fetch_checkout("tx-v-01").await.unwrap().unwrap();
    assert_eq!(saved.status, CheckoutStatus::Pending);
    assert!(saved.payment_id.is_none());
}

#[actix_web::test]
async fn success_then_no_more_gateway_call() {
    let ut = ut_setup_ledger(CFG_FNAME);
    ut_setup_deposit(&ut, "tx-v-02", 50).await;
    let (procs, counter) = UtMockProcessor::new()
        .with_verify(ut_gateway_result(GatewayOutcome::Success, "APv02"))
        .into_shared();
    let uc = ut_usecase(&ut, procs);

    let outcome = uc.execute("tx-v-02").await.unwrap();
    let done = match outcome {
        VerifyPaymentOutcome::Finalized(v) => v,
        _others => panic!("unexpected outcome"),
    };
    assert_eq!(done.checkout.status, CheckoutStatus::Completed);
    assert_eq!(done.months_written.len(), 2);
    let amounts = ut_month_amounts(&ut.repo, "stu-7", &["2025-09", "2025-10"]).await;
    assert_eq!(amounts.get("2025-09"), Some(&25));
    assert_eq!(amounts.get("2025-10"), Some(&25));

    let outcome = uc.execute("tx-v-02").await.unwrap();
    let done = match outcome {
        VerifyPaymentOutcome::AlreadyFinalized(v) => v,
        _others => panic!("unexpected outcome"),
    };
    assert!(done.already_processed);
    assert!(done.payment.unwrap().is_approved());
    assert_eq!(counter.verify_calls(), 1);
}

#[actix_web::test]
async fn failed_marks_checkout() {
    let ut = ut_setup_ledger(CFG_FNAME);
    ut_setup_deposit(&ut, "tx-v-03", 50).await;
    let (procs, _counter) = UtMockProcessor::new()
        .with_verify(ut_gateway_result(GatewayOutcome::Failed, "APv03"))
        .into_shared();
    let outcome = ut_usecase(&ut, procs).execute("tx-v-03").await.unwrap();
    let done = match outcome {
        VerifyPaymentOutcome::Failed(v) => v,
        _others => panic!("unexpected outcome"),
    };
    assert_eq!(done.checkout.status, CheckoutStatus::Failed);
    assert_eq!(done.payment.map(|p| p.status), Some(PayStatus::Rejected));
    let amounts = ut_month_amounts(&ut.repo, "stu-7", &["2025-09"]).await;
    assert!(amounts.is_empty());
}

#[actix_web::test]
async fn gateway_error() {
    let ut = ut_setup_ledger(CFG_FNAME);
    ut_setup_deposit(&ut, "tx-v-04", 50).await;
    // nothing loaded, the double reports unsupported operation
    let (procs, counter) = UtMockProcessor::new().into_shared();
    let result = ut_usecase(&ut, procs).execute("tx-v-04").await;
    assert!(matches!(
        result,
        Err(VerifyPaymentUcError::ExternalProcessor(e))
            if matches!(e.reason, AppProcessorErrorReason::NotSupport)
    ));
    assert_eq!(counter.verify_calls(), 1);
    let saved = ut.repo.fetch_checkout("tx-v-04").await.unwrap().unwrap();
    assert_eq!(saved.status, CheckoutStatus::Pending);
}

#[actix_web::test]
async fn checkout_not_found() {
    let ut = ut_setup_ledger(CFG_FNAME);
    let (procs, counter) = UtMockProcessor::new()
        .with_verify(ut_gateway_result(GatewayOutcome::Success, "APv05"))
        .into_shared();
    let result = ut_usecase(&ut, procs).execute("tx-v-nobody").await;
    assert!(matches!(result, Err(VerifyPaymentUcError::CheckoutNotExist(r)) if r == "tx-v-nobody"));
    assert_eq!(counter.verify_calls(), 0);
}

#[actix_web::test]
async fn self_heal_without_gateway() {
    let ut = ut_setup_ledger(CFG_FNAME);
    ut_setup_deposit(&ut, "tx-v-06", 25).await;
    let mut tx = ut.repo.begin().await.unwrap();
    let orphan = ut_payment("stu-7", Decimal::from(25), PayIntent::Deposit, "tx-v-06");
    let orphan = tx.insert_payment(orphan).await.unwrap();
    let mut checkout = tx.fetch_checkout("tx-v-06").await.unwrap().unwrap();
    checkout.status = CheckoutStatus::Completed;
    checkout.payment_id = Some(orphan.id);
    tx.update_checkout(&checkout).await.unwrap();
    tx.commit().await.unwrap();

    let (procs, counter) = UtMockProcessor::new()
        .with_verify(ut_gateway_result(GatewayOutcome::Failed, "APv06"))
        .into_shared();
    let outcome = ut_usecase(&ut, procs).execute("tx-v-06").await.unwrap();
    let done = match outcome {
        VerifyPaymentOutcome::AlreadyFinalized(v) => v,
        _others => panic!("unexpected outcome"),
    };
    assert!(!done.already_processed);
    assert_eq!(done.months_written.len(), 1);
    assert_eq!(counter.verify_calls(), 0);
    let linked = ut.repo.fetch_months_by_payment(orphan.id).await.unwrap();
    assert_eq!(linked.len(), 1);
    assert_eq!(linked[0].paid_amount, 25);
}

#[actix_web::test]
async fn finalized_tuition_short_circuit() {
    let ut = ut_setup_ledger(CFG_FNAME);
    let student = ut_student("stu-7", 25, None);
    ut.importer.import_student(&student).await.unwrap();
    let checkout = ut_checkout(
        "tx-v-07",
        "stu-7",
        PayIntent::Tuition,
        &["2025-01"],
        Decimal::from(25),
        PaySource::Stripe,
    );
    ut.importer.import_checkout(&checkout).await.unwrap();
    let (procs, counter) = UtMockProcessor::new()
        .with_verify(ut_gateway_result(GatewayOutcome::Success, "cs_v07"))
        .into_shared();
    let uc = ut_usecase(&ut, procs);
    let first = uc.execute("tx-v-07").await.unwrap();
    assert!(matches!(first, VerifyPaymentOutcome::Finalized(_)));
    let second = uc.execute("tx-v-07").await.unwrap();
    let done = match second {
        VerifyPaymentOutcome::AlreadyFinalized(v) => v,
        _others => panic!("unexpected outcome"),
    };
    assert!(done.already_processed);
    assert!(done.payment.is_some());
    assert_eq!(counter.verify_calls(), 1);
}
