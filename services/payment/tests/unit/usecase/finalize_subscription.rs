use std::sync::Arc;

use chrono::{Duration, Utc};

use rust_decimal::Decimal;

use tuition_payment::adapter::processor::AbstractPaymentProcessor;
use tuition_payment::adapter::repository::PaymentLookup;
use tuition_payment::model::{
    GatewaySubscriptionModel, MonthPayStatus, PayIntent, PayStatus, PaymentModel,
};
use tuition_payment::usecase::{
    FinalizeSubscriptionUcError, FinalizeSubscriptionUseCase, SubscriptionFinalizeReq,
};

use super::{ut_dec, ut_month_amounts};
use crate::{
    ut_gateway_subscription, ut_ledger_month, ut_package, ut_payment, ut_setup_ledger, ut_student,
    UtLedger, UtMockProcessor,
};

const CFG_FNAME: &str = "config_ok.json";
const PERIOD_START: &str = "2026-01-05T08:00:00+00:00";
const PERIOD_MONTHS: [&str; 3] = ["2026-01", "2026-02", "2026-03"];

fn ut_usecase(
    ut: &UtLedger,
    processors: Arc<Box<dyn AbstractPaymentProcessor>>,
) -> FinalizeSubscriptionUseCase {
    FinalizeSubscriptionUseCase {
        repo: ut.repo.clone(),
        processors,
        logctx: ut.logctx.clone(),
    }
}

async fn ut_setup_reference(ut: &UtLedger, package_price: &str, duration: u16) {
    let student = ut_student("stu-s1", 20, Some((2025, 6, 1)));
    ut.importer.import_student(&student).await.unwrap();
    let pkg = ut_package("pkg-q", duration, ut_dec(package_price));
    ut.importer.import_package(&pkg).await.unwrap();
}

fn ut_sub(id: &str, extra: &[(&str, &str)]) -> GatewaySubscriptionModel {
    let mut meta = vec![("studentId", "stu-s1"), ("packageId", "pkg-q")];
    meta.extend_from_slice(extra);
    ut_gateway_subscription(id, meta.as_slice(), PERIOD_START)
}

fn ut_plan_change_req(invoice_id: &str, amount: &str) -> SubscriptionFinalizeReq {
    SubscriptionFinalizeReq {
        invoice_id: Some(invoice_id.to_string()),
        invoice_amount: Some(ut_dec(amount)),
        billing_reason: Some("subscription_update".to_string()),
        ..Default::default()
    }
}

async fn ut_student_payments(ut: &UtLedger, student_id: &str) -> Vec<PaymentModel> {
    let since = crate::ut_time("2000-01-01T00:00:00Z");
    let mut tx = ut.repo.begin().await.unwrap();
    let found = tx.fetch_recent_payments(student_id, since).await.unwrap();
    tx.rollback().await.unwrap();
    found
}

fn ut_initial_req(session_id: &str) -> SubscriptionFinalizeReq {
    SubscriptionFinalizeReq {
        is_initial_payment: true,
        session_id: Some(session_id.to_string()),
        ..Default::default()
    }
}

#[actix_web::test]
async fn initial_payment_then_replay() {
    let ut = ut_setup_ledger(CFG_FNAME);
    ut_setup_reference(&ut, "55.00", 3).await;
    let (procs, counter) = UtMockProcessor::new()
        .with_subscription(ut_sub("sub_001", &[]))
        .into_shared();
    let uc = ut_usecase(&ut, procs);

    let done = uc.execute("sub_001", ut_initial_req("cs_sub_001")).await.unwrap();
    assert!(!done.already_processed);
    assert!(done.months_verified);
    assert_eq!(done.gateway_sub_id.as_str(), "sub_001");
    assert_eq!(done.status.as_str(), "active");
    assert_eq!(done.months.len(), 3);
    assert_eq!(counter.subscription_calls(), 1);
    let amounts = ut_month_amounts(&ut.repo, "stu-s1", &PERIOD_MONTHS).await;
    assert_eq!(amounts.get("2026-01"), Some(&18));
    assert_eq!(amounts.get("2026-02"), Some(&18));
    assert_eq!(amounts.get("2026-03"), Some(&19));

    let payment_id = done.payment_id.unwrap();
    let payment = ut.repo.fetch_payment(payment_id).await.unwrap().unwrap();
    assert_eq!(payment.intent, PayIntent::Subscription);
    assert_eq!(payment.status, PayStatus::Approved);
    assert_eq!(payment.amount, ut_dec("55.00"));
    assert_eq!(payment.transaction_id.as_str(), "cs_sub_001");
    assert_eq!(payment.subscription_id, Some(done.subscription_id));
    let saved = ut.repo.fetch_subscription("sub_001").await.unwrap().unwrap();
    assert_eq!(saved.student_id.as_str(), "stu-s1");
    assert_eq!(saved.package_id.as_str(), "pkg-q");
    let row = ut.repo.fetch_month("stu-s1", crate::ut_month("2026-02")).await;
    assert_eq!(row.unwrap().map(|m| m.status), Some(MonthPayStatus::Paid));

    let again = uc.execute("sub_001", ut_initial_req("cs_sub_001")).await.unwrap();
    assert!(again.already_processed);
    assert_eq!(again.payment_id, Some(payment_id));
    assert_eq!(again.subscription_id, done.subscription_id);
    assert!(again.months.is_empty());
    // replay answered locally
    assert_eq!(counter.subscription_calls(), 1);
}

#[actix_web::test]
async fn renewal_uses_invoice_amount() {
    let ut = ut_setup_ledger(CFG_FNAME);
    ut_setup_reference(&ut, "55.00", 3).await;
    let (procs, _counter) = UtMockProcessor::new()
        .with_subscription(ut_sub("sub_002", &[]))
        .into_shared();
    let req = SubscriptionFinalizeReq {
        invoice_id: Some("in_renew_01".to_string()),
        invoice_amount: Some(Decimal::from(60)),
        ..Default::default()
    };
    let done = ut_usecase(&ut, procs).execute("sub_002", req).await.unwrap();
    assert_eq!(done.months.len(), 3);
    let amounts = ut_month_amounts(&ut.repo, "stu-s1", &PERIOD_MONTHS).await;
    assert!(amounts.values().all(|v| *v == 20));
    let payment = ut.repo.fetch_payment(done.payment_id.unwrap()).await.unwrap().unwrap();
    assert_eq!(payment.provider_reference.as_deref(), Some("in_renew_01"));
    assert_eq!(payment.reason.as_deref(), Some("subscription renewal"));
}

#[actix_web::test]
async fn invoice_amount_from_gateway() {
    let ut = ut_setup_ledger(CFG_FNAME);
    ut_setup_reference(&ut, "55.00", 3).await;
    let (procs, _counter) = UtMockProcessor::new()
        .with_subscription(ut_sub("sub_003", &[]))
        .with_invoice_amount(ut_dec("90.00"))
        .into_shared();
    let req = SubscriptionFinalizeReq {
        idempotency_key: Some("evt_renew_003".to_string()),
        ..Default::default()
    };
    let done = ut_usecase(&ut, procs).execute("sub_003", req).await.unwrap();
    assert_eq!(done.months.len(), 3);
    let amounts = ut_month_amounts(&ut.repo, "stu-s1", &PERIOD_MONTHS).await;
    assert!(amounts.values().all(|v| *v == 30));
    let found = ut
        .repo
        .find_payment(PaymentLookup::IdempotencyKey("evt_renew_003"))
        .await
        .unwrap();
    assert_eq!(found.map(|p| p.id), done.payment_id);
}

#[actix_web::test]
async fn cross_tenant_rejected() {
    let ut = ut_setup_ledger(CFG_FNAME);
    ut_setup_reference(&ut, "55.00", 3).await;
    let other = ut_student("stu-s2", 20, None);
    ut.importer.import_student(&other).await.unwrap();
    let (procs, _counter) = UtMockProcessor::new()
        .with_subscription(ut_sub("sub_004", &[]))
        .into_shared();
    let _done = ut_usecase(&ut, procs)
        .execute("sub_004", ut_initial_req("cs_sub_004"))
        .await
        .unwrap();

    let claimed = ut_gateway_subscription(
        "sub_004",
        &[("studentId", "stu-s2"), ("packageId", "pkg-q")],
        PERIOD_START,
    );
    let (procs, _counter) = UtMockProcessor::new().with_subscription(claimed).into_shared();
    let req = SubscriptionFinalizeReq {
        invoice_id: Some("in_cross_01".to_string()),
        invoice_amount: Some(Decimal::from(60)),
        ..Default::default()
    };
    let result = ut_usecase(&ut, procs).execute("sub_004", req).await;
    let e = match result {
        Err(FinalizeSubscriptionUcError::OwnerMismatch(e)) => e,
        _others => panic!("unexpected result"),
    };
    assert_eq!(e.bound_student.as_str(), "stu-s1");
    assert_eq!(e.claimed_student.as_str(), "stu-s2");
    let amounts = ut_month_amounts(&ut.repo, "stu-s2", &PERIOD_MONTHS).await;
    assert!(amounts.is_empty());
}

#[actix_web::test]
async fn missing_metadata() {
    let ut = ut_setup_ledger(CFG_FNAME);
    ut_setup_reference(&ut, "55.00", 3).await;
    let gw = ut_gateway_subscription("sub_005", &[("packageId", "pkg-q")], PERIOD_START);
    let (procs, _counter) = UtMockProcessor::new().with_subscription(gw).into_shared();
    let result = ut_usecase(&ut, procs)
        .execute("sub_005", ut_initial_req("cs_sub_005"))
        .await;
    assert!(matches!(
        result,
        Err(FinalizeSubscriptionUcError::MissingMetadata { label, .. }) if label == "studentId"
    ));
    let gw = ut_gateway_subscription("sub_005", &[("studentId", "stu-s1"), ("packageId", "")], PERIOD_START);
    let (procs, _counter) = UtMockProcessor::new().with_subscription(gw).into_shared();
    let result = ut_usecase(&ut, procs)
        .execute("sub_005", ut_initial_req("cs_sub_005"))
        .await;
    assert!(matches!(
        result,
        Err(FinalizeSubscriptionUcError::MissingMetadata { label, .. }) if label == "packageId"
    ));
}

#[actix_web::test]
async fn reference_not_found() {
    let ut = ut_setup_ledger(CFG_FNAME);
    ut_setup_reference(&ut, "55.00", 3).await;
    let gw = ut_gateway_subscription(
        "sub_006",
        &[("studentId", "stu-s1"), ("packageId", "pkg-none")],
        PERIOD_START,
    );
    let (procs, _counter) = UtMockProcessor::new().with_subscription(gw).into_shared();
    let result = ut_usecase(&ut, procs)
        .execute("sub_006", ut_initial_req("cs_sub_006"))
        .await;
    assert!(matches!(result, Err(FinalizeSubscriptionUcError::PackageNotExist(p)) if p == "pkg-none"));

    let gw = ut_gateway_subscription(
        "sub_006",
        &[("studentId", "stu-none"), ("packageId", "pkg-q")],
        PERIOD_START,
    );
    let (procs, _counter) = UtMockProcessor::new().with_subscription(gw).into_shared();
    let result = ut_usecase(&ut, procs)
        .execute("sub_006", ut_initial_req("cs_sub_006"))
        .await;
    assert!(matches!(result, Err(FinalizeSubscriptionUcError::StudentNotExist(s)) if s == "stu-none"));
    let saved = ut.repo.fetch_subscription("sub_006").await.unwrap();
    assert!(saved.is_none());
}

#[actix_web::test]
async fn zero_month_rolls_back() {
    let ut = ut_setup_ledger(CFG_FNAME);
    ut_setup_reference(&ut, "55.00", 0).await;
    let (procs, _counter) = UtMockProcessor::new()
        .with_subscription(ut_sub("sub_007", &[]))
        .into_shared();
    let req = SubscriptionFinalizeReq {
        idempotency_key: Some("evt_zero_007".to_string()),
        ..Default::default()
    };
    let result = ut_usecase(&ut, procs).execute("sub_007", req).await;
    assert!(matches!(
        result,
        Err(FinalizeSubscriptionUcError::ZeroMonthsGenerated { package_id, .. }) if package_id == "pkg-q"
    ));
    let saved = ut.repo.fetch_subscription("sub_007").await.unwrap();
    assert!(saved.is_none());
    let found = ut
        .repo
        .find_payment(PaymentLookup::IdempotencyKey("evt_zero_007"))
        .await
        .unwrap();
    assert!(found.is_none());
}

#[actix_web::test]
async fn downgrade_keeps_recorded_months() {
    let ut = ut_setup_ledger(CFG_FNAME);
    ut_setup_reference(&ut, "30.00", 3).await;
    let existing = [ut_ledger_month("stu-s1", "2026-01", 20, false)];
    ut.importer.import_months(&existing).await.unwrap();
    let sub = ut_sub("sub_008", &[("downgradedAt", "2026-01-04T10:00:00Z")]);
    let (procs, _counter) = UtMockProcessor::new().with_subscription(sub).into_shared();
    let req = SubscriptionFinalizeReq {
        invoice_id: Some("in_down_01".to_string()),
        invoice_amount: Some(Decimal::from(12)),
        billing_reason: Some("subscription_update".to_string()),
        ..Default::default()
    };
    let done = ut_usecase(&ut, procs).execute("sub_008", req).await.unwrap();
    assert_eq!(done.months, vec![crate::ut_month("2026-02"), crate::ut_month("2026-03")]);
    let amounts = ut_month_amounts(&ut.repo, "stu-s1", &PERIOD_MONTHS).await;
    // package price applies on plan change, not the prorated invoice
    assert_eq!(amounts.get("2026-01"), Some(&20));
    assert_eq!(amounts.get("2026-02"), Some(&10));
    assert_eq!(amounts.get("2026-03"), Some(&10));
}

#[actix_web::test]
async fn upgrade_reuses_recent_payment() {
    let ut = ut_setup_ledger(CFG_FNAME);
    ut_setup_reference(&ut, "60.00", 3).await;
    let existing = [
        ut_ledger_month("stu-s1", "2026-01", 20, false),
        ut_ledger_month("stu-s1", "2026-02", 10, false),
    ];
    ut.importer.import_months(&existing).await.unwrap();
    let mut tx = ut.repo.begin().await.unwrap();
    let mut upgrade = ut_payment("stu-s1", ut_dec("25.00"), PayIntent::Subscription, "chg_upg_01");
    upgrade.reason = Some("Upgrade to premium plan".to_string());
    let upgrade = tx.insert_payment(upgrade).await.unwrap();
    tx.commit().await.unwrap();

    let sub = ut_sub("sub_009", &[("upgradedAt", "1767610800")]);
    let (procs, _counter) = UtMockProcessor::new().with_subscription(sub).into_shared();
    let done = ut_usecase(&ut, procs)
        .execute("sub_009", ut_plan_change_req("in_up_01", "25.00"))
        .await
        .unwrap();
    assert_eq!(done.payment_id, Some(upgrade.id));
    assert_eq!(done.months, vec![crate::ut_month("2026-02"), crate::ut_month("2026-03")]);
    let amounts = ut_month_amounts(&ut.repo, "stu-s1", &PERIOD_MONTHS).await;
    assert!(amounts.values().all(|v| *v == 20));
    let payment = ut.repo.fetch_payment(upgrade.id).await.unwrap().unwrap();
    assert_eq!(payment.subscription_id, Some(done.subscription_id));
    assert_eq!(payment.amount, ut_dec("25.00"));
    assert_eq!(payment.provider_reference.as_deref(), Some("in_up_01"));
    assert_eq!(payment.idempotency_key.as_deref(), Some("finalize_sub_009_in_up_01"));
    let linked = ut.repo.fetch_months_by_payment(upgrade.id).await.unwrap();
    assert_eq!(linked.len(), 2);
}

#[actix_web::test]
async fn upgrade_reused_payment_replay_after_window() {
    let ut = ut_setup_ledger(CFG_FNAME);
    ut_setup_reference(&ut, "60.00", 3).await;
    let existing = [ut_ledger_month("stu-s1", "2026-01", 20, false)];
    ut.importer.import_months(&existing).await.unwrap();
    let mut tx = ut.repo.begin().await.unwrap();
    let mut upgrade = ut_payment("stu-s1", ut_dec("25.00"), PayIntent::Subscription, "upgrade_chg_02");
    upgrade.idempotency_key = Some("upgrade_stu-s1_premium".to_string());
    let upgrade = tx.insert_payment(upgrade).await.unwrap();
    tx.commit().await.unwrap();

    let sub = ut_sub("sub_010", &[("upgradedAt", "1767610800")]);
    let (procs, counter) = UtMockProcessor::new().with_subscription(sub).into_shared();
    let uc = ut_usecase(&ut, procs);
    let first = uc
        .execute("sub_010", ut_plan_change_req("in_up_02", "25.00"))
        .await
        .unwrap();
    assert!(!first.already_processed);
    assert_eq!(first.payment_id, Some(upgrade.id));
    assert_eq!(counter.subscription_calls(), 1);

    // the reused payment falls out of the reuse window
    let mut tx = ut.repo.begin().await.unwrap();
    let mut aged = tx.fetch_payment(upgrade.id).await.unwrap().unwrap();
    assert_eq!(aged.idempotency_key.as_deref(), Some("upgrade_stu-s1_premium"));
    aged.create_time = Utc::now() - Duration::minutes(11);
    tx.update_payment(&aged).await.unwrap();
    tx.commit().await.unwrap();

    let again = uc
        .execute("sub_010", ut_plan_change_req("in_up_02", "25.00"))
        .await
        .unwrap();
    assert!(again.already_processed);
    assert_eq!(again.payment_id, Some(upgrade.id));
    assert!(again.months.is_empty());
    assert_eq!(counter.subscription_calls(), 1);
    let payments = ut_student_payments(&ut, "stu-s1").await;
    assert_eq!(payments.len(), 1);
    let amounts = ut_month_amounts(&ut.repo, "stu-s1", &PERIOD_MONTHS).await;
    assert!(amounts.values().all(|v| *v == 20));
}

#[actix_web::test]
async fn upgrade_unkeyed_payment_replay_after_window() {
    let ut = ut_setup_ledger(CFG_FNAME);
    ut_setup_reference(&ut, "60.00", 3).await;
    let mut tx = ut.repo.begin().await.unwrap();
    let mut upgrade = ut_payment("stu-s1", ut_dec("25.00"), PayIntent::Subscription, "chg_upg_03");
    upgrade.reason = Some("Upgrade to premium plan".to_string());
    let upgrade = tx.insert_payment(upgrade).await.unwrap();
    tx.commit().await.unwrap();

    let sub = ut_sub("sub_011", &[("upgradedAt", "1767610800")]);
    let (procs, _counter) = UtMockProcessor::new().with_subscription(sub).into_shared();
    let uc = ut_usecase(&ut, procs);
    let first = uc
        .execute("sub_011", ut_plan_change_req("in_up_03", "25.00"))
        .await
        .unwrap();
    assert_eq!(first.payment_id, Some(upgrade.id));

    let mut tx = ut.repo.begin().await.unwrap();
    let mut aged = tx.fetch_payment(upgrade.id).await.unwrap().unwrap();
    aged.create_time = Utc::now() - Duration::minutes(11);
    tx.update_payment(&aged).await.unwrap();
    tx.commit().await.unwrap();

    let again = uc
        .execute("sub_011", ut_plan_change_req("in_up_03", "25.00"))
        .await
        .unwrap();
    assert!(again.already_processed);
    assert_eq!(again.payment_id, Some(upgrade.id));
    let payments = ut_student_payments(&ut, "stu-s1").await;
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].amount, ut_dec("25.00"));
}

#[actix_web::test]
async fn downgrade_fresh_payment_replay() {
    let ut = ut_setup_ledger(CFG_FNAME);
    ut_setup_reference(&ut, "30.00", 3).await;
    let sub = ut_sub("sub_012", &[("downgradedAt", "2026-01-04T10:00:00Z")]);
    let (procs, counter) = UtMockProcessor::new().with_subscription(sub).into_shared();
    let uc = ut_usecase(&ut, procs);
    let first = uc
        .execute("sub_012", ut_plan_change_req("in_down_02", "12.00"))
        .await
        .unwrap();
    assert!(!first.already_processed);
    assert_eq!(first.months.len(), 3);
    let payment_id = first.payment_id.unwrap();

    let mut tx = ut.repo.begin().await.unwrap();
    let mut aged = tx.fetch_payment(payment_id).await.unwrap().unwrap();
    aged.create_time = Utc::now() - Duration::minutes(11);
    tx.update_payment(&aged).await.unwrap();
    tx.commit().await.unwrap();

    let again = uc
        .execute("sub_012", ut_plan_change_req("in_down_02", "12.00"))
        .await
        .unwrap();
    assert!(again.already_processed);
    assert_eq!(again.payment_id, Some(payment_id));
    assert_eq!(counter.subscription_calls(), 1);
    let payments = ut_student_payments(&ut, "stu-s1").await;
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].amount, ut_dec("12.00"));
    let amounts = ut_month_amounts(&ut.repo, "stu-s1", &PERIOD_MONTHS).await;
    assert!(amounts.values().all(|v| *v == 10));
}

#[actix_web::test]
async fn renewal_after_earlier_upgrade() {
    let ut = ut_setup_ledger(CFG_FNAME);
    ut_setup_reference(&ut, "60.00", 3).await;
    let sub = ut_sub("sub_013", &[("upgradedAt", "2025-01-01T00:00:00Z")]);
    let (procs, _counter) = UtMockProcessor::new().with_subscription(sub).into_shared();
    let uc = ut_usecase(&ut, procs);
    let req = SubscriptionFinalizeReq {
        invoice_id: Some("in_renew_07".to_string()),
        invoice_amount: Some(ut_dec("45.00")),
        billing_reason: Some("subscription_cycle".to_string()),
        ..Default::default()
    };
    let done = uc.execute("sub_013", req).await.unwrap();
    assert_eq!(done.months.len(), 3);
    let amounts = ut_month_amounts(&ut.repo, "stu-s1", &PERIOD_MONTHS).await;
    assert_eq!(amounts.values().sum::<i64>(), 45);
    assert!(amounts.values().all(|v| *v == 15));
    let payment = ut.repo.fetch_payment(done.payment_id.unwrap()).await.unwrap().unwrap();
    assert_eq!(payment.amount, ut_dec("45.00"));
    assert_eq!(payment.reason.as_deref(), Some("subscription renewal"));

    // without invoice reason, a plan change before the paid period is history
    let req = SubscriptionFinalizeReq {
        idempotency_key: Some("evt_renew_013".to_string()),
        invoice_amount: Some(ut_dec("45.00")),
        ..Default::default()
    };
    let done = uc.execute("sub_013", req).await.unwrap();
    assert!(!done.already_processed);
    let payments = ut_student_payments(&ut, "stu-s1").await;
    assert_eq!(payments.len(), 2);
    assert!(payments.iter().all(|p| p.amount == ut_dec("45.00")));
}
