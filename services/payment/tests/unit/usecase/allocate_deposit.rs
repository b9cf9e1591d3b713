use rust_decimal::Decimal;

use tuition_payment::model::{MonthPayStatus, MonthPayType, PayIntent};
use tuition_payment::usecase::{AllocateDepositUcError, DepositAllocation, DepositAllocator};

use crate::{
    ut_ledger_month, ut_month, ut_payment, ut_setup_ledger, ut_student, ut_time, UtLedger,
};

const CFG_FNAME: &str = "config_ok.json";

fn ut_allocator(ut: &UtLedger, max_generated_months: u16) -> DepositAllocator {
    DepositAllocator {
        logctx: ut.logctx.clone(),
        max_generated_months,
        now: ut_time("2030-07-10T08:00:00Z"),
    }
}

async fn ut_allocate(
    ut: &UtLedger,
    max_generated_months: u16,
    student_id: &str,
    amount: Decimal,
    requested: &[&str],
) -> Result<DepositAllocation, AllocateDepositUcError> {
    let allocator = ut_allocator(ut, max_generated_months);
    let mut payment = ut_payment(student_id, amount, PayIntent::Deposit, "tx-dep");
    payment.id = 31;
    let requested = requested.iter().map(|m| ut_month(m)).collect::<Vec<_>>();
    let mut tx = ut.repo.begin().await.unwrap();
    let result = allocator
        .allocate(tx.as_mut(), &payment, requested.as_slice())
        .await;
    if result.is_ok() {
        tx.commit().await.unwrap();
    }
    result
}

fn ut_applied(alloc: &DepositAllocation) -> Vec<(String, i64)> {
    alloc
        .applied
        .iter()
        .map(|(m, amount)| (m.to_string(), *amount))
        .collect()
}

#[actix_web::test]
async fn spread_from_start_month() {
    let ut = ut_setup_ledger(CFG_FNAME);
    let student = ut_student("stu-1", 20, Some((2024, 1, 15)));
    ut.importer.import_student(&student).await.unwrap();

    let alloc = ut_allocate(&ut, 24, "stu-1", Decimal::from(45), &[]).await.unwrap();
    assert_eq!(alloc.months_applied, 3);
    assert_eq!(alloc.remaining_balance, 0);
    let expect = [("2024-01", 20), ("2024-02", 20), ("2024-03", 5)]
        .map(|(m, a)| (m.to_string(), a))
        .to_vec();
    assert_eq!(ut_applied(&alloc), expect);

    let repo = &ut.repo;
    let full = repo.fetch_month("stu-1", ut_month("2024-02")).await.unwrap().unwrap();
    assert_eq!(full.status, MonthPayStatus::Paid);
    assert_eq!(full.pay_type, MonthPayType::Auto);
    assert_eq!(full.payment_id, Some(31));
    let partial = repo.fetch_month("stu-1", ut_month("2024-03")).await.unwrap().unwrap();
    assert_eq!(partial.paid_amount, 5);
    assert_eq!(partial.status, MonthPayStatus::Pending);
    assert_eq!(partial.pay_type, MonthPayType::Partial);
}

#[actix_web::test]
async fn continue_after_partial_month() {
    let ut = ut_setup_ledger(CFG_FNAME);
    ut.importer
        .import_student(&ut_student("stu-1", 20, Some((2024, 1, 15))))
        .await
        .unwrap();
    let _ = ut_allocate(&ut, 24, "stu-1", Decimal::from(45), &[]).await.unwrap();
    // 2024-03 holds 5 so far, the next deposit fills it before moving on
    let alloc = ut_allocate(&ut, 24, "stu-1", Decimal::from(30), &[]).await.unwrap();
    let expect = [("2024-03", 15), ("2024-04", 15)]
        .map(|(m, a)| (m.to_string(), a))
        .to_vec();
    assert_eq!(ut_applied(&alloc), expect);
    let m = ut.repo.fetch_month("stu-1", ut_month("2024-03")).await.unwrap().unwrap();
    assert_eq!(m.paid_amount, 20);
    assert!(m.is_paid());
}

#[actix_web::test]
async fn requested_then_unpaid_then_generated() {
    let ut = ut_setup_ledger(CFG_FNAME);
    ut.importer
        .import_student(&ut_student("stu-1", 20, Some((2024, 1, 15))))
        .await
        .unwrap();
    let existing = [
        ut_ledger_month("stu-1", "2024-01", 5, false),
        ut_ledger_month("stu-1", "2024-02", 0, true),
    ];
    ut.importer.import_months(&existing).await.unwrap();

    let alloc = ut_allocate(&ut, 24, "stu-1", Decimal::from(40), &["2024-05"])
        .await
        .unwrap();
    let expect = [("2024-05", 20), ("2024-01", 15), ("2024-06", 5)]
        .map(|(m, a)| (m.to_string(), a))
        .to_vec();
    assert_eq!(ut_applied(&alloc), expect);
    let free = ut.repo.fetch_month("stu-1", ut_month("2024-02")).await.unwrap().unwrap();
    assert_eq!(free.paid_amount, 0);
    assert!(free.payment_id.is_none());
}

#[actix_web::test]
async fn skip_paid_and_free_months() {
    let ut = ut_setup_ledger(CFG_FNAME);
    ut.importer
        .import_student(&ut_student("stu-1", 20, None))
        .await
        .unwrap();
    let mut paid = ut_ledger_month("stu-1", "2024-03", 20, false);
    let mut p = ut_payment("stu-1", Decimal::from(20), PayIntent::Tuition, "tx-old");
    p.id = 2;
    paid.mark_paid(20, &p);
    let existing = [paid, ut_ledger_month("stu-1", "2024-04", 0, true)];
    ut.importer.import_months(&existing).await.unwrap();

    let alloc = ut_allocate(&ut, 24, "stu-1", Decimal::from(20), &["2024-03", "2024-04"])
        .await
        .unwrap();
    // generation starts after the latest requested month
    let expect = vec![("2024-05".to_string(), 20)];
    assert_eq!(ut_applied(&alloc), expect);
    let kept = ut.repo.fetch_month("stu-1", ut_month("2024-03")).await.unwrap().unwrap();
    assert_eq!(kept.payment_id, Some(2));
}

#[actix_web::test]
async fn anchor_after_latest_recorded_month() {
    let ut = ut_setup_ledger(CFG_FNAME);
    ut.importer
        .import_student(&ut_student("stu-1", 20, Some((2020, 1, 1))))
        .await
        .unwrap();
    let mut paid = ut_ledger_month("stu-1", "2024-08", 20, false);
    let p = ut_payment("stu-1", Decimal::from(20), PayIntent::Tuition, "tx-old");
    paid.mark_paid(20, &p);
    ut.importer.import_months(&[paid]).await.unwrap();

    let alloc = ut_allocate(&ut, 24, "stu-1", Decimal::from(25), &[]).await.unwrap();
    let expect = [("2024-09", 20), ("2024-10", 5)]
        .map(|(m, a)| (m.to_string(), a))
        .to_vec();
    assert_eq!(ut_applied(&alloc), expect);
}

#[actix_web::test]
async fn no_start_date_uses_current_month() {
    let ut = ut_setup_ledger(CFG_FNAME);
    ut.importer
        .import_student(&ut_student("stu-1", 20, None))
        .await
        .unwrap();
    let alloc = ut_allocate(&ut, 24, "stu-1", Decimal::from(20), &[]).await.unwrap();
    assert_eq!(ut_applied(&alloc), vec![("2030-07".to_string(), 20)]);
}

#[actix_web::test]
async fn generation_cap_leaves_balance() {
    let ut = ut_setup_ledger(CFG_FNAME);
    ut.importer
        .import_student(&ut_student("stu-1", 20, Some((2024, 1, 1))))
        .await
        .unwrap();
    let alloc = ut_allocate(&ut, 2, "stu-1", Decimal::from(100), &[]).await.unwrap();
    assert_eq!(alloc.months_applied, 2);
    assert_eq!(alloc.remaining_balance, 60);
    assert!(ut.repo.fetch_month("stu-1", ut_month("2024-03")).await.unwrap().is_none());

    // requested months do not count against the cap
    let alloc = ut_allocate(&ut, 1, "stu-1", Decimal::from(60), &["2025-01", "2025-02"])
        .await
        .unwrap();
    assert_eq!(alloc.months_applied, 3);
    assert_eq!(alloc.remaining_balance, 0);
    let last = alloc.applied.last().map(|(m, _)| m.to_string());
    assert_eq!(last.as_deref(), Some("2025-03"));
}

#[actix_web::test]
async fn calendar_end_stops_generation() {
    let ut = ut_setup_ledger(CFG_FNAME);
    ut.importer
        .import_student(&ut_student("stu-1", 20, Some((9999, 11, 1))))
        .await
        .unwrap();
    let alloc = ut_allocate(&ut, 24, "stu-1", Decimal::from(100), &[]).await.unwrap();
    assert_eq!(alloc.months_applied, 2);
    assert_eq!(alloc.remaining_balance, 60);
}

#[actix_web::test]
async fn invalid_input() {
    let ut = ut_setup_ledger(CFG_FNAME);
    ut.importer
        .import_student(&ut_student("stu-free", 0, None))
        .await
        .unwrap();
    ut.importer
        .import_student(&ut_student("stu-1", 20, None))
        .await
        .unwrap();
    let result = ut_allocate(&ut, 24, "stu-404", Decimal::from(20), &[]).await;
    assert!(matches!(result, Err(AllocateDepositUcError::StudentNotExist(id)) if id == "stu-404"));
    let result = ut_allocate(&ut, 24, "stu-free", Decimal::from(20), &[]).await;
    assert!(matches!(result, Err(AllocateDepositUcError::NonPositiveClassFee { .. })));
    let result = ut_allocate(&ut, 24, "stu-1", Decimal::new(-5, 0), &[]).await;
    assert!(matches!(result, Err(AllocateDepositUcError::NonPositiveDeposit { .. })));
    // rounds down to zero whole units
    let result = ut_allocate(&ut, 24, "stu-1", Decimal::new(49, 2), &[]).await;
    assert!(matches!(result, Err(AllocateDepositUcError::NonPositiveDeposit { .. })));
}

#[actix_web::test]
async fn never_exceeds_class_fee() {
    let ut = ut_setup_ledger(CFG_FNAME);
    ut.importer
        .import_student(&ut_student("stu-1", 20, Some((2024, 1, 1))))
        .await
        .unwrap();
    let existing = [ut_ledger_month("stu-1", "2024-01", 25, false)];
    ut.importer.import_months(&existing).await.unwrap();
    let alloc = ut_allocate(&ut, 24, "stu-1", Decimal::from(20), &["2024-01"])
        .await
        .unwrap();
    let expect = vec![("2024-02".to_string(), 20)];
    assert_eq!(ut_applied(&alloc), expect);
    let over = ut.repo.fetch_month("stu-1", ut_month("2024-01")).await.unwrap().unwrap();
    assert_eq!(over.paid_amount, 25);
}
