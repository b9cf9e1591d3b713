use rust_decimal::Decimal;

use tuition_payment::model::{
    CheckoutStatus, GatewayOutcome, GatewayVerifyResult, PayIntent, PaySource, PayStatus,
};

use crate::{ut_checkout, ut_payment, ut_time};

#[test]
fn finalize_links_payment() {
    let mut checkout = ut_checkout(
        "tx-0001",
        "stu-1",
        PayIntent::Deposit,
        &[],
        Decimal::from(45),
        PaySource::Chapa,
    );
    assert!(!checkout.already_finalized());
    assert!(checkout.finalized_at().is_none());
    let now = ut_time("2024-05-01T09:30:00Z");
    checkout.finalize(GatewayOutcome::Success, 82, now);
    assert_eq!(checkout.status, CheckoutStatus::Completed);
    assert_eq!(checkout.payment_id, Some(82));
    assert!(checkout.already_finalized());
    assert_eq!(checkout.finalized_at(), Some(now.to_rfc3339().as_str()));
}

#[test]
fn finalize_failed_outcome() {
    let mut checkout = ut_checkout(
        "tx-0002",
        "stu-1",
        PayIntent::Tuition,
        &["2024-01"],
        Decimal::from(20),
        PaySource::Stripe,
    );
    checkout.metadata = serde_json::Value::Null;
    checkout.finalize(GatewayOutcome::Failed, 83, ut_time("2024-05-01T09:30:00Z"));
    assert_eq!(checkout.status, CheckoutStatus::Failed);
    // linked but not completed, a later success can still finalize it
    assert!(!checkout.already_finalized());
    assert!(checkout.metadata.is_object());
    assert!(checkout.finalized_at().is_some());
}

#[test]
fn session_id_from_metadata() {
    let mut checkout = ut_checkout(
        "tx-0003",
        "stu-1",
        PayIntent::Deposit,
        &[],
        Decimal::from(20),
        PaySource::Stripe,
    );
    assert!(checkout.session_id().is_none());
    checkout.metadata = serde_json::json!({"sessionId": ""});
    assert!(checkout.session_id().is_none());
    checkout.metadata = serde_json::json!({"sessionId": "cs_test_a1b2"});
    assert_eq!(checkout.session_id(), Some("cs_test_a1b2"));
}

#[test]
fn status_labels() {
    for (label, status) in [
        ("pending", CheckoutStatus::Pending),
        ("completed", CheckoutStatus::Completed),
        ("failed", CheckoutStatus::Failed),
    ] {
        assert_eq!(status.as_str(), label);
        assert_eq!(label.parse::<CheckoutStatus>(), Ok(status));
    }
    assert!("Completed".parse::<CheckoutStatus>().is_err());
    assert_eq!("chapa".parse::<PaySource>(), Ok(PaySource::Chapa));
    assert_eq!(PayIntent::Tuition.as_str(), "tuition");
    assert_eq!("Approved".parse::<PayStatus>(), Ok(PayStatus::Approved));
}

#[test]
fn payment_keeps_provenance_not_reported() {
    let mut payment = ut_payment("stu-1", Decimal::from(45), PayIntent::Deposit, "tx-9");
    payment.status = PayStatus::Pending;
    payment.provider_reference = Some("APxyz".to_string());
    let mut result = GatewayVerifyResult::new(GatewayOutcome::Success);
    result.provider_status = Some("success".to_string());
    result.provider_fee = Some(Decimal::new(350, 2));
    payment.update_from_gateway(&result);
    assert!(payment.is_approved());
    assert_eq!(payment.provider_reference.as_deref(), Some("APxyz"));
    assert_eq!(payment.provider_status.as_deref(), Some("success"));
    assert_eq!(payment.provider_fee, Some(Decimal::new(350, 2)));
    assert!(payment.provider_payload.is_null());

    payment.update_from_gateway(&GatewayVerifyResult::new(GatewayOutcome::Failed));
    assert_eq!(payment.status, PayStatus::Rejected);
    assert_eq!(payment.provider_status.as_deref(), Some("success"));
}
