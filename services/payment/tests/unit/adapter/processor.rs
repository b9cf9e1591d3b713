use chrono::Utc;
use rust_decimal::Decimal;

use tuition_payment::adapter::processor::signature::{
    chapa_signature, stripe_signature_header, verify_chapa, verify_stripe, SignatureError,
};
use tuition_payment::adapter::processor::{AbstractPaymentProcessor, AppProcessorErrorReason};
use tuition_payment::model::{GatewayOutcome, PayIntent, PaySource};
use tuition_payment::AppSharedState;

use crate::{
    ut_checkout, ut_setup_confidential, ut_setup_config, UT_CHAPA_WEBHOOK_SECRET,
    UT_STRIPE_WEBHOOK_SECRET,
};

const PAYLOAD: &[u8] = br#"{"id":"evt_1","type":"checkout.session.completed"}"#;

#[test]
fn stripe_signature_ok() {
    let now = 1_714_557_600i64;
    let header = stripe_signature_header(UT_STRIPE_WEBHOOK_SECRET, now - 20, PAYLOAD).unwrap();
    assert!(header.starts_with("t=1714557580,v1="));
    let result = verify_stripe(UT_STRIPE_WEBHOOK_SECRET, header.as_str(), PAYLOAD, now, 300);
    assert_eq!(result, Ok(()));
    // rolled secret, one of the candidates matches
    let rolled = format!("t={},v1=00ff,v0=abc,{}", now - 20, &header[13..]);
    let result = verify_stripe(UT_STRIPE_WEBHOOK_SECRET, rolled.as_str(), PAYLOAD, now, 300);
    assert_eq!(result, Ok(()));
}

#[test]
fn stripe_signature_rejected() {
    let now = 1_714_557_600i64;
    let header = stripe_signature_header(UT_STRIPE_WEBHOOK_SECRET, now, PAYLOAD).unwrap();
    let tampered = br#"{"id":"evt_1","type":"checkout.session.expired"}"#;
    let result = verify_stripe(UT_STRIPE_WEBHOOK_SECRET, header.as_str(), tampered, now, 300);
    assert_eq!(result, Err(SignatureError::Mismatch));
    let result = verify_stripe("whsec_other", header.as_str(), PAYLOAD, now, 300);
    assert_eq!(result, Err(SignatureError::Mismatch));
    let result = verify_stripe(UT_STRIPE_WEBHOOK_SECRET, header.as_str(), PAYLOAD, now + 301, 300);
    assert_eq!(result, Err(SignatureError::TimestampOutOfTolerance(now, 301)));
    let result = verify_stripe("", header.as_str(), PAYLOAD, now, 300);
    assert_eq!(result, Err(SignatureError::MissingSecret));
    for malformed in ["garbage", "v1=abcd", "t=12a,v1=abcd", "t=1714557600"] {
        let result = verify_stripe(UT_STRIPE_WEBHOOK_SECRET, malformed, PAYLOAD, now, 300);
        assert!(
            matches!(result, Err(SignatureError::MalformedHeader(_))),
            "header:{malformed}"
        );
    }
}

#[test]
fn chapa_signature_check() {
    let sig = chapa_signature(UT_CHAPA_WEBHOOK_SECRET, PAYLOAD).unwrap();
    assert_eq!(sig.len(), 64);
    assert_eq!(verify_chapa(UT_CHAPA_WEBHOOK_SECRET, sig.as_str(), PAYLOAD), Ok(()));
    let upper = sig.to_uppercase();
    assert_eq!(verify_chapa(UT_CHAPA_WEBHOOK_SECRET, upper.as_str(), PAYLOAD), Ok(()));
    let result = verify_chapa(UT_CHAPA_WEBHOOK_SECRET, sig.as_str(), b"{}");
    assert_eq!(result, Err(SignatureError::Mismatch));
    let result = verify_chapa(UT_CHAPA_WEBHOOK_SECRET, "not-hex", PAYLOAD);
    assert_eq!(result, Err(SignatureError::Mismatch));
    let result = verify_chapa(UT_CHAPA_WEBHOOK_SECRET, " ", PAYLOAD);
    assert!(matches!(result, Err(SignatureError::MalformedHeader(_))));
}

fn ut_shared_state() -> AppSharedState {
    let cfg = ut_setup_config("config_ok.json");
    let cfdntl = ut_setup_confidential(&cfg);
    AppSharedState::new(cfg, cfdntl).unwrap()
}

#[actix_web::test]
async fn mock_gateway_outcome_by_reference() {
    let shr_state = ut_shared_state();
    let procs = shr_state.processor_context();
    let cases = [
        ("tx-ok-001", PaySource::Chapa, GatewayOutcome::Success),
        ("tx-fail-002", PaySource::Chapa, GatewayOutcome::Failed),
        ("tx-pend-003", PaySource::Stripe, GatewayOutcome::Pending),
        ("tx-ok-004", PaySource::Stripe, GatewayOutcome::Success),
    ];
    for (tx_ref, source, expect) in cases {
        let checkout = ut_checkout(tx_ref, "stu-1", PayIntent::Deposit, &[], Decimal::from(45), source);
        let result = procs.verify_transaction(&checkout).await.unwrap();
        assert_eq!(result.outcome, expect, "tx_ref:{tx_ref}");
        assert!(result.provider_reference.is_some());
        if source == PaySource::Chapa {
            assert_eq!(result.provider_fee, Some(Decimal::new(350, 2)));
        }
    }
    let e = procs.retrieve_subscription("sub_1").await.unwrap_err();
    assert!(matches!(e.reason, AppProcessorErrorReason::NotSupport));
    assert!(!e.is_config_fault());
    assert_eq!(procs.latest_invoice_amount("sub_1").await.unwrap(), None);
}

#[actix_web::test]
async fn mock_gateway_webhook_secret() {
    let shr_state = ut_shared_state();
    let procs = shr_state.processor_context();
    let now = Utc::now();
    let header = stripe_signature_header(UT_STRIPE_WEBHOOK_SECRET, now.timestamp(), PAYLOAD).unwrap();
    let result = procs.verify_webhook_signature(PaySource::Stripe, header.as_str(), PAYLOAD, now);
    assert!(result.is_ok());
    let sig = chapa_signature(UT_CHAPA_WEBHOOK_SECRET, PAYLOAD).unwrap();
    let result = procs.verify_webhook_signature(PaySource::Chapa, sig.as_str(), PAYLOAD, now);
    assert!(result.is_ok());
    let e = procs
        .verify_webhook_signature(PaySource::Chapa, header.as_str(), PAYLOAD, now)
        .unwrap_err();
    assert!(matches!(
        e.reason,
        AppProcessorErrorReason::InvalidSignature(SignatureError::Mismatch)
    ));
}

#[actix_web::test]
async fn unusable_gateway_credential() {
    let cfg = ut_setup_config("config_broken_gateway.json");
    let cfdntl = ut_setup_confidential(&cfg);
    let shr_state = AppSharedState::new(cfg, cfdntl).unwrap();
    let procs = shr_state.processor_context();
    // chapa credential is corrupted, stripe is not configured
    let checkout = ut_checkout("tx-ok-1", "stu-1", PayIntent::Deposit, &[], Decimal::from(5), PaySource::Chapa);
    let e = procs.verify_transaction(&checkout).await.unwrap_err();
    assert!(matches!(e.reason, AppProcessorErrorReason::CredentialCorrupted));
    assert!(e.is_config_fault());
    let checkout = ut_checkout("tx-ok-2", "stu-1", PayIntent::Deposit, &[], Decimal::from(5), PaySource::Stripe);
    let e = procs.verify_transaction(&checkout).await.unwrap_err();
    assert!(matches!(e.reason, AppProcessorErrorReason::InvalidConfig));
}
