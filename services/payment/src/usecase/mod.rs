mod allocate_deposit;
mod finalize_payment;
mod finalize_subscription;
mod verify_payment;
mod webhook_event;

pub use allocate_deposit::{AllocateDepositUcError, DepositAllocation, DepositAllocator};
pub use finalize_payment::{FinalizePaymentUcError, FinalizePaymentUseCase, FinalizedCheckout};
pub use finalize_subscription::{
    FinalizeSubscriptionUcError, FinalizeSubscriptionUseCase, SubscriptionFinalizeReq,
    SubscriptionFinalizeResult,
};
pub use verify_payment::{VerifyPaymentOutcome, VerifyPaymentUcError, VerifyPaymentUseCase};
pub use webhook_event::{WebhookDispatched, WebhookEventUseCase, WebhookUcError};
