mod checkout;
mod gateway;
pub mod money;
mod month;
mod payment;
mod reference;
mod subscription;

pub use checkout::{CheckoutModel, CheckoutStatus};
pub use gateway::{
    GatewayOutcome, GatewaySubscriptionModel, GatewayVerifyResult, SubscriptionChangeKind,
};
pub(crate) use gateway::meta_label;
pub use money::MoneyError;
pub use month::{
    BillingMonth, BillingMonthError, MonthLedgerModel, MonthPayStatus, MonthPayType,
    MonthProvenance,
};
pub use payment::{PayIntent, PaySource, PayStatus, PaymentModel};
pub use reference::{PackageModel, StudentModel};
pub use subscription::{SubscriptionModel, SubscriptionOwnerMismatch};
