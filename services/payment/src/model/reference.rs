use chrono::NaiveDate;
use rust_decimal::Decimal;

// read-only reference data, owned by other services of the school

#[derive(Debug, Clone, PartialEq)]
pub struct StudentModel {
    pub id: String,
    pub class_fee: Decimal,
    pub start_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PackageModel {
    pub id: String,
    pub duration_months: u16,
    pub price: Decimal,
    pub currency: String,
}
