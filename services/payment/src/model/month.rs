use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::{PaySource, PaymentModel};

const MAX_YEAR: i32 = 9999;

/// Calendar month of a billing period, textual form is `YYYY-MM`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BillingMonth {
    year: i32,
    month: u32,
}

#[derive(Debug, PartialEq)]
pub enum BillingMonthError {
    Format(String),
    OutOfRange(i32, u32),
}

impl BillingMonth {
    pub fn try_new(year: i32, month: u32) -> Result<Self, BillingMonthError> {
        if (1..=MAX_YEAR).contains(&year) && (1..=12).contains(&month) {
            Ok(Self { year, month })
        } else {
            Err(BillingMonthError::OutOfRange(year, month))
        }
    }

    pub fn from_date<T: Datelike>(d: &T) -> Self {
        Self {
            year: d.year(),
            month: d.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }
    pub fn month(&self) -> u32 {
        self.month
    }

    /// returns `None` once the calendar runs out of 4-digit years
    pub fn next(&self) -> Option<Self> {
        let (y, m) = if self.month == 12 {
            (self.year + 1, 1)
        } else {
            (self.year, self.month + 1)
        };
        Self::try_new(y, m).ok()
    }

    pub fn first_day(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or_default()
    }

    pub fn last_day(&self) -> NaiveDate {
        let first = self.first_day();
        match self.next() {
            Some(n) => n.first_day().pred_opt().unwrap_or(first),
            None => NaiveDate::from_ymd_opt(self.year, 12, 31).unwrap_or(first),
        }
    }

    /// `count` consecutive months beginning at `self`, shorter than `count`
    /// only when the calendar overflows
    pub fn consecutive(&self, count: usize) -> Vec<Self> {
        let mut out = Vec::with_capacity(count);
        let mut curr = Some(*self);
        while out.len() < count {
            match curr {
                Some(m) => {
                    out.push(m);
                    curr = m.next();
                }
                None => break,
            }
        }
        out
    }
} // end of impl BillingMonth

impl fmt::Display for BillingMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for BillingMonth {
    type Err = BillingMonthError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fmt_err = || BillingMonthError::Format(s.to_string());
        let (y, m) = s.trim().split_once('-').ok_or_else(fmt_err)?;
        let all_digits = |v: &str| !v.is_empty() && v.chars().all(|c| c.is_ascii_digit());
        if y.len() != 4 || m.len() != 2 || !all_digits(y) || !all_digits(m) {
            return Err(fmt_err());
        }
        let year = y.parse::<i32>().map_err(|_e| fmt_err())?;
        let month = m.parse::<u32>().map_err(|_e| fmt_err())?;
        Self::try_new(year, month)
    }
}

impl TryFrom<String> for BillingMonth {
    type Error = String;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        value
            .parse::<Self>()
            .map_err(|e| format!("invalid-billing-month: {:?}", e))
    }
}
impl From<BillingMonth> for String {
    fn from(value: BillingMonth) -> String {
        value.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MonthPayStatus {
    Paid,
    #[serde(rename = "pending")]
    Pending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonthPayType {
    Auto,
    Partial,
}

impl MonthPayStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Paid => "Paid",
            Self::Pending => "pending",
        }
    }
}
impl FromStr for MonthPayStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Paid" => Ok(Self::Paid),
            "pending" => Ok(Self::Pending),
            _others => Err(s.to_string()),
        }
    }
}
impl MonthPayType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Partial => "partial",
        }
    }
}
impl FromStr for MonthPayType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Self::Auto),
            "partial" => Ok(Self::Partial),
            _others => Err(s.to_string()),
        }
    }
}

/// where the money of a ledger month came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthProvenance {
    pub source: PaySource,
    pub provider_reference: Option<String>,
    pub provider_status: Option<String>,
    pub provider_payload: Option<serde_json::Value>,
}

/// ledger line, at most one per (student, month)
#[derive(Debug, Clone, PartialEq)]
pub struct MonthLedgerModel {
    pub student_id: String,
    pub month: BillingMonth,
    pub paid_amount: i64, // whole currency units
    pub status: MonthPayStatus,
    pub pay_type: MonthPayType,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub is_free: bool,
    pub provenance: Option<MonthProvenance>,
    pub payment_id: Option<u64>,
}

impl From<&PaymentModel> for MonthProvenance {
    fn from(value: &PaymentModel) -> Self {
        Self {
            source: value.source,
            provider_reference: value.provider_reference.clone(),
            provider_status: value.provider_status.clone(),
            provider_payload: Some(value.provider_payload.clone()),
        }
    }
}

impl MonthLedgerModel {
    pub fn new(student_id: &str, month: BillingMonth, start_date: DateTime<Utc>) -> Self {
        Self {
            student_id: student_id.to_string(),
            month,
            paid_amount: 0,
            status: MonthPayStatus::Pending,
            pay_type: MonthPayType::Partial,
            start_date,
            end_date: None,
            is_free: false,
            provenance: None,
            payment_id: None,
        }
    }

    pub fn is_paid(&self) -> bool {
        matches!(self.status, MonthPayStatus::Paid)
    }

    /// records a new paid amount for the month, status and type follow the
    /// coverage against the class fee
    pub fn apply_coverage(&mut self, paid_amount: i64, class_fee: i64, payment: &PaymentModel) {
        let fully_covered = paid_amount >= class_fee;
        self.paid_amount = paid_amount;
        (self.status, self.pay_type) = if fully_covered {
            (MonthPayStatus::Paid, MonthPayType::Auto)
        } else {
            (MonthPayStatus::Pending, MonthPayType::Partial)
        };
        self.provenance = Some(MonthProvenance::from(payment));
        self.payment_id = Some(payment.id);
    }

    /// confirmed by gateway, no further approval from school staff
    pub fn mark_paid(&mut self, paid_amount: i64, payment: &PaymentModel) {
        self.paid_amount = paid_amount;
        self.status = MonthPayStatus::Paid;
        self.pay_type = MonthPayType::Auto;
        self.provenance = Some(MonthProvenance::from(payment));
        self.payment_id = Some(payment.id);
    }
} // end of impl MonthLedgerModel
