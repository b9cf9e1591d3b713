use std::result::Result;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SubsecRound, Utc};
use mysql_async::prelude::FromValue;
use mysql_async::{Params, Row, Value};

use crate::model::{
    BillingMonth, CheckoutModel, MonthLedgerModel, MonthProvenance, PackageModel, PaymentModel,
    StudentModel, SubscriptionModel,
};

use super::super::{AppRepoErrorDetail, PaymentLookup};

pub(super) const DATETIME_FMT_P0F: &str = "%Y-%m-%d %H:%M:%S";

pub(super) struct SqlArgs(pub(super) String, pub(super) Params);

impl SqlArgs {
    pub(super) fn into_parts(self) -> (String, Params) {
        let Self(stmt, params) = self;
        (stmt, params)
    }
}

const PAYMENT_COLUMNS: &str = "`id`,`student_id`,`amount`,`currency`,`status`,`source`,\
    `intent`,`transaction_id`,`idempotency_key`,`reason`,`provider_reference`,\
    `provider_status`,`provider_fee`,`provider_payload`,`subscription_id`,`create_time`";
const MONTH_COLUMNS: &str = "`student_id`,`month`,`paid_amount`,`status`,`pay_type`,\
    `start_date`,`end_date`,`is_free`,`provenance`,`payment_id`";
const SUBSCRIPTION_COLUMNS: &str = "`id`,`gateway_sub_id`,`student_id`,`package_id`,`status`,\
    `period_start`,`period_end`,`next_billing_date`,`update_time`";

fn fmt_time(t: &DateTime<Utc>) -> Value {
    t.format(DATETIME_FMT_P0F).to_string().into()
}

fn fmt_time_opt(t: &Option<DateTime<Utc>>) -> Value {
    t.as_ref().map(fmt_time).unwrap_or(Value::NULL)
}

fn to_json_text<T: serde::Serialize>(v: &T) -> Result<String, AppRepoErrorDetail> {
    serde_json::to_string(v).map_err(|e| AppRepoErrorDetail::DataRowParse(e.to_string()))
}

#[allow(non_snake_case)]
fn raw_column_to_datetime(val: Value) -> Result<DateTime<Utc>, AppRepoErrorDetail> {
    let result = if let Value::Date(Y, M, D, h, m, s, us) = val {
        let res_d = NaiveDate::from_ymd_opt(Y as i32, M as u32, D as u32).ok_or("date-parse-fail");
        let res_t = NaiveTime::from_hms_micro_opt(h as u32, m as u32, s as u32, us)
            .ok_or("time-parse-fail");
        match (res_d, res_t) {
            (Ok(d), Ok(t)) => Ok(NaiveDateTime::new(d, t).and_utc().trunc_subsecs(0)),
            (Err(e), _) => Err(e),
            (Ok(_), Err(e)) => Err(e),
        }
    } else {
        Err("datetime-unknown-value-type")
    };
    result.map_err(|msg| AppRepoErrorDetail::DataRowParse(msg.to_string()))
}

fn take_col<T: FromValue>(row: &mut Row, idx: usize) -> Result<T, AppRepoErrorDetail> {
    row.take_opt::<T, usize>(idx)
        .ok_or_else(|| AppRepoErrorDetail::DataRowParse(format!("missing-column:{idx}")))?
        .map_err(|e| AppRepoErrorDetail::DataRowParse(format!("column:{idx}, {:?}", e)))
}

fn take_time(row: &mut Row, idx: usize) -> Result<DateTime<Utc>, AppRepoErrorDetail> {
    let raw = take_col::<Value>(row, idx)?;
    raw_column_to_datetime(raw)
}

fn take_time_opt(row: &mut Row, idx: usize) -> Result<Option<DateTime<Utc>>, AppRepoErrorDetail> {
    match take_col::<Value>(row, idx)? {
        Value::NULL => Ok(None),
        raw => raw_column_to_datetime(raw).map(Some),
    }
}

fn take_label<T>(row: &mut Row, idx: usize) -> Result<T, AppRepoErrorDetail>
where
    T: FromStr<Err = String>,
{
    let raw = take_col::<String>(row, idx)?;
    raw.parse::<T>()
        .map_err(|e| AppRepoErrorDetail::DataRowParse(format!("label:{e}, column:{idx}")))
}

fn take_json<T: serde::de::DeserializeOwned>(
    row: &mut Row,
    idx: usize,
) -> Result<T, AppRepoErrorDetail> {
    let raw = take_col::<String>(row, idx)?;
    serde_json::from_str::<T>(raw.as_str())
        .map_err(|e| AppRepoErrorDetail::DataRowParse(format!("json:{e}, column:{idx}")))
}

// ---- checkout ----

pub(super) fn fetch_checkout_args(tx_ref: &str) -> SqlArgs {
    // lock the row till the end of current transaction, concurrent
    // finalization of the same checkout waits here
    let stmt = "SELECT `student_id`,`intent`,`months`,`amount`,`currency`,`source`,`status`,\
        `payment_id`,`metadata`,`create_time` FROM `checkout` WHERE `tx_ref`=? FOR UPDATE";
    SqlArgs(stmt.to_string(), Params::Positional(vec![tx_ref.into()]))
}

pub(super) fn row_to_checkout(
    tx_ref: &str,
    mut row: Row,
) -> Result<CheckoutModel, AppRepoErrorDetail> {
    let r = &mut row;
    Ok(CheckoutModel {
        tx_ref: tx_ref.to_string(),
        student_id: take_col(r, 0)?,
        intent: take_label(r, 1)?,
        months: take_json::<Vec<BillingMonth>>(r, 2)?,
        amount: take_col(r, 3)?,
        currency: take_col(r, 4)?,
        source: take_label(r, 5)?,
        status: take_label(r, 6)?,
        payment_id: take_col(r, 7)?,
        metadata: take_json(r, 8)?,
        create_time: take_time(r, 9)?,
    })
}

pub(super) fn update_checkout_args(m: &CheckoutModel) -> Result<SqlArgs, AppRepoErrorDetail> {
    let arg = vec![
        m.status.as_str().into(),
        m.payment_id.into(),
        to_json_text(&m.metadata)?.into(),
        m.tx_ref.as_str().into(),
    ];
    let stmt = "UPDATE `checkout` SET `status`=?,`payment_id`=?,`metadata`=? WHERE `tx_ref`=?";
    Ok(SqlArgs(stmt.to_string(), Params::Positional(arg)))
}

// ---- payment ----

pub(super) fn fetch_payment_args(id: u64) -> SqlArgs {
    let stmt = format!("SELECT {PAYMENT_COLUMNS} FROM `payment` WHERE `id`=?");
    SqlArgs(stmt, Params::Positional(vec![id.into()]))
}

pub(super) fn find_payment_args(lookup: PaymentLookup<'_>) -> SqlArgs {
    let (cond, arg): (&str, Vec<Value>) = match lookup {
        PaymentLookup::TransactionId(v) => ("`transaction_id`=?", vec![v.into()]),
        PaymentLookup::IdempotencyKey(v) => (
            "(`transaction_id`=? OR `idempotency_key`=?)",
            vec![v.into(), v.into()],
        ),
        PaymentLookup::SubscriptionLinked(v) => (
            "(`transaction_id`=? OR `provider_reference`=?) AND `subscription_id` IS NOT NULL",
            vec![v.into(), v.into()],
        ),
    };
    let stmt =
        format!("SELECT {PAYMENT_COLUMNS} FROM `payment` WHERE {cond} ORDER BY `id` ASC LIMIT 1");
    SqlArgs(stmt, Params::Positional(arg))
}

pub(super) fn fetch_recent_payments_args(student_id: &str, since: DateTime<Utc>) -> SqlArgs {
    let arg = vec![student_id.into(), fmt_time(&since)];
    let stmt = format!(
        "SELECT {PAYMENT_COLUMNS} FROM `payment` WHERE `student_id`=? AND `create_time`>=? \
         ORDER BY `create_time` DESC, `id` DESC"
    );
    SqlArgs(stmt, Params::Positional(arg))
}

pub(super) fn row_to_payment(mut row: Row) -> Result<PaymentModel, AppRepoErrorDetail> {
    let r = &mut row;
    Ok(PaymentModel {
        id: take_col(r, 0)?,
        student_id: take_col(r, 1)?,
        amount: take_col(r, 2)?,
        currency: take_col(r, 3)?,
        status: take_label(r, 4)?,
        source: take_label(r, 5)?,
        intent: take_label(r, 6)?,
        transaction_id: take_col(r, 7)?,
        idempotency_key: take_col(r, 8)?,
        reason: take_col(r, 9)?,
        provider_reference: take_col(r, 10)?,
        provider_status: take_col(r, 11)?,
        provider_fee: take_col(r, 12)?,
        provider_payload: take_json(r, 13)?,
        subscription_id: take_col(r, 14)?,
        create_time: take_time(r, 15)?,
    })
}

fn payment_value_columns(m: &PaymentModel) -> Result<Vec<Value>, AppRepoErrorDetail> {
    Ok(vec![
        m.student_id.as_str().into(),
        m.amount.into(),
        m.currency.as_str().into(),
        m.status.as_str().into(),
        m.source.as_str().into(),
        m.intent.as_str().into(),
        m.transaction_id.as_str().into(),
        m.idempotency_key.clone().into(),
        m.reason.clone().into(),
        m.provider_reference.clone().into(),
        m.provider_status.clone().into(),
        m.provider_fee.into(),
        to_json_text(&m.provider_payload)?.into(),
        m.subscription_id.into(),
        fmt_time(&m.create_time),
    ])
}

pub(super) fn insert_payment_args(m: &PaymentModel) -> Result<SqlArgs, AppRepoErrorDetail> {
    let arg = payment_value_columns(m)?;
    let stmt = "INSERT INTO `payment`(`student_id`,`amount`,`currency`,`status`,`source`,\
        `intent`,`transaction_id`,`idempotency_key`,`reason`,`provider_reference`,\
        `provider_status`,`provider_fee`,`provider_payload`,`subscription_id`,`create_time`) \
        VALUES (?,?,?,?,?, ?,?,?,?,?, ?,?,?,?,?)";
    Ok(SqlArgs(stmt.to_string(), Params::Positional(arg)))
}

pub(super) fn update_payment_args(m: &PaymentModel) -> Result<SqlArgs, AppRepoErrorDetail> {
    let mut arg = payment_value_columns(m)?;
    arg.push(m.id.into());
    let stmt = "UPDATE `payment` SET `student_id`=?,`amount`=?,`currency`=?,`status`=?,\
        `source`=?,`intent`=?,`transaction_id`=?,`idempotency_key`=?,`reason`=?,\
        `provider_reference`=?,`provider_status`=?,`provider_fee`=?,`provider_payload`=?,\
        `subscription_id`=?,`create_time`=? WHERE `id`=?";
    Ok(SqlArgs(stmt.to_string(), Params::Positional(arg)))
}

// ---- ledger month ----

pub(super) fn fetch_month_args(student_id: &str, month: BillingMonth) -> SqlArgs {
    let arg = vec![student_id.into(), month.to_string().into()];
    let stmt = format!(
        "SELECT {MONTH_COLUMNS} FROM `ledger_month` WHERE `student_id`=? AND `month`=? FOR UPDATE"
    );
    SqlArgs(stmt, Params::Positional(arg))
}

pub(super) fn fetch_unpaid_months_args(student_id: &str) -> SqlArgs {
    let stmt = format!(
        "SELECT {MONTH_COLUMNS} FROM `ledger_month` WHERE `student_id`=? AND `status`<>'Paid' \
         AND `is_free`=0 ORDER BY `month` ASC"
    );
    SqlArgs(stmt, Params::Positional(vec![student_id.into()]))
}

pub(super) fn latest_month_args(student_id: &str) -> SqlArgs {
    let stmt = "SELECT MAX(`month`) FROM `ledger_month` WHERE `student_id`=?";
    SqlArgs(stmt.to_string(), Params::Positional(vec![student_id.into()]))
}

pub(super) fn fetch_months_by_payment_args(payment_id: u64) -> SqlArgs {
    let stmt = format!(
        "SELECT {MONTH_COLUMNS} FROM `ledger_month` WHERE `payment_id`=? ORDER BY `month` ASC"
    );
    SqlArgs(stmt, Params::Positional(vec![payment_id.into()]))
}

pub(super) fn parse_month_label(raw: &str) -> Result<BillingMonth, AppRepoErrorDetail> {
    raw.parse::<BillingMonth>()
        .map_err(|e| AppRepoErrorDetail::DataRowParse(format!("month:{:?}", e)))
}

pub(super) fn row_to_month(mut row: Row) -> Result<MonthLedgerModel, AppRepoErrorDetail> {
    let r = &mut row;
    let month_raw = take_col::<String>(r, 1)?;
    Ok(MonthLedgerModel {
        student_id: take_col(r, 0)?,
        month: parse_month_label(month_raw.as_str())?,
        paid_amount: take_col(r, 2)?,
        status: take_label(r, 3)?,
        pay_type: take_label(r, 4)?,
        start_date: take_time(r, 5)?,
        end_date: take_time_opt(r, 6)?,
        is_free: take_col(r, 7)?,
        provenance: take_json::<Option<MonthProvenance>>(r, 8)?,
        payment_id: take_col(r, 9)?,
    })
}

pub(super) fn save_month_args(m: &MonthLedgerModel) -> Result<SqlArgs, AppRepoErrorDetail> {
    let arg = vec![
        m.student_id.as_str().into(),
        m.month.to_string().into(),
        m.paid_amount.into(),
        m.status.as_str().into(),
        m.pay_type.as_str().into(),
        fmt_time(&m.start_date),
        fmt_time_opt(&m.end_date),
        m.is_free.into(),
        to_json_text(&m.provenance)?.into(),
        m.payment_id.into(),
    ];
    // `start_date` is kept once the row exists
    let stmt = "INSERT INTO `ledger_month`(`student_id`,`month`,`paid_amount`,`status`,\
        `pay_type`,`start_date`,`end_date`,`is_free`,`provenance`,`payment_id`) \
        VALUES (?,?,?,?,?, ?,?,?,?,?) ON DUPLICATE KEY UPDATE \
        `paid_amount`=VALUES(`paid_amount`),`status`=VALUES(`status`),\
        `pay_type`=VALUES(`pay_type`),`end_date`=VALUES(`end_date`),\
        `is_free`=VALUES(`is_free`),`provenance`=VALUES(`provenance`),\
        `payment_id`=VALUES(`payment_id`)";
    Ok(SqlArgs(stmt.to_string(), Params::Positional(arg)))
}

// ---- subscription ----

pub(super) fn fetch_subscription_args(gateway_sub_id: &str) -> SqlArgs {
    let stmt = format!(
        "SELECT {SUBSCRIPTION_COLUMNS} FROM `subscription` WHERE `gateway_sub_id`=? FOR UPDATE"
    );
    SqlArgs(stmt, Params::Positional(vec![gateway_sub_id.into()]))
}

pub(super) fn row_to_subscription(mut row: Row) -> Result<SubscriptionModel, AppRepoErrorDetail> {
    let r = &mut row;
    Ok(SubscriptionModel {
        id: take_col(r, 0)?,
        gateway_sub_id: take_col(r, 1)?,
        student_id: take_col(r, 2)?,
        package_id: take_col(r, 3)?,
        status: take_col(r, 4)?,
        period_start: take_time(r, 5)?,
        period_end: take_time(r, 6)?,
        next_billing_date: take_time_opt(r, 7)?,
        update_time: take_time(r, 8)?,
    })
}

pub(super) fn save_subscription_args(m: &SubscriptionModel) -> SqlArgs {
    let arg = vec![
        m.gateway_sub_id.as_str().into(),
        m.student_id.as_str().into(),
        m.package_id.as_str().into(),
        m.status.as_str().into(),
        fmt_time(&m.period_start),
        fmt_time(&m.period_end),
        fmt_time_opt(&m.next_billing_date),
        fmt_time(&m.update_time),
    ];
    // student binding is write-once, never part of the update clause
    let stmt = "INSERT INTO `subscription`(`gateway_sub_id`,`student_id`,`package_id`,`status`,\
        `period_start`,`period_end`,`next_billing_date`,`update_time`) \
        VALUES (?,?,?,?,?,?,?,?) ON DUPLICATE KEY UPDATE `package_id`=VALUES(`package_id`),\
        `status`=VALUES(`status`),`period_start`=VALUES(`period_start`),\
        `period_end`=VALUES(`period_end`),`next_billing_date`=VALUES(`next_billing_date`),\
        `update_time`=VALUES(`update_time`)";
    SqlArgs(stmt.to_string(), Params::Positional(arg))
}

// ---- reference data ----

pub(super) fn fetch_student_args(id: &str) -> SqlArgs {
    let stmt = "SELECT `class_fee`,`start_date` FROM `student` WHERE `id`=?";
    SqlArgs(stmt.to_string(), Params::Positional(vec![id.into()]))
}

pub(super) fn row_to_student(id: &str, mut row: Row) -> Result<StudentModel, AppRepoErrorDetail> {
    let r = &mut row;
    let class_fee = take_col(r, 0)?;
    let start_date = take_time_opt(r, 1)?.map(|t| t.date_naive());
    Ok(StudentModel {
        id: id.to_string(),
        class_fee,
        start_date,
    })
}

pub(super) fn fetch_package_args(id: &str) -> SqlArgs {
    let stmt = "SELECT `duration_months`,`price`,`currency` FROM `package` WHERE `id`=?";
    SqlArgs(stmt.to_string(), Params::Positional(vec![id.into()]))
}

pub(super) fn row_to_package(id: &str, mut row: Row) -> Result<PackageModel, AppRepoErrorDetail> {
    let r = &mut row;
    Ok(PackageModel {
        id: id.to_string(),
        duration_months: take_col(r, 0)?,
        price: take_col(r, 1)?,
        currency: take_col(r, 2)?,
    })
}
