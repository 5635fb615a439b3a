use crate::error::{DedupError, Result};
use crate::models::{DuplicateGroup, InvoiceRecord, RecordId};
use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone};
use serde::Deserialize;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::str::FromStr;

/// CSV 行 (金额为十进制字符串，例如 "1,250.00")
#[derive(Debug, Deserialize)]
struct CsvInvoiceRow {
    id: RecordId,
    #[serde(default)]
    invoice_number: String,
    #[serde(default)]
    vendor_name: String,
    amount: String,
    currency: String,
    issued_at: String,
    #[serde(default)]
    source_document_id: String,
}

/// ISO 4217 小数位数
pub fn currency_exponent(currency: &str) -> u32 {
    match currency.to_ascii_uppercase().as_str() {
        "JPY" | "KRW" | "VND" | "CLP" | "ISK" | "UGX" | "XAF" | "XOF" => 0,
        "BHD" | "KWD" | "OMR" | "JOD" | "TND" | "IQD" | "LYD" => 3,
        _ => 2,
    }
}

/// 十进制金额 -> 最小货币单位 (四舍五入，远离零)
pub fn amount_to_minor_units(amount: &str, currency: &str) -> Result<i64> {
    let cleaned: String = amount.trim().chars().filter(|c| *c != ',').collect();
    let value = BigDecimal::from_str(&cleaned)
        .map_err(|e| DedupError::Validation(format!("invalid amount '{}': {}", amount, e)))?;
    let scale = BigDecimal::from(10i64.pow(currency_exponent(currency)));
    (value * scale)
        .round(0)
        .to_i64()
        .ok_or_else(|| DedupError::Validation(format!("amount '{}' is out of range", amount)))
}

/// RFC 3339 时间，或不带时区的日期 (按 UTC 当天 0 点)
pub fn parse_issued_at(value: &str) -> Result<DateTime<FixedOffset>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt);
    }
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| DedupError::Validation(format!("invalid issued_at '{}': {}", value, e)))?;
    let utc = FixedOffset::east_opt(0)
        .ok_or_else(|| DedupError::Validation("invalid utc offset".to_string()))?;
    date.and_hms_opt(0, 0, 0)
        .and_then(|midnight| utc.from_local_datetime(&midnight).single())
        .ok_or_else(|| DedupError::Validation(format!("invalid issued_at '{}'", value)))
}

impl CsvInvoiceRow {
    fn into_record(self) -> Result<InvoiceRecord> {
        Ok(InvoiceRecord {
            id: self.id,
            total_amount: amount_to_minor_units(&self.amount, &self.currency)?,
            issued_at: parse_issued_at(&self.issued_at)?,
            invoice_number: self.invoice_number,
            vendor_name: self.vendor_name,
            currency: self.currency,
            source_document_id: self.source_document_id,
        })
    }
}

/// 读取带表头的 CSV；任何一行格式错误都返回带行号的错误
pub fn read_records<R: Read>(reader: R) -> Result<Vec<InvoiceRecord>> {
    let mut csv_reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut records = Vec::new();
    for (idx, row) in csv_reader.deserialize::<CsvInvoiceRow>().enumerate() {
        let line = idx + 2; // 表头占第 1 行
        let record = row?
            .into_record()
            .map_err(|e| DedupError::Validation(format!("line {}: {}", line, e)))?;
        records.push(record);
    }
    Ok(records)
}

pub fn load_records_csv(path: &Path) -> Result<Vec<InvoiceRecord>> {
    let records = read_records(File::open(path)?)?;
    tracing::info!("从 {:?} 读取发票记录 {} 条", path, records.len());
    Ok(records)
}

fn join_ids<T: ToString>(ids: impl IntoIterator<Item = T>) -> String {
    ids.into_iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(";")
}

/// 导出分组到 CSV (成员、命中字段、关联分组以分号分隔)
pub fn write_groups_csv<W: Write>(groups: &[DuplicateGroup], writer: W) -> Result<()> {
    let mut writer = csv::Writer::from_writer(writer);
    writer.write_record([
        "group_id",
        "status",
        "risk_tier",
        "risk_score",
        "members",
        "matched_fields",
        "linked_groups",
        "survivor",
        "resolver_id",
        "resolved_at",
        "version",
        "updated_at",
    ])?;

    for group in groups {
        let resolution = group.resolution.as_ref();
        writer.write_record(&[
            group.id.to_string(),
            group.status.to_string(),
            group.risk_tier.to_string(),
            format!("{:.4}", group.risk_score),
            join_ids(&group.members),
            join_ids(&group.matched_fields),
            join_ids(&group.linked_groups),
            resolution
                .and_then(|r| r.survivor)
                .map(|s| s.to_string())
                .unwrap_or_default(),
            resolution.map(|r| r.resolver_id.clone()).unwrap_or_default(),
            resolution.map(|r| r.resolved_at.to_rfc3339()).unwrap_or_default(),
            group.version.to_string(),
            group.updated_at.to_rfc3339(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

pub fn export_groups_csv(groups: &[DuplicateGroup], output_path: &Path) -> Result<()> {
    let file = File::create(output_path)?;
    write_groups_csv(groups, file)?;
    tracing::info!("导出分组 {} 个到 {:?}", groups.len(), output_path);
    Ok(())
}
