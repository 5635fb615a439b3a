use crate::error::{DedupError, Result};
use crate::models::{InvoiceRecord, NormalizedRecord};
use std::collections::BTreeSet;

/// 规范化一条发票记录 (纯函数)
pub fn normalize(record: &InvoiceRecord) -> Result<NormalizedRecord> {
    let currency = normalize_currency(&record.currency)?;
    let vendor_name = normalize_vendor(&record.vendor_name);
    let vendor_tokens: BTreeSet<String> = vendor_name
        .split(' ')
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();
    let invoice_number = normalize_invoice_number(&record.invoice_number);
    let invoice_digits = invoice_number.chars().filter(|c| c.is_ascii_digit()).collect();

    Ok(NormalizedRecord {
        id: record.id,
        invoice_number,
        invoice_digits,
        vendor_name,
        vendor_tokens,
        amount_minor: record.total_amount,
        currency,
        // 按记录自身的时区取日期，与处理机器的本地时区无关
        invoice_date: record.issued_at.date_naive(),
    })
}

/// 供应商名称：小写、去标点、压缩空白
pub fn normalize_vendor(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// 发票号：去掉所有非字母数字分隔符并统一大写，INV-2024-001 与 INV2024001 等价
pub fn normalize_invoice_number(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_uppercase)
        .collect()
}

fn normalize_currency(raw: &str) -> Result<String> {
    let code = raw.trim().to_ascii_uppercase();
    if code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) {
        Ok(code)
    } else {
        Err(DedupError::Validation(format!("invalid currency code '{}'", raw)))
    }
}
