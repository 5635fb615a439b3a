use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub type RecordId = i64;

/// 发票记录 (由采集/OCR 协作方提供，创建后不可变；重新识别产生新版本而非修改)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceRecord {
    pub id: RecordId,
    #[serde(default)]
    pub invoice_number: String, // 发票号，可能为空
    #[serde(default)]
    pub vendor_name: String,
    pub total_amount: i64,      // 最小货币单位 (分)，禁止浮点
    pub currency: String,       // ISO 4217
    pub issued_at: DateTime<FixedOffset>, // 开票时间，带原始时区
    #[serde(default)]
    pub source_document_id: String,
}

/// 规范化后的可比较字段 (指纹)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedRecord {
    pub id: RecordId,
    pub invoice_number: String,  // 去除分隔符后的字母数字串
    pub invoice_digits: String,  // 发票号中的数字序列，用于分桶
    pub vendor_name: String,     // 小写、压缩空白
    pub vendor_tokens: BTreeSet<String>,
    pub amount_minor: i64,
    pub currency: String,
    pub invoice_date: NaiveDate, // 按记录自身时区截断到天
}

impl NormalizedRecord {
    /// 供应商与发票号均为空时信号不足，不参与候选匹配
    pub fn is_matchable(&self) -> bool {
        !(self.vendor_name.is_empty() && self.invoice_number.is_empty())
    }

    /// 供应商分桶键：规范化名称的第一个词
    pub fn vendor_bucket(&self) -> Option<&str> {
        self.vendor_name.split(' ').next().filter(|t| !t.is_empty())
    }

    pub fn digits_bucket(&self) -> Option<&str> {
        Some(self.invoice_digits.as_str()).filter(|d| !d.is_empty())
    }
}
