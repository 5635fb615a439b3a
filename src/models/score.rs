use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// 参与比较的字段
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchField {
    InvoiceNumber,
    Vendor,
    Amount,
    Date,
}

impl MatchField {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchField::InvoiceNumber => "invoice_number",
            MatchField::Vendor => "vendor",
            MatchField::Amount => "amount",
            MatchField::Date => "date",
        }
    }
}

impl fmt::Display for MatchField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单字段比较结果
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldMatch {
    pub field: MatchField,
    pub confidence: f64,
}

/// 两条记录的评分结果 (临时值，只用于决定聚类边)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairScore {
    pub score: f64,               // 加权和，截断到 [0,1]
    pub matches: Vec<FieldMatch>, // 达到各自字段阈值的字段，按字段顺序
}

impl PairScore {
    pub fn zero() -> Self {
        Self {
            score: 0.0,
            matches: Vec::new(),
        }
    }

    pub fn matched_fields(&self) -> BTreeSet<MatchField> {
        self.matches.iter().map(|m| m.field).collect()
    }
}
