use crate::config::DetectionConfig;
use crate::models::{FieldMatch, MatchField, NormalizedRecord, PairScore};
use std::collections::BTreeSet;

/// 两条规范化记录的加权相似度
///
/// - 发票号：规范化后完全相同为 1.0，否则为 0 (不做模糊匹配)
/// - 供应商：词集合 Jaccard 与归一化编辑距离取较大值
/// - 金额：相等为 1.0，差额在容差内线性衰减到 0
/// - 日期：同一天为 1.0，在窗口内线性衰减到 0
///
/// 未命中阈值的字段依旧按原始置信度计入加权和；缺失字段不重新分配权重。
/// 币种不同直接返回 0 分。
pub fn score_pair(a: &NormalizedRecord, b: &NormalizedRecord, config: &DetectionConfig) -> PairScore {
    if a.currency != b.currency {
        return PairScore::zero();
    }

    let w = &config.weights;
    let t = &config.thresholds;

    let invoice = invoice_number_confidence(&a.invoice_number, &b.invoice_number);
    let vendor = vendor_confidence(a, b);
    let amount = amount_confidence(
        a.amount_minor,
        b.amount_minor,
        config.amount_tolerance_ratio,
        config.amount_tolerance_min_minor,
    );
    let date = date_confidence(a, b, config.date_window_days);

    // 固定字段顺序累加，保证 score(a,b) 与 score(b,a) 逐位相同
    let fields = [
        (MatchField::InvoiceNumber, invoice, w.invoice_number, 1.0),
        (MatchField::Vendor, vendor, w.vendor, t.vendor),
        (MatchField::Amount, amount, w.amount, t.amount),
        (MatchField::Date, date, w.date, t.date),
    ];

    let mut score = 0.0;
    let mut matches = Vec::new();
    for (field, confidence, weight, threshold) in fields {
        score += weight * confidence;
        if confidence > 0.0 && confidence >= threshold {
            matches.push(FieldMatch { field, confidence });
        }
    }

    PairScore {
        score: score.clamp(0.0, 1.0),
        matches,
    }
}

pub fn invoice_number_confidence(a: &str, b: &str) -> f64 {
    if !a.is_empty() && a == b {
        1.0
    } else {
        0.0
    }
}

pub fn vendor_confidence(a: &NormalizedRecord, b: &NormalizedRecord) -> f64 {
    if a.vendor_name.is_empty() || b.vendor_name.is_empty() {
        return 0.0;
    }
    if a.vendor_name == b.vendor_name {
        return 1.0;
    }
    let token_set = jaccard(&a.vendor_tokens, &b.vendor_tokens);
    let edit = strsim::normalized_levenshtein(&a.vendor_name, &b.vendor_name);
    token_set.max(edit).clamp(0.0, 1.0)
}

fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// 容差 = max(较大金额 * ratio, min_minor)
pub fn amount_confidence(a: i64, b: i64, ratio: f64, min_minor: i64) -> f64 {
    if a == b {
        return 1.0;
    }
    let larger = a.unsigned_abs().max(b.unsigned_abs()) as f64;
    let tolerance = (larger * ratio).max(min_minor as f64);
    let diff = a.abs_diff(b) as f64;
    if tolerance <= 0.0 || diff >= tolerance {
        0.0
    } else {
        1.0 - diff / tolerance
    }
}

pub fn date_confidence(a: &NormalizedRecord, b: &NormalizedRecord, window_days: i64) -> f64 {
    let days = (a.invoice_date - b.invoice_date).num_days().abs();
    if days == 0 {
        return 1.0;
    }
    if window_days <= 0 || days >= window_days {
        return 0.0;
    }
    1.0 - days as f64 / window_days as f64
}
