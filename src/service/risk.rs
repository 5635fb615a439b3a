use crate::config::RiskCutoffs;
use crate::models::RiskTier;

/// 分组聚合评分 -> 风险等级 (无状态)
pub fn classify(score: f64, cutoffs: &RiskCutoffs) -> RiskTier {
    if score >= cutoffs.high {
        RiskTier::High
    } else if score >= cutoffs.medium {
        RiskTier::Medium
    } else {
        RiskTier::Low
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_follow_default_cutoffs() {
        let cutoffs = RiskCutoffs::default();
        assert_eq!(classify(0.98, &cutoffs), RiskTier::High);
        assert_eq!(classify(0.90, &cutoffs), RiskTier::High);
        assert_eq!(classify(0.85, &cutoffs), RiskTier::Medium);
        assert_eq!(classify(0.75, &cutoffs), RiskTier::Medium);
        assert_eq!(classify(0.7499, &cutoffs), RiskTier::Low);
    }
}
