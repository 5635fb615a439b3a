use crate::error::{DedupError, Result};
use config::{Config, Environment, File, Map};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// 权重之和允许的误差
const WEIGHT_EPSILON: f64 = 1e-6;
/// 时间窗口上限 (约 1000 年)，超出 chrono 可表示范围会导致溢出
pub const MAX_WINDOW_DAYS: i64 = 365_000;

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// 启动时预加载的历史发票 CSV
    #[serde(default)]
    pub seed_csv: Option<PathBuf>,
}

/// 字段权重，四项之和必须为 1.0
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldWeights {
    pub invoice_number: f64,
    pub vendor: f64,
    pub amount: f64,
    pub date: f64,
}

impl Default for FieldWeights {
    fn default() -> Self {
        Self {
            invoice_number: 0.35,
            vendor: 0.25,
            amount: 0.25,
            date: 0.15,
        }
    }
}

impl FieldWeights {
    pub fn sum(&self) -> f64 {
        self.invoice_number + self.vendor + self.amount + self.date
    }
}

/// 字段进入“命中字段集合”的置信度阈值 (发票号只在 1.0 时命中)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldThresholds {
    pub vendor: f64,
    pub amount: f64,
    pub date: f64,
}

impl Default for FieldThresholds {
    fn default() -> Self {
        Self {
            vendor: 0.6,
            amount: 0.5,
            date: 0.5,
        }
    }
}

/// 风险等级分界
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskCutoffs {
    pub high: f64,
    pub medium: f64,
}

impl Default for RiskCutoffs {
    fn default() -> Self {
        Self {
            high: 0.90,
            medium: 0.75,
        }
    }
}

/// 查重参数 (每次部署静态，可热加载)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub weights: FieldWeights,
    pub thresholds: FieldThresholds,
    pub amount_tolerance_ratio: f64,  // 较大金额的比例
    pub amount_tolerance_min_minor: i64,
    pub date_window_days: i64,
    pub group_threshold: f64,         // 成组阈值
    pub recency_window_days: i64,     // 候选窗口
    pub risk: RiskCutoffs,
    pub reprocess_progress_every: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            weights: FieldWeights::default(),
            thresholds: FieldThresholds::default(),
            amount_tolerance_ratio: 0.01,
            amount_tolerance_min_minor: 1,
            date_window_days: 3,
            group_threshold: 0.80,
            recency_window_days: 180,
            risk: RiskCutoffs::default(),
            reprocess_progress_every: 100,
        }
    }
}

impl DetectionConfig {
    /// 发票号录入错误较多的部署：降低发票号权重，其余字段分摊
    pub fn typo_tolerant() -> Self {
        Self {
            weights: FieldWeights {
                invoice_number: 0.10,
                vendor: 0.35,
                amount: 0.35,
                date: 0.20,
            },
            ..Self::default()
        }
    }

    /// 校验配置，失败时拒绝启动
    pub fn validate(&self) -> Result<()> {
        let w = &self.weights;
        for (name, value) in [
            ("weights.invoice_number", w.invoice_number),
            ("weights.vendor", w.vendor),
            ("weights.amount", w.amount),
            ("weights.date", w.date),
            ("thresholds.vendor", self.thresholds.vendor),
            ("thresholds.amount", self.thresholds.amount),
            ("thresholds.date", self.thresholds.date),
            ("risk.high", self.risk.high),
            ("risk.medium", self.risk.medium),
        ] {
            unit_interval(name, value)?;
        }

        if (w.sum() - 1.0).abs() > WEIGHT_EPSILON {
            return Err(DedupError::Configuration(format!(
                "field weights must sum to 1.0, got {}",
                w.sum()
            )));
        }
        if !(self.group_threshold > 0.0 && self.group_threshold <= 1.0) {
            return Err(DedupError::Configuration(format!(
                "group_threshold must be in (0, 1], got {}",
                self.group_threshold
            )));
        }
        if self.risk.medium >= self.risk.high {
            return Err(DedupError::Configuration(format!(
                "risk.medium ({}) must be below risk.high ({})",
                self.risk.medium, self.risk.high
            )));
        }
        if !self.amount_tolerance_ratio.is_finite() || self.amount_tolerance_ratio < 0.0 {
            return Err(DedupError::Configuration(
                "amount_tolerance_ratio must be a non-negative number".to_string(),
            ));
        }
        if self.amount_tolerance_min_minor < 0 {
            return Err(DedupError::Configuration(
                "amount_tolerance_min_minor must not be negative".to_string(),
            ));
        }
        for (name, days) in [
            ("date_window_days", self.date_window_days),
            ("recency_window_days", self.recency_window_days),
        ] {
            if !(0..=MAX_WINDOW_DAYS).contains(&days) {
                return Err(DedupError::Configuration(format!(
                    "{} must be within [0, {}], got {}",
                    name, MAX_WINDOW_DAYS, days
                )));
            }
        }
        if self.reprocess_progress_every == 0 {
            return Err(DedupError::Configuration(
                "reprocess_progress_every must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn unit_interval(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(DedupError::Configuration(format!(
            "{} must be within [0, 1], got {}",
            name, value
        )))
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                seed_csv: None,
            },
            detection: DetectionConfig::default(),
        }
    }
}

impl AppConfig {
    /// 配置文件路径：DEDUP_CONFIG 或 config/dedup.toml
    pub fn default_path() -> PathBuf {
        std::env::var("DEDUP_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/dedup.toml"))
    }

    /// 分层加载：内置默认值 -> 配置文件 (可选) -> DEDUP__* 环境变量，最后校验
    pub fn load(path: &Path) -> Result<Self> {
        Self::load_with_env(path, None)
    }

    /// env 为 None 时读取进程环境变量
    fn load_with_env(path: &Path, env: Option<Map<String, String>>) -> Result<Self> {
        let settings = Config::builder()
            .add_source(Config::try_from(&AppConfig::default())?)
            .add_source(File::from(path).required(false))
            .add_source(
                Environment::with_prefix("DEDUP")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()?;

        let mut config: AppConfig = settings.try_deserialize()?;

        // 兼容旧的 SERVER_HOST / SERVER_PORT
        if let Ok(host) = std::env::var("SERVER_HOST") {
            config.server.host = host;
        }
        if let Some(port) = std::env::var("SERVER_PORT").ok().and_then(|p| p.parse().ok()) {
            config.server.port = port;
        }

        config.detection.validate()?;
        Ok(config)
    }

    /// 从环境变量加载配置
    pub fn from_env() -> Result<Self> {
        Self::load(&Self::default_path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_detection_config_is_valid() {
        assert!(DetectionConfig::default().validate().is_ok());
        assert!(DetectionConfig::typo_tolerant().validate().is_ok());
    }

    #[test]
    fn weights_must_sum_to_one() {
        let mut config = DetectionConfig::default();
        config.weights.vendor = 0.30;
        let err = config.validate().unwrap_err();
        assert_eq!(err.code(), "configuration_error");
    }

    #[test]
    fn risk_cutoffs_must_be_ordered() {
        let mut config = DetectionConfig::default();
        config.risk.medium = 0.95;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_group_threshold_is_rejected() {
        let mut config = DetectionConfig::default();
        config.group_threshold = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn window_days_are_bounded() {
        let mut config = DetectionConfig::default();
        config.recency_window_days = MAX_WINDOW_DAYS;
        assert!(config.validate().is_ok());

        config.recency_window_days = 200_000_000_000;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("recency_window_days"));

        let mut config = DetectionConfig::default();
        config.date_window_days = -1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_overrides_file_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dedup.toml");
        std::fs::write(&path, "[detection]\ngroup_threshold = 0.85\n").unwrap();

        let env = Map::from([
            ("DEDUP__DETECTION__GROUP_THRESHOLD".to_string(), "0.9".to_string()),
            ("DEDUP__DETECTION__DATE_WINDOW_DAYS".to_string(), "7".to_string()),
        ]);
        let config = AppConfig::load_with_env(&path, Some(env)).unwrap();
        assert_eq!(config.detection.group_threshold, 0.9);
        assert_eq!(config.detection.date_window_days, 7);
    }

    #[test]
    fn env_override_is_validated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");
        let env = Map::from([(
            "DEDUP__DETECTION__RECENCY_WINDOW_DAYS".to_string(),
            "200000000000".to_string(),
        )]);
        let err = AppConfig::load_with_env(&path, Some(env)).unwrap_err();
        assert!(matches!(err, DedupError::Configuration(_)));
    }

    #[test]
    fn loads_partial_file_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dedup.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[detection]").unwrap();
        writeln!(file, "group_threshold = 0.85").unwrap();
        writeln!(file, "date_window_days = 5").unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.detection.group_threshold, 0.85);
        assert_eq!(config.detection.date_window_days, 5);
        assert_eq!(config.detection.weights, FieldWeights::default());
    }

    #[test]
    fn invalid_file_weights_refuse_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dedup.toml");
        std::fs::write(&path, "[detection.weights]\ninvoice_number = 0.9\n").unwrap();

        let err = AppConfig::load(&path).unwrap_err();
        assert!(matches!(err, DedupError::Configuration(_)));
    }
}
