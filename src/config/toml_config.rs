use crate::utils::error::{Result, TransferError};
use crate::utils::retry::RetryPolicy;
use crate::utils::validation::{self, Validate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    pub source: EndpointConfig,
    pub target: EndpointConfig,
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub pricing: PricingConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub endpoint: String,
    pub token: Option<String>,
    pub timeout_seconds: Option<u64>,
    /// 只對 Source 有效：要列出的請求狀態
    pub status: Option<String>,
}

impl EndpointConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.unwrap_or(30))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    pub path: String,
    pub earliest_year_seed: Option<i32>,
    pub failure_cooldown_minutes: Option<u64>,
}

impl LedgerConfig {
    pub fn earliest_year_seed(&self) -> i32 {
        self.earliest_year_seed.unwrap_or(2018)
    }

    pub fn failure_cooldown(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.failure_cooldown_minutes.unwrap_or(60) as i64)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub concurrency: Option<usize>,
    pub request_timeout_seconds: Option<u64>,
    pub retry_attempts: Option<u32>,
    pub retry_delay_ms: Option<u64>,
}

impl RuntimeConfig {
    pub fn concurrency(&self) -> usize {
        self.concurrency.unwrap_or(4)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_attempts.unwrap_or(3),
            Duration::from_millis(self.retry_delay_ms.unwrap_or(500)),
            Duration::from_secs(self.request_timeout_seconds.unwrap_or(30)),
        )
    }
}

/// 表單擷取規則
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub skip_form_patterns: Vec<String>,
    pub numeric_fields: Vec<String>,
    pub boolean_fields: Vec<String>,
    pub broadcast_suffix: String,
    pub sample_name_column: String,
    pub location_column: String,
    pub container_column: String,
    pub container_field: String,
    /// 樣本接頭欄位，值會設定為 reagent label
    pub reagent_label_column: String,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            skip_form_patterns: vec!["NQ".to_string(), "REQUEST A QUOTE".to_string()],
            numeric_fields: Vec::new(),
            boolean_fields: Vec::new(),
            broadcast_suffix: "_each_sample".to_string(),
            sample_name_column: "Sample Name".to_string(),
            location_column: "Well Location".to_string(),
            container_column: "Container Name".to_string(),
            container_field: "Plate Name".to_string(),
            reagent_label_column: "Adapter".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PricingConfig {
    #[serde(default)]
    pub tolerance: f64,
    /// 計價單位名稱 → 每筆收費的數量乘數
    #[serde(default)]
    pub units: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingConfig {
    #[serde(default)]
    pub ignorable_forms: Vec<String>,
    #[serde(default)]
    pub rules: Vec<RouteRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteRule {
    pub name: String,
    pub form_name: Option<String>,
    pub form_contains: Option<String>,
    pub form_pattern: Option<String>,
    #[serde(default)]
    pub field_equals: BTreeMap<String, String>,
    pub workflow: String,
    pub step: String,
}

impl TransferConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(TransferError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| TransferError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${LIMS_TOKEN})
    fn substitute_env_vars(content: &str) -> Result<String> {
        use regex::Regex;
        let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| TransferError::ConfigError {
            message: e.to_string(),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    pub fn validate_config(&self) -> Result<()> {
        validation::validate_url("source.endpoint", &self.source.endpoint)?;
        validation::validate_url("target.endpoint", &self.target.endpoint)?;
        validation::validate_path("ledger.path", &self.ledger.path)?;
        validation::validate_range(
            "ledger.earliest_year_seed",
            self.ledger.earliest_year_seed(),
            1970,
            9999,
        )?;

        if let Some(concurrency) = self.runtime.concurrency {
            validation::validate_positive_number("runtime.concurrency", concurrency, 1)?;
        }
        if let Some(attempts) = self.runtime.retry_attempts {
            validation::validate_positive_number("runtime.retry_attempts", attempts as usize, 1)?;
        }

        validation::validate_non_empty_string(
            "extraction.broadcast_suffix",
            &self.extraction.broadcast_suffix,
        )?;
        validation::validate_non_empty_string(
            "extraction.sample_name_column",
            &self.extraction.sample_name_column,
        )?;

        validation::validate_multiplier("pricing.tolerance", self.pricing.tolerance)?;
        for (unit, multiplier) in &self.pricing.units {
            validation::validate_multiplier(&format!("pricing.units.{}", unit), *multiplier)?;
        }

        for rule in &self.routing.rules {
            if rule.form_name.is_none() && rule.form_contains.is_none() && rule.form_pattern.is_none()
            {
                return Err(TransferError::InvalidConfigValueError {
                    field: format!("routing.rules.{}", rule.name),
                    value: rule.name.clone(),
                    reason: "A rule needs form_name, form_contains or form_pattern".to_string(),
                });
            }
            if let Some(pattern) = &rule.form_pattern {
                regex::Regex::new(pattern).map_err(|e| TransferError::InvalidConfigValueError {
                    field: format!("routing.rules.{}.form_pattern", rule.name),
                    value: pattern.clone(),
                    reason: e.to_string(),
                })?;
            }
        }

        Ok(())
    }
}

impl Validate for TransferConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}
