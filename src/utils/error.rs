use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("API request failed: {0}")]
    ApiError(#[from] reqwest::Error),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Configuration validation failed for '{field}': {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration field: {field}")]
    MissingConfigError { field: String },

    #[error("Request {request_id} has no transferable forms")]
    NothingToTransfer { request_id: String },

    #[error("Request {request_id} has more than one sample form: {forms:?}")]
    MultipleSampleForms {
        request_id: String,
        forms: Vec<String>,
    },

    #[error("Request {request_id}: field '{field}' has malformed value '{value}': {reason}")]
    MalformedField {
        request_id: String,
        field: String,
        value: String,
        reason: String,
    },

    #[error("Request {request_id}: sample '{sample}' has malformed well location '{token}'")]
    MalformedLocation {
        request_id: String,
        sample: String,
        token: String,
    },

    #[error("Container '{container}' violates uniqueness: {reason}")]
    DuplicateContainerViolation { container: String, reason: String },

    #[error("Request {request_id}: price mismatch, expected {expected:.2} but recorded {recorded:.2}")]
    PriceMismatch {
        request_id: String,
        expected: f64,
        recorded: f64,
    },

    #[error("Request {request_id}: charge unit '{unit}' has no unit definition")]
    UnknownChargeUnit { request_id: String, unit: String },

    #[error("Request {request_id}: form '{form}' matches no routing rule")]
    UnroutableForm { request_id: String, form: String },

    #[error("Form '{form}' routes to workflow '{workflow}', which is not active")]
    InactiveWorkflow { form: String, workflow: String },

    #[error("{resource} '{name}' already exists")]
    Conflict { resource: String, name: String },

    #[error("{resource} '{id}' not found")]
    NotFound { resource: String, id: String },

    #[error("Operation '{operation}' timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    #[error("Operation '{operation}' was rate limited")]
    RateLimited { operation: String },

    #[error("Remote system returned {status}: {message}")]
    RemoteError { status: u16, message: String },

    #[error("Operation '{operation}' failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: Box<TransferError>,
    },

    #[error("Project '{project_id}' for request {request_id} exists without a ledger entry")]
    DanglingProject {
        project_id: String,
        request_id: String,
    },

    #[error("Request {request_id} is already recorded as transferred")]
    AlreadyTransferred { request_id: String },

    #[error("Ledger error: {message}")]
    LedgerError { message: String },}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// 表單、欄位或位置格式錯誤：中止該請求
    Structural,
    /// 價格或路由驗證失敗：該請求略過，不重試
    Validation,
    /// 容器或孔位重複、名稱衝突：中止並回滾
    Conflict,
    /// 逾時或限流：有限次重試
    Transient,
    /// 重啟後偵測到懸置專案
    Integrity,
    Configuration,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl TransferError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            TransferError::NothingToTransfer { .. }
            | TransferError::PriceMismatch { .. }
            | TransferError::UnknownChargeUnit { .. }
            | TransferError::UnroutableForm { .. }
            | TransferError::InactiveWorkflow { .. } => ErrorCategory::Validation,

            TransferError::MultipleSampleForms { .. }
            | TransferError::MalformedField { .. }
            | TransferError::MalformedLocation { .. }
            | TransferError::RetriesExhausted { .. }
            | TransferError::NotFound { .. } => ErrorCategory::Structural,

            TransferError::DuplicateContainerViolation { .. }
            | TransferError::Conflict { .. }
            | TransferError::AlreadyTransferred { .. } => ErrorCategory::Conflict,

            TransferError::Timeout { .. } | TransferError::RateLimited { .. } => {
                ErrorCategory::Transient
            }
            TransferError::RemoteError { status, .. } if *status >= 500 => ErrorCategory::Transient,
            TransferError::RemoteError { .. } => ErrorCategory::Structural,
            TransferError::ApiError(e) if e.is_timeout() || e.is_connect() => {
                ErrorCategory::Transient
            }
            TransferError::ApiError(_) => ErrorCategory::Structural,

            TransferError::DanglingProject { .. } => ErrorCategory::Integrity,

            TransferError::ConfigError { .. }
            | TransferError::ConfigValidationError { .. }
            | TransferError::InvalidConfigValueError { .. }
            | TransferError::MissingConfigError { .. } => ErrorCategory::Configuration,

            TransferError::IoError(_)
            | TransferError::CsvError(_)
            | TransferError::LedgerError { .. } => ErrorCategory::System,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.category() {
            ErrorCategory::Validation => ErrorSeverity::Low,
            ErrorCategory::Transient => ErrorSeverity::Medium,
            ErrorCategory::Structural | ErrorCategory::Conflict | ErrorCategory::Integrity => {
                ErrorSeverity::High
            }
            ErrorCategory::Configuration | ErrorCategory::System => ErrorSeverity::Critical,
        }
    }

    /// 逾時、限流與 5xx 錯誤可以重試
    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Transient
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, TransferError::NotFound { .. })
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Structural => {
                "Ask the requester to correct the request form, it will be retried after the cooldown"
            }
            ErrorCategory::Validation => {
                "Review the request charges or routing table; the request was skipped"
            }
            ErrorCategory::Conflict => {
                "Check the target system for containers or projects with the same name"
            }
            ErrorCategory::Transient => "Retry later; the remote system was slow or unavailable",
            ErrorCategory::Integrity => {
                "A half-created project was rolled back; the request will be transferred again"
            }
            ErrorCategory::Configuration => "Check the TOML configuration file and environment variables",
            ErrorCategory::System => "Check file permissions and free disk space for the ledger",
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            TransferError::PriceMismatch {
                request_id,
                expected,
                recorded,
            } => format!(
                "Request {} was not transferred: the charged price {:.2} differs from the expected {:.2}",
                request_id, recorded, expected
            ),
            TransferError::RetriesExhausted {
                operation, attempts, ..
            } => format!(
                "The remote call '{}' kept failing after {} attempts",
                operation, attempts
            ),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, TransferError>;
