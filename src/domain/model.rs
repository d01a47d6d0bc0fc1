use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// ---- Source 端 ----

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestSummary {
    pub id: String,
    pub year: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Researcher {
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRequest {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub request_type: String,
    pub owner: Researcher,
    pub created_on: NaiveDate,
    #[serde(default)]
    pub forms: Vec<Form>,
    #[serde(default)]
    pub charges: Vec<Charge>,
    pub recorded_price: f64,
}

impl ServiceRequest {
    pub fn summary(&self) -> RequestSummary {
        use chrono::Datelike;
        RequestSummary {
            id: self.id.clone(),
            year: self.created_on.year(),
        }
    }

    /// Target 端的專案名稱；請求沒有名稱時退回使用請求編號
    pub fn project_name(&self) -> String {
        let name = self.name.trim();
        if name.is_empty() {
            format!("Request {}", self.id)
        } else {
            name.to_string()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Charge {
    /// 沒有 service id 的項目是耗材，不參與價格驗證
    #[serde(default)]
    pub service_id: Option<String>,
    pub unit: String,
    pub quantity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormField {
    pub id: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SampleGrid {
    pub columns: Vec<String>,
    #[serde(default)]
    pub rows: Vec<Vec<String>>,
}

impl SampleGrid {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.trim().eq_ignore_ascii_case(name.trim()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Form {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FormField>,
    #[serde(default)]
    pub grid: Option<SampleGrid>,
}

impl Form {
    pub fn field(&self, id: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.id == id)
            .map(|f| f.value.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormKind {
    SampleGrid,
    FieldOnly,
    Skippable,
}

// ---- 擷取結果 ----

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSampleRow {
    pub name: String,
    pub udfs: Vec<(String, String)>,
    pub location: Option<String>,
    pub container: Option<String>,
    pub reagent_label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UdfValue {
    Integer(i64),
    Boolean(bool),
    Text(String),
}

impl fmt::Display for UdfValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UdfValue::Integer(v) => write!(f, "{}", v),
            UdfValue::Boolean(v) => write!(f, "{}", v),
            UdfValue::Text(v) => f.write_str(v),
        }
    }
}

pub type UdfMap = BTreeMap<String, UdfValue>;

/// 96 孔盤上的位置：列 A–H，行 1–12
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Well {
    row: char,
    column: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("'{0}' is not a well location on a 96-well plate")]
pub struct WellParseError(pub String);

impl Well {
    pub fn new(row: char, column: u8) -> Option<Self> {
        let row = row.to_ascii_uppercase();
        if ('A'..='H').contains(&row) && (1..=12).contains(&column) {
            Some(Self { row, column })
        } else {
            None
        }
    }

    pub fn row(&self) -> char {
        self.row
    }

    pub fn column(&self) -> u8 {
        self.column
    }
}

impl FromStr for Well {
    type Err = WellParseError;

    /// 接受 `A:1`、`A:01`、`A1`、`A01` 四種寫法
    fn from_str(token: &str) -> Result<Self, Self::Err> {
        let fail = || WellParseError(token.to_string());
        let trimmed = token.trim();
        let mut chars = trimmed.chars();
        let row = chars.next().ok_or_else(fail)?;
        let rest = chars.as_str();
        let digits = rest.strip_prefix(':').unwrap_or(rest);

        if digits.is_empty() || digits.len() > 2 || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(fail());
        }
        let column: u8 = digits.parse().map_err(|_| fail())?;
        Well::new(row, column).ok_or_else(fail)
    }
}

impl fmt::Display for Well {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.row, self.column)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedSample {
    pub name: String,
    pub udfs: UdfMap,
    pub well: Option<Well>,
    pub container_hint: Option<String>,
    /// 樣本帶有的接頭（adapter），建立後設定為 reagent label
    pub reagent_label: Option<String>,
}

/// 容器訊號：決定綁定策略的表單形狀
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContainerSignal {
    /// 表格中指定容器的欄位名稱，至少一列有值時才會設定
    pub grid_column: Option<String>,
    pub field_value: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SampleSet {
    pub request_id: String,
    pub form_name: String,
    pub samples: Vec<NormalizedSample>,
    pub signal: ContainerSignal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldSet {
    pub form_name: String,
    pub udfs: UdfMap,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SampleData {
    Grid(SampleSet),
    NoSampleData,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub samples: SampleData,
    pub field_forms: Vec<FieldSet>,
    pub skipped_forms: Vec<String>,
}

impl Extraction {
    pub fn sample_count(&self) -> usize {
        match &self.samples {
            SampleData::Grid(set) => set.samples.len(),
            SampleData::NoSampleData => 0,
        }
    }
}

// ---- 容器 ----

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContainerType {
    Tube,
    #[serde(rename = "96 well plate")]
    Plate96,
}

impl fmt::Display for ContainerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerType::Tube => f.write_str("Tube"),
            ContainerType::Plate96 => f.write_str("96 well plate"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Position {
    Tube,
    Well(Well),
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Position::Tube => f.write_str("1:1"),
            Position::Well(well) => write!(f, "{}", well),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Placement {
    pub sample: NormalizedSample,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Container {
    pub kind: ContainerType,
    pub name: String,
    pub placements: Vec<Placement>,
}

// ---- 路由 ----

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepTarget {
    pub workflow: String,
    pub step: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Step(StepTarget),
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workflow {
    pub name: String,
    #[serde(default)]
    pub steps: Vec<String>,
}

// ---- Target 端 ----

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectDraft {
    pub name: String,
    pub request_id: String,
    pub researcher_id: String,
    pub open_date: NaiveDate,
    /// 只有欄位、沒有樣本表格的表單值
    #[serde(default)]
    pub udfs: UdfMap,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerDraft {
    pub name: String,
    pub kind: ContainerType,
    pub request_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRecord {
    pub id: String,
    pub name: String,
    pub kind: ContainerType,
    #[serde(default)]
    pub request_id: Option<String>,
    /// 已被占用的位置，例如 `A:1`
    #[serde(default)]
    pub occupied: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleDraft {
    pub name: String,
    pub project_id: String,
    pub container_id: String,
    pub position: String,
    pub udfs: UdfMap,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleRecord {
    pub id: String,
    pub name: String,
    pub project_id: String,
    pub container_id: String,
    pub position: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReagentLabel {
    pub sample_id: String,
    pub label: String,
}

/// 專案底下由該專案建立的物件
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProjectContents {
    #[serde(default)]
    pub sample_ids: Vec<String>,
    #[serde(default)]
    pub container_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetObjectKind {
    Project,
    Container,
    Sample,
}

impl TargetObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetObjectKind::Project => "project",
            TargetObjectKind::Container => "container",
            TargetObjectKind::Sample => "sample",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetRef {
    pub kind: TargetObjectKind,
    pub id: String,
}

impl TargetRef {
    pub fn new(kind: TargetObjectKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

impl fmt::Display for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind.as_str(), self.id)
    }
}

// ---- 轉移紀錄 ----

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerOutcome {
    Transferred,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub request_id: String,
    pub project_id: String,
    pub recorded_at: DateTime<Utc>,
    pub year: i32,
    pub outcome: LedgerOutcome,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_well_formats() {
        let cases = [("A:1", 'A', 1), ("A01", 'A', 1), ("B09", 'B', 9), ("C:09", 'C', 9), ("h12", 'H', 12)];
        for (token, row, column) in cases {
            let well: Well = token.parse().unwrap();
            assert_eq!(well.row(), row, "row of {}", token);
            assert_eq!(well.column(), column, "column of {}", token);
        }
    }

    #[test]
    fn test_well_rejects_out_of_range() {
        for token in ["Z99", "I1", "A13", "A0", "A:", "", "A:1:2", "AA1", "A123"] {
            assert!(token.parse::<Well>().is_err(), "{} should not parse", token);
        }
    }

    #[test]
    fn test_position_display() {
        assert_eq!(Position::Tube.to_string(), "1:1");
        let well: Well = "B09".parse().unwrap();
        assert_eq!(Position::Well(well).to_string(), "B:9");
    }

    #[test]
    fn test_project_name_falls_back_to_id() {
        let request = ServiceRequest {
            id: "42".to_string(),
            name: "  ".to_string(),
            request_type: String::new(),
            owner: Researcher {
                first_name: "Ada".to_string(),
                last_name: "Lovelace".to_string(),
                email: String::new(),
            },
            created_on: NaiveDate::from_ymd_opt(2020, 1, 2).unwrap(),
            forms: vec![],
            charges: vec![],
            recorded_price: 0.0,
        };
        assert_eq!(request.project_name(), "Request 42");
        assert_eq!(request.summary().year, 2020);
    }
}
