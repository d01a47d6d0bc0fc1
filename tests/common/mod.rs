#![allow(dead_code)]

use chrono::NaiveDate;
use project_transfer::adapters::{MemoryLedgerStore, MemorySource, MemoryTarget};
use project_transfer::domain::model::{
    Charge, Form, FormField, Researcher, SampleGrid, ServiceRequest, Workflow,
};
use project_transfer::{TransferConfig, TransferEngine, TransferLedger};

pub const CONFIG: &str = r#"
[source]
endpoint = "https://source.example.org/api"

[target]
endpoint = "https://lims.example.org/api"

[ledger]
path = "transfer_ledger.csv"
earliest_year_seed = 2018

[runtime]
concurrency = 2
retry_attempts = 2
retry_delay_ms = 1
request_timeout_seconds = 5

[pricing]
tolerance = 0.5

[pricing.units]
each = 1
prep = 11

[routing]
ignorable_forms = ["Shipping Info"]

[[routing.rules]]
name = "genotyping"
form_contains = "Genotyping"
workflow = "TGM Genotyping"
step = "DNA Extraction"
"#;

pub type MemoryEngine = TransferEngine<MemorySource, MemoryTarget, MemoryLedgerStore>;

pub fn config() -> TransferConfig {
    TransferConfig::from_toml_str(CONFIG).unwrap()
}

pub fn target() -> MemoryTarget {
    MemoryTarget::new().with_workflows(vec![Workflow {
        name: "TGM Genotyping".to_string(),
        steps: vec!["DNA Extraction".to_string()],
    }])
}

pub async fn engine(source: &MemorySource, target: &MemoryTarget, store: &MemoryLedgerStore) -> MemoryEngine {
    let ledger = TransferLedger::open(store.clone()).await.unwrap();
    TransferEngine::new(source.clone(), target.clone(), ledger, &config()).unwrap()
}

pub fn owner() -> Researcher {
    Researcher {
        first_name: "Grace".to_string(),
        last_name: "Hopper".to_string(),
        email: "grace@example.org".to_string(),
    }
}

fn request(id: &str, year: i32, form: Form, samples: usize) -> ServiceRequest {
    ServiceRequest {
        id: id.to_string(),
        name: format!("Genotyping {}", id),
        request_type: "Genotyping".to_string(),
        owner: owner(),
        created_on: NaiveDate::from_ymd_opt(year, 3, 14).unwrap(),
        forms: vec![form],
        charges: vec![Charge {
            service_id: Some("svc-genotype".to_string()),
            unit: "each".to_string(),
            quantity: samples as f64,
        }],
        recorded_price: samples as f64,
    }
}

/// 沒有容器資訊的表格：每個樣本一支管
pub fn tube_request(id: &str, year: i32, samples: &[&str]) -> ServiceRequest {
    let form = Form {
        id: format!("form-{}", id),
        name: "Mouse Genotyping".to_string(),
        fields: vec![FormField {
            id: "Strain_each_sample".to_string(),
            value: "C57BL/6".to_string(),
        }],
        grid: Some(SampleGrid {
            columns: vec!["Sample Name".to_string(), "Volume".to_string()],
            rows: samples
                .iter()
                .map(|name| vec![name.to_string(), "10".to_string()])
                .collect(),
        }),
    };
    request(id, year, form, samples.len())
}

/// 表單欄位指定單一孔盤
pub fn plate_request(id: &str, year: i32, plate: &str, wells: &[(&str, &str)]) -> ServiceRequest {
    let form = Form {
        id: format!("form-{}", id),
        name: "Mouse Genotyping".to_string(),
        fields: vec![FormField {
            id: "Plate Name".to_string(),
            value: plate.to_string(),
        }],
        grid: Some(SampleGrid {
            columns: vec!["Sample Name".to_string(), "Well Location".to_string()],
            rows: wells
                .iter()
                .map(|(name, well)| vec![name.to_string(), well.to_string()])
                .collect(),
        }),
    };
    request(id, year, form, wells.len())
}
