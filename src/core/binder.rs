use crate::domain::model::{
    Container, ContainerSignal, ContainerType, NormalizedSample, Placement, Position, SampleSet,
    Well,
};
use crate::utils::error::{Result, TransferError};
use std::collections::{BTreeMap, HashSet};

/// 容器綁定策略，由表單形狀決定
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerStrategy {
    /// 表格中有容器欄位：每列指定自己的孔盤
    Plate96Multi { column: String },
    /// 表單有單一容器欄位：所有樣本放在同一個孔盤
    Plate96Single { name: String },
    /// 沒有容器資訊：每個樣本一支管
    TubePerSample,
}

pub fn select_strategy(signal: &ContainerSignal) -> ContainerStrategy {
    match (&signal.grid_column, &signal.field_value) {
        (Some(column), _) => ContainerStrategy::Plate96Multi {
            column: column.clone(),
        },
        (None, Some(name)) => ContainerStrategy::Plate96Single { name: name.clone() },
        (None, None) => ContainerStrategy::TubePerSample,
    }
}

pub fn bind_sample_set(set: &SampleSet) -> Result<Vec<Container>> {
    bind(&set.request_id, &set.samples, &select_strategy(&set.signal))
}

pub fn bind(
    request_id: &str,
    samples: &[NormalizedSample],
    strategy: &ContainerStrategy,
) -> Result<Vec<Container>> {
    match strategy {
        ContainerStrategy::TubePerSample => bind_tubes(samples),
        ContainerStrategy::Plate96Single { name } => {
            let mut plates = BTreeMap::new();
            plates.insert(name.clone(), samples.iter().collect::<Vec<_>>());
            bind_plates(plates)
        }
        ContainerStrategy::Plate96Multi { column } => {
            let mut plates: BTreeMap<String, Vec<&NormalizedSample>> = BTreeMap::new();
            for sample in samples {
                // 其他列有填容器，這一列卻空白：表單本身有缺漏
                let name = sample.container_hint.clone().ok_or_else(|| TransferError::MalformedField {
                    request_id: request_id.to_string(),
                    field: column.clone(),
                    value: String::new(),
                    reason: format!("sample '{}' has no container name", sample.name),
                })?;
                plates.entry(name).or_default().push(sample);
            }
            bind_plates(plates)
        }
    }
}

fn bind_tubes(samples: &[NormalizedSample]) -> Result<Vec<Container>> {
    let mut seen = HashSet::new();
    samples
        .iter()
        .map(|sample| {
            if !seen.insert(sample.name.as_str()) {
                return Err(TransferError::DuplicateContainerViolation {
                    container: sample.name.clone(),
                    reason: "two tubes would share the same name".to_string(),
                });
            }
            Ok(Container {
                kind: ContainerType::Tube,
                name: sample.name.clone(),
                placements: vec![Placement {
                    sample: sample.clone(),
                    position: Position::Tube,
                }],
            })
        })
        .collect()
}

fn bind_plates(plates: BTreeMap<String, Vec<&NormalizedSample>>) -> Result<Vec<Container>> {
    let mut containers = Vec::with_capacity(plates.len());
    for (name, samples) in plates {
        let mut used: HashSet<Well> = HashSet::new();
        let mut placements = Vec::with_capacity(samples.len());
        for sample in samples {
            let well = sample.well.ok_or_else(|| TransferError::DuplicateContainerViolation {
                container: name.clone(),
                reason: format!("sample '{}' has no well location", sample.name),
            })?;
            if !used.insert(well) {
                return Err(TransferError::DuplicateContainerViolation {
                    container: name.clone(),
                    reason: format!("well {} is assigned twice", well),
                });
            }
            placements.push(Placement {
                sample: sample.clone(),
                position: Position::Well(well),
            });
        }
        containers.push(Container {
            kind: ContainerType::Plate96,
            name,
            placements,
        });
    }
    Ok(containers)
}
