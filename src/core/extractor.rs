use crate::config::ExtractionConfig;
use crate::core::text::{clean_text, sanitize_name};
use crate::domain::model::{
    ContainerSignal, Extraction, FieldSet, Form, FormKind, NormalizedSample, RawSampleRow,
    SampleData, SampleGrid, SampleSet, ServiceRequest, UdfMap, UdfValue, Well,
};
use crate::utils::error::{Result, TransferError};

/// 將請求的自訂表單轉為標準化的樣本、容器與 UDF 結構
#[derive(Debug, Clone)]
pub struct FormExtractor {
    rules: ExtractionConfig,
}

impl FormExtractor {
    pub fn new(rules: ExtractionConfig) -> Self {
        Self { rules }
    }

    pub fn classify(&self, form: &Form) -> FormKind {
        let name = form.name.to_uppercase();
        let skippable = self
            .rules
            .skip_form_patterns
            .iter()
            .any(|pattern| !pattern.is_empty() && name.contains(&pattern.to_uppercase()));

        if skippable {
            FormKind::Skippable
        } else if form.grid.is_some() {
            FormKind::SampleGrid
        } else {
            FormKind::FieldOnly
        }
    }

    pub fn extract(&self, request: &ServiceRequest) -> Result<Extraction> {
        if request.forms.is_empty() {
            return Err(TransferError::NothingToTransfer {
                request_id: request.id.clone(),
            });
        }

        let mut grid_forms = Vec::new();
        let mut field_only = Vec::new();
        let mut skipped_forms = Vec::new();
        for form in &request.forms {
            match self.classify(form) {
                FormKind::SampleGrid => grid_forms.push(form),
                FormKind::FieldOnly => field_only.push(form),
                FormKind::Skippable => {
                    tracing::debug!("⏭️ Request {}: skipping form '{}'", request.id, form.name);
                    skipped_forms.push(form.name.clone());
                }
            }
        }

        if grid_forms.len() > 1 {
            return Err(TransferError::MultipleSampleForms {
                request_id: request.id.clone(),
                forms: grid_forms.iter().map(|f| f.name.clone()).collect(),
            });
        }
        if grid_forms.is_empty() && field_only.is_empty() {
            return Err(TransferError::NothingToTransfer {
                request_id: request.id.clone(),
            });
        }

        let mut field_forms = Vec::new();
        let samples = match grid_forms.first() {
            Some(form) => {
                let (set, form_fields) = self.extract_grid_form(&request.id, form)?;
                if !form_fields.udfs.is_empty() {
                    field_forms.push(form_fields);
                }
                SampleData::Grid(set)
            }
            None => SampleData::NoSampleData,
        };

        for form in field_only {
            field_forms.push(FieldSet {
                form_name: form.name.clone(),
                udfs: self.coerce_fields(&request.id, form.fields.iter().map(|f| (f.id.as_str(), f.value.as_str())))?,
            });
        }

        Ok(Extraction {
            samples,
            field_forms,
            skipped_forms,
        })
    }

    fn extract_grid_form(&self, request_id: &str, form: &Form) -> Result<(SampleSet, FieldSet)> {
        let empty = SampleGrid::default();
        let grid = form.grid.as_ref().unwrap_or(&empty);
        let rows = self.read_rows(request_id, grid)?;

        // 以後綴標記的欄位套用到表單內每一個樣本
        let suffix = self.rules.broadcast_suffix.as_str();
        let mut broadcast = Vec::new();
        let mut form_level = Vec::new();
        for field in &form.fields {
            if field.id == self.rules.container_field {
                continue;
            }
            match field.id.strip_suffix(suffix) {
                Some(base) if !suffix.is_empty() => broadcast.push((field.id.as_str(), base, field.value.as_str())),
                _ => form_level.push((field.id.as_str(), field.value.as_str())),
            }
        }

        let mut broadcast_udfs = UdfMap::new();
        for (id, base, value) in broadcast {
            if let Some(udf) = self.coerce(request_id, id, value)? {
                broadcast_udfs.insert(base.to_string(), udf);
            }
        }

        let samples = rows
            .into_iter()
            .map(|row| self.normalize(request_id, row, &broadcast_udfs))
            .collect::<Result<Vec<_>>>()?;

        let signal = ContainerSignal {
            grid_column: samples
                .iter()
                .any(|s| s.container_hint.is_some())
                .then(|| self.rules.container_column.clone()),
            field_value: form
                .field(&self.rules.container_field)
                .map(clean_text)
                .filter(|v| !v.is_empty()),
        };

        tracing::debug!(
            "🧪 Request {}: form '{}' yielded {} samples",
            request_id,
            form.name,
            samples.len()
        );

        Ok((
            SampleSet {
                request_id: request_id.to_string(),
                form_name: form.name.clone(),
                samples,
                signal,
            },
            FieldSet {
                form_name: form.name.clone(),
                udfs: self.coerce_fields(request_id, form_level.into_iter())?,
            },
        ))
    }

    /// 讀取表格列；完全空白的列略過
    fn read_rows(&self, request_id: &str, grid: &SampleGrid) -> Result<Vec<RawSampleRow>> {
        let name_idx = grid.column_index(&self.rules.sample_name_column);
        let location_idx = grid.column_index(&self.rules.location_column);
        let container_idx = grid.column_index(&self.rules.container_column);
        let label_idx = grid.column_index(&self.rules.reagent_label_column);
        let structural = [name_idx, location_idx, container_idx, label_idx];

        let mut rows = Vec::new();
        for cells in &grid.rows {
            if cells.iter().all(|c| c.trim().is_empty()) {
                continue;
            }
            let cell = |idx: Option<usize>| {
                idx.and_then(|i| cells.get(i))
                    .map(|v| clean_text(v))
                    .filter(|v| !v.is_empty())
            };

            let name = cell(name_idx).ok_or_else(|| TransferError::MalformedField {
                request_id: request_id.to_string(),
                field: self.rules.sample_name_column.clone(),
                value: String::new(),
                reason: "row has data but no sample name".to_string(),
            })?;

            let udfs = grid
                .columns
                .iter()
                .enumerate()
                .filter(|(i, _)| !structural.contains(&Some(*i)))
                .map(|(i, column)| (column.trim().to_string(), cells.get(i).cloned().unwrap_or_default()))
                .collect();

            rows.push(RawSampleRow {
                name,
                udfs,
                location: cell(location_idx),
                container: cell(container_idx),
                reagent_label: cell(label_idx),
            });
        }
        Ok(rows)
    }

    fn normalize(&self, request_id: &str, row: RawSampleRow, broadcast: &UdfMap) -> Result<NormalizedSample> {
        let name = sanitize_name(&row.name);
        if name.is_empty() {
            return Err(TransferError::MalformedField {
                request_id: request_id.to_string(),
                field: self.rules.sample_name_column.clone(),
                value: row.name,
                reason: "sample name has no usable characters".to_string(),
            });
        }

        let well = match &row.location {
            Some(token) => Some(token.parse::<Well>().map_err(|_| TransferError::MalformedLocation {
                request_id: request_id.to_string(),
                sample: name.clone(),
                token: token.clone(),
            })?),
            None => None,
        };

        let mut udfs = broadcast.clone();
        udfs.extend(self.coerce_fields(request_id, row.udfs.iter().map(|(k, v)| (k.as_str(), v.as_str())))?);

        Ok(NormalizedSample {
            name,
            udfs,
            well,
            container_hint: row.container,
            reagent_label: row.reagent_label,
        })
    }

    fn coerce_fields<'f>(
        &self,
        request_id: &str,
        fields: impl Iterator<Item = (&'f str, &'f str)>,
    ) -> Result<UdfMap> {
        let mut udfs = UdfMap::new();
        for (id, value) in fields {
            if let Some(udf) = self.coerce(request_id, id, value)? {
                udfs.insert(id.to_string(), udf);
            }
        }
        Ok(udfs)
    }

    /// 依欄位型別轉換；空白值不產生 UDF（布林欄位除外）
    fn coerce(&self, request_id: &str, field: &str, raw: &str) -> Result<Option<UdfValue>> {
        let value = clean_text(raw);
        let base = field
            .strip_suffix(self.rules.broadcast_suffix.as_str())
            .unwrap_or(field);
        let flagged = |set: &[String]| set.iter().any(|f| f == field || f == base);
        let malformed = |reason: &str| TransferError::MalformedField {
            request_id: request_id.to_string(),
            field: field.to_string(),
            value: value.clone(),
            reason: reason.to_string(),
        };

        if flagged(&self.rules.numeric_fields) {
            if value.is_empty() {
                return Ok(None);
            }
            let digits = value.replace(',', "");
            return digits
                .parse::<i64>()
                .map(|n| Some(UdfValue::Integer(n)))
                .map_err(|_| malformed("expected an integer"));
        }

        if flagged(&self.rules.boolean_fields) {
            return parse_toggle(&value)
                .map(|b| Some(UdfValue::Boolean(b)))
                .ok_or_else(|| malformed("expected a toggle value"));
        }

        if value.is_empty() {
            Ok(None)
        } else {
            Ok(Some(UdfValue::Text(value)))
        }
    }
}

fn parse_toggle(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "on" | "yes" | "y" | "true" | "checked" | "1" | "x" => Some(true),
        "off" | "no" | "n" | "false" | "unchecked" | "0" | "" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{FormField, Researcher};
    use chrono::NaiveDate;

    fn rules() -> ExtractionConfig {
        ExtractionConfig {
            numeric_fields: vec!["Volume".to_string(), "Reactions".to_string()],
            boolean_fields: vec!["Rush".to_string()],
            ..ExtractionConfig::default()
        }
    }

    fn field(id: &str, value: &str) -> FormField {
        FormField {
            id: id.to_string(),
            value: value.to_string(),
        }
    }

    fn grid_form(name: &str, columns: &[&str], rows: &[&[&str]]) -> Form {
        Form {
            id: format!("form-{}", name),
            name: name.to_string(),
            fields: vec![],
            grid: Some(SampleGrid {
                columns: columns.iter().map(|c| c.to_string()).collect(),
                rows: rows
                    .iter()
                    .map(|r| r.iter().map(|c| c.to_string()).collect())
                    .collect(),
            }),
        }
    }

    fn request(forms: Vec<Form>) -> ServiceRequest {
        ServiceRequest {
            id: "1001".to_string(),
            name: "Genotyping run".to_string(),
            request_type: "Transgenic Mouse Genotyping".to_string(),
            owner: Researcher {
                first_name: "Ada".to_string(),
                last_name: "Lovelace".to_string(),
                email: "ada@example.com".to_string(),
            },
            created_on: NaiveDate::from_ymd_opt(2021, 3, 4).unwrap(),
            forms,
            charges: vec![],
            recorded_price: 0.0,
        }
    }

    fn samples(extraction: &Extraction) -> &SampleSet {
        match &extraction.samples {
            SampleData::Grid(set) => set,
            SampleData::NoSampleData => panic!("expected sample data"),
        }
    }

    #[test]
    fn test_extract_grid_with_typed_udfs() {
        let mut form = grid_form(
            "Genotyping",
            &["Sample Name", "Well Location", "Volume", "Rush", "Notes"],
            &[&["Sample #1 (A+B)", "A:1", "1,200", "on", "fresh  tissue"], &["", "", "", "", ""], &["S2", "B09", "", "off", ""]],
        );
        form.fields = vec![field("Species_each_sample", "Mouse"), field("Comments", "handle with care")];

        let extraction = FormExtractor::new(rules()).extract(&request(vec![form])).unwrap();
        let set = samples(&extraction);

        assert_eq!(set.samples.len(), 2);
        let first = &set.samples[0];
        assert_eq!(first.name, "Sample 1 APlusB");
        assert_eq!(first.well, Some("A1".parse().unwrap()));
        assert_eq!(first.udfs.get("Volume"), Some(&UdfValue::Integer(1200)));
        assert_eq!(first.udfs.get("Rush"), Some(&UdfValue::Boolean(true)));
        assert_eq!(first.udfs.get("Notes"), Some(&UdfValue::Text("fresh tissue".to_string())));
        assert_eq!(first.udfs.get("Species"), Some(&UdfValue::Text("Mouse".to_string())));

        let second = &set.samples[1];
        assert_eq!(second.udfs.get("Species"), Some(&UdfValue::Text("Mouse".to_string())));
        assert!(second.udfs.get("Volume").is_none());
        assert_eq!(second.udfs.get("Rush"), Some(&UdfValue::Boolean(false)));

        assert_eq!(extraction.field_forms.len(), 1);
        assert!(extraction.field_forms[0].udfs.contains_key("Comments"));
        assert!(set.signal.grid_column.is_none());
        assert!(set.signal.field_value.is_none());
    }

    #[test]
    fn test_malformed_numeric_field_names_field_and_request() {
        let form = grid_form("Genotyping", &["Sample Name", "Volume"], &[&["S1", "ten"]]);
        let err = FormExtractor::new(rules()).extract(&request(vec![form])).unwrap_err();
        match err {
            TransferError::MalformedField { request_id, field, .. } => {
                assert_eq!(request_id, "1001");
                assert_eq!(field, "Volume");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_malformed_location() {
        let form = grid_form("Genotyping", &["Sample Name", "Well Location"], &[&["S1", "Z99"]]);
        let err = FormExtractor::new(rules()).extract(&request(vec![form])).unwrap_err();
        assert!(matches!(err, TransferError::MalformedLocation { ref token, .. } if token == "Z99"));
    }

    #[test]
    fn test_multiple_sample_forms_is_an_error() {
        let a = grid_form("Genotyping A", &["Sample Name"], &[&["S1"]]);
        let b = grid_form("Genotyping B", &["Sample Name"], &[&["S2"]]);
        let err = FormExtractor::new(rules()).extract(&request(vec![a, b])).unwrap_err();
        assert!(matches!(err, TransferError::MultipleSampleForms { ref forms, .. } if forms.len() == 2));
    }

    #[test]
    fn test_skippable_forms_are_excluded() {
        let grid = grid_form("Sequencing", &["Sample Name"], &[&["S1"]]);
        let quote = grid_form("Request a Quote", &["Sample Name"], &[&["Q1"]]);
        let nq = grid_form("NQ Sequencing", &["Sample Name"], &[&["Q2"]]);

        let extractor = FormExtractor::new(rules());
        assert_eq!(extractor.classify(&quote), FormKind::Skippable);

        let extraction = extractor.extract(&request(vec![grid, quote, nq])).unwrap();
        assert_eq!(extraction.skipped_forms.len(), 2);
        assert_eq!(samples(&extraction).samples[0].name, "S1");
    }

    #[test]
    fn test_field_only_request_has_no_sample_data() {
        let form = Form {
            id: "f1".to_string(),
            name: "Consultation".to_string(),
            fields: vec![field("Reactions", "3"), field("Rush", "yes")],
            grid: None,
        };
        let extraction = FormExtractor::new(rules()).extract(&request(vec![form])).unwrap();
        assert_eq!(extraction.samples, SampleData::NoSampleData);
        assert_eq!(extraction.field_forms[0].udfs.get("Reactions"), Some(&UdfValue::Integer(3)));
        assert_eq!(extraction.field_forms[0].udfs.get("Rush"), Some(&UdfValue::Boolean(true)));
    }

    #[test]
    fn test_nothing_to_transfer() {
        let extractor = FormExtractor::new(rules());
        assert!(matches!(
            extractor.extract(&request(vec![])),
            Err(TransferError::NothingToTransfer { .. })
        ));

        let quote = grid_form("REQUEST A QUOTE", &["Sample Name"], &[&["Q1"]]);
        assert!(matches!(
            extractor.extract(&request(vec![quote])),
            Err(TransferError::NothingToTransfer { .. })
        ));
    }

    #[test]
    fn test_container_signal() {
        let mut form = grid_form(
            "Genotyping",
            &["Sample Name", "Well Location", "Container Name"],
            &[&["S1", "A1", "Plate-7"], &["S2", "A2", "Plate-7"]],
        );
        form.fields = vec![field("Plate Name", "Plate-X")];
        let extraction = FormExtractor::new(rules()).extract(&request(vec![form])).unwrap();
        let set = samples(&extraction);
        assert_eq!(set.signal.grid_column.as_deref(), Some("Container Name"));
        assert_eq!(set.signal.field_value.as_deref(), Some("Plate-X"));
        assert_eq!(set.samples[0].container_hint.as_deref(), Some("Plate-7"));
        // 容器欄位不會變成表單層級的 UDF
        assert!(extraction.field_forms.is_empty());
    }

    #[test]
    fn test_row_without_name_is_malformed() {
        let form = grid_form("Genotyping", &["Sample Name", "Volume"], &[&["", "5"]]);
        assert!(matches!(
            FormExtractor::new(rules()).extract(&request(vec![form])),
            Err(TransferError::MalformedField { .. })
        ));
    }

    #[test]
    fn test_adapter_column_becomes_reagent_label() {
        let form = grid_form(
            "Library Prep",
            &["Sample Name", "Adapter", "Volume"],
            &[&["L1", " N701-S502 ", "5"], &["L2", "", "5"]],
        );
        let extraction = FormExtractor::new(rules()).extract(&request(vec![form])).unwrap();
        let set = samples(&extraction);

        assert_eq!(set.samples[0].reagent_label.as_deref(), Some("N701-S502"));
        assert_eq!(set.samples[1].reagent_label, None);
        assert!(!set.samples[0].udfs.contains_key("Adapter"));
        assert_eq!(set.request_id, "1001");
    }
}
