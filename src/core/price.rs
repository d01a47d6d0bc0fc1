use crate::config::PricingConfig;
use crate::domain::model::ServiceRequest;
use crate::utils::error::{Result, TransferError};

const FLOAT_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq)]
pub struct PriceCheck {
    pub expected: f64,
    pub recorded: f64,
}

/// 以單位定義重新計算預期總價，並與請求上記錄的價格比較
#[derive(Debug, Clone)]
pub struct PriceValidator {
    config: PricingConfig,
}

impl PriceValidator {
    pub fn new(config: PricingConfig) -> Self {
        Self { config }
    }

    pub fn is_enabled(&self) -> bool {
        !self.config.units.is_empty()
    }

    pub fn expected_total(&self, request: &ServiceRequest) -> Result<f64> {
        let mut total = 0.0;
        for charge in &request.charges {
            // 耗材沒有 service id，無從得知正確價格
            if charge.service_id.as_deref().map_or(true, str::is_empty) {
                continue;
            }
            let multiplier = self.config.units.get(&charge.unit).ok_or_else(|| {
                TransferError::UnknownChargeUnit {
                    request_id: request.id.clone(),
                    unit: charge.unit.clone(),
                }
            })?;
            total += charge.quantity * multiplier;
        }
        Ok(total)
    }

    pub fn check(&self, request: &ServiceRequest) -> Result<Option<PriceCheck>> {
        if !self.is_enabled() {
            tracing::debug!("💲 Request {}: no unit definitions, price check skipped", request.id);
            return Ok(None);
        }

        let expected = self.expected_total(request)?;
        let recorded = request.recorded_price;
        if (expected - recorded).abs() > self.config.tolerance + FLOAT_EPSILON {
            return Err(TransferError::PriceMismatch {
                request_id: request.id.clone(),
                expected,
                recorded,
            });
        }
        Ok(Some(PriceCheck { expected, recorded }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{Charge, Researcher};
    use chrono::NaiveDate;

    fn validator(tolerance: f64) -> PriceValidator {
        PriceValidator::new(PricingConfig {
            tolerance,
            units: [("each".to_string(), 1.0), ("prep".to_string(), 11.0)].into_iter().collect(),
        })
    }

    fn charge(unit: &str, quantity: f64) -> Charge {
        Charge {
            service_id: Some(format!("svc-{}", unit)),
            unit: unit.to_string(),
            quantity,
        }
    }

    fn request(charges: Vec<Charge>, recorded_price: f64) -> ServiceRequest {
        ServiceRequest {
            id: "77".to_string(),
            name: "Prep".to_string(),
            request_type: String::new(),
            owner: Researcher {
                first_name: "Grace".to_string(),
                last_name: "Hopper".to_string(),
                email: String::new(),
            },
            created_on: NaiveDate::from_ymd_opt(2022, 6, 1).unwrap(),
            forms: vec![],
            charges,
            recorded_price,
        }
    }

    #[test]
    fn test_matching_price_passes() {
        let req = request(vec![charge("each", 2.0), charge("prep", 1.0)], 13.0);
        let check = validator(0.0).check(&req).unwrap().unwrap();
        assert_eq!(check.expected, 13.0);
    }

    #[test]
    fn test_mismatch_carries_both_values() {
        let req = request(vec![charge("each", 2.0), charge("prep", 1.0)], 12.0);
        match validator(0.0).check(&req) {
            Err(TransferError::PriceMismatch { expected, recorded, .. }) => {
                assert_eq!(expected, 13.0);
                assert_eq!(recorded, 12.0);
            }
            other => panic!("expected PriceMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_tolerance_and_consumables() {
        let mut consumable = charge("box", 4.0);
        consumable.service_id = None;
        let req = request(vec![charge("each", 2.0), consumable], 2.5);
        assert!(validator(0.5).check(&req).is_ok());
        assert!(validator(0.1).check(&req).is_err());
    }

    #[test]
    fn test_unknown_unit() {
        let req = request(vec![charge("hour", 1.0)], 1.0);
        assert!(matches!(
            validator(0.0).check(&req),
            Err(TransferError::UnknownChargeUnit { ref unit, .. }) if unit == "hour"
        ));
    }

    #[test]
    fn test_empty_table_disables_check() {
        let req = request(vec![charge("each", 2.0)], 99.0);
        let disabled = PriceValidator::new(PricingConfig::default());
        assert_eq!(disabled.check(&req).unwrap(), None);
    }
}
