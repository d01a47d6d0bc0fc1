use crate::config::{RouteRule, RoutingConfig};
use crate::domain::model::{Form, Route, StepTarget, Workflow};
use crate::utils::error::{Result, TransferError};
use regex::Regex;
use std::collections::HashSet;

#[derive(Debug, Clone)]
enum NameMatcher {
    Exact(String),
    Pattern(Regex),
    Contains(String),
}

impl NameMatcher {
    fn score(&self) -> u32 {
        match self {
            NameMatcher::Exact(_) => 3,
            NameMatcher::Pattern(_) => 2,
            NameMatcher::Contains(_) => 1,
        }
    }

    fn matches(&self, form_name: &str) -> bool {
        let name = form_name.trim();
        match self {
            NameMatcher::Exact(expected) => name.eq_ignore_ascii_case(expected.trim()),
            NameMatcher::Pattern(re) => re.is_match(name),
            NameMatcher::Contains(part) => name.to_uppercase().contains(&part.to_uppercase()),
        }
    }
}

#[derive(Debug, Clone)]
struct CompiledRule {
    name: String,
    matcher: NameMatcher,
    field_equals: Vec<(String, String)>,
    target: StepTarget,
}

impl CompiledRule {
    fn compile(rule: &RouteRule) -> Result<Self> {
        let matcher = if let Some(name) = &rule.form_name {
            NameMatcher::Exact(name.clone())
        } else if let Some(pattern) = &rule.form_pattern {
            NameMatcher::Pattern(Regex::new(pattern).map_err(|e| {
                TransferError::InvalidConfigValueError {
                    field: format!("routing.rules.{}.form_pattern", rule.name),
                    value: pattern.clone(),
                    reason: e.to_string(),
                }
            })?)
        } else if let Some(part) = &rule.form_contains {
            NameMatcher::Contains(part.clone())
        } else {
            return Err(TransferError::MissingConfigError {
                field: format!("routing.rules.{}.form_name", rule.name),
            });
        };

        Ok(Self {
            name: rule.name.clone(),
            matcher,
            field_equals: rule
                .field_equals
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            target: StepTarget {
                workflow: rule.workflow.clone(),
                step: rule.step.clone(),
            },
        })
    }

    /// 不符合時回傳 None，否則回傳具體程度分數
    fn score(&self, form: &Form) -> Option<u32> {
        if !self.matcher.matches(&form.name) {
            return None;
        }
        let fields_match = self.field_equals.iter().all(|(id, expected)| {
            form.field(id)
                .map(|v| v.trim().eq_ignore_ascii_case(expected.trim()))
                .unwrap_or(false)
        });
        fields_match.then(|| self.matcher.score() + self.field_equals.len() as u32)
    }
}

/// 依靜態規則表把表單對應到工作流程與步驟
#[derive(Debug, Clone)]
pub struct WorkflowRouter {
    rules: Vec<CompiledRule>,
    ignorable: HashSet<String>,
}

impl WorkflowRouter {
    pub fn new(config: &RoutingConfig) -> Result<Self> {
        let rules = config
            .rules
            .iter()
            .map(CompiledRule::compile)
            .collect::<Result<Vec<_>>>()?;
        let ignorable = config
            .ignorable_forms
            .iter()
            .map(|f| f.trim().to_uppercase())
            .collect();
        Ok(Self { rules, ignorable })
    }

    fn is_ignorable(&self, form_name: &str) -> bool {
        let upper = form_name.trim().to_uppercase();
        self.ignorable
            .iter()
            .any(|ignored| upper == *ignored || upper.contains(ignored.as_str()))
    }

    /// 最佳匹配；分數相同時取規則表中較前面的
    pub fn route(&self, request_id: &str, form: &Form) -> Result<Route> {
        if self.is_ignorable(&form.name) {
            return Ok(Route::Ignored);
        }

        let mut best: Option<(&CompiledRule, u32)> = None;
        for rule in &self.rules {
            if let Some(score) = rule.score(form) {
                if best.map_or(true, |(_, s)| score > s) {
                    best = Some((rule, score));
                }
            }
        }

        match best {
            Some((rule, score)) => {
                tracing::debug!(
                    "🧭 Request {}: form '{}' matched rule '{}' (score {})",
                    request_id,
                    form.name,
                    rule.name,
                    score
                );
                Ok(Route::Step(rule.target.clone()))
            }
            None => Err(TransferError::UnroutableForm {
                request_id: request_id.to_string(),
                form: form.name.clone(),
            }),
        }
    }

    /// 解析路由並確認目的工作流程在 Target 端為啟用狀態
    pub fn resolve(&self, request_id: &str, form: &Form, active: &[Workflow]) -> Result<Route> {
        let route = self.route(request_id, form)?;
        if let Route::Step(target) = &route {
            let is_active = active.iter().any(|w| w.name == target.workflow);
            if !is_active {
                return Err(TransferError::InactiveWorkflow {
                    form: form.name.clone(),
                    workflow: target.workflow.clone(),
                });
            }
        }
        Ok(route)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::FormField;

    fn rule(name: &str, f: impl FnOnce(&mut RouteRule)) -> RouteRule {
        let mut rule = RouteRule {
            name: name.to_string(),
            form_name: None,
            form_contains: None,
            form_pattern: None,
            field_equals: Default::default(),
            workflow: format!("{} workflow", name),
            step: format!("{} step", name),
        };
        f(&mut rule);
        rule
    }

    fn form(name: &str, fields: &[(&str, &str)]) -> Form {
        Form {
            id: "f".to_string(),
            name: name.to_string(),
            fields: fields
                .iter()
                .map(|(id, value)| FormField {
                    id: id.to_string(),
                    value: value.to_string(),
                })
                .collect(),
            grid: None,
        }
    }

    fn router() -> WorkflowRouter {
        WorkflowRouter::new(&RoutingConfig {
            ignorable_forms: vec!["Request a Quote".to_string()],
            rules: vec![
                rule("contains", |r| r.form_contains = Some("agena".to_string())),
                rule("pattern", |r| r.form_pattern = Some("^Agena .*Genotyping$".to_string())),
                rule("exact", |r| r.form_name = Some("Agena Mouse Genotyping".to_string())),
                rule("cells", |r| {
                    r.form_contains = Some("agena".to_string());
                    r.field_equals.insert("Sample_Type_each_sample".to_string(), "cells".to_string());
                }),
            ],
        })
        .unwrap()
    }

    fn workflow(name: &str) -> Workflow {
        Workflow {
            name: name.to_string(),
            steps: vec![],
        }
    }

    #[test]
    fn test_best_match_prefers_exact() {
        let route = router().route("1", &form("Agena Mouse Genotyping", &[])).unwrap();
        assert_eq!(
            route,
            Route::Step(StepTarget {
                workflow: "exact workflow".to_string(),
                step: "exact step".to_string(),
            })
        );

        let route = router().route("1", &form("Agena Rat Genotyping", &[])).unwrap();
        assert!(matches!(route, Route::Step(ref t) if t.workflow == "pattern workflow"));

        let route = router().route("1", &form("Custom AGENA panel", &[])).unwrap();
        assert!(matches!(route, Route::Step(ref t) if t.workflow == "contains workflow"));
    }

    #[test]
    fn test_field_predicate_adds_specificity() {
        let cells = form("Custom Agena panel", &[("Sample_Type_each_sample", "Cells")]);
        let route = router().route("1", &cells).unwrap();
        assert!(matches!(route, Route::Step(ref t) if t.workflow == "cells workflow"));
    }

    #[test]
    fn test_ignorable_and_unroutable() {
        assert_eq!(router().route("1", &form("REQUEST A QUOTE", &[])).unwrap(), Route::Ignored);
        assert!(matches!(
            router().route("9", &form("Sanger Sequencing", &[])),
            Err(TransferError::UnroutableForm { ref request_id, .. }) if request_id == "9"
        ));
    }

    #[test]
    fn test_inactive_workflow_rejected() {
        let r = router();
        let f = form("Agena Mouse Genotyping", &[]);
        assert!(r.resolve("1", &f, &[workflow("exact workflow")]).is_ok());
        assert!(matches!(
            r.resolve("1", &f, &[workflow("pattern workflow")]),
            Err(TransferError::InactiveWorkflow { .. })
        ));
    }
}
