use crate::domain::model::RequestSummary;
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryPlan {
    /// 本次要處理的請求，依年份與編號排序
    pub pending: Vec<RequestSummary>,
    /// 下次掃描的起始年份
    pub earliest_year: i32,
}

/// 從 Source 的請求清單扣除已轉移與冷卻中的請求
///
/// 起始年份取所有未轉移請求中最小的年份（包含冷卻中的），
/// 全部轉移完成時取 `current_year`。
pub fn plan_discovery(
    all: &[RequestSummary],
    transferred: &HashSet<String>,
    excluded: &HashSet<String>,
    current_year: i32,
) -> DiscoveryPlan {
    let untransferred: Vec<&RequestSummary> = all
        .iter()
        .filter(|r| !transferred.contains(&r.id))
        .collect();

    let earliest_year = untransferred
        .iter()
        .map(|r| r.year)
        .min()
        .unwrap_or(current_year);

    let mut seen = HashSet::new();
    let mut pending: Vec<RequestSummary> = untransferred
        .into_iter()
        .filter(|r| !excluded.contains(&r.id))
        .filter(|r| seen.insert(r.id.clone()))
        .cloned()
        .collect();
    pending.sort_by(|a, b| a.year.cmp(&b.year).then_with(|| a.id.cmp(&b.id)));

    DiscoveryPlan {
        pending,
        earliest_year,
    }
}
