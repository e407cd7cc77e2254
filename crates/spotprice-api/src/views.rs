//! View types for the chart page.
//!
//! Selector options carry their own `selected` flag and the series is
//! pre-encoded, so the template never compares or serializes anything.

use crate::query::PriceSeries;

/// One `<option>` of a selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Choice {
    pub value: String,
    pub label: String,
    pub selected: bool,
}

impl Choice {
    pub fn new(value: impl Into<String>, label: impl Into<String>, selected: bool) -> Self {
        Self {
            value: value.into(),
            label: label.into(),
            selected,
        }
    }
}

/// Options for `values`, marking `current`. A current value missing from
/// the stored list is still offered so the page reflects the request.
pub fn choices(values: Vec<String>, current: &str) -> Vec<Choice> {
    let mut values = values;
    if !values.iter().any(|v| v == current) {
        values.push(current.to_string());
        values.sort();
    }
    values
        .into_iter()
        .map(|v| {
            let selected = v == current;
            Choice::new(v.clone(), v, selected)
        })
        .collect()
}

pub fn window_choices(windows: &[u32], current: u32) -> Vec<Choice> {
    windows
        .iter()
        .map(|&days| {
            let label = if days == 1 {
                "1 day".to_string()
            } else {
                format!("{days} days")
            };
            Choice::new(days.to_string(), label, days == current)
        })
        .collect()
}

/// Per-zone summary row under the chart.
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneSummary {
    pub zone: String,
    pub points: usize,
    pub latest: String,
    pub low: String,
    pub high: String,
}

pub fn zone_summaries(series: &PriceSeries) -> Vec<ZoneSummary> {
    series
        .iter()
        .filter_map(|(zone, points)| {
            let (_, latest) = points.last()?;
            let low = points.iter().map(|(_, p)| *p).fold(f64::INFINITY, f64::min);
            let high = points.iter().map(|(_, p)| *p).fold(f64::NEG_INFINITY, f64::max);
            Some(ZoneSummary {
                zone: zone.clone(),
                points: points.len(),
                latest: format_price(*latest),
                low: format_price(low),
                high: format_price(high),
            })
        })
        .collect()
}

fn format_price(p: f64) -> String {
    format!("${p:.4}")
}

/// Series as JSON safe to embed in a `<script>` element.
pub fn series_json(series: &PriceSeries) -> String {
    serde_json::to_string(series)
        .unwrap_or_else(|_| "{}".to_string())
        .replace("</", "<\\/")
}
