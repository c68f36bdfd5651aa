//! # Custom metric keys
//!
//! Two generations of clients encode custom metrics differently:
//!
//! * current (revision >= 5): `C~~<graph>~~<column>=<int>`
//! * legacy (revision < 5): `Custom<Column_Name>=<int>`, always on the
//!   [`DEFAULT_GRAPH`] graph, underscores standing in for spaces.
//!
//! This module only recognises keys. Turning names into columns needs the
//! graph repository and happens in the services layer.

use crate::codec::Fields;
use crate::models::RawMetric;

/// Graph that receives every legacy custom metric.
pub const DEFAULT_GRAPH: &str = "Default";

const KEY_DELIMITER: &str = "~~";
const CURRENT_PREFIX: &str = "C";
const LEGACY_PREFIX: &str = "Custom";

/// Which key encoding a report uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricScheme {
    Current,
    Legacy,
}

impl MetricScheme {
    pub fn for_revision(revision: i32) -> Self {
        if revision >= 5 {
            MetricScheme::Current
        } else {
            MetricScheme::Legacy
        }
    }

    /// Collects every field that encodes a metric under this scheme.
    /// Keys of the wrong shape and non-integer values are skipped.
    pub fn extract(self, fields: &Fields) -> Vec<RawMetric> {
        fields
            .iter()
            .filter_map(|(key, value)| {
                let value = parse_metric_value(value)?;
                let (graph_name, column_name) = match self {
                    MetricScheme::Current => split_current_key(key)?,
                    MetricScheme::Legacy => split_legacy_key(key)?,
                };
                Some(RawMetric {
                    graph_name,
                    column_name,
                    value,
                })
            })
            .collect()
    }
}

/// Metric values are 32-bit integers on the wire.
fn parse_metric_value(raw: &str) -> Option<i64> {
    raw.parse::<i32>().ok().map(i64::from)
}

/// `C~~Graph~~Column` -> `("Graph", "Column")`.
///
/// Trailing empty pieces are ignored before counting, so `C~~Graph~~` has
/// only two pieces and is rejected.
fn split_current_key(key: &str) -> Option<(String, String)> {
    if !key.starts_with(CURRENT_PREFIX) {
        return None;
    }

    let mut parts: Vec<&str> = key.split(KEY_DELIMITER).collect();
    while parts.last().is_some_and(|part| part.is_empty()) {
        parts.pop();
    }

    match parts.as_slice() {
        [_marker, graph, column] => Some(((*graph).to_owned(), (*column).to_owned())),
        _ => None,
    }
}

/// `CustomPlayers_Online` -> `("Default", "Players Online")`.
fn split_legacy_key(key: &str) -> Option<(String, String)> {
    let column = key.strip_prefix(LEGACY_PREFIX)?;
    Some((DEFAULT_GRAPH.to_owned(), column.replace('_', " ")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::parse_fields;

    #[test]
    fn current_scheme_reads_graph_and_column() {
        let fields = parse_fields("C~~Players~~Total=42&guid=x");
        let metrics = MetricScheme::Current.extract(&fields);
        assert_eq!(
            metrics,
            vec![RawMetric {
                graph_name: "Players".into(),
                column_name: "Total".into(),
                value: 42,
            }]
        );
    }

    #[test]
    fn current_scheme_skips_wrong_shapes() {
        let fields = parse_fields(
            "C~~OnlyGraph=1&C~~A~~B~~C=2&X~~A~~B=3&C~~A~~B=notanumber&C~~Graph~~=4&C~~A~~B=99999999999",
        );
        assert!(MetricScheme::Current.extract(&fields).is_empty());
    }

    #[test]
    fn current_scheme_ignores_legacy_keys() {
        let fields = parse_fields("CustomPlayers=3");
        assert!(MetricScheme::Current.extract(&fields).is_empty());
    }

    #[test]
    fn legacy_scheme_maps_onto_default_graph() {
        let fields = parse_fields("CustomPlayers_Online=10&Other=1");
        let metrics = MetricScheme::Legacy.extract(&fields);
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].graph_name, DEFAULT_GRAPH);
        assert_eq!(metrics[0].column_name, "Players Online");
        assert_eq!(metrics[0].value, 10);
    }

    #[test]
    fn legacy_scheme_accepts_negative_values() {
        let fields = parse_fields("CustomBalance=-5");
        assert_eq!(MetricScheme::Legacy.extract(&fields)[0].value, -5);
    }

    #[test]
    fn scheme_follows_revision() {
        assert_eq!(MetricScheme::for_revision(4), MetricScheme::Legacy);
        assert_eq!(MetricScheme::for_revision(5), MetricScheme::Current);
        assert_eq!(MetricScheme::for_revision(7), MetricScheme::Current);
    }
}
