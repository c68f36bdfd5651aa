//! # Custom metric resolution
//!
//! Maps the `(graph, column, value)` names a report carried onto stored
//! columns and collects them into a [`WritePlan`].

use std::collections::HashMap;

use domains::{Graph, GraphRepository, MetricScheme, Plugin, RawMetric, WritePlan};

pub struct MetricResolver<'a> {
    graphs: &'a dyn GraphRepository,
}

impl<'a> MetricResolver<'a> {
    pub fn new(graphs: &'a dyn GraphRepository) -> Self {
        Self { graphs }
    }

    /// Resolves every metric it can and adds it to `plan`.
    ///
    /// A metric whose graph or column cannot be resolved, or whose current
    /// scheme graph is inactive, is dropped on its own. Returns how many
    /// metrics were dropped.
    pub async fn resolve_into(
        &self,
        plugin: &Plugin,
        scheme: MetricScheme,
        metrics: &[RawMetric],
        plan: &mut WritePlan,
    ) -> usize {
        // Graph lookups are repeated per column otherwise.
        let mut graphs: HashMap<&str, Option<Graph>> = HashMap::new();
        let mut dropped = 0;

        for metric in metrics {
            let graph_name = metric.graph_name.as_str();
            if !graphs.contains_key(graph_name) {
                let graph = self.load_graph(plugin, graph_name).await;
                graphs.insert(graph_name, graph);
            }

            let graph = match graphs.get(graph_name) {
                Some(Some(graph)) => graph,
                _ => {
                    dropped += 1;
                    continue;
                }
            };

            // Legacy reports predate graph toggling; only named graphs can be
            // switched off.
            if scheme == MetricScheme::Current && !graph.active {
                tracing::debug!(graph = graph_name, "skipping metric for inactive graph");
                dropped += 1;
                continue;
            }

            match self.graphs.load_column(graph, &metric.column_name).await {
                Ok(Some(column)) => plan.insert(column.id, metric.value),
                Ok(None) => {
                    tracing::debug!(
                        graph = graph_name,
                        column = %metric.column_name,
                        "unknown column"
                    );
                    dropped += 1;
                }
                Err(err) => {
                    tracing::warn!(
                        graph = graph_name,
                        column = %metric.column_name,
                        error = %err,
                        "column lookup failed"
                    );
                    dropped += 1;
                }
            }
        }

        dropped
    }

    async fn load_graph(&self, plugin: &Plugin, name: &str) -> Option<Graph> {
        match self.graphs.load_graph(plugin, name).await {
            Ok(graph) => {
                if graph.is_none() {
                    tracing::debug!(plugin = %plugin.name, graph = name, "unknown graph");
                }
                graph
            }
            Err(err) => {
                tracing::warn!(
                    plugin = %plugin.name,
                    graph = name,
                    error = %err,
                    "graph lookup failed"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domains::{Column, MockGraphRepository, StorageError, DEFAULT_GRAPH};

    fn plugin() -> Plugin {
        Plugin {
            id: 1,
            name: "Essentials".into(),
            global_hits: 0,
        }
    }

    fn metric(graph: &str, column: &str, value: i64) -> RawMetric {
        RawMetric {
            graph_name: graph.into(),
            column_name: column.into(),
            value,
        }
    }

    /// Graph ids are the name length and column ids are derived from them.
    /// "Hidden" is inactive, "Broken" fails, "Missing" does not exist.
    fn repository() -> MockGraphRepository {
        let mut graphs = MockGraphRepository::new();
        graphs.expect_load_graph().returning(|plugin: &Plugin, name: &str| match name {
            "Missing" => Ok(None),
            "Broken" => Err(StorageError::Backend("timeout".into())),
            _ => Ok(Some(Graph {
                id: name.len() as i32,
                plugin_id: plugin.id,
                name: name.to_owned(),
                active: name != "Hidden",
            })),
        });
        graphs.expect_load_column().returning(|graph: &Graph, name: &str| {
            if name == "Nope" {
                return Ok(None);
            }
            Ok(Some(Column {
                id: graph.id * 100 + name.len() as i32,
                graph_id: graph.id,
                name: name.to_owned(),
            }))
        });
        graphs
    }

    #[tokio::test]
    async fn resolves_active_graph_columns() {
        let graphs = repository();
        let mut plan = WritePlan::new(1, 1, 10);
        let dropped = MetricResolver::new(&graphs)
            .resolve_into(
                &plugin(),
                MetricScheme::Current,
                &[metric("Players", "Total", 42)],
                &mut plan,
            )
            .await;

        assert_eq!(dropped, 0);
        let points: Vec<_> = plan.points().collect();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].column_id, 7 * 100 + 5);
        assert_eq!(points[0].value, 42);
    }

    #[tokio::test]
    async fn inactive_graph_is_skipped_for_current_scheme() {
        let graphs = repository();
        let mut plan = WritePlan::new(1, 1, 10);
        let dropped = MetricResolver::new(&graphs)
            .resolve_into(
                &plugin(),
                MetricScheme::Current,
                &[metric("Hidden", "Total", 1)],
                &mut plan,
            )
            .await;

        assert_eq!(dropped, 1);
        assert!(plan.is_empty());
    }

    #[tokio::test]
    async fn failures_drop_single_metrics_only() {
        let graphs = repository();
        let mut plan = WritePlan::new(1, 1, 10);
        let metrics = [
            metric("Missing", "A", 1),
            metric("Broken", "A", 2),
            metric("Players", "Nope", 3),
            metric("Players", "Online", 4),
        ];
        let dropped = MetricResolver::new(&graphs)
            .resolve_into(&plugin(), MetricScheme::Current, &metrics, &mut plan)
            .await;

        assert_eq!(dropped, 3);
        assert_eq!(plan.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_columns_keep_last_value() {
        let graphs = repository();
        let mut plan = WritePlan::new(1, 1, 10);
        let metrics = [
            metric(DEFAULT_GRAPH, "Players Online", 1),
            metric(DEFAULT_GRAPH, "Players Online", 9),
        ];
        MetricResolver::new(&graphs)
            .resolve_into(&plugin(), MetricScheme::Legacy, &metrics, &mut plan)
            .await;

        let points: Vec<_> = plan.points().collect();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].value, 9);
    }

    #[tokio::test]
    async fn graph_is_loaded_once_per_report() {
        let mut graphs = MockGraphRepository::new();
        graphs.expect_load_graph().times(1).returning(|plugin: &Plugin, name: &str| {
            Ok(Some(Graph {
                id: 1,
                plugin_id: plugin.id,
                name: name.to_owned(),
                active: true,
            }))
        });
        graphs.expect_load_column().times(2).returning(|graph: &Graph, name: &str| {
            Ok(Some(Column {
                id: name.len() as i32,
                graph_id: graph.id,
                name: name.to_owned(),
            }))
        });

        let mut plan = WritePlan::new(1, 1, 10);
        let metrics = [metric(DEFAULT_GRAPH, "A", 1), metric(DEFAULT_GRAPH, "BB", 2)];
        MetricResolver::new(&graphs)
            .resolve_into(&plugin(), MetricScheme::Legacy, &metrics, &mut plan)
            .await;
        assert_eq!(plan.len(), 2);
    }
}
