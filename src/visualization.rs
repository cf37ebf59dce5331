use std::{fmt::Write as _, io::Write};

use anyhow::Result;
use petgraph::{
    dot::{Config, Dot},
    visit::{EdgeRef, IntoEdgeReferences},
};
use rustc_hash::FxHashMap;

use crate::graph::{Dependency, MemorySpace, Task, TaskGraph, TaskId};

pub trait ToDot {
    fn to_dot(&self) -> Result<String>;
}

fn label(task: &Task) -> String {
    let mut label = format!("{} [{:?}]", task.name, task.kind);
    let cmx = task.footprint(MemorySpace::Cmx);
    if cmx > 0 {
        let _ = write!(label, "\\ncmx {cmx}");
    }
    if let Some(time) = task.time {
        let _ = write!(label, "\\nt={time}");
    }
    label
}

/// Data edges are solid, control edges dashed.
impl ToDot for TaskGraph {
    fn to_dot(&self) -> Result<String> {
        Ok(format!(
            "{:?}",
            Dot::with_attr_getters(
                &self.graph,
                &[Config::EdgeNoLabel, Config::NodeNoLabel],
                &|_, e| match e.weight() {
                    Dependency::Data => String::new(),
                    Dependency::Control => "style = dashed".to_string(),
                },
                &|_, (_, task)| format!("label = \"{}\"", label(task)),
            )
        ))
    }
}

/// Write a GraphvizOnline link showing the graph, or only `mark_tasks` and
/// the edges between them.
pub fn display_graph(
    graph: &TaskGraph,
    mark_tasks: Option<&[TaskId]>,
    file_name: &str,
) -> Result<()> {
    let mut file = std::fs::File::create(file_name)?;
    file.write_all(display_graph_text(graph, mark_tasks)?.as_bytes())?;
    Ok(())
}

fn display_graph_text(graph: &TaskGraph, mark_tasks: Option<&[TaskId]>) -> Result<String> {
    let mut subgraph = TaskGraph::new();
    let mut map = FxHashMap::default();
    for id in graph.tasks() {
        if mark_tasks.is_none_or(|m| m.contains(&id)) {
            map.insert(id, subgraph.graph.add_node(graph.task(id).clone()));
        }
    }
    for edge in graph.graph.edge_references() {
        if let (Some(src), Some(dest)) = (map.get(&edge.source()), map.get(&edge.target())) {
            subgraph.graph.add_edge(*src, *dest, *edge.weight());
        }
    }
    Ok(format!(
        "https://dreampuf.github.io/GraphvizOnline/#{}",
        urlencoding::encode(&subgraph.to_dot()?)
    ))
}
