use crate::prelude::*;
use proptest::prelude::*;

mod control_edges;
mod pipeline;
mod wiring;

/// Diamond `a -> {b, c} -> d` with the given footprints for `b` and `c`.
pub fn diamond(b: u64, c: u64) -> (TaskGraph, [TaskId; 4]) {
    let mut graph = TaskGraph::new();
    let ta = graph.add_task(Task::dma("a").with_cmx(10)).finish();
    let tb = graph
        .add_task(Task::compute("b", 2).with_cmx(b))
        .after(ta)
        .finish();
    let tc = graph
        .add_task(Task::compute("c", 2).with_cmx(c))
        .after(ta)
        .finish();
    let td = graph
        .add_task(Task::dma("d").with_cmx(10))
        .after_all([tb, tc])
        .finish();
    (graph, [ta, tb, tc, td])
}

/// Chain of DMA tasks, one per footprint.
pub fn chain(footprints: &[u64]) -> (TaskGraph, Vec<TaskId>) {
    let mut graph = TaskGraph::new();
    let mut ids: Vec<TaskId> = vec![];
    for (i, &size) in footprints.iter().enumerate() {
        let mut new = graph.add_task(Task::dma(format!("t{i}")).with_cmx(size));
        if let Some(&prev) = ids.last() {
            new = new.after(prev);
        }
        ids.push(new.finish());
    }
    (graph, ids)
}

/// DAG with one task per weight and an edge `i -> j` for every listed pair
/// with `i < j`. Task kinds cycle through compute, DMA and software.
pub fn random_dag(weights: &[u64], edges: &[(usize, usize)]) -> TaskGraph {
    let mut graph = TaskGraph::new();
    let ids: Vec<TaskId> = weights
        .iter()
        .enumerate()
        .map(|(i, &w)| {
            let task = match i % 3 {
                0 => Task::compute(format!("n{i}"), 1 + i % 4),
                1 => Task::dma(format!("n{i}")).with_ddr(32),
                _ => Task::software(format!("n{i}")),
            };
            graph.add_task(task.with_cmx(w)).finish()
        })
        .collect();
    for &(i, j) in edges {
        if i < j {
            graph.add_dependency(ids[i], ids[j]);
        }
    }
    graph
}

/// Random DAG inputs: footprints in multiples of 64 bytes and candidate edges.
pub fn dag_strategy(max_tasks: usize) -> impl Strategy<Value = (Vec<u64>, Vec<(usize, usize)>)> {
    (2..max_tasks).prop_flat_map(|n| {
        (
            proptest::collection::vec((0u64..8).prop_map(|w| w * 64), n),
            proptest::collection::vec((0..n, 0..n), 0..2 * n),
        )
    })
}

/// Heaviest set of pairwise unordered tasks, by exhaustive search.
pub fn brute_force_max_cut(graph: &TaskGraph) -> u64 {
    let ids: Vec<TaskId> = graph.tasks().collect();
    let n = ids.len();
    let mut comparable = vec![vec![false; n]; n];
    for i in 0..n {
        for j in 0..n {
            comparable[i][j] = i != j && graph.has_path(ids[i], ids[j]);
        }
    }
    (0u32..1 << n)
        .filter(|mask| {
            (0..n).all(|i| {
                (0..n).all(|j| {
                    mask & (1 << i) == 0 || mask & (1 << j) == 0 || !comparable[i][j]
                })
            })
        })
        .map(|mask| {
            (0..n)
                .filter(|i| mask & (1 << i) != 0)
                .map(|i| graph.task(ids[i]).cmx_footprint())
                .sum::<u64>()
        })
        .max()
        .unwrap_or(0)
}

/// Ensure every dependency of the graph runs forward in time
pub fn assert_topological(graph: &TaskGraph, scheduled: &[ScheduledTask]) {
    let time: FxHashMap<TaskId, usize> = scheduled.iter().map(|op| (op.task, op.time)).collect();
    assert_eq!(time.len(), graph.len(), "not every task was scheduled");
    for (from, to, kind) in graph.dependencies() {
        assert!(
            time[&from] < time[&to],
            "{kind:?} edge {} -> {} runs at {} -> {}",
            graph.task(from).name,
            graph.task(to).name,
            time[&from],
            time[&to]
        );
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(10))]
    #[test]
    fn test_levels_follow_edges((weights, edges) in dag_strategy(10)) {
        let graph = random_dag(&weights, &edges);
        let levels = graph.levels().unwrap();
        for (from, to, _) in graph.dependencies() {
            prop_assert!(levels[&from] < levels[&to]);
        }
    }

    #[test]
    fn test_topological_order_is_deterministic((weights, edges) in dag_strategy(12)) {
        let graph = random_dag(&weights, &edges);
        let order = graph.topological_order().unwrap();
        prop_assert_eq!(order.clone(), graph.clone().topological_order().unwrap());
        let position: FxHashMap<TaskId, usize> =
            order.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        for (from, to, _) in graph.dependencies() {
            prop_assert!(position[&from] < position[&to]);
        }
    }
}

#[test]
fn test_task_footprints_and_demand() {
    let task = Task::compute("conv", 5)
        .with_cmx(256)
        .with_cmx(128)
        .with_ddr(4096);
    assert_eq!(task.cmx_footprint(), 384);
    assert_eq!(task.footprint(MemorySpace::Ddr), 4096);
    assert!(task.touches(MemorySpace::Ddr));
    assert_eq!(task.barrier_demand(), 5);
    assert_eq!(Task::dma("copy").barrier_demand(), 1);
    assert_eq!(Task::software("softmax").barrier_demand(), 1);
    assert_eq!(Task::control("marker").barrier_demand(), 0);
    assert_eq!(Task::compute("empty", 0).barrier_demand(), 1);
}

#[test]
fn test_control_edge_is_idempotent() {
    let (mut graph, [a, b, c, _]) = diamond(100, 100);
    assert!(graph.add_control_edge(b, c));
    assert!(!graph.add_control_edge(b, c));
    assert!(!graph.add_control_edge(a, b));
    assert_eq!(graph.control_edge_count(), 1);
    assert!(graph.has_path(b, c));
}

#[test]
#[should_panic(expected = "closes a cycle")]
fn test_control_edge_rejects_cycle() {
    let (mut graph, [a, _, _, d]) = diamond(100, 100);
    graph.add_control_edge(d, a);
}

#[test]
fn test_cycle_is_reported() {
    let (mut graph, ids) = chain(&[64, 64, 64]);
    graph.graph.add_edge(ids[2], ids[0], Dependency::Data);
    assert!(matches!(
        graph.topological_order(),
        Err(ScheduleError::CyclicGraph { .. })
    ));
}

#[test]
fn test_to_dot_marks_control_edges() {
    let (mut graph, [_, b, c, _]) = diamond(100, 100);
    graph.add_control_edge(b, c);
    let dot = graph.to_dot().unwrap();
    assert!(dot.contains("style = dashed"));
    assert!(dot.contains("cmx 100"));
}

#[test]
fn test_display_graph_writes_link() {
    let (graph, [a, b, _, _]) = diamond(100, 100);
    let path = std::env::temp_dir().join("vpusched_display_graph.txt");
    let path = path.to_str().unwrap();
    crate::visualization::display_graph(&graph, Some(&[a, b]), path).unwrap();
    let link = std::fs::read_to_string(path).unwrap();
    assert!(link.starts_with("https://dreampuf.github.io/GraphvizOnline/#"));
}
