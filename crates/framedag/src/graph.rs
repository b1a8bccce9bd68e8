//! # Dependency Graph & Sorter
//!
//! Builds the acyclic dependency structure over the registered units and
//! produces the frame's fixed execution order.
//!
//! The edge set is exactly the union of each unit's declared dependencies;
//! nothing is stored separately. Everything here is recomputed when the
//! registered set or its edges change and never during an active frame,
//! which is what lets every thread read the resulting order without
//! synchronization.
//!
//! ## Sort order
//!
//! 1. **DependentCount descending** - units more units are waiting on start
//!    first, shortening the critical path.
//! 2. **Rolling-average duration descending** - longer units start earlier
//!    so dependents become ready while other threads still have work.
//! 3. **Registration order ascending** - keeps the sort deterministic for
//!    equal keys.

use std::time::Duration;

/// Sort/traversal view of one registered unit.
///
/// The scheduler materializes these from its arena at sort time; index in
/// the slice equals the unit's arena index.
pub(crate) struct GraphNode<'a> {
    /// Display name, used in cycle reports.
    pub name: &'a str,
    /// Tombstoned units stay in the arena but leave the graph.
    pub alive: bool,
    /// Main-thread-only units sort into their own list.
    pub main_thread: bool,
    /// Arena indices of this unit's dependencies.
    pub deps: &'a [u32],
    /// Current rolling-average execution time.
    pub mean_cost: Duration,
}

/// The frame's fixed execution orders.
#[derive(Clone, Debug, Default)]
pub(crate) struct ExecutionPlan {
    /// Pool-eligible units, highest priority first.
    pub worker_order: Vec<u32>,
    /// Main-thread-only units, highest priority first.
    pub main_order: Vec<u32>,
}

/// DFS coloring for cycle detection.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    /// Not yet visited.
    White,
    /// On the current DFS path.
    Grey,
    /// Fully explored.
    Black,
}

/// Verifies the declared dependencies are acyclic.
///
/// Runs a full traversal with in-progress/visited marking. On failure,
/// returns the names of the units on the detected cycle, in walk order.
pub(crate) fn detect_cycle(nodes: &[GraphNode<'_>]) -> Result<(), Vec<String>> {
    let mut marks = vec![Mark::White; nodes.len()];

    for start in 0..nodes.len() {
        if nodes[start].alive && marks[start] == Mark::White {
            let mut path = Vec::new();
            if let Some(cycle) = visit(nodes, start, &mut marks, &mut path) {
                return Err(cycle);
            }
        }
    }
    Ok(())
}

/// DFS step. Returns the offending cycle if one is found below `index`.
fn visit(
    nodes: &[GraphNode<'_>],
    index: usize,
    marks: &mut [Mark],
    path: &mut Vec<usize>,
) -> Option<Vec<String>> {
    marks[index] = Mark::Grey;
    path.push(index);

    for &dep in nodes[index].deps {
        let dep = dep as usize;
        if !nodes[dep].alive {
            continue;
        }
        match marks[dep] {
            Mark::Grey => {
                // Back edge: the cycle is the path suffix from `dep`.
                let from = path.iter().position(|&i| i == dep).unwrap_or(0);
                return Some(path[from..].iter().map(|&i| nodes[i].name.to_owned()).collect());
            }
            Mark::White => {
                if let Some(cycle) = visit(nodes, dep, marks, path) {
                    return Some(cycle);
                }
            }
            Mark::Black => {}
        }
    }

    path.pop();
    marks[index] = Mark::Black;
    None
}

/// Computes each unit's transitive dependent count.
///
/// For unit U this is the number of registered units whose transitive
/// dependency closure contains U: how much of the frame is waiting,
/// directly or indirectly, on U.
pub(crate) fn dependent_counts(nodes: &[GraphNode<'_>]) -> Vec<usize> {
    let mut counts = vec![0_usize; nodes.len()];
    let mut reached = vec![false; nodes.len()];
    let mut stack = Vec::new();

    for start in 0..nodes.len() {
        if !nodes[start].alive {
            continue;
        }
        reached.iter_mut().for_each(|r| *r = false);
        stack.clear();
        stack.extend(nodes[start].deps.iter().map(|&d| d as usize));

        // Everything reachable along dependency edges from `start` has
        // `start` as a dependent.
        while let Some(index) = stack.pop() {
            if reached[index] || !nodes[index].alive {
                continue;
            }
            reached[index] = true;
            counts[index] += 1;
            stack.extend(nodes[index].deps.iter().map(|&d| d as usize));
        }
    }
    counts
}

/// Produces the frame's execution orders.
///
/// Only called after [`detect_cycle`] has passed; the orders are immutable
/// for as long as the topology is.
pub(crate) fn build_plan(nodes: &[GraphNode<'_>]) -> ExecutionPlan {
    let counts = dependent_counts(nodes);

    let mut order: Vec<u32> = (0..nodes.len() as u32)
        .filter(|&i| nodes[i as usize].alive)
        .collect();
    order.sort_unstable_by(|&a, &b| {
        let (a, b) = (a as usize, b as usize);
        counts[b]
            .cmp(&counts[a])
            .then_with(|| nodes[b].mean_cost.cmp(&nodes[a].mean_cost))
            .then_with(|| a.cmp(&b))
    });

    let (main_order, worker_order) = order
        .into_iter()
        .partition(|&i| nodes[i as usize].main_thread);

    ExecutionPlan {
        worker_order,
        main_order,
    }
}
