use picker_artifact::PayloadKind;
use picker_dag::{DagError, RunState, StageGraph, StageSpec, StageStatus};
use proptest::prelude::*;
use std::collections::HashMap;

fn spec(name: &str, after: Vec<String>) -> StageSpec {
    StageSpec::new(name, "noop", PayloadKind::Json).after(after)
}

/// Random DAG: stage `i` may only depend on stages `< i`, declared in a
/// shuffled order so declaration order and dependency order disagree.
fn arb_dag() -> impl Strategy<Value = Vec<StageSpec>> {
    (1..16usize)
        .prop_flat_map(|n| {
            let edges = proptest::collection::vec((0..n, 0..n), 0..(n * 2));
            let perm = Just((0..n).collect::<Vec<_>>()).prop_shuffle();
            (Just(n), edges, perm)
        })
        .prop_map(|(n, edges, perm)| {
            let mut deps: Vec<Vec<String>> = vec![Vec::new(); n];
            for (a, b) in edges {
                let (lo, hi) = if a < b { (a, b) } else { (b, a) };
                if lo != hi {
                    deps[hi].push(format!("s{lo}"));
                }
            }
            perm.into_iter()
                .map(|i| spec(&format!("s{i}"), deps[i].clone()))
                .collect()
        })
}

/// Random graph with a guaranteed ring `s0 -> s1 -> .. -> s{k-1} -> s0`
fn arb_cyclic() -> impl Strategy<Value = Vec<StageSpec>> {
    (2..10usize, proptest::collection::vec((0..10usize, 0..10usize), 0..12)).prop_map(
        |(k, extra)| {
            let mut deps: Vec<Vec<String>> = vec![Vec::new(); k];
            for i in 0..k {
                let prev = (i + k - 1) % k;
                deps[i].push(format!("s{prev}"));
            }
            for (a, b) in extra {
                if a < k && b < k && a != b {
                    deps[b].push(format!("s{a}"));
                }
            }
            (0..k).map(|i| spec(&format!("s{i}"), deps[i].clone())).collect()
        },
    )
}

proptest! {
    #[test]
    fn prop_order_places_stages_after_dependencies(specs in arb_dag()) {
        let graph = StageGraph::new(specs.clone()).unwrap();
        let order = graph.order();
        prop_assert_eq!(order.len(), specs.len());

        let position: HashMap<&str, usize> =
            order.iter().enumerate().map(|(i, s)| (*s, i)).collect();
        for s in &specs {
            for upstream in &s.after {
                prop_assert!(position[upstream.as_str()] < position[s.name.as_str()]);
            }
        }
    }

    #[test]
    fn prop_order_is_deterministic(specs in arb_dag()) {
        let a = StageGraph::new(specs.clone()).unwrap();
        let b = StageGraph::new(specs).unwrap();
        prop_assert_eq!(a.order(), b.order());
    }

    #[test]
    fn prop_cycles_always_rejected(specs in arb_cyclic()) {
        let by_name: HashMap<String, Vec<String>> =
            specs.iter().map(|s| (s.name.clone(), s.after.clone())).collect();
        match StageGraph::new(specs) {
            Err(DagError::CyclicDependency { cycle }) => {
                prop_assert!(cycle.len() >= 2);
                prop_assert_eq!(cycle.first(), cycle.last());
                for pair in cycle.windows(2) {
                    // each stage depends on the one before it
                    prop_assert!(by_name[&pair[1]].contains(&pair[0]));
                }
            }
            other => prop_assert!(false, "expected cycle, got {:?}", other.map(|g| g.len())),
        }
    }

    #[test]
    fn prop_draining_ready_stages_visits_every_stage(specs in arb_dag()) {
        let graph = StageGraph::new(specs.clone()).unwrap();
        let mut state = RunState::new();
        let mut visited = Vec::new();
        loop {
            let ready: Vec<String> =
                graph.ready_stages(&state).into_iter().map(String::from).collect();
            if ready.is_empty() {
                break;
            }
            for name in ready {
                state.set(name.clone(), StageStatus::Succeeded);
                visited.push(name);
            }
        }
        prop_assert_eq!(visited.len(), specs.len());
        prop_assert!(graph.is_settled(&state));
    }
}

#[test]
fn failure_never_blocks_unrelated_branch() {
    let graph = StageGraph::new([
        spec("a", vec![]),
        spec("b", vec!["a".into()]),
        spec("c", vec![]),
        spec("d", vec!["c".into()]),
    ])
    .unwrap();
    let mut state = RunState::new();
    state.set("a", StageStatus::Succeeded);
    state.set("c", StageStatus::Succeeded);
    graph.fail_stage(&mut state, "b");
    assert_eq!(graph.ready_stages(&state), vec!["d"]);
}

#[test]
fn two_node_cycle_is_named() {
    let err = StageGraph::new([spec("x", vec!["y".into()]), spec("y", vec!["x".into()])])
        .unwrap_err();
    assert_eq!(
        err,
        DagError::CyclicDependency {
            cycle: vec!["x".into(), "y".into(), "x".into()]
        }
    );
}
