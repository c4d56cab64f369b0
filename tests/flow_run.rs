use std::sync::Arc;

use parley_core::error::ParleyError;
use parley_core::types::{Participant, Role};
use parley_flow::{
    evaluate_condition, select_edge, DiagnosticKind, Edge, FlowEngine, FlowGraph, Node,
    Transition, Variables,
};
use serde_json::json;

fn debate_graph() -> serde_json::Value {
    json!({
        "nodes": [
            {"id": "start", "type": "start", "label": "Begin", "data": {"round": 0, "maxRounds": 2}},
            {"id": "intro", "type": "message", "data": {"content": "Welcome to the debate."}},
            {"id": "pick", "type": "agent-assign", "data": {"assistantId": "a1", "variable": "speaker"}},
            {"id": "speak", "type": "message", "data": {"content": "Opening statement.", "assistantId": "a1"}},
            {"id": "next", "type": "action", "data": {"action": "increment", "params": {"name": "round"}}},
            {"id": "more", "type": "condition", "data": {"expression": "round < maxRounds && speaker.name == 'Analyst'"}},
            {"id": "end", "type": "end", "position": {"x": 400, "y": 80}}
        ],
        "edges": [
            {"id": "e1", "source": "start", "target": "intro"},
            {"id": "e2", "source": "intro", "target": "pick"},
            {"id": "e3", "source": "pick", "target": "speak"},
            {"id": "e4", "source": "speak", "target": "next"},
            {"id": "e5", "source": "next", "target": "more"},
            {"id": "e6", "source": "more", "target": "end", "condition": "!more"},
            {"id": "e7", "source": "more", "target": "pick", "condition": "more"}
        ]
    })
}

fn roster() -> Vec<Participant> {
    vec![Participant::new("a1", "Analyst").with_field("isActive", json!(true))]
}

#[test]
fn test_run_graph_loaded_from_file() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("debate.json");
    std::fs::write(&path, debate_graph().to_string()).expect("write graph");

    let graph = FlowGraph::load(&path).expect("load graph");
    let mut engine = FlowEngine::new(graph, roster());
    let summary = engine.run_to_completion().expect("run");

    // start, intro, then (pick, speak, next, more) twice, then end
    assert_eq!(summary.steps, 11);
    assert_eq!(engine.history().len(), summary.steps);
    assert!(engine.is_finished());
    assert!(engine.current_node_id().is_none());
    assert!(engine.diagnostics().is_empty());

    let roles: Vec<Role> = engine.messages().iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::System, Role::Assistant, Role::Assistant]);
    assert_eq!(engine.variable("round"), Some(json!(2)));
    assert_eq!(engine.variable("more"), Some(json!(false)));
    assert_eq!(engine.variable("speaker").unwrap()["isActive"], json!(true));
}

#[test]
fn test_history_unchanged_after_finish() {
    let graph = FlowGraph::from_json(&debate_graph().to_string()).unwrap();
    let mut engine = FlowEngine::new(graph, roster());
    engine.run_to_completion().unwrap();

    let before = engine.snapshot();
    for _ in 0..3 {
        assert!(engine.step().unwrap().is_none());
    }
    assert_eq!(engine.snapshot(), before);
}

#[test]
fn test_acyclic_flow_terminates_within_node_count() {
    let graph = FlowGraph::builder()
        .node(Node::start("s"))
        .node(Node::message("a", "one"))
        .node(Node::condition("c", "missing > 1"))
        .node(Node::message("b", "two"))
        .node(Node::end("e"))
        .connect("s", "a")
        .connect("a", "c")
        .connect("c", "b")
        .connect("b", "e")
        .build()
        .unwrap();
    let node_count = graph.nodes().len();
    let mut engine = FlowEngine::new(graph, vec![]);

    engine.start().unwrap();
    let mut steps = 1;
    while engine.step().unwrap().is_some() {
        steps += 1;
    }
    assert!(steps <= node_count);
    assert_eq!(engine.history().len(), steps);
    assert_eq!(engine.diagnostics()[0].kind, DiagnosticKind::InvalidExpression);
}

#[test]
fn test_condition_node_round_values() {
    for (round, expected) in [(2, true), (5, false)] {
        let graph = FlowGraph::new(
            vec![
                Node::start_with("s", json!({"round": round})),
                Node::condition("check", "round < 3"),
            ],
            vec![Edge::always("e1", "s", "check")],
        )
        .unwrap();
        let mut engine = FlowEngine::new(graph, vec![]);
        engine.run_to_completion().unwrap();
        assert_eq!(engine.variable("check"), Some(json!(expected)));
    }
}

#[test]
fn test_increment_twice() {
    let graph = FlowGraph::builder()
        .node(Node::start("s"))
        .node(Node::action("first", "increment", json!({"name": "round"})))
        .node(Node::action("second", "increment", json!({"name": "round"})))
        .connect("s", "first")
        .connect("first", "second")
        .build()
        .unwrap();
    let mut engine = FlowEngine::new(graph, vec![]);

    engine.start().unwrap();
    engine.step().unwrap();
    assert_eq!(engine.variable("round"), Some(json!(1)));
    engine.step().unwrap();
    assert_eq!(engine.variable("round"), Some(json!(2)));
}

#[test]
fn test_sandbox_rejects_host_access() {
    let mut vars = Variables::new();
    vars.set("round", json!(1));
    for expr in [
        "1; process.exit(1)",
        "process.exit(1)",
        "require('fs')",
        "round = 5",
        "globalThis.round",
        "(() => true)()",
    ] {
        assert!(!evaluate_condition(expr, &vars), "{} evaluated true", expr);
    }
    assert_eq!(vars.get("round"), Some(&json!(1)));
}

#[test]
fn test_edge_selection_deterministic() {
    let edges = vec![
        Edge::when("e1", "n", "a", "x > 10"),
        Edge::always("e2", "n", "b"),
        Edge::when("e3", "n", "c", "x > 1"),
    ];
    let refs: Vec<&Edge> = edges.iter().collect();
    let mut vars = Variables::new();
    vars.set("x", json!(5));

    let picks: Vec<&str> = (0..5)
        .map(|_| {
            select_edge(&refs, |c| evaluate_condition(c, &vars))
                .unwrap()
                .id
                .as_str()
        })
        .collect();
    // The unconditional e2 is not first, so it does not pre-empt e3
    assert!(picks.iter().all(|&id| id == "e3"));
}

#[test]
fn test_dangling_edge_is_fatal() {
    let graph = FlowGraph::from_json(
        &json!({
            "nodes": [{"id": "s", "type": "start", "data": {"seed": 1}}],
            "edges": [{"id": "e1", "source": "s", "target": "nowhere"}]
        })
        .to_string(),
    )
    .unwrap();
    let mut engine = FlowEngine::new(graph, vec![]);

    assert!(matches!(
        engine.start(),
        Err(ParleyError::DanglingEdge { .. })
    ));
    // Nothing from the failed step was applied
    assert!(engine.history().is_empty());
    assert_eq!(engine.variable("seed"), None);
}

#[test]
fn test_duplicate_start_is_fatal() {
    let graph = FlowGraph::new(vec![Node::start("a"), Node::start("b")], vec![]).unwrap();
    let mut engine = FlowEngine::new(graph, vec![]);
    assert!(matches!(
        engine.start(),
        Err(ParleyError::DuplicateStartNode { .. })
    ));
    assert!(engine.history().is_empty());
}

#[test]
fn test_unknown_node_type_rejected_at_load() {
    let err = FlowGraph::from_json(
        &json!({"nodes": [{"id": "s", "type": "teleport"}], "edges": []}).to_string(),
    )
    .unwrap_err();
    assert!(matches!(err, ParleyError::Graph(_)));
}

#[test]
fn test_engines_share_one_graph() {
    let graph = Arc::new(FlowGraph::from_json(&debate_graph().to_string()).unwrap());
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let graph = Arc::clone(&graph);
            std::thread::spawn(move || {
                let mut engine = FlowEngine::new(graph, roster());
                engine.run_to_completion().unwrap();
                engine.messages().len()
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), 3);
    }
}

#[test]
fn test_dead_end_vs_end_node() {
    let graph = FlowGraph::builder()
        .node(Node::start("s"))
        .node(Node::message("last", "bye"))
        .connect("s", "last")
        .build()
        .unwrap();
    let mut engine = FlowEngine::new(graph, vec![]);
    engine.start().unwrap();
    let report = engine.step().unwrap().unwrap();

    assert_eq!(report.transition, Transition::DeadEnd);
    assert!(engine.is_finished());
    assert_eq!(engine.messages().len(), 1);
}
