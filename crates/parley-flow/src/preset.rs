//! Ready-made flows.

use serde_json::json;

use parley_core::error::{ParleyError, Result};

use crate::graph::FlowGraph;
use crate::node::Node;

/// Prompt shown at the top of each round of [`loop_chat_flow`].
pub const LOOP_CHAT_PROMPT: &str = "Please begin the conversation";

/// A discussion loop that runs for `max_rounds` rounds.
///
/// ```text
/// start -> message -> check_continue --round < maxRounds--> increment -> message
///                                    --round >= maxRounds-> end
/// ```
///
/// `round` and `maxRounds` are seeded by the start node, so the loop emits
/// `max_rounds + 1` prompts before reaching `end`.
pub fn loop_chat_flow(max_rounds: u32) -> Result<FlowGraph> {
    FlowGraph::builder()
        .node(
            Node::start_with("start", json!({"round": 0, "maxRounds": max_rounds}))
                .with_label("Start")
                .with_position(100.0, 100.0),
        )
        .node(
            Node::message("message", LOOP_CHAT_PROMPT)
                .with_label("Send message")
                .with_position(300.0, 100.0),
        )
        .node(
            Node::condition("check_continue", "round < maxRounds")
                .with_label("Continue?")
                .with_position(500.0, 100.0),
        )
        .node(
            Node::action("increment", "increment", json!({"name": "round"}))
                .with_label("Next round")
                .with_position(700.0, 50.0),
        )
        .node(
            Node::end("end")
                .with_label("End")
                .with_position(700.0, 150.0),
        )
        .connect("start", "message")
        .connect("message", "check_continue")
        .connect_when("check_continue", "increment", "round < maxRounds")
        .connect("increment", "message")
        .connect_when("check_continue", "end", "round >= maxRounds")
        .build()
}

/// Give each participant one turn per round, in roster order.
///
/// Each turn binds the speaker to `speaker` and posts a prompt authored by
/// them. After the last speaker, `round` is incremented and the flow either
/// loops back to the first speaker or ends.
pub fn round_robin_flow(participant_ids: &[&str], rounds: u32) -> Result<FlowGraph> {
    if participant_ids.is_empty() {
        return Err(ParleyError::Graph(
            "round-robin flow needs at least one participant".to_string(),
        ));
    }

    let mut builder = FlowGraph::builder().node(
        Node::start_with("start", json!({"round": 0, "maxRounds": rounds})).with_label("Start"),
    );
    let mut previous = "start".to_string();

    for (i, id) in participant_ids.iter().enumerate() {
        let pick = format!("pick_{}", i);
        let turn = format!("turn_{}", i);
        builder = builder
            .node(Node::assign(&pick, *id, "speaker").with_label(format!("Pick {}", id)))
            .node(
                Node::message_from(&turn, *id, "It's your turn to speak.")
                    .with_label(format!("{} speaks", id)),
            )
            .connect(previous.as_str(), pick.as_str())
            .connect(pick.as_str(), turn.as_str());
        previous = turn;
    }

    builder
        .node(
            Node::action("next_round", "increment", json!({"name": "round"}))
                .with_label("Next round"),
        )
        .node(Node::end("end").with_label("End"))
        .connect(previous.as_str(), "next_round")
        .connect_when("next_round", "pick_0", "round < maxRounds")
        .connect_when("next_round", "end", "round >= maxRounds")
        .build()
}
