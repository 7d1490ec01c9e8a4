//! End-to-end tests for outlet → inlet matching.
//!
//! Covers the nearest-inlet example, connection write-back through the
//! scene, and property tests for the one-to-one and hard-filter guarantees.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use twin_ports::config::{DistanceDecay, MatchConfig};
use twin_ports::{
    FlowDirection, GeneratorRegistry, MatchingEngine, MemoryScene, NodePath, Port, PortShape,
    PropertyMap, RegeneratedState, RegenerationError, Regenerator, SceneGraph, SceneNode, Twin,
    Value, Vec3,
};

fn p(s: &str) -> NodePath {
    NodePath::parse(s).unwrap()
}

fn port_node(path: &str, system: &str, direction: &str, at: [f64; 3]) -> SceneNode {
    SceneNode::new(p(path), "Port")
        .with_attribute("port_type", "duct")
        .with_attribute("system_type", system)
        .with_attribute("flow_direction", direction)
        .with_attribute("position", Value::from(at))
}

// ============================================================================
// 1. Nearest compatible inlet wins
// ============================================================================

#[tokio::test]
async fn test_outlet_pairs_with_nearest_inlet() {
    let twin = Twin::open_memory();
    twin.graph()
        .load(vec![
            SceneNode::new(p("/Site"), "Xform"),
            port_node("/Site/Out", "supply", "outlet", [0.0, 0.0, 0.0]),
            port_node("/Site/FarIn", "supply", "inlet", [10.0, 0.0, 0.0]),
            port_node("/Site/NearIn", "supply", "inlet", [0.0, 0.0, 0.0]),
        ])
        .unwrap();

    let result = twin.match_ports(&p("/Site")).await.unwrap();
    assert_eq!(result.connections.len(), 1);
    assert_eq!(result.connections[0].outlet.node, p("/Site/Out"));
    assert_eq!(result.connections[0].inlet.node, p("/Site/NearIn"));
    assert_eq!(result.unmatched_inlets.len(), 1);
    assert_eq!(result.unmatched_inlets[0].node, p("/Site/FarIn"));
}

// ============================================================================
// 2. Connections are written to both ends
// ============================================================================

#[tokio::test]
async fn test_connect_records_connected_to() {
    let twin = Twin::open_memory();
    twin.graph()
        .load(vec![
            SceneNode::new(p("/Site"), "Xform"),
            port_node("/Site/Out", "return", "outlet", [0.0, 0.0, 0.0]),
            port_node("/Site/In", "return", "inlet", [2.0, 0.0, 0.0]),
            port_node("/Site/Other", "supply", "inlet", [0.0, 0.0, 0.0]),
        ])
        .unwrap();

    let result = twin.match_ports(&p("/Site")).await.unwrap();
    assert_eq!(twin.connect(&result).await, 1);

    let out = twin.graph().get_node(&p("/Site/Out")).await.unwrap().unwrap();
    let inlet = twin.graph().get_node(&p("/Site/In")).await.unwrap().unwrap();
    let other = twin.graph().get_node(&p("/Site/Other")).await.unwrap().unwrap();
    assert_eq!(out.get("connected_to"), Some(&Value::from("/Site/In")));
    assert_eq!(inlet.get("connected_to"), Some(&Value::from("/Site/Out")));
    assert_eq!(other.get("connected_to"), None);
}

#[tokio::test]
async fn test_matching_is_deterministic_across_decays() {
    let scene = MemoryScene::new();
    let mut nodes = vec![SceneNode::new(p("/Site"), "Xform")];
    for i in 0..4 {
        nodes.push(port_node(&format!("/Site/O{i}"), "supply", "outlet", [i as f64, 0.0, 0.0]));
        nodes.push(port_node(&format!("/Site/I{i}"), "supply", "inlet", [i as f64 + 0.5, 1.0, 0.0]));
    }
    scene.load(nodes).unwrap();
    let twin = Twin::with_graph(scene);
    let ports = twin.discover(&p("/Site")).await.unwrap();

    for decay in [
        DistanceDecay::default(),
        DistanceDecay::Linear,
        DistanceDecay::Exponential { length: 6.0 },
    ] {
        let engine = MatchingEngine::new(MatchConfig::default().with_decay(decay));
        let a = engine.match_all(&ports);
        let b = engine.match_all(&ports);
        assert_eq!(a, b);
        assert!(a.is_complete());
        // Every outlet pairs with the inlet beside it.
        for c in &a.connections {
            assert_eq!(&c.outlet.node.name()[1..], &c.inlet.node.name()[1..]);
        }
    }
}

// ============================================================================
// 3. Connected components and dimension propagation
// ============================================================================

/// Records the diameter it rebuilt with.
struct RecordDiameter;

#[async_trait]
impl Regenerator for RecordDiameter {
    async fn regenerate(
        &self,
        _node: &SceneNode,
        params: &PropertyMap,
    ) -> Result<RegeneratedState, RegenerationError> {
        let diameter = params
            .get("diameter")
            .and_then(Value::as_float)
            .ok_or_else(|| RegenerationError::Failed("no diameter".into()))?;
        Ok(RegeneratedState::new().with_attribute("rebuilt_diameter", diameter))
    }
}

fn trunk_and_branch() -> Vec<SceneNode> {
    vec![
        SceneNode::new(p("/Trunk"), "Xform")
            .with_attribute("generator_type", "duct_round")
            .with_attribute("diameter", 16.0),
        port_node("/Trunk/Out", "supply", "outlet", [0.0, 0.0, 0.0]),
        SceneNode::new(p("/Branch"), "Xform")
            .with_attribute("generator_type", "duct_round")
            .with_attribute("diameter", 8),
        port_node("/Branch/In", "supply", "inlet", [1.0, 0.0, 0.0]).with_attribute("diameter", 8),
    ]
}

#[tokio::test]
async fn test_connected_branch_takes_trunk_dimensions() {
    let registry = GeneratorRegistry::new().with("duct round", Arc::new(RecordDiameter));
    let twin = Twin::open_memory().with_regenerator(Arc::new(registry));
    twin.graph().load(trunk_and_branch()).unwrap();

    assert!(twin.connected_components(&p("/Trunk")).await.unwrap().is_empty());
    let result = twin.match_ports(&p("/")).await.unwrap();
    assert_eq!(twin.connect(&result).await, 1);
    assert_eq!(twin.connected_components(&p("/Trunk")).await.unwrap(), vec![p("/Branch")]);
    assert_eq!(twin.connected_components(&p("/Branch")).await.unwrap(), vec![p("/Trunk")]);

    assert_eq!(twin.propagate_dimensions(&p("/Trunk")).await.unwrap(), 1);
    let branch = twin.graph().get_node(&p("/Branch")).await.unwrap().unwrap();
    // Stored as an int, widened by the float write.
    assert_eq!(branch.get("diameter"), Some(&Value::Float(16.0)));
    assert_eq!(branch.get("rebuilt_diameter"), Some(&Value::Float(16.0)));
    let inlet = twin.graph().get_node(&p("/Branch/In")).await.unwrap().unwrap();
    assert_eq!(inlet.get("diameter"), Some(&Value::Float(16.0)));
}

#[tokio::test]
async fn test_propagation_needs_a_regenerator() {
    let twin = Twin::open_memory();
    twin.graph().load(trunk_and_branch()).unwrap();
    assert!(twin.propagate_dimensions(&p("/Trunk")).await.is_err());
}

// ============================================================================
// 4. Property tests
// ============================================================================

fn arb_port() -> impl Strategy<Value = (u8, bool, (i8, i8, i8))> {
    (0u8..3, any::<bool>(), (-5i8..5, -5i8..5, -5i8..5))
}

fn build_ports(specs: &[(u8, bool, (i8, i8, i8))]) -> Vec<Port> {
    specs
        .iter()
        .enumerate()
        .map(|(i, (system, outlet, (x, y, z)))| Port {
            node: p(&format!("/P{i}")),
            port_type: "duct".into(),
            system_type: ["supply", "return", "exhaust"][*system as usize].into(),
            flow_direction: if *outlet { FlowDirection::Outlet } else { FlowDirection::Inlet },
            position: Vec3::new(*x as f64, *y as f64, *z as f64),
            shape: PortShape::Round { radius: 3.0 },
            capacity: None,
            discovery_index: i,
        })
        .collect()
}

proptest! {
    #[test]
    fn prop_each_port_used_at_most_once(specs in prop::collection::vec(arb_port(), 0..16)) {
        let ports = build_ports(&specs);
        let result = MatchingEngine::default().match_all(&ports);

        let mut seen = HashSet::new();
        for c in &result.connections {
            prop_assert!(seen.insert(c.outlet.node.clone()));
            prop_assert!(seen.insert(c.inlet.node.clone()));
        }
        prop_assert_eq!(
            result.connections.len() * 2 + result.unmatched_outlets.len() + result.unmatched_inlets.len(),
            ports.len()
        );
    }

    #[test]
    fn prop_hard_filters_always_hold(specs in prop::collection::vec(arb_port(), 0..16)) {
        let ports = build_ports(&specs);
        let result = MatchingEngine::default().match_all(&ports);
        for c in &result.connections {
            prop_assert_eq!(&c.outlet.system_type, &c.inlet.system_type);
            prop_assert_eq!(c.outlet.flow_direction, FlowDirection::Outlet);
            prop_assert_eq!(c.inlet.flow_direction, FlowDirection::Inlet);
        }
    }

    #[test]
    fn prop_no_leftover_compatible_pair(specs in prop::collection::vec(arb_port(), 0..16)) {
        // Greedy runs until no eligible pair remains.
        let ports = build_ports(&specs);
        let result = MatchingEngine::default().match_all(&ports);
        for o in &result.unmatched_outlets {
            for i in &result.unmatched_inlets {
                prop_assert!(o.system_type != i.system_type);
            }
        }
    }
}
