//! End-to-end tests for port discovery against MemoryScene.
//!
//! Each test loads a small component hierarchy and runs the scanner through
//! the public `Twin` handle.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use twin_ports::config::CoreConfig;
use twin_ports::{
    DiagnosticCode, FlowDirection, MemoryScene, MemorySink, NodePath, PortShape, SceneGraph,
    SceneNode, Twin, Value, ValueType,
};

fn p(s: &str) -> NodePath {
    NodePath::parse(s).unwrap()
}

fn port(path: &str, system: &str, direction: &str) -> SceneNode {
    SceneNode::new(p(path), "Port")
        .with_attribute("port_type", "duct")
        .with_attribute("system_type", system)
        .with_attribute("flow_direction", direction)
}

// ============================================================================
// Helper: an air handler with three good ports and two broken ones.
// ============================================================================

fn setup() -> (Twin<MemoryScene>, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let twin = Twin::new(Arc::new(MemoryScene::new()), CoreConfig::default(), sink.clone()).unwrap();
    twin.graph()
        .load(vec![
            SceneNode::new(p("/World"), "Xform"),
            SceneNode::new(p("/World/AHU"), "Xform").with_attribute("capacity", 2000.0),
            port("/World/AHU/SupplyOut", "supply", "outlet")
                .with_attribute("position", Value::from([1.0, 2.0, 3.0]))
                .with_attribute("radius", 8.0),
            port("/World/AHU/ReturnIn", "return", "INLET")
                .with_attribute("shape", "rectangular")
                .with_attribute("width", 20.0)
                .with_attribute("height", 10.0),
            // Missing flow_direction.
            SceneNode::new(p("/World/AHU/NoDirection"), "Port")
                .with_attribute("port_type", "duct")
                .with_attribute("system_type", "supply"),
            // Blank system_type counts as missing.
            port("/World/AHU/Blank", "   ", "outlet"),
            SceneNode::new(p("/World/AHU/Panel"), "Mesh"),
            port("/World/AHU/Panel/Nested", "supply", "outlet"),
        ])
        .unwrap();
    (twin, sink)
}

// ============================================================================
// 1. Idempotence
// ============================================================================

#[tokio::test]
async fn test_discovery_is_idempotent() {
    let (twin, _) = setup();
    let first = twin.discover(&p("/World")).await.unwrap();
    let second = twin.discover(&p("/World")).await.unwrap();
    assert_eq!(first, second);

    let names: Vec<_> = first.iter().map(|port| port.node.name().to_owned()).collect();
    assert_eq!(names, vec!["SupplyOut", "ReturnIn", "Nested"]);
}

// ============================================================================
// 2. Invalid ports: excluded, never raise, one diagnostic each per pass
// ============================================================================

#[tokio::test]
async fn test_invalid_ports_emit_exactly_one_diagnostic() {
    let (twin, sink) = setup();
    let ports = twin.discover(&p("/World/AHU")).await.unwrap();
    assert!(ports.iter().all(|port| port.node.name() != "NoDirection"));
    assert!(ports.iter().all(|port| port.node.name() != "Blank"));

    assert_eq!(sink.for_path(&p("/World/AHU/NoDirection")).len(), 1);
    assert_eq!(sink.for_path(&p("/World/AHU/Blank")).len(), 1);
    assert_eq!(sink.count(DiagnosticCode::MissingAttribute), 2);
    assert!(sink.for_path(&p("/World/AHU/Panel")).is_empty());
}

// ============================================================================
// 3. Field extraction
// ============================================================================

#[tokio::test]
async fn test_port_fields() {
    let (twin, _) = setup();
    let ports = twin.discover(&p("/World/AHU")).await.unwrap();

    let supply = &ports[0];
    assert_eq!(supply.flow_direction, FlowDirection::Outlet);
    assert_eq!(supply.position.x, 1.0);
    assert_eq!(supply.position.z, 3.0);
    assert_eq!(supply.shape, PortShape::Round { radius: 8.0 });

    let ret = &ports[1];
    assert_eq!(ret.flow_direction, FlowDirection::Inlet);
    assert_eq!(ret.system_type, "return");
    assert_eq!(ret.shape, PortShape::Rectangular { width: 20.0, height: 10.0 });
    assert!((ret.area_sq_ft() - 200.0 / 144.0).abs() < 1e-12);
}

// ============================================================================
// 4. Edits are seen by the next pass
// ============================================================================

#[tokio::test]
async fn test_fixing_a_port_makes_it_appear() {
    let (twin, _) = setup();
    let before = twin.discover(&p("/World/AHU")).await.unwrap();

    twin.graph()
        .set_attribute(
            &p("/World/AHU/NoDirection"),
            "flow_direction",
            ValueType::String,
            Some(Value::from("inlet")),
        )
        .await
        .unwrap();

    let after = twin.discover(&p("/World/AHU")).await.unwrap();
    assert_eq!(after.len(), before.len() + 1);
    assert_eq!(twin.scanner().stats().passes, 2);
}

#[tokio::test]
async fn test_unknown_root_is_an_error() {
    let (twin, _) = setup();
    assert!(twin.discover(&p("/Nowhere")).await.is_err());
}
