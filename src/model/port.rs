//! Port: a derived connection point on a component.
//!
//! Ports are rebuilt from scene nodes on every discovery pass and never
//! persisted on their own.

use std::f64::consts::PI;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::{NodePath, Vec3};

/// Square inches per square foot.
pub const SQ_IN_PER_SQ_FT: f64 = 144.0;

/// Which way flow passes through a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowDirection {
    Inlet,
    Outlet,
}

impl FlowDirection {
    /// Case-insensitive parse of `"inlet"` / `"outlet"`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "inlet" => Some(FlowDirection::Inlet),
            "outlet" => Some(FlowDirection::Outlet),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FlowDirection::Inlet => "inlet",
            FlowDirection::Outlet => "outlet",
        }
    }
}

impl fmt::Display for FlowDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cross-section of a port. Dimensions are in inches.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "lowercase")]
pub enum PortShape {
    Round { radius: f64 },
    Rectangular { width: f64, height: f64 },
}

impl PortShape {
    pub fn area_sq_in(&self) -> f64 {
        match *self {
            PortShape::Round { radius } => PI * radius * radius,
            PortShape::Rectangular { width, height } => width * height,
        }
    }

    pub fn is_round(&self) -> bool {
        matches!(self, PortShape::Round { .. })
    }
}

/// A validated connection point discovered on a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Port {
    /// The scene node this port was built from.
    pub node: NodePath,
    pub port_type: String,
    pub system_type: String,
    pub flow_direction: FlowDirection,
    pub position: Vec3,
    pub shape: PortShape,
    /// Declared flow through this port, if any (cfm).
    pub capacity: Option<f64>,
    /// Ordinal within the discovery pass that produced this port.
    pub discovery_index: usize,
}

impl Port {
    /// Round radius, or the equal-area radius of a rectangular port.
    pub fn radius(&self) -> f64 {
        match self.shape {
            PortShape::Round { radius } => radius,
            PortShape::Rectangular { .. } => (self.shape.area_sq_in() / PI).sqrt(),
        }
    }

    pub fn area_sq_in(&self) -> f64 {
        self.shape.area_sq_in()
    }

    pub fn area_sq_ft(&self) -> f64 {
        self.shape.area_sq_in() / SQ_IN_PER_SQ_FT
    }

    pub fn is_outlet(&self) -> bool {
        self.flow_direction == FlowDirection::Outlet
    }

    pub fn is_inlet(&self) -> bool {
        self.flow_direction == FlowDirection::Inlet
    }

    pub fn distance_to(&self, other: &Port) -> f64 {
        self.position.distance(&other.position)
    }
}
