//! Compatibility rules applied to every (outlet, inlet) pair.
//!
//! Two hard filters and one soft term:
//!
//! | Rule | Kind | Effect |
//! |------|------|--------|
//! | `SystemType` | hard | pair disqualified unless system types are equal |
//! | `FlowDirection` | hard | pair disqualified unless it is outlet → inlet |
//! | `Proximity` | soft | contributes `weight * decay(distance)` |

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::config::MatchConfig;
use crate::model::{FlowDirection, Port};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchRule {
    SystemType,
    FlowDirection,
    Proximity,
}

impl MatchRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchRule::SystemType => "system_type",
            MatchRule::FlowDirection => "flow_direction",
            MatchRule::Proximity => "proximity",
        }
    }
}

/// How one rule judged a pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RuleOutcome {
    pub rule: MatchRule,
    pub passed: bool,
    /// Contribution to the pair's score (zero when the rule failed).
    pub contribution: f64,
}

impl RuleOutcome {
    fn pass(rule: MatchRule, contribution: f64) -> Self {
        Self { rule, passed: true, contribution }
    }

    fn fail(rule: MatchRule) -> Self {
        Self { rule, passed: false, contribution: 0.0 }
    }
}

/// Per-pair rule breakdown; always one entry per rule.
pub type Breakdown = SmallVec<[RuleOutcome; 3]>;

/// Evaluate every rule. The pair is eligible iff all outcomes passed.
pub fn evaluate(config: &MatchConfig, outlet: &Port, inlet: &Port) -> (Breakdown, f64) {
    let distance = outlet.distance_to(inlet);
    let mut breakdown = Breakdown::new();

    breakdown.push(if outlet.system_type == inlet.system_type {
        RuleOutcome::pass(MatchRule::SystemType, config.system_weight)
    } else {
        RuleOutcome::fail(MatchRule::SystemType)
    });

    let directed = outlet.flow_direction == FlowDirection::Outlet
        && inlet.flow_direction == FlowDirection::Inlet;
    breakdown.push(if directed {
        RuleOutcome::pass(MatchRule::FlowDirection, config.direction_weight)
    } else {
        RuleOutcome::fail(MatchRule::FlowDirection)
    });

    let in_range = config.max_distance.is_none_or(|max| distance <= max);
    breakdown.push(if in_range && distance.is_finite() {
        RuleOutcome::pass(MatchRule::Proximity, config.proximity_weight * config.decay.apply(distance))
    } else {
        RuleOutcome::fail(MatchRule::Proximity)
    });

    (breakdown, distance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NodePath, PortShape, Vec3};

    fn port(system: &str, dir: FlowDirection, at: [f64; 3]) -> Port {
        Port {
            node: NodePath::parse("/P").unwrap(),
            port_type: "duct".into(),
            system_type: system.into(),
            flow_direction: dir,
            position: Vec3::from(at),
            shape: PortShape::Round { radius: 3.0 },
            capacity: None,
            discovery_index: 0,
        }
    }

    #[test]
    fn test_system_mismatch_fails_hard_filter() {
        let config = MatchConfig::default();
        let (breakdown, _) = evaluate(
            &config,
            &port("supply", FlowDirection::Outlet, [0.0; 3]),
            &port("return", FlowDirection::Inlet, [0.0; 3]),
        );
        assert_eq!(breakdown.len(), 3);
        assert!(!breakdown[0].passed);
        assert!(breakdown[1].passed);
    }

    #[test]
    fn test_reversed_direction_fails() {
        let config = MatchConfig::default();
        let (breakdown, _) = evaluate(
            &config,
            &port("supply", FlowDirection::Inlet, [0.0; 3]),
            &port("supply", FlowDirection::Outlet, [0.0; 3]),
        );
        assert!(!breakdown[1].passed);
    }

    #[test]
    fn test_max_distance_disqualifies() {
        let config = MatchConfig::default().with_max_distance(5.0);
        let (breakdown, distance) = evaluate(
            &config,
            &port("supply", FlowDirection::Outlet, [0.0; 3]),
            &port("supply", FlowDirection::Inlet, [10.0, 0.0, 0.0]),
        );
        assert_eq!(distance, 10.0);
        assert!(!breakdown[2].passed);
    }
}
