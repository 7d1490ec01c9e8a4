//! Plain-text schedule of connections and audit verdicts.
//!
//! ```text
//! [RootReport] → write_schedule() → text
//!   → operator review, diffs between runs, attachment to a work order
//! ```
//!
//! The layout is stable: roots in the order given, connections in
//! acceptance order, metrics and recommendations sorted by name.

use std::io::Write;

use crate::healing::HealingStatus;
use crate::model::*;
use crate::watcher::RootReport;
use crate::Result;

/// Write a schedule covering every report.
pub fn write_schedule(reports: &[RootReport], writer: &mut dyn Write) -> Result<()> {
    writeln!(writer, "# Port schedule")?;
    writeln!(writer, "# Roots: {}", reports.len())?;

    for report in reports {
        writeln!(writer)?;
        writeln!(writer, "== {} ==", report.root)?;
        writeln!(writer, "ports: {}", report.ports.len())?;

        writeln!(writer, "connections:")?;
        if report.matching.connections.is_empty() {
            writeln!(writer, "  (none)")?;
        }
        for c in &report.matching.connections {
            writeln!(
                writer,
                "  {} -> {}  score={:.3} distance={:.2}",
                c.outlet.node, c.inlet.node, c.score, c.distance
            )?;
        }

        let unmatched = report.matching.unmatched_outlets.iter()
            .chain(&report.matching.unmatched_inlets);
        for port in unmatched {
            writeln!(writer, "  unmatched {}", format_port(port))?;
        }

        writeln!(writer, "audit: {} ({})", report.audit.verdict, report.audit.message)?;
        for (name, value) in &report.audit.metrics {
            writeln!(writer, "  {name} = {}", format_number(*value))?;
        }
        for (name, value) in &report.audit.recommendations {
            writeln!(writer, "  recommend {name} = {}", format_number(*value))?;
        }

        if let Some(healing) = &report.healing {
            let status = match healing.status {
                HealingStatus::Converged => "converged",
                HealingStatus::ConvergenceFailure => "did not converge",
            };
            writeln!(writer, "healing: {status} after {} attempt(s)", healing.attempts)?;
            for e in &healing.errors {
                writeln!(writer, "  error: {e}")?;
            }
        }
    }
    Ok(())
}

/// `path [direction system/port_type]`.
fn format_port(port: &Port) -> String {
    format!(
        "{} [{} {}/{}]",
        port.node, port.flow_direction, port.system_type, port.port_type
    )
}

/// Integers without a fraction, everything else to three places.
fn format_number(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 {
        format!("{value:.0}")
    } else if value.is_finite() {
        format!("{value:.3}")
    } else {
        "inf".to_owned()
    }
}
