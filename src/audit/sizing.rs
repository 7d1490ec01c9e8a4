//! Geometric relations between flow, area and velocity.
//!
//! Units: capacity in cfm, areas in square feet (port dimensions in
//! inches), velocity in feet per minute.

use std::f64::consts::PI;

use crate::model::SQ_IN_PER_SQ_FT;

/// `capacity / area`. Zero area yields infinite velocity.
pub fn velocity_fpm(capacity_cfm: f64, area_sq_ft: f64) -> f64 {
    if area_sq_ft > 0.0 {
        capacity_cfm / area_sq_ft
    } else {
        f64::INFINITY
    }
}

/// Total area needed to carry `capacity_cfm` at `velocity_fpm`.
pub fn required_area_sq_ft(capacity_cfm: f64, velocity_fpm: f64) -> f64 {
    capacity_cfm / velocity_fpm
}

/// Radius (inches) of each of `count` equal round ports sharing `total_area_sq_ft`.
pub fn radius_for_area(total_area_sq_ft: f64, count: usize) -> f64 {
    let per_port_sq_in = total_area_sq_ft * SQ_IN_PER_SQ_FT / count.max(1) as f64;
    (per_port_sq_in / PI).sqrt()
}

/// Round up to the next multiple of `increment`. A zero increment is a no-op.
pub fn ceil_to(value: f64, increment: f64) -> f64 {
    if increment > 0.0 {
        (value / increment).ceil() * increment
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_velocity() {
        assert_eq!(velocity_fpm(2000.0, 1.0), 2000.0);
        assert_eq!(velocity_fpm(2000.0, 0.0), f64::INFINITY);
    }

    #[test]
    fn test_radius_inverts_area() {
        let r = radius_for_area(2.0, 2);
        let area = 2.0 * PI * r * r / SQ_IN_PER_SQ_FT;
        assert!((area - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_ceil_to() {
        assert_eq!(ceil_to(11.28, 0.5), 11.5);
        assert_eq!(ceil_to(11.5, 0.5), 11.5);
        assert_eq!(ceil_to(11.28, 0.0), 11.28);
    }
}
