//! Boustrophedon scan-path generation.
//!
//! Pure functions mapping axis distances, a step increment, and an origin to
//! an ordered list of scan points. The serpentine ordering produced here is
//! load-bearing: [`crate::grid::reconstruct`] undoes it by row parity alone,
//! without inspecting coordinates, so the two modules must agree exactly on
//! the traversal rules:
//!
//! - single axis: offsets run from 0 to `distance` inclusive, stepping by
//!   `increment` in the sign of `distance`;
//! - two axes: secondary is the outer loop, and the primary direction
//!   reverses on every odd-indexed row;
//! - three axes: as above per layer, and odd-numbered layers mirror each
//!   row a second time.
//!
//! No hardware interaction happens here; invalid input is rejected up front
//! as a configuration error.

use crate::core::{AxisSet, ScanPoint, Vector3};
use crate::error::{ScanError, ScanResult};

/// Offsets from 0 to `distance` inclusive, stepping by `increment` in the
/// sign of `distance`. A zero distance yields the single offset 0.
fn axis_offsets(distance: f64, increment: f64) -> Vec<f64> {
    if distance == 0.0 {
        return vec![0.0];
    }
    // Tolerance so that e.g. 0.3 / 0.1 lands on 3 steps despite rounding.
    let steps = (distance.abs() / increment + 1e-9).floor() as usize;
    let sign = distance.signum();
    (0..=steps).map(|i| i as f64 * increment * sign).collect()
}

/// Generate the ordered serpentine traversal for 1, 2, or 3 active axes.
///
/// `distances` holds the signed scan distance for each active axis (values
/// on inactive axes are ignored); every produced point is `origin` plus the
/// per-axis offset. The function is pure: identical inputs always produce
/// the identical ordered sequence.
pub fn generate(
    axes: &AxisSet,
    distances: Vector3,
    increment: f64,
    origin: ScanPoint,
) -> ScanResult<Vec<ScanPoint>> {
    if !(increment > 0.0) {
        return Err(ScanError::Configuration(format!(
            "increment must be positive, got {increment}"
        )));
    }

    let primary = axes.primary();
    let primary_offsets = axis_offsets(distances.component(primary), increment);

    let Some(secondary) = axes.secondary() else {
        return Ok(primary_offsets
            .iter()
            .map(|&p| origin.translated(primary, p))
            .collect());
    };
    let secondary_offsets = axis_offsets(distances.component(secondary), increment);

    let layer_offsets = match axes.tertiary() {
        Some(tertiary) => axis_offsets(distances.component(tertiary), increment),
        None => vec![0.0],
    };
    let tertiary = axes.tertiary();

    let mut points =
        Vec::with_capacity(primary_offsets.len() * secondary_offsets.len() * layer_offsets.len());

    for (k, &layer) in layer_offsets.iter().enumerate() {
        for (j, &row) in secondary_offsets.iter().enumerate() {
            let mut line: Vec<f64> = primary_offsets.clone();
            if j % 2 == 1 {
                line.reverse();
            }
            // Odd-numbered layers mirror each row a second time.
            if k % 2 == 1 {
                line.reverse();
            }
            for &p in &line {
                let mut point = origin.translated(primary, p).translated(secondary, row);
                if let Some(t) = tertiary {
                    point = point.translated(t, layer);
                }
                points.push(point);
            }
        }
    }

    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn axes(s: &str) -> AxisSet {
        s.parse().unwrap()
    }

    #[test]
    fn test_single_axis_inclusive_of_distance() {
        let points = generate(
            &axes("x"),
            Vector3::new(4.0, 0.0, 0.0),
            2.0,
            ScanPoint::ZERO,
        )
        .unwrap();
        let xs: Vec<f64> = points.iter().map(|p| p.x).collect();
        assert_eq!(xs, vec![0.0, 2.0, 4.0]);
        assert!(points.iter().all(|p| p.y == 0.0 && p.z == 0.0));
    }

    #[test]
    fn test_single_axis_twenty_steps() {
        let points = generate(
            &axes("y"),
            Vector3::new(0.0, 9.5, 0.0),
            0.5,
            ScanPoint::ZERO,
        )
        .unwrap();
        assert_eq!(points.len(), 20);
        assert_eq!(points[0].y, 0.0);
        assert_eq!(points[19].y, 9.5);
    }

    #[test]
    fn test_zero_distance_yields_origin_only() {
        let origin = ScanPoint::new(1.0, 2.0, 3.0);
        let points = generate(&axes("z"), Vector3::ZERO, 0.5, origin).unwrap();
        assert_eq!(points, vec![origin]);
    }

    #[test]
    fn test_negative_distance_descends() {
        let points = generate(
            &axes("x"),
            Vector3::new(-4.0, 0.0, 0.0),
            2.0,
            ScanPoint::ZERO,
        )
        .unwrap();
        let xs: Vec<f64> = points.iter().map(|p| p.x).collect();
        assert_eq!(xs, vec![0.0, -2.0, -4.0]);
    }

    #[test]
    fn test_generation_is_pure() {
        let d = Vector3::new(4.0, 6.0, 0.0);
        let a = generate(&axes("xy"), d, 2.0, ScanPoint::ZERO).unwrap();
        let b = generate(&axes("xy"), d, 2.0, ScanPoint::ZERO).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_serpentine_xy_sequence() {
        let points = generate(
            &axes("xy"),
            Vector3::new(4.0, 4.0, 0.0),
            2.0,
            ScanPoint::ZERO,
        )
        .unwrap();
        let expected = [
            (0.0, 0.0),
            (2.0, 0.0),
            (4.0, 0.0),
            (4.0, 2.0),
            (2.0, 2.0),
            (0.0, 2.0),
            (0.0, 4.0),
            (2.0, 4.0),
            (4.0, 4.0),
        ];
        assert_eq!(points.len(), 9);
        for (point, (x, y)) in points.iter().zip(expected.iter()) {
            assert_eq!((point.x, point.y), (*x, *y));
        }
    }

    #[test]
    fn test_origin_offsets_applied() {
        let origin = ScanPoint::new(10.0, -5.0, 1.0);
        let points = generate(&axes("xz"), Vector3::new(2.0, 0.0, 2.0), 1.0, origin).unwrap();
        assert_eq!(points[0], origin);
        assert_eq!(points.last().unwrap().z, 3.0);
        assert!(points.iter().all(|p| p.y == -5.0));
    }

    #[test]
    fn test_three_axis_layer_mirroring() {
        // 2x2x2 raster. Layer 0 is the usual serpentine; layer 1 mirrors
        // every row again, so its rows run reversed relative to layer 0.
        let points = generate(
            &axes("xyz"),
            Vector3::new(1.0, 1.0, 1.0),
            1.0,
            ScanPoint::ZERO,
        )
        .unwrap();
        let xy: Vec<(f64, f64, f64)> = points.iter().map(|p| (p.x, p.y, p.z)).collect();
        let expected = [
            // layer z=0: row 0 forward, row 1 reversed
            (0.0, 0.0, 0.0),
            (1.0, 0.0, 0.0),
            (1.0, 1.0, 0.0),
            (0.0, 1.0, 0.0),
            // layer z=1: both rows mirrored once more
            (1.0, 0.0, 1.0),
            (0.0, 0.0, 1.0),
            (0.0, 1.0, 1.0),
            (1.0, 1.0, 1.0),
        ];
        assert_eq!(xy, expected);
    }

    #[test]
    fn test_non_positive_increment_rejected() {
        for increment in [0.0, -0.5] {
            let err = generate(
                &axes("x"),
                Vector3::new(1.0, 0.0, 0.0),
                increment,
                ScanPoint::ZERO,
            )
            .unwrap_err();
            assert!(matches!(err, ScanError::Configuration(_)));
        }
    }

    #[test]
    fn test_fractional_steps_tolerant_of_rounding() {
        let points = generate(
            &axes("x"),
            Vector3::new(0.3, 0.0, 0.0),
            0.1,
            ScanPoint::ZERO,
        )
        .unwrap();
        assert_eq!(points.len(), 4);
        assert!((points[3].x - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_unused_axis_distances_ignored() {
        let mut d = Vector3::new(2.0, 0.0, 0.0);
        d.z = 99.0;
        let points = generate(&axes("x"), d, 1.0, ScanPoint::ZERO).unwrap();
        assert_eq!(points.len(), 3);
        assert!(points.iter().all(|p| p.z == 0.0));
    }
}
