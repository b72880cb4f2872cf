//! Douglas-Peucker polyline compression.

use fibertrack_core::bundle::FiberBundle;
use nalgebra::Vector3;

/// Distance from `p` to the segment `a`-`b`.
fn segment_distance(p: &Vector3<f64>, a: &Vector3<f64>, b: &Vector3<f64>) -> f64 {
    let ab = b - a;
    let len2 = ab.norm_squared();
    if len2 <= f64::EPSILON {
        return (p - a).norm();
    }
    let t = ((p - a).dot(&ab) / len2).clamp(0.0, 1.0);
    (p - (a + ab * t)).norm()
}

/// Indices of the points kept by Douglas-Peucker simplification.
///
/// Endpoints are always kept. A span is split at its farthest interior point
/// while that point lies more than `max_error` from the span's chord.
#[must_use]
pub fn douglas_peucker_indices(points: &[Vector3<f64>], max_error: f64) -> Vec<usize> {
    let n = points.len();
    if n <= 2 {
        return (0..n).collect();
    }
    let mut keep = vec![false; n];
    keep[0] = true;
    keep[n - 1] = true;

    let mut spans = vec![(0, n - 1)];
    while let Some((first, last)) = spans.pop() {
        if last <= first + 1 {
            continue;
        }
        let mut farthest = first;
        let mut max_distance = 0.0;
        for i in (first + 1)..last {
            let distance = segment_distance(&points[i], &points[first], &points[last]);
            if distance > max_distance {
                max_distance = distance;
                farthest = i;
            }
        }
        if max_distance > max_error {
            keep[farthest] = true;
            spans.push((farthest, last));
            spans.push((first, farthest));
        }
    }

    keep.iter()
        .enumerate()
        .filter_map(|(i, &k)| k.then_some(i))
        .collect()
}

/// Simplifies a polyline, keeping its endpoints.
#[must_use]
pub fn douglas_peucker(points: &[Vector3<f64>], max_error: f64) -> Vec<Vector3<f64>> {
    douglas_peucker_indices(points, max_error)
        .into_iter()
        .map(|i| points[i])
        .collect()
}

/// Compresses every fiber of a bundle.
#[must_use]
pub fn compress_bundle(bundle: &FiberBundle, max_error: f64) -> FiberBundle {
    bundle
        .fibers()
        .map(|fiber| douglas_peucker(&fiber, max_error))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zigzag() -> Vec<Vector3<f64>> {
        (0..20)
            .map(|i| {
                let x = f64::from(i) * 0.5;
                let y = if i % 2 == 0 { 0.0 } else { 0.05 };
                Vector3::new(x, y, (x * 0.3).sin())
            })
            .collect()
    }

    #[test]
    fn test_straight_line_collapses_to_endpoints() {
        let line: Vec<_> = (0..10).map(|i| Vector3::new(f64::from(i), 0.0, 0.0)).collect();
        let compressed = douglas_peucker(&line, 0.01);
        assert_eq!(compressed, vec![line[0], line[9]]);
    }

    #[test]
    fn test_corner_is_kept() {
        let points = vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(2.0, 0.0, 0.0),
            Vector3::new(2.0, 1.0, 0.0),
            Vector3::new(2.0, 2.0, 0.0),
        ];
        assert_eq!(douglas_peucker_indices(&points, 0.1), vec![0, 2, 4]);
    }

    #[test]
    fn test_short_polylines_are_untouched() {
        let points = vec![Vector3::zeros(), Vector3::x()];
        assert_eq!(douglas_peucker(&points, 10.0), points);
        assert!(douglas_peucker(&[], 1.0).is_empty());
    }

    #[test]
    fn test_all_points_within_error() {
        let points = zigzag();
        let max_error = 0.1;
        let kept = douglas_peucker_indices(&points, max_error);
        for pair in kept.windows(2) {
            for i in pair[0]..pair[1] {
                let d = segment_distance(&points[i], &points[pair[0]], &points[pair[1]]);
                assert!(d <= max_error + 1e-12);
            }
        }
    }

    #[test]
    fn test_compress_bundle_keeps_fiber_count() {
        let bundle: FiberBundle = vec![zigzag(), vec![Vector3::zeros(), Vector3::y()]]
            .into_iter()
            .collect();
        let compressed = compress_bundle(&bundle, 0.2);
        assert_eq!(compressed.len(), 2);
        assert!(compressed.fiber_len(0) < bundle.fiber_len(0));
        assert_eq!(compressed.fiber_len(1), 2);
    }
}
