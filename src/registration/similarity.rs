//! Closed-form similarity transform estimation.
//!
//! Solves `min Σ‖s·R·xᵢ + t − yᵢ‖²` over scale, rotation and translation
//! (Umeyama's method): center both point sets, take the SVD of the
//! cross-covariance, correct the sign so the rotation is proper, and recover
//! scale from the variance ratio. A reflection (det −1) is never a valid
//! registration of a physical scene and is corrected, not accepted.

use super::RegistrationError;
use nalgebra::{Matrix3, Point3, Vector3};
use std::fmt;
use std::fmt::{Display, Formatter};

/// Relative threshold on the second singular value below which the
/// correspondence set is treated as collinear.
const RANK_TOL: f64 = 1e-9;

/// `target = scale · R · source + t`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityTransform {
    /// Uniform scale, strictly positive.
    pub scale: f64,
    /// Proper rotation (orthonormal, det +1).
    pub rotation: Matrix3<f64>,
    pub translation: Vector3<f64>,
}

impl SimilarityTransform {
    pub fn identity() -> Self {
        Self {
            scale: 1.0,
            rotation: Matrix3::identity(),
            translation: Vector3::zeros(),
        }
    }

    /// Map a point from the source frame into the target frame.
    pub fn apply(&self, p: &Point3<f64>) -> Point3<f64> {
        Point3::from(self.scale * (self.rotation * p.coords) + self.translation)
    }
}

impl Display for SimilarityTransform {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let t = &self.translation;
        write!(
            f,
            "SimilarityTransform(scale: {:.6}, translation: [{:.4}, {:.4}, {:.4}])",
            self.scale, t.x, t.y, t.z
        )
    }
}

/// Solve for the similarity transform mapping `source` onto `target`.
///
/// The slices are paired by index. Fails with `Underdetermined` below 3
/// pairs and `DegenerateConfiguration` when the pairs are collinear or
/// coincident, in which case rotation (or scale) is unrecoverable.
pub fn solve_similarity(
    source: &[Point3<f64>],
    target: &[Point3<f64>],
) -> Result<SimilarityTransform, RegistrationError> {
    if source.len() != target.len() {
        return Err(RegistrationError::CorrespondenceMismatch {
            source_len: source.len(),
            target_len: target.len(),
        });
    }
    let n = source.len();
    if n < 3 {
        return Err(RegistrationError::Underdetermined { found: n });
    }

    let inv_n = 1.0 / n as f64;
    let source_centroid: Vector3<f64> =
        source.iter().map(|p| p.coords).sum::<Vector3<f64>>() * inv_n;
    let target_centroid: Vector3<f64> =
        target.iter().map(|p| p.coords).sum::<Vector3<f64>>() * inv_n;

    // Cross-covariance of centered target against centered source, plus the
    // source variance that normalizes the scale.
    let mut covariance = Matrix3::zeros();
    let mut source_variance = 0.0;
    for (s, t) in source.iter().zip(target) {
        let sc = s.coords - source_centroid;
        let tc = t.coords - target_centroid;
        covariance += tc * sc.transpose() * inv_n;
        source_variance += sc.norm_squared() * inv_n;
    }

    if source_variance <= f64::EPSILON {
        // Every source point sits on the centroid.
        return Err(RegistrationError::DegenerateConfiguration);
    }

    let svd = covariance.svd(true, true);
    let u = svd.u.ok_or(RegistrationError::DegenerateConfiguration)?;
    let v_t = svd.v_t.ok_or(RegistrationError::DegenerateConfiguration)?;
    let sigma = svd.singular_values;

    // Collinear correspondences collapse the second singular value; the
    // rotation about the common axis would be arbitrary.
    if sigma[0] <= f64::EPSILON || sigma[1] / sigma[0] <= RANK_TOL {
        return Err(RegistrationError::DegenerateConfiguration);
    }

    // Reflection guard: force det(R) = +1.
    let sign = if (u.determinant() * v_t.determinant()) < 0.0 {
        -1.0
    } else {
        1.0
    };
    let rotation = u * Matrix3::from_diagonal(&Vector3::new(1.0, 1.0, sign)) * v_t;

    let scale = (sigma[0] + sigma[1] + sign * sigma[2]) / source_variance;
    let translation = target_centroid - scale * (rotation * source_centroid);

    Ok(SimilarityTransform {
        scale,
        rotation,
        translation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Rotation3, Unit};

    fn spread_points() -> Vec<Point3<f64>> {
        vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(0.0, 0.0, 1.0),
            Point3::new(1.0, 2.0, -1.0),
        ]
    }

    #[test]
    fn test_recovers_known_transform() {
        let rotation = Rotation3::from_axis_angle(
            &Unit::new_normalize(Vector3::new(1.0, -2.0, 0.5)),
            0.8,
        );
        let truth = SimilarityTransform {
            scale: 1.7,
            rotation: *rotation.matrix(),
            translation: Vector3::new(10.0, -5.0, 2.5),
        };

        let source = spread_points();
        let target: Vec<_> = source.iter().map(|p| truth.apply(p)).collect();

        let solved = solve_similarity(&source, &target).unwrap();
        assert_relative_eq!(solved.scale, truth.scale, epsilon = 1e-9);
        assert_relative_eq!(solved.rotation, truth.rotation, epsilon = 1e-9);
        assert_relative_eq!(solved.translation, truth.translation, epsilon = 1e-9);

        for (s, t) in source.iter().zip(&target) {
            assert_relative_eq!(solved.apply(s), *t, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_reflection_corrected_to_proper_rotation() {
        // Mirroring x would naively be solved by a reflection.
        let source = spread_points();
        let target: Vec<_> = source
            .iter()
            .map(|p| Point3::new(-p.x, p.y, p.z))
            .collect();

        let solved = solve_similarity(&source, &target).unwrap();
        assert_relative_eq!(solved.rotation.determinant(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_two_points_underdetermined() {
        let source = vec![Point3::origin(), Point3::new(1.0, 0.0, 0.0)];
        let target = vec![Point3::origin(), Point3::new(0.0, 1.0, 0.0)];
        assert!(matches!(
            solve_similarity(&source, &target),
            Err(RegistrationError::Underdetermined { found: 2 })
        ));
    }

    #[test]
    fn test_collinear_points_degenerate() {
        let source = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 1.0, 1.0),
            Point3::new(2.0, 2.0, 2.0),
        ];
        let target = source.clone();
        assert!(matches!(
            solve_similarity(&source, &target),
            Err(RegistrationError::DegenerateConfiguration)
        ));
    }

    #[test]
    fn test_coincident_points_degenerate() {
        let p = Point3::new(1.0, 2.0, 3.0);
        let source = vec![p, p, p, p];
        let target = vec![p, p, p, p];
        assert!(matches!(
            solve_similarity(&source, &target),
            Err(RegistrationError::DegenerateConfiguration)
        ));
    }

    #[test]
    fn test_length_mismatch() {
        let source = vec![Point3::origin(); 4];
        let target = vec![Point3::origin(); 3];
        assert!(matches!(
            solve_similarity(&source, &target),
            Err(RegistrationError::CorrespondenceMismatch { .. })
        ));
    }

    /// The survey scenario: four markers on a 259-unit square. The
    /// reconstruction came out at half size and rotated +90° about Z, so the
    /// registration must scale by 2 and rotate back by −90°.
    #[test]
    fn test_survey_square_scenario() {
        let real: Vec<(u32, Point3<f64>)> = vec![
            (119, Point3::new(0.0, 0.0, 0.0)),
            (85, Point3::new(259.0, 0.0, 0.0)),
            (31, Point3::new(259.0, 259.0, 0.0)),
            (59, Point3::new(0.0, 259.0, 0.0)),
        ];

        // +90° about Z then scale 0.5: (x, y, z) -> (-y/2, x/2, z/2).
        let estimated: Vec<Point3<f64>> = real
            .iter()
            .map(|(_, p)| Point3::new(-0.5 * p.y, 0.5 * p.x, 0.5 * p.z))
            .collect();
        let target: Vec<Point3<f64>> = real.iter().map(|&(_, p)| p).collect();

        let solved = solve_similarity(&estimated, &target).unwrap();

        assert_relative_eq!(solved.scale, 2.0, epsilon = 1e-9);
        let minus_90_about_z = Matrix3::new(
            0.0, 1.0, 0.0, //
            -1.0, 0.0, 0.0, //
            0.0, 0.0, 1.0,
        );
        assert_relative_eq!(solved.rotation, minus_90_about_z, epsilon = 1e-9);
        assert_relative_eq!(solved.translation.norm(), 0.0, epsilon = 1e-6);
    }
}
