use nalgebra as na;

use crate::config::CalibrationConfig;
use crate::error::{Error, Result};

const RANK_EPS: f64 = 1.0e-10;
const MIN_W: f64 = 1.0e-9;

/// Image → court-plane projective mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct Homography {
    h: na::Matrix3<f64>,
}

impl Homography {
    pub fn from_matrix(h: na::Matrix3<f64>) -> Self {
        Self { h }
    }

    pub fn from_config(config: &CalibrationConfig) -> Result<Self> {
        let src: Vec<_> = config
            .image_points
            .iter()
            .map(|p| na::Point2::new(p[0], p[1]))
            .collect();
        let dst: Vec<_> = config
            .plane_points
            .iter()
            .map(|p| na::Point2::new(p[0], p[1]))
            .collect();

        Self::estimate(&src, &dst)
    }

    /// Direct linear transform over normalized correspondences.
    pub fn estimate(src: &[na::Point2<f64>], dst: &[na::Point2<f64>]) -> Result<Self> {
        if src.len() != dst.len() || src.len() < 4 {
            return Err(Error::InvalidCalibration(
                "at least 4 point pairs are required".into(),
            ));
        }

        let ts = normalizer(src)?;
        let td = normalizer(dst)?;

        let n = src.len();
        let mut a = na::DMatrix::<f64>::zeros(2 * n, 9);

        for (i, (s, d)) in src.iter().zip(dst.iter()).enumerate() {
            let s = ts.transform_point(s);
            let d = td.transform_point(d);

            let r0 = [-s.x, -s.y, -1.0, 0.0, 0.0, 0.0, d.x * s.x, d.x * s.y, d.x];
            let r1 = [0.0, 0.0, 0.0, -s.x, -s.y, -1.0, d.y * s.x, d.y * s.y, d.y];

            for k in 0..9 {
                a[(2 * i, k)] = r0[k];
                a[(2 * i + 1, k)] = r1[k];
            }
        }

        let ata = a.transpose() * &a;
        let eigen = ata.symmetric_eigen();

        let mut order: Vec<usize> = (0..9).collect();
        order.sort_by(|&i, &j| eigen.eigenvalues[i].total_cmp(&eigen.eigenvalues[j]));

        let largest = eigen.eigenvalues[order[8]].abs().max(f64::MIN_POSITIVE);
        if eigen.eigenvalues[order[1]].abs() / largest < RANK_EPS {
            return Err(Error::InvalidCalibration(
                "point configuration is degenerate (collinear or repeated points)".into(),
            ));
        }

        let v = eigen.eigenvectors.column(order[0]);
        let hn = na::Matrix3::new(v[0], v[1], v[2], v[3], v[4], v[5], v[6], v[7], v[8]);

        let mut h = td.inverse().to_homogeneous() * hn * ts.to_homogeneous();

        let scale = h[(2, 2)];
        if scale.abs() > f64::EPSILON {
            h /= scale;
        }

        if !h.iter().all(|v| v.is_finite()) || h.determinant().abs() < RANK_EPS {
            return Err(Error::InvalidCalibration("homography is singular".into()));
        }

        Ok(Self { h })
    }

    /// Maps an image point to the plane, `None` for points on the horizon line.
    pub fn project(&self, p: &na::Point2<f64>) -> Option<na::Point2<f64>> {
        let v = self.h * na::Vector3::new(p.x, p.y, 1.0);

        if v.z.abs() < MIN_W {
            return None;
        }

        let out = na::Point2::new(v.x / v.z, v.y / v.z);
        if out.x.is_finite() && out.y.is_finite() {
            Some(out)
        } else {
            None
        }
    }

    #[inline]
    pub fn matrix(&self) -> &na::Matrix3<f64> {
        &self.h
    }
}

/// Similarity moving the centroid to the origin with mean distance √2.
fn normalizer(points: &[na::Point2<f64>]) -> Result<na::Similarity2<f64>> {
    let n = points.len() as f64;
    let centroid = points.iter().fold(na::Vector2::zeros(), |acc, p| acc + p.coords) / n;
    let mean_dist = points
        .iter()
        .map(|p| (p.coords - centroid).norm())
        .sum::<f64>()
        / n;

    if !(mean_dist.is_finite() && mean_dist > f64::EPSILON) {
        return Err(Error::InvalidCalibration("points coincide".into()));
    }

    let s = std::f64::consts::SQRT_2 / mean_dist;

    Ok(na::Similarity2::new(-centroid * s, 0.0, s))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pts(raw: &[[f64; 2]]) -> Vec<na::Point2<f64>> {
        raw.iter().map(|p| na::Point2::new(p[0], p[1])).collect()
    }

    #[test]
    fn test_recovers_known_mapping() {
        let truth = na::Matrix3::new(0.01, 0.002, -1.0, 0.0005, -0.012, 8.0, 0.00001, 0.0002, 1.0);
        let truth = Homography::from_matrix(truth);

        let src = pts(&[
            [100.0, 600.0],
            [1800.0, 620.0],
            [1700.0, 150.0],
            [200.0, 120.0],
            [960.0, 400.0],
        ]);
        let dst: Vec<_> = src.iter().map(|p| truth.project(p).unwrap()).collect();

        let h = Homography::estimate(&src, &dst).unwrap();

        for p in pts(&[[500.0, 500.0], [1200.0, 300.0], [50.0, 50.0]]) {
            let a = h.project(&p).unwrap();
            let b = truth.project(&p).unwrap();
            assert!((a - b).norm() < 1e-6, "{:?} vs {:?}", a, b);
        }
    }

    #[test]
    fn test_unit_square_to_court() {
        let src = pts(&[[0.0, 0.0], [100.0, 0.0], [100.0, 100.0], [0.0, 100.0]]);
        let dst = pts(&[[0.0, 3.05], [4.0, 3.05], [4.0, 0.0], [0.0, 0.0]]);

        let h = Homography::estimate(&src, &dst).unwrap();
        let mid = h.project(&na::Point2::new(50.0, 50.0)).unwrap();

        assert!((mid.x - 2.0).abs() < 1e-9);
        assert!((mid.y - 1.525).abs() < 1e-9);
    }

    #[test]
    fn test_collinear_points_rejected() {
        let src = pts(&[[0.0, 0.0], [1.0, 1.0], [2.0, 2.0], [3.0, 3.0]]);
        let dst = pts(&[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]]);

        assert!(matches!(
            Homography::estimate(&src, &dst),
            Err(Error::InvalidCalibration(_))
        ));
    }
}
