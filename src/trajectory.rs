use nalgebra as na;
use serde_derive::Serialize;
use tracing::debug;

use crate::calibration::Homography;
use crate::config::TrajectoryConfig;
use crate::detection::Detection;
use crate::math::{quadratic_ls, savgol_smooth};

const CONCAVITY_EPS: f64 = 1.0e-12;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FitSpace {
    /// `(x / height, 1 - y / height)`, both axes share one scale
    Image,
    /// Calibrated plane coordinates, plane y is height.
    Court,
}

/// Parabola `height = a·x² + b·x + c` fitted to one attempt.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct TrajectoryFit {
    pub coefficients: [f64; 3],
    pub apex_height: f64,
    pub entry_angle_degrees: f64,
    pub fit_residual: f64,
    pub num_points_used: usize,
    pub space: FitSpace,
}

pub struct TrajectoryFitter {
    config: TrajectoryConfig,
    calibration: Option<Homography>,
    frame_height: f64,
}

impl TrajectoryFitter {
    pub fn new(
        config: TrajectoryConfig,
        calibration: Option<Homography>,
        frame_height: u32,
    ) -> Self {
        Self {
            config,
            calibration,
            frame_height: f64::from(frame_height.max(1)),
        }
    }

    #[inline]
    pub fn space(&self) -> FitSpace {
        if self.calibration.is_some() {
            FitSpace::Court
        } else {
            FitSpace::Image
        }
    }

    /// Fits the ball centers of an attempt's flight span, oldest first.
    ///
    /// The entry angle is taken at the sample of `rim_contact_frame`, or at
    /// the last sample when the ball never reached the rim band.
    pub fn fit(&self, ball: &[Detection], rim_contact_frame: Option<u64>) -> Option<TrajectoryFit> {
        if ball.len() < self.config.min_points {
            debug!(points = ball.len(), "too few ball centers for a trajectory");
            return None;
        }

        let xs: Vec<f64> = ball.iter().map(|d| f64::from(d.center().x)).collect();
        let ys: Vec<f64> = ball.iter().map(|d| f64::from(d.center().y)).collect();
        let xs = savgol_smooth(&xs, self.config.smoothing_window);
        let ys = savgol_smooth(&ys, self.config.smoothing_window);

        let mut points = Vec::with_capacity(ball.len());
        for ((x, y), det) in xs.into_iter().zip(ys).zip(ball) {
            if let Some(p) = self.to_fit_space(x, y) {
                points.push((det.frame_index, p));
            }
        }

        if points.len() < self.config.min_points {
            debug!(points = points.len(), "too few projectable ball centers");
            return None;
        }

        let (min_x, max_x) = points
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), (_, p)| {
                (lo.min(p.x), hi.max(p.x))
            });
        if max_x - min_x < self.config.min_horizontal_span {
            debug!(span = max_x - min_x, "horizontal span too small for a trajectory");
            return None;
        }

        let n = points.len();
        let m = points.iter().map(|(_, p)| p.x).sum::<f64>() / n as f64;
        let xc = na::DVector::from_iterator(n, points.iter().map(|(_, p)| p.x - m));
        let hy = na::DVector::from_iterator(n, points.iter().map(|(_, p)| p.y));

        let params = quadratic_ls(&xc, &hy)?;
        let (a, bc, cc) = (params[0], params[1], params[2]);

        if a > -CONCAVITY_EPS {
            debug!(a, "trajectory is not concave down");
            return None;
        }

        let fit_residual = xc
            .iter()
            .zip(hy.iter())
            .map(|(x, y)| {
                let e = a * x * x + bc * x + cc - y;
                e * e
            })
            .sum::<f64>()
            / n as f64;

        if !(fit_residual <= self.config.max_residual) {
            debug!(fit_residual, "trajectory residual above ceiling");
            return None;
        }

        let b = bc - 2.0 * a * m;
        let c = a * m * m - bc * m + cc;
        let apex_height = c - b * b / (4.0 * a);

        let entry = rim_contact_frame
            .and_then(|f| points.iter().find(|(frame, _)| *frame == f))
            .or_else(|| points.last())
            .map(|(_, p)| p.x)?;
        let slope = 2.0 * a * entry + b;
        let entry_angle_degrees = slope.abs().atan().to_degrees();

        Some(TrajectoryFit {
            coefficients: [a, b, c],
            apex_height,
            entry_angle_degrees,
            fit_residual,
            num_points_used: n,
            space: self.space(),
        })
    }

    fn to_fit_space(&self, x: f64, y: f64) -> Option<na::Point2<f64>> {
        match &self.calibration {
            Some(h) => h.project(&na::Point2::new(x, y)),
            None => Some(na::Point2::new(
                x / self.frame_height,
                1.0 - y / self.frame_height,
            )),
        }
    }
}
