use nalgebra as na;
use num_traits::Float;

/// Least-squares fit of `y = a·x² + b·x + c`, returns `[a, b, c]`.
pub fn quadratic_ls<T: na::ComplexField + Float>(
    x: &na::DVector<T>,
    y: &na::DVector<T>,
) -> Option<na::Matrix3x1<T>> {
    if x.len() < 3 || x.len() != y.len() {
        return None;
    }

    let n = T::from(x.len())?;

    let s_x1 = x.sum();
    let x2 = x.map(|x| x * x);
    let s_x2 = x2.sum();
    let x3 = x2.zip_map(x, |a, b| a * b);
    let s_x3 = x3.sum();
    let x4 = x3.zip_map(x, |a, b| a * b);
    let s_x4 = x4.sum();
    let s_x2y = x2.zip_map(y, |x, y| x * y).sum();
    let s_xy = x.zip_map(y, |x, y| x * y).sum();
    let s_y = y.sum();

    let a = na::Matrix3::new(s_x4, s_x3, s_x2, s_x3, s_x2, s_x1, s_x2, s_x1, n);
    let b = na::Matrix3x1::new(s_x2y, s_xy, s_y);

    let qr_result = a.qr();
    let qty = qr_result.q().transpose() * b;

    let params = qr_result.r().solve_upper_triangular(&qty)?;
    if params.iter().all(|p| Float::is_finite(*p)) {
        Some(params)
    } else {
        None
    }
}

/// Savitzky–Golay smoothing with a quadratic local fit.
///
/// The window is clamped inside the sequence at both ends and shrunk to the
/// largest odd length that fits; sequences shorter than three samples are
/// returned unchanged.
pub fn savgol_smooth(values: &[f64], window: usize) -> Vec<f64> {
    let n = values.len();
    let mut window = window.min(n);
    if window % 2 == 0 {
        window = window.saturating_sub(1);
    }

    if window < 3 {
        return values.to_vec();
    }

    let half = window / 2;
    let mut out = Vec::with_capacity(n);

    for i in 0..n {
        let start = i.saturating_sub(half).min(n - window);
        let xs = na::DVector::from_iterator(
            window,
            (start..start + window).map(|j| j as f64 - i as f64),
        );
        let ys = na::DVector::from_column_slice(&values[start..start + window]);

        match quadratic_ls(&xs, &ys) {
            Some(p) => out.push(p[2]),
            None => out.push(values[i]),
        }
    }

    out
}
