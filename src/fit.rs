

//! Weighted nonlinear least squares, sized for the handful of parameters
//! the background estimators need.
//!
//! Levenberg-Marquardt with box bounds, a forward-difference Jacobian, and
//! parameter uncertainties from the inverse normal matrix scaled by the
//! reduced chi-square of the solution.

use crate::error::{Error, Result};

const MAX_ITERATIONS: usize = 200;
const MAX_LAMBDA: f64 = 1e12;
const RELATIVE_TOLERANCE: f64 = 1e-12;


/// Optimised parameters and their 1σ uncertainties, index-aligned.
#[derive(Debug, Clone)]
pub struct FitResult {
    pub params: Vec<f64>,
    pub errors: Vec<f64>,
}


/// Fit `model(x, params)` to `(x, y)` weighted by `1/sigma²`, keeping every
/// parameter inside `[lower, upper]`.
///
/// Fails with [`Error::Fit`] when the damping saturates, the normal matrix
/// stays singular, or the iteration budget runs out before convergence.
pub fn curve_fit(
    model: impl Fn(f64, &[f64]) -> f64,
    x: &[f64], y: &[f64], sigma: &[f64],
    p0: &[f64], lower: &[f64], upper: &[f64],
) -> Result<FitResult>
{
    let point_count = x.len();
    let param_count = p0.len();

    debug_assert_eq!(y.len(), point_count);
    debug_assert_eq!(sigma.len(), point_count);
    debug_assert_eq!(lower.len(), param_count);
    debug_assert_eq!(upper.len(), param_count);

    if point_count <= param_count {
        return Err(Error::fit(format!(
            "{} points cannot constrain {} parameters", point_count, param_count
        )));
    }

    let weights: Vec<f64> = sigma.iter()
        .map(|&s| if s > 0.0 { 1.0 / (s * s) } else { 1.0 })
        .collect();

    let clamp = |params: &mut [f64]| {
        for ((value, &low), &high) in params.iter_mut().zip(lower).zip(upper) {
            *value = value.max(low).min(high);
        }
    };

    let chi_squared = |params: &[f64]| -> f64 {
        x.iter().zip(y).zip(&weights)
            .map(|((&x, &y), &w)| {
                let r = y - model(x, params);
                w * r * r
            })
            .sum()
    };

    let mut params = p0.to_vec();
    clamp(&mut params);

    let mut chi = chi_squared(&params);
    let mut lambda = 1e-3;
    let mut normal = vec![vec![0.0; param_count]; param_count];
    let mut converged = false;

    for _ in 0..MAX_ITERATIONS {
        // weighted jacobian and gradient at the current position
        let jacobian = numerical_jacobian(&model, x, &params, lower, upper);
        let mut gradient = vec![0.0; param_count];

        for row in normal.iter_mut() { row.iter_mut().for_each(|v| *v = 0.0); }
        for i in 0..point_count {
            let residual = y[i] - model(x[i], &params);
            for j in 0..param_count {
                gradient[j] += weights[i] * jacobian[i][j] * residual;
                for k in j..param_count {
                    normal[j][k] += weights[i] * jacobian[i][j] * jacobian[i][k];
                }
            }
        }
        for j in 0..param_count {
            for k in 0..j { normal[j][k] = normal[k][j]; }
        }

        // damp until a step lowers chi-square
        let mut accepted = false;
        while lambda <= MAX_LAMBDA {
            let mut damped = normal.clone();
            for j in 0..param_count {
                damped[j][j] += lambda * normal[j][j].max(f64::MIN_POSITIVE);
            }

            let step = match solve(damped, gradient.clone()) {
                Some(step) => step,
                None => { lambda *= 10.0; continue }
            };

            let mut candidate: Vec<f64> = params.iter().zip(&step)
                .map(|(&p, &d)| p + d)
                .collect();
            clamp(&mut candidate);

            let candidate_chi = chi_squared(&candidate);
            if candidate_chi.is_finite() && candidate_chi <= chi {
                if chi - candidate_chi <= RELATIVE_TOLERANCE * (chi + f64::MIN_POSITIVE) {
                    converged = true;
                }

                params = candidate;
                chi = candidate_chi;
                lambda = (lambda / 10.0).max(1e-12);
                accepted = true;
                break;
            }

            lambda *= 10.0;
        }

        if !accepted {
            // a dead gradient means we are sitting on the optimum already
            let flat = gradient.iter().all(|g| g.abs() <= 1e-12 * (1.0 + chi));
            if flat { converged = true }
            else { return Err(Error::fit("step damping saturated without improving the fit")) }
        }

        if converged { break }
    }

    if !converged {
        return Err(Error::fit(format!("no convergence within {} iterations", MAX_ITERATIONS)));
    }

    // covariance of the solution: inverse normal matrix times reduced chi-square
    let jacobian = numerical_jacobian(&model, x, &params, lower, upper);
    for row in normal.iter_mut() { row.iter_mut().for_each(|v| *v = 0.0); }
    for i in 0..point_count {
        for j in 0..param_count {
            for k in j..param_count {
                normal[j][k] += weights[i] * jacobian[i][j] * jacobian[i][k];
            }
        }
    }
    for j in 0..param_count {
        for k in 0..j { normal[j][k] = normal[k][j]; }
    }

    let covariance = invert(&normal)
        .ok_or_else(|| Error::fit("singular normal matrix at the solution"))?;

    let scale = chi / (point_count - param_count) as f64;
    let errors = (0..param_count)
        .map(|j| (covariance[j][j] * scale).abs().sqrt())
        .collect();

    Ok(FitResult { params, errors })
}


/// Forward differences, stepping backwards where a bound is in the way.
fn numerical_jacobian(
    model: &impl Fn(f64, &[f64]) -> f64,
    x: &[f64], params: &[f64], lower: &[f64], upper: &[f64],
) -> Vec<Vec<f64>>
{
    let param_count = params.len();
    let base: Vec<f64> = x.iter().map(|&x| model(x, params)).collect();

    let mut jacobian = vec![vec![0.0; param_count]; x.len()];
    let mut nudged = params.to_vec();

    for j in 0..param_count {
        let mut step = 1e-8 * (1.0 + params[j].abs());
        if params[j] + step > upper[j] && params[j] - step >= lower[j] {
            step = -step;
        }

        nudged[j] = params[j] + step;
        for (i, &x) in x.iter().enumerate() {
            jacobian[i][j] = (model(x, &nudged) - base[i]) / step;
        }
        nudged[j] = params[j];
    }

    jacobian
}


/// Gaussian elimination with partial pivoting. None for singular systems.
fn solve(mut matrix: Vec<Vec<f64>>, mut rhs: Vec<f64>) -> Option<Vec<f64>> {
    let n = rhs.len();

    for column in 0..n {
        let mut pivot = column;
        for row in column..n {
            let value = matrix[row][column];
            if !value.is_finite() { return None }
            if value.abs() > matrix[pivot][column].abs() { pivot = row }
        }

        if matrix[pivot][column].abs() < 1e-300 { return None }
        matrix.swap(column, pivot);
        rhs.swap(column, pivot);

        for row in column + 1..n {
            let factor = matrix[row][column] / matrix[column][column];
            for k in column..n {
                matrix[row][k] -= factor * matrix[column][k];
            }
            rhs[row] -= factor * rhs[column];
        }
    }

    let mut solution = vec![0.0; n];
    for row in (0..n).rev() {
        let mut value = rhs[row];
        for k in row + 1..n {
            value -= matrix[row][k] * solution[k];
        }
        solution[row] = value / matrix[row][row];
    }

    Some(solution)
}

fn invert(matrix: &[Vec<f64>]) -> Option<Vec<Vec<f64>>> {
    let n = matrix.len();
    let mut inverse = vec![vec![0.0; n]; n];

    for column in 0..n {
        let mut unit = vec![0.0; n];
        unit[column] = 1.0;

        let solution = solve(matrix.to_vec(), unit)?;
        for row in 0..n {
            inverse[row][column] = solution[row];
        }
    }

    Some(inverse)
}
