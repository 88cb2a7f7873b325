//! ARIMA(p, d, q) estimation by exact Gaussian likelihood.
//!
//! The d-times differenced series (demeaned when `d == 0`, no drift term
//! otherwise) is treated as ARMA(p, q) in state-space form and run through a
//! Kalman filter started from the stationary state covariance. The innovation
//! variance is concentrated out, so Nelder-Mead only searches the ARMA
//! coefficients. Each coefficient is mapped through `COEFF_BOUND * tanh(u)` so
//! the search is unconstrained while coefficients stay inside (-1, 1).
//!
//! The filter runs on levels and rejects outliers: an observation whose
//! standardised innovation exceeds `REJECT_SIGMAS` robust standard deviations
//! is replaced by its one-step prediction and contributes a capped term to
//! the likelihood. A spike therefore neither drags the coefficients nor
//! leaks into the forecast for the points after it.
//!
//! Fitting and forecasting are split: [`Arima::fit`] returns an [`ArimaFit`]
//! holding only coefficients and scales, and [`ArimaFit::forecast`] filters
//! any trailing history with them. Forecasting from the fit window itself
//! gives the classic one-step forecast; applying an older fit to a newer
//! window is what makes a refit cadence above one possible.

use crate::error::FitError;
use argmin::core::{CostFunction, Executor, State, TerminationReason, TerminationStatus};
use argmin::solver::neldermead::NelderMead;
use serde::{Deserialize, Serialize};

const COEFF_BOUND: f64 = 0.99;
const MIN_VARIANCE: f64 = 1e-12;
const INITIAL_STEP: f64 = 0.5;
/// Innovations beyond this many robust standard deviations are rejected.
const REJECT_SIGMAS: f64 = 3.0;
/// MAD to standard deviation under normality.
const MAD_SCALE: f64 = 1.4826;
const LYAPUNOV_MAX_DOUBLINGS: usize = 64;
const LYAPUNOV_TOLERANCE: f64 = 1e-14;

/// Model orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArimaOrder {
    pub p: usize,
    pub d: usize,
    pub q: usize,
}

impl ArimaOrder {
    pub const fn new(p: usize, d: usize, q: usize) -> Self {
        Self { p, d, q }
    }

    /// Shortest window a fit will accept.
    pub fn min_window(&self) -> usize {
        self.d + 2 * (self.p + self.q) + 3
    }
}

impl Default for ArimaOrder {
    fn default() -> Self {
        Self::new(1, 1, 1)
    }
}

/// Estimator settings. Stateless; every call to [`Arima::fit`] is a full fit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Arima {
    order: ArimaOrder,
    max_iterations: u64,
    tolerance: f64,
}

/// Fitted coefficients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArimaFit {
    pub order: ArimaOrder,
    /// AR coefficients, lag 1 first.
    pub phi: Vec<f64>,
    /// MA coefficients, lag 1 first.
    pub theta: Vec<f64>,
    /// Mean of the differenced series (zero when `d > 0`).
    pub mean: f64,
    /// Robust standard deviation of the differenced fit window; sets the
    /// outlier rejection bound.
    pub scale: f64,
    /// Innovation variance at the optimum.
    pub sigma2: f64,
    /// Fit-window points rejected as outliers at the optimum.
    pub rejected: usize,
    pub iterations: u64,
}

impl Arima {
    pub fn new(order: ArimaOrder) -> Self {
        Self {
            order,
            max_iterations: 1_000,
            tolerance: 1e-9,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: u64) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn order(&self) -> ArimaOrder {
        self.order
    }

    pub fn fit(&self, window: &[f64]) -> Result<ArimaFit, FitError> {
        let required = self.order.min_window();
        if window.len() < required {
            return Err(FitError::InsufficientData {
                required,
                actual: window.len(),
            });
        }
        if window.iter().any(|v| !v.is_finite()) {
            return Err(FitError::NonFinite);
        }

        let ArimaOrder { p, d, q } = self.order;
        let diffed = difference(window, d);
        let mean = if d == 0 { mean(&diffed) } else { 0.0 };
        let variance = variance(&diffed);
        if variance < MIN_VARIANCE {
            return Err(FitError::Degenerate { variance });
        }
        let scale = robust_scale(&diffed).unwrap_or_else(|| variance.sqrt());

        let problem = LikelihoodProblem {
            window,
            d,
            p,
            mean,
            scale,
        };
        let (phi, theta, iterations) = if p + q == 0 {
            (Vec::new(), Vec::new(), 0)
        } else {
            let (best, iterations) = self.minimise(problem, p + q)?;
            let (phi, theta) = unpack(&best, p);
            (phi, theta, iterations)
        };

        let filtered = filter(window, d, mean, &phi, &theta, scale).ok_or_else(|| {
            FitError::Optimizer("optimum is outside the stationary region".to_string())
        })?;

        Ok(ArimaFit {
            order: self.order,
            phi,
            theta,
            mean,
            scale,
            sigma2: filtered.sigma2(),
            rejected: filtered.rejected,
            iterations,
        })
    }

    fn minimise(
        &self,
        problem: LikelihoodProblem<'_>,
        dims: usize,
    ) -> Result<(Vec<f64>, u64), FitError> {
        let origin = vec![0.0; dims];
        let mut simplex = Vec::with_capacity(dims + 1);
        simplex.push(origin.clone());
        for i in 0..dims {
            let mut vertex = origin.clone();
            vertex[i] = INITIAL_STEP;
            simplex.push(vertex);
        }

        let solver = NelderMead::new(simplex)
            .with_sd_tolerance(self.tolerance)
            .map_err(|e| FitError::Optimizer(e.to_string()))?;

        let result = Executor::new(problem, solver)
            .configure(|state| state.max_iters(self.max_iterations))
            .run()
            .map_err(|e| FitError::Optimizer(e.to_string()))?;

        let state = result.state();
        let iterations = state.get_iter();
        match state.get_termination_status() {
            TerminationStatus::Terminated(TerminationReason::SolverConverged) => {}
            TerminationStatus::Terminated(TerminationReason::MaxItersReached) => {
                return Err(FitError::NonConvergence { iterations });
            }
            other => return Err(FitError::Optimizer(format!("{other:?}"))),
        }

        let best = state
            .get_best_param()
            .cloned()
            .ok_or_else(|| FitError::Optimizer("no best parameter recorded".to_string()))?;
        Ok((best, iterations))
    }
}

impl Default for Arima {
    fn default() -> Self {
        Self::new(ArimaOrder::default())
    }
}

impl ArimaFit {
    /// One-step-ahead forecast following `history` (oldest first).
    pub fn forecast(&self, history: &[f64]) -> Result<f64, FitError> {
        let required = self.order.d + self.order.p.max(1);
        if history.len() < required {
            return Err(FitError::InsufficientData {
                required,
                actual: history.len(),
            });
        }
        if history.iter().any(|v| !v.is_finite()) {
            return Err(FitError::NonFinite);
        }

        filter(
            history,
            self.order.d,
            self.mean,
            &self.phi,
            &self.theta,
            self.scale,
        )
        .map(|filtered| filtered.next)
        .ok_or_else(|| FitError::Optimizer("coefficients are not stationary".to_string()))
    }
}

struct LikelihoodProblem<'a> {
    window: &'a [f64],
    d: usize,
    p: usize,
    mean: f64,
    scale: f64,
}

impl CostFunction for LikelihoodProblem<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    /// Concentrated negative log-likelihood per observation.
    fn cost(&self, param: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
        let (phi, theta) = unpack(param, self.p);
        let cost = filter(self.window, self.d, self.mean, &phi, &theta, self.scale)
            .map(|f| f.sigma2().ln() + f.log_det / f.steps as f64)
            .unwrap_or(f64::MAX);
        Ok(if cost.is_finite() { cost } else { f64::MAX })
    }
}

fn unpack(param: &[f64], p: usize) -> (Vec<f64>, Vec<f64>) {
    let bounded: Vec<f64> = param.iter().map(|u| COEFF_BOUND * u.tanh()).collect();
    let (phi, theta) = bounded.split_at(p);
    (phi.to_vec(), theta.to_vec())
}

/// ARMA(p, q) in Harvey state-space form: state dimension
/// `r = max(p, q + 1)`, transition with the AR coefficients in its first
/// column and ones on the superdiagonal, disturbance loading `[1, θ1, ...]`.
/// Matrices are row-major `r × r`.
struct StateSpace {
    r: usize,
    transition: Vec<f64>,
    disturbance: Vec<f64>,
}

impl StateSpace {
    fn new(phi: &[f64], theta: &[f64]) -> Self {
        let r = phi.len().max(theta.len() + 1);
        let mut transition = vec![0.0; r * r];
        for (i, coeff) in phi.iter().enumerate() {
            transition[i * r] = *coeff;
        }
        for i in 0..r - 1 {
            transition[i * r + i + 1] = 1.0;
        }
        let mut loading = vec![0.0; r];
        loading[0] = 1.0;
        loading[1..=theta.len()].copy_from_slice(theta);
        let disturbance = outer(&loading, &loading);
        Self {
            r,
            transition,
            disturbance,
        }
    }

    fn advance_state(&self, state: &[f64]) -> Vec<f64> {
        mat_vec(&self.transition, state, self.r)
    }

    /// `T P T' + R R'`.
    fn advance_covariance(&self, cov: &[f64]) -> Vec<f64> {
        let mut next = sandwich(&self.transition, cov, self.r);
        for (n, q) in next.iter_mut().zip(&self.disturbance) {
            *n += q;
        }
        next
    }

    /// Stationary covariance solving `P = T P T' + R R'` by doubling.
    /// `None` when the AR part is not stationary.
    fn stationary_covariance(&self) -> Option<Vec<f64>> {
        let r = self.r;
        let mut cov = self.disturbance.clone();
        let mut power = self.transition.clone();
        for _ in 0..LYAPUNOV_MAX_DOUBLINGS {
            let spread = sandwich(&power, &cov, r);
            for (c, s) in cov.iter_mut().zip(&spread) {
                *c += s;
            }
            power = mat_mul(&power, &power, r);
            let largest = power.iter().fold(0.0f64, |m, v| m.max(v.abs()));
            if !largest.is_finite() || cov.iter().any(|c| !c.is_finite()) {
                return None;
            }
            if largest < LYAPUNOV_TOLERANCE {
                return Some(cov);
            }
        }
        None
    }
}

struct Filtered {
    /// Sum of squared standardised innovations, capped at rejected points.
    sum_sq: f64,
    /// Sum of log prediction variances (in units of the innovation variance).
    log_det: f64,
    steps: usize,
    rejected: usize,
    /// One-step forecast of the next level.
    next: f64,
}

impl Filtered {
    fn sigma2(&self) -> f64 {
        self.sum_sq / self.steps.max(1) as f64
    }
}

/// Kalman filter over the levels in `window`. The first `d` values condition
/// the differencing; every later value is predicted from the cleaned history.
fn filter(
    window: &[f64],
    d: usize,
    mean: f64,
    phi: &[f64],
    theta: &[f64],
    scale: f64,
) -> Option<Filtered> {
    let model = StateSpace::new(phi, theta);
    let r = model.r;
    let weights = difference_weights(d);
    let level_base = |cleaned: &[f64]| -> f64 {
        let n = cleaned.len();
        -weights
            .iter()
            .enumerate()
            .map(|(k, w)| w * cleaned[n - 1 - k])
            .sum::<f64>()
    };

    let mut cov = model.stationary_covariance()?;
    let mut state = vec![0.0; r];
    let mut cleaned: Vec<f64> = window[..d].to_vec();
    let mut out = Filtered {
        sum_sq: 0.0,
        log_det: 0.0,
        steps: 0,
        rejected: 0,
        next: 0.0,
    };

    for &value in &window[d..] {
        let variance = cov[0];
        let predicted = level_base(&cleaned) + mean + state[0];
        let innovation = value - predicted;
        let bound = REJECT_SIGMAS * scale * variance.sqrt();

        out.log_det += variance.ln();
        out.steps += 1;
        if innovation.abs() > bound {
            out.sum_sq += bound * bound / variance;
            out.rejected += 1;
            cleaned.push(predicted);
            state = model.advance_state(&state);
            cov = model.advance_covariance(&cov);
        } else {
            out.sum_sq += innovation * innovation / variance;
            cleaned.push(value);
            let column: Vec<f64> = (0..r).map(|i| cov[i * r]).collect();
            let gain: Vec<f64> = mat_vec(&model.transition, &column, r)
                .into_iter()
                .map(|g| g / variance)
                .collect();
            state = model
                .advance_state(&state)
                .into_iter()
                .zip(&gain)
                .map(|(s, g)| s + g * innovation)
                .collect();
            cov = model.advance_covariance(&cov);
            for (c, gg) in cov.iter_mut().zip(outer(&gain, &gain)) {
                *c -= gg * variance;
            }
        }
    }

    out.next = level_base(&cleaned) + mean + state[0];
    Some(out)
}

/// Coefficients `w_k = (-1)^k C(d, k)` for `k = 1..=d`, so that
/// `Δ^d x_t = x_t + Σ w_k x_{t-k}`.
fn difference_weights(d: usize) -> Vec<f64> {
    let mut weights = Vec::with_capacity(d);
    let mut binomial = 1.0;
    for k in 1..=d {
        binomial *= (d + 1 - k) as f64 / k as f64;
        let sign = if k % 2 == 1 { -1.0 } else { 1.0 };
        weights.push(sign * binomial);
    }
    weights
}

/// `1.4826 * MAD`, or `None` when more than half the values coincide.
fn robust_scale(data: &[f64]) -> Option<f64> {
    let median = median(data.to_vec())?;
    let deviations: Vec<f64> = data.iter().map(|v| (v - median).abs()).collect();
    let mad = self::median(deviations)?;
    let scale = MAD_SCALE * mad;
    (scale > MIN_VARIANCE.sqrt()).then_some(scale)
}

fn median(mut data: Vec<f64>) -> Option<f64> {
    if data.is_empty() {
        return None;
    }
    data.sort_by(|a, b| a.total_cmp(b));
    let mid = data.len() / 2;
    Some(if data.len() % 2 == 0 {
        0.5 * (data[mid - 1] + data[mid])
    } else {
        data[mid]
    })
}

fn mat_vec(m: &[f64], v: &[f64], r: usize) -> Vec<f64> {
    (0..r)
        .map(|i| (0..r).map(|k| m[i * r + k] * v[k]).sum::<f64>())
        .collect()
}

fn mat_mul(a: &[f64], b: &[f64], r: usize) -> Vec<f64> {
    let mut out = vec![0.0; r * r];
    for i in 0..r {
        for j in 0..r {
            out[i * r + j] = (0..r).map(|k| a[i * r + k] * b[k * r + j]).sum::<f64>();
        }
    }
    out
}

/// `A M A'`.
fn sandwich(a: &[f64], m: &[f64], r: usize) -> Vec<f64> {
    let am = mat_mul(a, m, r);
    let mut out = vec![0.0; r * r];
    for i in 0..r {
        for j in 0..r {
            out[i * r + j] = (0..r).map(|k| am[i * r + k] * a[j * r + k]).sum::<f64>();
        }
    }
    out
}

fn outer(a: &[f64], b: &[f64]) -> Vec<f64> {
    a.iter()
        .flat_map(|x| b.iter().map(move |y| x * y))
        .collect()
}

pub(crate) fn difference(data: &[f64], order: usize) -> Vec<f64> {
    let mut result = data.to_vec();
    for _ in 0..order {
        result = result.windows(2).map(|w| w[1] - w[0]).collect();
    }
    result
}

pub(crate) fn mean(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    data.iter().sum::<f64>() / data.len() as f64
}

pub(crate) fn variance(data: &[f64]) -> f64 {
    if data.len() < 2 {
        return 0.0;
    }
    let m = mean(data);
    data.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (data.len() - 1) as f64
}
