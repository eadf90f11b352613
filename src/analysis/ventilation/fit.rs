use super::{Co2FitMethod, DecayFitResult, ParticleFitMethod};
use crate::data::model::{Series, Timestamp, seconds_between};
use crate::error::AnalysisError;

/// Tolerance (relative to the peak excess) when testing for the 1/e crossing.
pub const CROSSING_EPS: f64 = 1e-9;

const LOW_R2: f64 = 0.6;
const MAX_EVALUATIONS: usize = 10_000;
const Z_95: f64 = 1.96;

// ---------------------------------------------------------------------------
// CO2
// ---------------------------------------------------------------------------

/// Fit `C(t) = baseline + A·exp(-k·t)` to a CO2 decay segment.
///
/// Only a positional series is an error; everything else yields a result,
/// possibly degenerate and carrying warnings.
pub fn fit_co2_decay(series: &Series, baseline: f64, method: Co2FitMethod) -> Result<DecayFitResult, AnalysisError> {
    let points = series.valid_points("CO2 decay fit")?;
    let result = match method {
        Co2FitMethod::TimeConstant63 => time_constant_63(&points, baseline),
        Co2FitMethod::Regression | Co2FitMethod::TwoPoint => log_linear_co2(&points, baseline, method),
    };
    Ok(result)
}

fn log_linear_co2(points: &[(Timestamp, f64)], baseline: f64, method: Co2FitMethod) -> DecayFitResult {
    let above: Vec<(Timestamp, f64)> = points.iter().copied().filter(|(_, v)| *v > baseline).collect();
    if above.len() < 3 {
        return DecayFitResult::degenerate(baseline, "Insufficient points above baseline");
    }

    let t = hours_since_first(&above);
    let y: Vec<f64> = above.iter().map(|(_, v)| (v - baseline).ln()).collect();
    let n = y.len();

    let (k, yhat, ci) = if method == Co2FitMethod::TwoPoint {
        let span = t[n - 1] - t[0];
        if span <= 0.0 {
            return DecayFitResult::degenerate(baseline, "Samples span no time");
        }
        let k = ((y[0] - y[n - 1]) / span).max(0.0);
        let yhat: Vec<f64> = t.iter().map(|ti| y[0] - k * ti).collect();
        (k, yhat, None)
    } else {
        let Some(line) = linear_fit(&t, &y) else {
            return DecayFitResult::degenerate(baseline, "Samples span no time");
        };
        let yhat: Vec<f64> = t.iter().map(|ti| line.intercept + line.slope * ti).collect();
        let k = -line.slope;
        (k, yhat, line.slope_se.map(|se| (k - Z_95 * se, k + Z_95 * se)))
    };

    finish(baseline, k, &y, &yhat, &above, ci)
}

fn time_constant_63(points: &[(Timestamp, f64)], baseline: f64) -> DecayFitResult {
    if points.iter().filter(|(_, v)| *v > baseline).count() < 2 {
        return DecayFitResult::degenerate(baseline, "Insufficient points above baseline");
    }

    let excess: Vec<f64> = points.iter().map(|(_, v)| v - baseline).collect();
    let Some(peak_idx) = first_argmax(&excess) else {
        return DecayFitResult::degenerate(baseline, "No positive excess CO2 above baseline");
    };
    let peak = excess[peak_idx];
    if peak <= 0.0 {
        return DecayFitResult::degenerate(baseline, "No positive excess CO2 above baseline");
    }

    let target = peak / std::f64::consts::E;
    let Some(cross_idx) = (peak_idx + 1..excess.len()).find(|&i| reaches_target(excess[i], target, peak)) else {
        return DecayFitResult::degenerate(baseline, "Did not reach 63% decay threshold");
    };

    let (t0, t1) = (points[cross_idx - 1].0, points[cross_idx].0);
    let (y0, y1) = (excess[cross_idx - 1], excess[cross_idx]);
    let frac = if y1 == y0 {
        1.0
    } else {
        ((target - y0) / (y1 - y0)).clamp(0.0, 1.0)
    };
    let cross_secs = seconds_between(points[peak_idx].0, t0) + seconds_between(t0, t1) * frac;
    let tau_hours = cross_secs / 3600.0;
    if tau_hours <= 0.0 {
        return DecayFitResult::degenerate(baseline, "Invalid time constant");
    }

    let k = 1.0 / tau_hours;
    DecayFitResult {
        k_per_hr: k,
        ach: k,
        baseline,
        r2: 0.0,
        ci: None,
        warnings: Vec::new(),
        residuals: Vec::new(),
    }
}

/// `excess <= peak / e`, with a tolerance scaled by the peak.
pub(crate) fn reaches_target(excess: f64, target: f64, peak: f64) -> bool {
    excess <= target + CROSSING_EPS * peak.abs()
}

// ---------------------------------------------------------------------------
// Particles
// ---------------------------------------------------------------------------

/// Fit a particle-count decay segment.
pub fn fit_particle_decay(
    series: &Series,
    baseline: f64,
    method: ParticleFitMethod,
) -> Result<DecayFitResult, AnalysisError> {
    let points = series.valid_points("particle decay fit")?;
    if points.len() < 3 {
        return Ok(DecayFitResult::degenerate(baseline, "Insufficient points"));
    }
    let t = hours_since_first(&points);
    let y: Vec<f64> = points.iter().map(|(_, v)| *v).collect();

    let result = match method {
        ParticleFitMethod::LogLinear => {
            let (t_above, y_above): (Vec<f64>, Vec<f64>) = t
                .iter()
                .zip(&y)
                .filter(|(_, v)| **v > baseline + 1e-9)
                .map(|(t, v)| (*t, (v - baseline).ln()))
                .unzip();
            if t_above.len() < 3 {
                return Ok(DecayFitResult::degenerate(baseline, "Insufficient points above baseline"));
            }
            let Some(line) = linear_fit(&t_above, &y_above) else {
                return Ok(DecayFitResult::degenerate(baseline, "Samples span no time"));
            };
            let k = -line.slope;
            let yhat: Vec<f64> = t.iter().map(|ti| baseline + (line.intercept + line.slope * ti).exp()).collect();
            let ci = line.slope_se.map(|se| (k - Z_95 * se, k + Z_95 * se));
            finish(baseline, k, &y, &yhat, &points, ci)
        }
        ParticleFitMethod::Nonlinear => {
            let a0 = (y[0] - baseline).max(1e-6);
            match levenberg_marquardt(&t, &y, baseline, a0, 1.0) {
                Some(fit) => {
                    let yhat: Vec<f64> = t.iter().map(|ti| baseline + fit.a * (-fit.k * ti).exp()).collect();
                    let ci = fit.k_se.map(|se| (fit.k - Z_95 * se, fit.k + Z_95 * se));
                    finish(baseline, fit.k, &y, &yhat, &points, ci)
                }
                None => DecayFitResult::degenerate(baseline, "Nonlinear fit failed"),
            }
        }
    };
    Ok(result)
}

// ---------------------------------------------------------------------------
// Shared numerics
// ---------------------------------------------------------------------------

fn finish(
    baseline: f64,
    k: f64,
    y: &[f64],
    yhat: &[f64],
    points: &[(Timestamp, f64)],
    ci: Option<(f64, f64)>,
) -> DecayFitResult {
    let r2 = r_squared(y, yhat);
    let mut warnings = Vec::new();
    if r2 < LOW_R2 {
        log::debug!("decay fit R^2 {r2:.3} below {LOW_R2}");
        warnings.push("Low R^2".to_string());
    }
    let residuals = points
        .iter()
        .zip(y.iter().zip(yhat))
        .map(|((t, _), (y, f))| (*t, y - f))
        .collect();
    DecayFitResult {
        k_per_hr: k,
        ach: k,
        baseline,
        r2,
        ci,
        warnings,
        residuals,
    }
}

fn hours_since_first(points: &[(Timestamp, f64)]) -> Vec<f64> {
    let Some((t0, _)) = points.first() else {
        return Vec::new();
    };
    points.iter().map(|(t, _)| seconds_between(*t0, *t) / 3600.0).collect()
}

/// Index of the first maximum.
fn first_argmax(values: &[f64]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, v) in values.iter().enumerate() {
        if best.map_or(true, |b| *v > values[b]) {
            best = Some(i);
        }
    }
    best
}

/// Coefficient of determination; 0 when `y` has no variance.
pub fn r_squared(y: &[f64], yhat: &[f64]) -> f64 {
    if y.is_empty() {
        return 0.0;
    }
    let mean = y.iter().sum::<f64>() / y.len() as f64;
    let ss_res: f64 = y.iter().zip(yhat).map(|(a, b)| (a - b).powi(2)).sum();
    let ss_tot: f64 = y.iter().map(|a| (a - mean).powi(2)).sum();
    if ss_tot == 0.0 {
        return 0.0;
    }
    1.0 - ss_res / ss_tot
}

struct LineFit {
    slope: f64,
    intercept: f64,
    /// Standard error of the slope; needs at least three points.
    slope_se: Option<f64>,
}

fn linear_fit(x: &[f64], y: &[f64]) -> Option<LineFit> {
    let n = x.len();
    if n < 2 {
        return None;
    }
    let nf = n as f64;
    let mx = x.iter().sum::<f64>() / nf;
    let my = y.iter().sum::<f64>() / nf;
    let sxx: f64 = x.iter().map(|xi| (xi - mx).powi(2)).sum();
    if sxx <= 0.0 {
        return None;
    }
    let sxy: f64 = x.iter().zip(y).map(|(xi, yi)| (xi - mx) * (yi - my)).sum();
    let slope = sxy / sxx;
    let intercept = my - slope * mx;

    let slope_se = (n > 2).then(|| {
        let sse: f64 = x
            .iter()
            .zip(y)
            .map(|(xi, yi)| (yi - intercept - slope * xi).powi(2))
            .sum();
        (sse / (nf - 2.0) / sxx).sqrt()
    });
    Some(LineFit {
        slope,
        intercept,
        slope_se,
    })
}

struct ExpFit {
    a: f64,
    k: f64,
    k_se: Option<f64>,
}

/// Levenberg–Marquardt least squares for `y = baseline + a·exp(-k·t)`.
///
/// `None` when the evaluation budget runs out or the problem is singular.
fn levenberg_marquardt(t: &[f64], y: &[f64], baseline: f64, a0: f64, k0: f64) -> Option<ExpFit> {
    let sse = |a: f64, k: f64| -> f64 {
        t.iter()
            .zip(y)
            .map(|(ti, yi)| (yi - baseline - a * (-k * ti).exp()).powi(2))
            .sum()
    };

    let (mut a, mut k) = (a0, k0);
    let mut cost = sse(a, k);
    let mut evaluations = 1;
    let mut lambda = 1e-3;
    if !cost.is_finite() {
        return None;
    }

    'outer: loop {
        let mut jtj = [[0.0_f64; 2]; 2];
        let mut jtr = [0.0_f64; 2];
        for (ti, yi) in t.iter().zip(y) {
            let e = (-k * ti).exp();
            let r = yi - baseline - a * e;
            let (ja, jk) = (e, -a * ti * e);
            jtj[0][0] += ja * ja;
            jtj[0][1] += ja * jk;
            jtj[1][1] += jk * jk;
            jtr[0] += ja * r;
            jtr[1] += jk * r;
        }
        jtj[1][0] = jtj[0][1];

        // Converged once the residuals are orthogonal to both Jacobian columns.
        let cosine = (0..2)
            .filter(|&i| jtj[i][i] > 0.0)
            .map(|i| jtr[i].abs() / (jtj[i][i] * cost).sqrt())
            .fold(0.0, f64::max);
        if cost == 0.0 || cosine <= 1e-10 {
            break;
        }

        loop {
            if evaluations >= MAX_EVALUATIONS {
                log::debug!("nonlinear decay fit exhausted {MAX_EVALUATIONS} evaluations");
                return None;
            }
            let m00 = jtj[0][0] * (1.0 + lambda);
            let m11 = jtj[1][1] * (1.0 + lambda);
            let det = m00 * m11 - jtj[0][1] * jtj[1][0];
            if !det.is_finite() || det == 0.0 {
                return None;
            }
            let da = (m11 * jtr[0] - jtj[0][1] * jtr[1]) / det;
            let dk = (m00 * jtr[1] - jtj[1][0] * jtr[0]) / det;
            let new_cost = sse(a + da, k + dk);
            evaluations += 1;

            if new_cost.is_finite() && new_cost < cost {
                let relative_gain = (cost - new_cost) / cost;
                a += da;
                k += dk;
                cost = new_cost;
                lambda = (lambda / 10.0).max(1e-12);
                if relative_gain <= 1e-14 {
                    break 'outer;
                }
                continue 'outer;
            }

            lambda *= 10.0;
            if lambda > 1e12 {
                // no downhill step left
                break 'outer;
            }
        }
    }

    if !(a.is_finite() && k.is_finite()) {
        return None;
    }
    Some(ExpFit {
        a,
        k,
        k_se: exp_fit_k_se(t, a, k, cost),
    })
}

/// Standard error of `k` from the Gauss–Newton covariance `s²·(JᵀJ)⁻¹`.
fn exp_fit_k_se(t: &[f64], a: f64, k: f64, sse: f64) -> Option<f64> {
    let n = t.len();
    if n < 3 {
        return None;
    }
    let mut jtj = [[0.0_f64; 2]; 2];
    for ti in t {
        let e = (-k * ti).exp();
        let (ja, jk) = (e, -a * ti * e);
        jtj[0][0] += ja * ja;
        jtj[0][1] += ja * jk;
        jtj[1][1] += jk * jk;
    }
    let det = jtj[0][0] * jtj[1][1] - jtj[0][1] * jtj[0][1];
    if !det.is_finite() || det <= 0.0 {
        return None;
    }
    let var_k = sse / (n as f64 - 2.0) * jtj[0][0] / det;
    (var_k.is_finite() && var_k >= 0.0).then(|| var_k.sqrt())
}
