//! Pure risk analytics over return and equity series.
//!
//! Stateless, deterministic functions on `f64` series — statistics, not
//! money, so they live outside the Decimal domain. Degenerate inputs
//! (empty or too-short series, zero denominators) return 0.0.

/// Default decay factor for the EWMA variance recursion (RiskMetrics
/// convention).
pub const DEFAULT_EWMA_LAMBDA: f64 = 0.94;

/// Trading days per year, for annualizing per-day statistics.
const TRADING_DAYS: f64 = 252.0;

/// Historical Value-at-Risk: the empirical quantile of the return series
/// at the (1 - confidence) percentile, reported as a loss magnitude.
pub fn historical_var(returns: &[f64], confidence: f64) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    let mut sorted = returns.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let idx = (((1.0 - confidence) * sorted.len() as f64).floor() as usize).min(sorted.len() - 1);
    (-sorted[idx]).max(0.0)
}

/// Parametric (variance-covariance) VaR: `-(mean - z * std_dev)` with
/// `z` the standard normal quantile at `confidence`.
pub fn parametric_var(mean: f64, std_dev: f64, confidence: f64) -> f64 {
    (z_score(confidence) * std_dev - mean).max(0.0)
}

/// Sample standard deviation (N-1 denominator).
pub fn volatility(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let var = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    var.sqrt()
}

/// Exponentially weighted volatility: `v_t = λ·v_{t-1} + (1-λ)·r_t²`,
/// seeded with the first squared return.
pub fn ewma_volatility(returns: &[f64], lambda: f64) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    let mut v = returns[0] * returns[0];
    for r in &returns[1..] {
        v = lambda * v + (1.0 - lambda) * r * r;
    }
    v.sqrt()
}

/// Pearson correlation coefficient of two equally long series.
pub fn correlation(x: &[f64], y: &[f64]) -> f64 {
    if x.len() != y.len() || x.len() < 2 {
        return 0.0;
    }
    let n = x.len() as f64;
    let mx = x.iter().sum::<f64>() / n;
    let my = y.iter().sum::<f64>() / n;
    let cov: f64 = x.iter().zip(y).map(|(a, b)| (a - mx) * (b - my)).sum();
    let vx: f64 = x.iter().map(|a| (a - mx).powi(2)).sum();
    let vy: f64 = y.iter().map(|b| (b - my).powi(2)).sum();
    if vx == 0.0 || vy == 0.0 {
        return 0.0;
    }
    cov / (vx.sqrt() * vy.sqrt())
}

/// Beta of an asset against the market: cov(asset, market) / var(market).
pub fn beta(asset_returns: &[f64], market_returns: &[f64]) -> f64 {
    if asset_returns.len() != market_returns.len() || asset_returns.len() < 2 {
        return 0.0;
    }
    let n = asset_returns.len() as f64;
    let ma = asset_returns.iter().sum::<f64>() / n;
    let mm = market_returns.iter().sum::<f64>() / n;
    let cov: f64 = asset_returns
        .iter()
        .zip(market_returns)
        .map(|(a, m)| (a - ma) * (m - mm))
        .sum();
    let var_m: f64 = market_returns.iter().map(|m| (m - mm).powi(2)).sum();
    if var_m == 0.0 {
        return 0.0;
    }
    cov / var_m
}

/// Largest peak-to-trough decline over an equity curve, as a fraction of
/// the peak.
pub fn max_drawdown(values: &[f64]) -> f64 {
    let mut peak = f64::MIN;
    let mut max_dd = 0.0;
    for &v in values {
        if v > peak {
            peak = v;
        } else if peak > 0.0 {
            let dd = (peak - v) / peak;
            if dd > max_dd {
                max_dd = dd;
            }
        }
    }
    max_dd
}

/// Decline from the running peak to the latest value.
pub fn current_drawdown(values: &[f64]) -> f64 {
    let Some(&last) = values.last() else {
        return 0.0;
    };
    let peak = values.iter().copied().fold(f64::MIN, f64::max);
    if peak > 0.0 && last < peak {
        (peak - last) / peak
    } else {
        0.0
    }
}

/// Annualized Sharpe ratio of a per-period return series against a
/// per-period risk-free rate.
pub fn sharpe_ratio(returns: &[f64], risk_free: f64) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let vol = volatility(returns);
    if vol == 0.0 {
        return 0.0;
    }
    (mean - risk_free) / vol * TRADING_DAYS.sqrt()
}

/// Kelly criterion: fraction of capital to stake given a win rate and
/// the average win/loss sizes.
pub fn kelly_criterion(win_rate: f64, avg_win: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 || avg_win == 0.0 {
        return 0.0;
    }
    let payoff = avg_win / avg_loss;
    win_rate - (1.0 - win_rate) / payoff
}

/// Fixed-fractional position size: how many units to trade so that a
/// stop-out loses exactly `risk_per_trade` of the account.
pub fn optimal_position_size(account_size: f64, risk_per_trade: f64, stop_distance: f64) -> f64 {
    if stop_distance == 0.0 {
        return 0.0;
    }
    account_size * risk_per_trade / stop_distance
}

/// Standard normal quantile (inverse CDF), Acklam's rational
/// approximation — |relative error| < 1.15e-9 over (0, 1).
pub fn z_score(p: f64) -> f64 {
    if !(0.0..=1.0).contains(&p) || p == 0.0 || p == 1.0 {
        return 0.0;
    }
    const A: [f64; 6] = [
        -3.969683028665376e+01,
        2.209460984245205e+02,
        -2.759285104469687e+02,
        1.383577518672690e+02,
        -3.066479806614716e+01,
        2.506628277459239e+00,
    ];
    const B: [f64; 5] = [
        -5.447609879822406e+01,
        1.615858368580409e+02,
        -1.556989798598866e+02,
        6.680131188771972e+01,
        -1.328068155288572e+01,
    ];
    const C: [f64; 6] = [
        -7.784894002430293e-03,
        -3.223964580411365e-01,
        -2.400758277161838e+00,
        -2.549732539343734e+00,
        4.374664141464968e+00,
        2.938163982698783e+00,
    ];
    const D: [f64; 4] = [
        7.784695709041462e-03,
        3.224671290700398e-01,
        2.445134137142996e+00,
        3.754408661907416e+00,
    ];
    const P_LOW: f64 = 0.02425;

    if p < P_LOW {
        let q = (-2.0 * p.ln()).sqrt();
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        let q = (-2.0 * (1.0 - p).ln()).sqrt();
        -((((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64, tol: f64) {
        assert!((a - b).abs() < tol, "{a} !~ {b}");
    }

    #[test]
    fn z_score_matches_tables() {
        close(z_score(0.95), 1.6449, 1e-3);
        close(z_score(0.99), 2.3263, 1e-3);
        close(z_score(0.5), 0.0, 1e-9);
        close(z_score(0.05), -1.6449, 1e-3);
    }

    #[test]
    fn historical_var_takes_lower_quantile() {
        let returns = [
            -0.05, -0.03, -0.02, -0.01, 0.0, 0.01, 0.02, 0.03, 0.04, 0.05,
        ];
        close(historical_var(&returns, 0.90), 0.03, 1e-12);
        close(historical_var(&returns, 0.99), 0.05, 1e-12);
        assert_eq!(historical_var(&[], 0.95), 0.0);
    }

    #[test]
    fn parametric_var_closed_form() {
        // mean 0, std 0.02, 95%: 1.6449 * 0.02
        close(parametric_var(0.0, 0.02, 0.95), 0.032897, 1e-4);
        // a large positive mean floors at zero
        assert_eq!(parametric_var(1.0, 0.01, 0.95), 0.0);
    }

    #[test]
    fn sample_volatility() {
        close(volatility(&[0.01, 0.02, 0.03]), 0.01, 1e-12);
        assert_eq!(volatility(&[0.01]), 0.0);
    }

    #[test]
    fn ewma_recursion() {
        let r = [0.01, -0.02, 0.015];
        let lambda = DEFAULT_EWMA_LAMBDA;
        let mut v = 0.01f64 * 0.01;
        v = lambda * v + (1.0 - lambda) * 0.02 * 0.02;
        v = lambda * v + (1.0 - lambda) * 0.015 * 0.015;
        close(ewma_volatility(&r, lambda), v.sqrt(), 1e-15);
    }

    #[test]
    fn beta_of_market_against_itself_is_one() {
        let m = [0.01, -0.02, 0.03, 0.005];
        close(beta(&m, &m), 1.0, 1e-12);
        // doubling the asset moves doubles beta
        let a: Vec<f64> = m.iter().map(|x| 2.0 * x).collect();
        close(beta(&a, &m), 2.0, 1e-12);
    }

    #[test]
    fn correlation_bounds() {
        let x = [1.0, 2.0, 3.0, 4.0];
        let y = [2.0, 4.0, 6.0, 8.0];
        close(correlation(&x, &y), 1.0, 1e-12);
        let inv: Vec<f64> = x.iter().map(|v| -v).collect();
        close(correlation(&x, &inv), -1.0, 1e-12);
    }

    #[test]
    fn drawdown_reference_curve() {
        let curve = [100.0, 120.0, 90.0, 130.0];
        close(max_drawdown(&curve), 0.25, 1e-12);
        close(current_drawdown(&curve), 0.0, 1e-12);
        close(current_drawdown(&[100.0, 120.0, 90.0]), 0.25, 1e-12);
    }

    #[test]
    fn kelly_closed_form() {
        // 60% win rate, 2:1 payoff → 0.6 - 0.4/2 = 0.4
        close(kelly_criterion(0.6, 200.0, 100.0), 0.4, 1e-12);
        assert_eq!(kelly_criterion(0.6, 200.0, 0.0), 0.0);
    }

    #[test]
    fn position_size_closed_form() {
        // Risk 1% of 100k with a $5 stop → 200 units
        close(optimal_position_size(100_000.0, 0.01, 5.0), 200.0, 1e-12);
        assert_eq!(optimal_position_size(100_000.0, 0.01, 0.0), 0.0);
    }

    #[test]
    fn sharpe_zero_vol_is_zero() {
        assert_eq!(sharpe_ratio(&[0.01, 0.01, 0.01], 0.0), 0.0);
    }
}
