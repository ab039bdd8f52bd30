//! Vectorized (batch, not streaming) indicator math. Each function takes a
//! full input slice and returns one `Vec<f64>` per canonical output column,
//! in the same order `registry::canonical_output_keys` enumerates them.
//!
//! The formulas use the standard recursive definitions (SMA running sum,
//! Wilder-smoothed RSI/ATR, EWMA-based EMA/MACD), re-expressed as a single
//! pass over a known-length slice instead of an online `update()` call per
//! tick, since the feature-frame builder computes the whole history ahead
//! of the hot loop rather than one bar at a time (spec §4.2).

use crate::domain::Bar;
use crate::registry::Params;

fn period_of(params: &Params) -> usize {
    params["period"].as_usize().expect("validated at IdeaCard::compile")
}

pub fn sma(input: &[f64], params: &Params) -> Vec<Vec<f64>> {
    let period = period_of(params);
    let mut out = vec![f64::NAN; input.len()];
    let mut sum = 0.0;
    for (i, &v) in input.iter().enumerate() {
        sum += v;
        if i >= period {
            sum -= input[i - period];
        }
        if i + 1 >= period {
            out[i] = sum / period as f64;
        }
    }
    vec![out]
}

pub fn ema(input: &[f64], params: &Params) -> Vec<Vec<f64>> {
    let period = period_of(params);
    let alpha = 2.0 / (period as f64 + 1.0);
    vec![ewma(input, alpha, period)]
}

/// Shared EWMA recursion (`adjust=false` convention): seed with the first
/// observed value, then `y_t = alpha * x_t + (1 - alpha) * y_{t-1}`. Value is
/// only reported once `count >= window` observations have been folded in.
fn ewma(input: &[f64], alpha: f64, window: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; input.len()];
    let mut mean = 0.0;
    let mut initialized = false;
    for (i, &v) in input.iter().enumerate() {
        if !initialized {
            mean = v;
            initialized = true;
        } else {
            mean = alpha * v + (1.0 - alpha) * mean;
        }
        if i + 1 >= window {
            out[i] = mean;
        }
    }
    out
}

pub fn rsi(input: &[f64], params: &Params) -> Vec<Vec<f64>> {
    let period = period_of(params);
    let alpha = 1.0 / period as f64;
    let mut gains = vec![0.0; input.len()];
    let mut losses = vec![0.0; input.len()];
    for i in 1..input.len() {
        let delta = input[i] - input[i - 1];
        if delta > 0.0 {
            gains[i] = delta;
        } else {
            losses[i] = -delta;
        }
    }
    let avg_gain = ewma(&gains, alpha, period);
    let avg_loss = ewma(&losses, alpha, period);

    let mut out = vec![f64::NAN; input.len()];
    for i in 0..input.len() {
        if i == 0 {
            continue;
        }
        let (g, l) = (avg_gain[i], avg_loss[i]);
        if g.is_nan() || l.is_nan() {
            continue;
        }
        out[i] = if l == 0.0 {
            100.0
        } else {
            let rs = g / l;
            100.0 - 100.0 / (1.0 + rs)
        };
    }
    vec![out]
}

pub fn atr(bars: &[Bar], params: &Params) -> Vec<Vec<f64>> {
    let period = period_of(params);
    let mut tr = vec![0.0; bars.len()];
    for i in 0..bars.len() {
        let b = &bars[i];
        let range_a = b.high - b.low;
        tr[i] = if i == 0 {
            range_a
        } else {
            let prev_close = bars[i - 1].close;
            range_a
                .max((b.high - prev_close).abs())
                .max((b.low - prev_close).abs())
        };
    }
    let alpha = 1.0 / period as f64;
    vec![ewma(&tr, alpha, period)]
}

pub fn bollinger_bands(input: &[f64], params: &Params) -> Vec<Vec<f64>> {
    let period = period_of(params);
    let std_mult = params["std_mult"].as_f64().expect("validated");
    let mut mid = vec![f64::NAN; input.len()];
    let mut upper = vec![f64::NAN; input.len()];
    let mut lower = vec![f64::NAN; input.len()];

    for i in 0..input.len() {
        if i + 1 < period {
            continue;
        }
        let window = &input[i + 1 - period..=i];
        let mean = window.iter().sum::<f64>() / period as f64;
        let variance =
            window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / period as f64;
        let std_dev = variance.sqrt();
        mid[i] = mean;
        upper[i] = mean + std_mult * std_dev;
        lower[i] = mean - std_mult * std_dev;
    }
    vec![upper, mid, lower]
}

pub fn macd(input: &[f64], params: &Params) -> Vec<Vec<f64>> {
    let fast = params["fast_period"].as_usize().expect("validated");
    let slow = params["slow_period"].as_usize().expect("validated");
    let signal_period = params["signal_period"].as_usize().expect("validated");

    let fast_ema = ewma(input, 2.0 / (fast as f64 + 1.0), fast);
    let slow_ema = ewma(input, 2.0 / (slow as f64 + 1.0), slow);

    let macd_line: Vec<f64> = fast_ema
        .iter()
        .zip(slow_ema.iter())
        .map(|(&f, &s)| if f.is_nan() || s.is_nan() { f64::NAN } else { f - s })
        .collect();

    let signal_alpha = 2.0 / (signal_period as f64 + 1.0);
    let signal_line = ewma_skip_nan(&macd_line, signal_alpha, signal_period);

    let hist: Vec<f64> = macd_line
        .iter()
        .zip(signal_line.iter())
        .map(|(&m, &s)| if m.is_nan() || s.is_nan() { f64::NAN } else { m - s })
        .collect();

    vec![macd_line, signal_line, hist]
}

/// Like `ewma`, but the warmup clock only starts once the input itself stops
/// being NaN (needed for MACD's signal line, which is computed over the
/// already-NaN-prefixed MACD line).
fn ewma_skip_nan(input: &[f64], alpha: f64, window: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; input.len()];
    let mut mean = 0.0;
    let mut initialized = false;
    let mut count = 0usize;
    for (i, &v) in input.iter().enumerate() {
        if v.is_nan() {
            continue;
        }
        if !initialized {
            mean = v;
            initialized = true;
        } else {
            mean = alpha * v + (1.0 - alpha) * mean;
        }
        count += 1;
        if count >= window {
            out[i] = mean;
        }
    }
    out
}

pub fn donchian(bars: &[Bar], params: &Params) -> Vec<Vec<f64>> {
    let period = period_of(params);
    let mut upper = vec![f64::NAN; bars.len()];
    let mut lower = vec![f64::NAN; bars.len()];
    let mut mid = vec![f64::NAN; bars.len()];
    for i in 0..bars.len() {
        if i + 1 < period {
            continue;
        }
        let window = &bars[i + 1 - period..=i];
        let hi = window.iter().map(|b| b.high).fold(f64::MIN, f64::max);
        let lo = window.iter().map(|b| b.low).fold(f64::MAX, f64::min);
        upper[i] = hi;
        lower[i] = lo;
        mid[i] = (hi + lo) / 2.0;
    }
    vec![upper, mid, lower]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use crate::registry::ParamValue;

    fn params(period: i64) -> Params {
        let mut p = BTreeMap::new();
        p.insert("period".to_string(), ParamValue::Int(period));
        p
    }

    #[test]
    fn sma_warms_up_after_period_minus_one() {
        let input = [1.0, 2.0, 3.0, 4.0, 5.0];
        let out = &sma(&input, &params(3))[0];
        assert!(out[0].is_nan());
        assert!(out[1].is_nan());
        assert_eq!(out[2], 2.0);
        assert_eq!(out[3], 3.0);
        assert_eq!(out[4], 4.0);
    }

    #[test]
    fn ema_seeds_with_first_value() {
        let input = [10.0, 10.0, 10.0, 10.0];
        let out = &ema(&input, &params(2))[0];
        assert_eq!(out[1], 10.0);
        assert_eq!(out[3], 10.0);
    }

    #[test]
    fn rsi_is_100_when_no_losses() {
        let input = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let out = &rsi(&input, &params(3))[0];
        assert_eq!(out[5], 100.0);
    }
}
