// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT

/// Simple moving average; one value per full window.
pub fn sma(series: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || series.len() < period {
        return Vec::new();
    }
    series
        .windows(period)
        .map(|w| w.iter().sum::<f64>() / period as f64)
        .collect()
}

/// Exponential moving average seeded with the SMA of the first window.
pub fn ema(series: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || series.len() < period {
        return Vec::new();
    }
    let alpha = 2.0 / (period as f64 + 1.0);
    let seed = series[..period].iter().sum::<f64>() / period as f64;
    let mut out = vec![seed];
    for &value in &series[period..] {
        let prev = *out.last().unwrap_or(&seed);
        out.push(alpha * value + (1.0 - alpha) * prev);
    }
    out
}

/// Relative strength index with Wilder smoothing.  Returns one value per
/// candle after the initial period.
pub fn rsi(series: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || series.len() <= period {
        return Vec::new();
    }
    let mut gains = 0.0;
    let mut losses = 0.0;
    for w in series[..=period].windows(2) {
        let delta = w[1] - w[0];
        if delta >= 0.0 {
            gains += delta;
        } else {
            losses -= delta;
        }
    }
    let mut avg_gain = gains / period as f64;
    let mut avg_loss = losses / period as f64;
    let mut out = vec![rsi_value(avg_gain, avg_loss)];

    for w in series[period..].windows(2) {
        let delta = w[1] - w[0];
        let (gain, loss) = if delta >= 0.0 { (delta, 0.0) } else { (0.0, -delta) };
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
        out.push(rsi_value(avg_gain, avg_loss));
    }
    out
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - 100.0 / (1.0 + rs)
}

/// Dispatch by indicator name.  Unknown kinds return `None` so the tool can
/// report `invalid_arguments`.
pub fn calculate(kind: &str, series: &[f64], period: usize) -> Option<Vec<f64>> {
    match kind {
        "rsi" => Some(rsi(series, period)),
        "sma" => Some(sma(series, period)),
        "ema" => Some(ema(series, period)),
        _ => None,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
