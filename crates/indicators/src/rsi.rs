/// RSI (Relative Strength Index) indicator.
///
/// Uses Wilder's smoothed moving average (same as TradingView / standard RSI).
/// Returns `None` until at least `period + 1` closed price values are available.
///
/// When the smoothed average loss is zero the RSI is 100. That includes a flat
/// series with neither gains nor losses.
#[derive(Debug, Clone)]
pub struct RsiIndicator {
    pub period: usize,
}

impl RsiIndicator {
    pub fn new(period: usize) -> Self {
        assert!(period >= 2, "RSI period must be >= 2");
        Self { period }
    }

    /// Compute RSI from a slice of close prices (oldest first).
    /// Returns `None` if there are fewer than `period + 1` values or any value
    /// is not finite.
    pub fn compute(&self, closes: &[f64]) -> Option<f64> {
        if closes.len() < self.period + 1 || closes.iter().any(|c| !c.is_finite()) {
            return None;
        }

        // First average gain/loss over the initial `period` changes
        let changes: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
        let initial = &changes[..self.period];

        let mut avg_gain = initial.iter().map(|&c| gain(c)).sum::<f64>() / self.period as f64;
        let mut avg_loss = initial.iter().map(|&c| loss(c)).sum::<f64>() / self.period as f64;

        // Wilder smoothing over remaining changes
        for &change in &changes[self.period..] {
            avg_gain = smooth(avg_gain, gain(change), self.period);
            avg_loss = smooth(avg_loss, loss(change), self.period);
        }

        Some(rsi_from_averages(avg_gain, avg_loss))
    }
}

/// RSI over `prices` with the given period. `None` when history is
/// insufficient, including any period below 2.
pub fn calculate(prices: &[f64], period: usize) -> Option<f64> {
    if period < 2 {
        return None;
    }
    RsiIndicator::new(period).compute(prices)
}

/// Wilder averages carried forward one close at a time.
///
/// After the same closes have been pushed, `value()` equals
/// `RsiIndicator::compute` over them.
#[derive(Debug, Clone)]
pub struct RsiState {
    period: usize,
    last_close: Option<f64>,
    changes: usize,
    avg_gain: f64,
    avg_loss: f64,
}

impl RsiState {
    pub fn new(period: usize) -> Self {
        assert!(period >= 2, "RSI period must be >= 2");
        Self {
            period,
            last_close: None,
            changes: 0,
            avg_gain: 0.0,
            avg_loss: 0.0,
        }
    }

    pub fn from_closes(period: usize, closes: &[f64]) -> Self {
        let mut state = Self::new(period);
        for &close in closes {
            state.push(close);
        }
        state
    }

    /// Feed the next close and return the RSI including it.
    pub fn push(&mut self, close: f64) -> Option<f64> {
        let Some(prev) = self.last_close.replace(close) else {
            return None;
        };
        let change = close - prev;
        self.changes += 1;

        if self.changes <= self.period {
            // Seed phase: accumulate sums, divide once the window is full.
            self.avg_gain += gain(change);
            self.avg_loss += loss(change);
            if self.changes == self.period {
                self.avg_gain /= self.period as f64;
                self.avg_loss /= self.period as f64;
            }
        } else {
            self.avg_gain = smooth(self.avg_gain, gain(change), self.period);
            self.avg_loss = smooth(self.avg_loss, loss(change), self.period);
        }
        self.value()
    }

    pub fn value(&self) -> Option<f64> {
        (self.changes >= self.period).then(|| rsi_from_averages(self.avg_gain, self.avg_loss))
    }

    pub fn period(&self) -> usize {
        self.period
    }
}

fn gain(change: f64) -> f64 {
    if change > 0.0 {
        change
    } else {
        0.0
    }
}

fn loss(change: f64) -> f64 {
    if change < 0.0 {
        -change
    } else {
        0.0
    }
}

fn smooth(avg: f64, next: f64, period: usize) -> f64 {
    (avg * (period - 1) as f64 + next) / period as f64
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - 100.0 / (1.0 + rs)
}
