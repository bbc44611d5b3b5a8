//! Demand forecasting over the historical series.
//!
//! Two methods, both producing a flat projection: a trailing moving average
//! and simple exponential smoothing. Values are rounded to two decimals
//! before they are persisted into the `forecast` field.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_PERIODS: usize = 7;
pub const MOVING_AVERAGE_WINDOW: usize = 3;
pub const SMOOTHING_ALPHA: f64 = 0.5;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastMethod {
    #[default]
    MovingAverage,
    ExponentialSmoothing,
}

impl ForecastMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MovingAverage => "moving_average",
            Self::ExponentialSmoothing => "exponential_smoothing",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ForecastError> {
        match value.trim().to_lowercase().as_str() {
            "moving_average" | "moving-average" => Ok(Self::MovingAverage),
            "exponential_smoothing" | "exponential-smoothing" => Ok(Self::ExponentialSmoothing),
            _ => Err(ForecastError::UnknownMethod(value.to_string())),
        }
    }

    /// Minimum demand history for a meaningful projection. Smoothing needs a
    /// second point for its recursion; the average degrades to the single
    /// value and is allowed.
    pub fn minimum_history(&self) -> usize {
        match self {
            Self::MovingAverage => 1,
            Self::ExponentialSmoothing => 2,
        }
    }
}

impl std::fmt::Display for ForecastMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ForecastError {
    #[error("'{0}' is not a recognized forecast method")]
    UnknownMethod(String),
    #[error("{method} needs at least {needed} demand points, found {available}")]
    InsufficientHistory { method: ForecastMethod, needed: usize, available: usize },
}

/// Projects `periods` future demand values from `history` (ascending order).
pub fn project(
    history: &[f64],
    method: ForecastMethod,
    periods: usize,
) -> Result<Vec<f64>, ForecastError> {
    let needed = method.minimum_history();
    if history.len() < needed {
        return Err(ForecastError::InsufficientHistory {
            method,
            needed,
            available: history.len(),
        });
    }

    let level = match method {
        ForecastMethod::MovingAverage => {
            let window = MOVING_AVERAGE_WINDOW.min(history.len());
            mean(&history[history.len() - window..])
        }
        ForecastMethod::ExponentialSmoothing => history
            .iter()
            .skip(1)
            .fold(history[0], |level, &value| SMOOTHING_ALPHA * value + (1.0 - SMOOTHING_ALPHA) * level),
    };

    Ok(vec![round2(level); periods])
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
