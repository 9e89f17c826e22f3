//! Observable loading state.

use std::fmt;

use serde::Serialize;

use crate::capability::NetworkSpeed;

/// Lifecycle of a single loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadStatus {
    #[default]
    Idle,
    Loading,
    Success,
    Error,
    Retrying,
    /// Showing previously loaded data, either during a background refresh
    /// or after a refresh failed.
    Stale,
}

impl LoadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadStatus::Idle => "idle",
            LoadStatus::Loading => "loading",
            LoadStatus::Success => "success",
            LoadStatus::Error => "error",
            LoadStatus::Retrying => "retrying",
            LoadStatus::Stale => "stale",
        }
    }
}

impl fmt::Display for LoadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a consumer needs to render a unit in any phase.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadingState<T> {
    pub status: LoadStatus,
    /// What to render now.
    pub data: Option<T>,
    /// Most recent successful result.
    pub last_valid_data: Option<T>,
    /// 0.0 - 1.0 while tracking, `None` otherwise.
    pub progress: Option<f64>,
    pub retry_count: u32,
    pub error: Option<String>,
    pub is_background: bool,
    pub network: NetworkSpeed,
}

impl<T> Default for LoadingState<T> {
    fn default() -> Self {
        Self {
            status: LoadStatus::Idle,
            data: None,
            last_valid_data: None,
            progress: None,
            retry_count: 0,
            error: None,
            is_background: false,
            network: NetworkSpeed::default(),
        }
    }
}

impl<T> LoadingState<T> {
    /// Loading, retrying or refreshing.
    pub fn is_pending(&self) -> bool {
        matches!(self.status, LoadStatus::Loading | LoadStatus::Retrying)
            || (self.status == LoadStatus::Stale && self.is_background)
    }

    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }
}
