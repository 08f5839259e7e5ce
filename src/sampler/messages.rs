use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::settings::Settings;

/// Things that happen to a page while it's open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PageEvent {
    /// The page finished loading. Counts one visit.
    Loaded,
    Visible,
    Hidden,
    Click,
    #[serde(rename_all = "camelCase")]
    Scroll {
        scroll_top: f64,
        scroll_height: f64,
        client_height: f64,
    },
    /// Periodic flush timer.
    Tick,
    Unload,
    SettingsChanged { settings: Settings },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingResponse {
    pub active: bool,
}

/// Messages a running page sampler accepts.
#[derive(Debug)]
pub enum ContentMessage {
    Event(PageEvent),
    Ping(oneshot::Sender<PingResponse>),
}

/// Fraction of the scrollable height above the viewport. Content that fits the viewport has
/// nothing to scroll and reads as 0.
pub fn scroll_ratio(scroll_top: f64, scroll_height: f64, client_height: f64) -> f64 {
    let scrollable = scroll_height - client_height;
    if !scrollable.is_finite() || scrollable <= 0. || !scroll_top.is_finite() {
        return 0.;
    }
    (scroll_top / scrollable).clamp(0., 1.)
}
