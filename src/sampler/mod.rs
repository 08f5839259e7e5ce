//! Per-page engagement sampling. A [Sampler] is a plain state machine: it is fed [PageEvent]s with
//! the time they happened and answers with the [PageDelta] to persist, if any. Timers, channels
//! and the storage round trip live in [collector::SamplerModule].
//!
//! Every delta covers the activity since the previous one. Deltas still being written count as
//! reported, so flush triggers may overlap freely; a delta whose write fails is folded back into the
//! next flush, so nothing is lost and nothing is counted twice.

pub mod collector;
pub mod messages;

use std::collections::{BTreeSet, VecDeque};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::{
    normalize::{is_host_excluded, normalize_url, Granularity},
    settings::Settings,
    storage::entities::{PageDelta, StatsDelta},
    utils::time::local_keys,
};

pub use messages::{scroll_ratio, ContentMessage, PageEvent, PingResponse};

/// The parts of [Settings] a running page cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
struct TrackingFlags {
    enabled: bool,
    exclude_hosts: BTreeSet<String>,
    granularity: Granularity,
}

impl From<&Settings> for TrackingFlags {
    fn from(settings: &Settings) -> Self {
        Self {
            enabled: settings.enabled,
            exclude_hosts: settings.exclude_hosts.clone(),
            granularity: settings.data_granularity,
        }
    }
}

/// Counters at some point of the page's life, or the difference between two such points.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
struct Snapshot {
    active_ms: u64,
    clicks: u64,
    tab_switches: u64,
    scroll: f64,
}

impl Snapshot {
    fn since(&self, earlier: &Snapshot) -> Snapshot {
        Snapshot {
            active_ms: self.active_ms.saturating_sub(earlier.active_ms),
            clicks: self.clicks.saturating_sub(earlier.clicks),
            tab_switches: self.tab_switches.saturating_sub(earlier.tab_switches),
            scroll: (self.scroll - earlier.scroll).max(0.),
        }
    }

    fn is_zero(&self) -> bool {
        self.active_ms == 0 && self.clicks == 0 && self.tab_switches == 0 && self.scroll == 0.
    }
}

/// A delta handed out and not yet confirmed or rejected.
#[derive(Debug, Clone, Copy, PartialEq)]
struct InFlight {
    change: Snapshot,
    visit: bool,
}

#[derive(Debug)]
struct ActivePage {
    raw_url: String,
    flags: TrackingFlags,
    visible_since: Option<DateTime<Utc>>,
    accumulated_ms: u64,
    clicks: u64,
    tab_switches: u64,
    max_scroll: f64,
    visit_pending: bool,
    visit_counted: bool,
    /// Everything already handed out in deltas, minus the ones that failed to be written.
    sent: Snapshot,
    /// Deltas awaiting their write result, oldest first.
    in_flight: VecDeque<InFlight>,
    unloaded: bool,
}

impl ActivePage {
    fn close_visible_interval(&mut self, now: DateTime<Utc>) {
        if let Some(since) = self.visible_since {
            let elapsed = (now - since).num_milliseconds().max(0) as u64;
            self.accumulated_ms = self.accumulated_ms.saturating_add(elapsed);
            self.visible_since = Some(now.max(since));
        }
    }

    fn current(&self) -> Snapshot {
        Snapshot {
            active_ms: self.accumulated_ms,
            clicks: self.clicks,
            tab_switches: self.tab_switches,
            scroll: self.max_scroll,
        }
    }

    fn emitting(&self) -> bool {
        self.flags.enabled
            && normalize_url(&self.raw_url, self.flags.granularity)
                .is_some_and(|identity| !is_host_excluded(&identity.host, &self.flags.exclude_hosts))
    }

    /// Reports what happened since the last delta handed out. Deltas still being written count as
    /// sent, so overlapping triggers never report the same activity twice.
    fn flush(&mut self, now: DateTime<Utc>) -> Option<PageDelta> {
        self.close_visible_interval(now);
        let current = self.current();

        if !self.emitting() {
            // Activity while tracking is off is dropped, not saved up for later.
            self.sent = current;
            self.visit_pending = false;
            return None;
        }
        let identity = normalize_url(&self.raw_url, self.flags.granularity)?;

        let change = current.since(&self.sent);
        let visit = self.visit_pending;
        if change.is_zero() && !visit {
            return None;
        }

        let (date_key, hour_key) = local_keys(now);
        let delta = StatsDelta {
            visits: visit.then_some(1),
            sessions: None,
            active_ms: (change.active_ms > 0).then_some(change.active_ms),
            clicks: (change.clicks > 0).then_some(change.clicks),
            scroll_distance: (change.scroll > 0.).then_some(change.scroll),
            tab_switches: (change.tab_switches > 0).then_some(change.tab_switches),
        };
        self.sent = current;
        self.visit_pending = false;
        self.in_flight.push_back(InFlight { change, visit });

        Some(PageDelta {
            key: identity.key,
            url: identity.url,
            host: identity.host,
            path: identity.path,
            date_key,
            hour_key,
            delta,
        })
    }

    /// Puts a rejected delta back so the next flush reports it again.
    fn rewind(&mut self, rejected: InFlight) {
        self.sent = Snapshot {
            active_ms: self.sent.active_ms.saturating_sub(rejected.change.active_ms),
            clicks: self.sent.clicks.saturating_sub(rejected.change.clicks),
            tab_switches: self
                .sent
                .tab_switches
                .saturating_sub(rejected.change.tab_switches),
            scroll: (self.sent.scroll - rejected.change.scroll).max(0.),
        };
        self.visit_pending |= rejected.visit;
    }
}

#[derive(Debug)]
enum SamplerState {
    /// Tracking was off for this page when it loaded. Nothing is ever emitted.
    Inactive,
    Active(Box<ActivePage>),
}

#[derive(Debug)]
pub struct Sampler {
    state: SamplerState,
}

impl Sampler {
    /// Decides once, at page start, whether the page is tracked at all.
    pub fn start(raw_url: &str, settings: &Settings, visible: bool, now: DateTime<Utc>) -> Self {
        let flags = TrackingFlags::from(settings);
        let identity = normalize_url(raw_url, flags.granularity);

        let state = match identity {
            Some(identity)
                if flags.enabled
                    && settings.onboarding.consent_confirmed
                    && !is_host_excluded(&identity.host, &flags.exclude_hosts) =>
            {
                debug!("Sampling {}", identity.key);
                SamplerState::Active(Box::new(ActivePage {
                    raw_url: raw_url.to_string(),
                    flags,
                    visible_since: visible.then_some(now),
                    accumulated_ms: 0,
                    clicks: 0,
                    tab_switches: 0,
                    max_scroll: 0.,
                    visit_pending: false,
                    visit_counted: false,
                    sent: Snapshot::default(),
                    in_flight: VecDeque::new(),
                    unloaded: false,
                }))
            }
            _ => {
                debug!("Not sampling {raw_url}");
                SamplerState::Inactive
            }
        };
        Self { state }
    }

    pub fn is_active(&self) -> bool {
        matches!(&self.state, SamplerState::Active(page) if !page.unloaded)
    }

    /// Applies an event. Returns the delta to write when the event triggers a flush that has
    /// something to report. The caller must follow every returned delta with
    /// [Sampler::complete_flush].
    pub fn handle(&mut self, event: PageEvent, now: DateTime<Utc>) -> Option<PageDelta> {
        let SamplerState::Active(page) = &mut self.state else {
            return None;
        };
        if page.unloaded {
            return None;
        }

        match event {
            PageEvent::Loaded => {
                if !page.visit_counted {
                    page.visit_counted = true;
                    page.visit_pending = true;
                }
                page.flush(now)
            }
            PageEvent::Visible => {
                if page.visible_since.is_none() {
                    page.visible_since = Some(now);
                }
                None
            }
            PageEvent::Hidden => {
                if page.visible_since.is_some() {
                    page.close_visible_interval(now);
                    page.visible_since = None;
                    page.tab_switches += 1;
                }
                page.flush(now)
            }
            PageEvent::Click => {
                page.clicks += 1;
                None
            }
            PageEvent::Scroll {
                scroll_top,
                scroll_height,
                client_height,
            } => {
                let ratio = scroll_ratio(scroll_top, scroll_height, client_height);
                page.max_scroll = page.max_scroll.max(ratio);
                None
            }
            PageEvent::Tick => page.flush(now),
            PageEvent::Unload => {
                let delta = page.flush(now);
                page.visible_since = None;
                page.unloaded = true;
                delta
            }
            PageEvent::SettingsChanged { settings } => {
                page.flags = TrackingFlags::from(&settings);
                None
            }
        }
    }

    /// Reports the outcome of writing the oldest delta still awaiting an answer. Results must
    /// arrive in the order the deltas were returned. A rejected delta is reported again by the
    /// next flush; an accepted one is never reported again.
    pub fn complete_flush(&mut self, success: bool) {
        let SamplerState::Active(page) = &mut self.state else {
            return;
        };
        let Some(answered) = page.in_flight.pop_front() else {
            return;
        };
        if !success {
            page.rewind(answered);
        }
    }
}
