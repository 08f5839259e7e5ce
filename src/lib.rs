//! Private, local browsing statistics. Open pages are sampled for engagement (active time,
//! clicks, scroll depth, tab switches), the deltas are rolled up per page, date and hour in a
//! versioned stats document, and the cli turns them into period summaries and category
//! breakdowns.
//!

pub mod aggregate;
pub mod cli;
pub mod normalize;
pub mod processing;
pub mod sampler;
pub mod settings;
pub mod storage;
pub mod utils;
