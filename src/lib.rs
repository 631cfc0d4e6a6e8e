//! Video handling classifier.
//!
//! Scores how much a video moves and which target items appear in it, and
//! folds both into a single [`Report`](analytics::Report): the set of matched
//! items plus a `delicate` / `normal` / `withoutcare` handling verdict.

pub mod analytics;
pub mod config;
