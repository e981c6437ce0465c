// Trawler: adaptive-rate-limited crawling and candidate triage
//
// This is the library root. Each module corresponds to a major subsystem
// of the crawl-and-triage pipeline.

pub mod config;
pub mod db;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod ranking;
pub mod status;
pub mod twitter;
