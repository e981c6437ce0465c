// Crawl side of the platform: identities, pacing, search and lookup.
//
// Each submodule handles one concern: the HTTP source, the per-identity
// rate governor, the identity pool, and the paginated crawler on top.

pub mod client;
pub mod rate_limit;
pub mod search;
pub mod session;
pub mod tweets;
