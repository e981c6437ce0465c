// Candidate triage: admission scoring and author sentiment lookups.

pub mod growth;
pub mod ratings;

pub use growth::{Assessment, RankingEngine};
pub use ratings::{DbRatings, RatingCache, RatingSource};
