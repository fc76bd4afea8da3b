pub mod bluesky;
pub mod slack;
