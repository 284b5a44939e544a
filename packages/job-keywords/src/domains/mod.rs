pub mod jobs;
pub mod keywords;
