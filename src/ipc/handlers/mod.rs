pub mod analytics;
pub mod assessments;
pub mod classes;
pub mod core;
pub mod report_cards;
pub mod results;
pub mod scores;
pub mod sessions;
