pub mod grouping;
pub mod models;
