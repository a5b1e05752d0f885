pub mod input;
pub mod pipeline;
pub mod runner;
