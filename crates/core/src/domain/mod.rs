pub mod approval;
pub mod quote;
pub mod workflow;
