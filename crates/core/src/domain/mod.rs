pub mod candidate;
pub mod contract;
pub mod flow;
pub mod reason;
pub mod recommendation;
pub mod verification;
