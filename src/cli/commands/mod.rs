pub mod exec;
pub mod probe;
pub mod transfer;
