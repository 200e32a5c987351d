pub mod agent;
pub mod status;
