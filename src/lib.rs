pub mod audit;
pub mod delegation;
pub mod errors;
pub mod logging;
pub mod tdd;
pub mod tdd_config;
pub mod validation;
