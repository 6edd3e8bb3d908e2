pub mod generation;
pub mod health;
pub mod monitor;
