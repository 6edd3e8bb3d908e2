pub mod item;
pub mod job;
pub mod parameters;
pub mod rules;
pub mod validation;
