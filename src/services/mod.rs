pub mod ai_service;
pub mod api_client;
pub mod api_monitor;
pub mod content_validator;
pub mod generation_service;
pub mod item_store;
pub mod json_extract;
pub mod json_repair;
pub mod parameter_parser;
pub mod prompt_builder;
pub mod rule_mapper;
pub mod task_store;
