pub mod alert_text;
pub mod cooldown;
pub mod evaluation_service;
pub mod health_check;
pub mod models;
pub mod status_resolver;
pub mod timestamp;
