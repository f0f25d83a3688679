pub mod admin_service;
pub mod env;
pub mod http;
pub mod metrics_defs;
pub mod paths;
