pub mod aws;
pub mod chat_handler;
pub mod health_handler;
pub mod in_memory_cloud;
pub mod ui_handler;
