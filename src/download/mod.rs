pub mod http_client;
pub mod http_errors;
pub mod queue;
pub mod state;
pub mod task;
