pub mod log_sink;
pub mod parameter_store;
