pub mod cold_start;
pub mod counter;
