// File: src/tasks/mod.rs

pub mod keepalive;
pub mod proxy_probe;

pub use keepalive::spawn_keepalive_task;
pub use proxy_probe::spawn_proxy_probe_task;
