// src/lib.rs

pub mod controller;
pub mod cooldown;
pub mod gateway;
pub mod proxy;
pub mod scheduler;
pub mod stats;
pub mod tasks;
pub mod worker;

pub use herald_common::error::Error;

pub use controller::{EngineDeps, RunController, RunOutcome, RunState};
pub use gateway::{Gateway, GatewayFactory, RestGateway, RestGatewayFactory};
