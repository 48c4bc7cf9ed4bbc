pub mod config;
pub mod control;
pub mod pilot;
pub mod registry;
pub mod session;
pub mod vehicle;
pub mod web;
