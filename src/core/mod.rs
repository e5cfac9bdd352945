//! Configuration and message types shared by consumers, producers, and the service

pub mod config;
pub mod models;
