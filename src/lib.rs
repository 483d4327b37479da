pub mod config;
pub mod engine;
pub mod error;
pub mod gate;
pub mod language;
pub mod output;
pub mod routes;
pub mod runner;
pub mod sandbox;
pub mod staging;
pub mod web_server;
