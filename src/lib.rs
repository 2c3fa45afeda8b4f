#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

pub mod auth;
pub mod chat;
pub mod config;
pub mod gateway;
pub mod records;

pub use config::Config;
