#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod activation;
pub(crate) mod api;
pub mod app;
pub mod config;
pub mod error;
pub mod jobs;
pub mod observability;
pub mod operator;
pub mod ranking;
pub mod store;
pub mod util;
