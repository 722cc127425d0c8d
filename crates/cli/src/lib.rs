//! Command-line front end for the GPU zombie auditor

pub mod api;
pub mod commands;
pub mod config;
pub mod output;
