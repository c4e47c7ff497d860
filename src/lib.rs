//! Library crate for breachkit exposing the scan pipeline.
pub mod config;
pub mod dirscan;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod logging;
pub mod nmap_xml;
pub mod ports;
pub mod report;
pub mod scanner;
pub mod target;
pub mod types;
pub mod web;
