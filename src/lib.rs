pub mod batch;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod error;
pub mod session;
pub mod storage;
pub mod web;
