pub mod authorization;
pub mod booking;
pub mod bootstrap;
pub mod config;
pub mod consts;
pub mod db;
pub mod export;
pub mod models;
pub mod pricing;
pub mod services;
pub mod utils;
