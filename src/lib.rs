pub mod ad_creation;
pub mod ad_spec;
pub mod ads;
pub mod audit;
pub mod config;
pub mod constants;
pub mod crypto;
pub mod db;
pub mod facebook;
pub mod graph;
pub mod memory;
pub mod models;
pub mod oauth;
pub mod retry;
pub mod server;
pub mod store;
pub mod worker;

#[cfg(test)]
mod testing;
