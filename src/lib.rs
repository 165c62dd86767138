pub mod config;
pub mod exec;
pub mod host;
pub mod judge;
pub mod model;
pub mod persistence;
pub mod routes;
pub mod web_server;

#[cfg(test)]
mod test_support;
