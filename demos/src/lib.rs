//! # ripc demos
//!
//! Runnable examples for the ripc transport stack.
//!
//! ```bash
//! cargo run --example echo_server_tcp -- --port 18080 --debug
//! cargo run --example echo_client_tcp -- --port 18080 --runtime smol --debug
//! cargo run --example echo_poll -- --port 18081 --debug
//! ```

#![warn(rust_2018_idioms)]

pub mod helpers;
