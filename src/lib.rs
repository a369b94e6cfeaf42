// vpndesk library crate
//
// The binary is a thin clap front-end over these modules; the backend daemon
// and the client share the wire types in `backend_api`.

// Infrastructure
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;

// Remote account service
pub mod api;
pub mod models;
pub mod shared;

// Privileged backend: wire types, daemon, tunnel supervisor, client
pub mod backend;
pub mod backend_api;
pub mod backend_client;
pub mod tunnel;

// Client orchestration
pub mod app;
pub mod catalog;
pub mod controller;
pub mod handlers;
pub mod session;
pub mod vault;
