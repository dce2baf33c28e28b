//! Forward-auth guard: answers "may this bearer token pass?" for an ingress proxy.
pub mod api;
pub mod app;
pub mod config;
pub mod error;
pub mod middleware;
pub mod services;
pub mod state;
