//! webserv - single-process, readiness-driven HTTP/1.1 server
//!
//! Static files, directory listings, uploads and CGI over one event loop.

pub mod cgi;
pub mod config;
pub mod error;
pub mod handler;
pub mod http;
pub mod server;
