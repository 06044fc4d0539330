//! pyrelay: a caching reverse proxy for Python package indexes.
//!
//! The proxy speaks the Simple Repository API on both sides: it answers
//! installers' project-list, file-list, and download requests, serving
//! metadata from per-index TTL caches and file bytes from a bounded on-disk
//! cache that downloads each upstream file at most once.

pub mod cache;
pub mod cli;
pub mod config;
pub mod file_cache;
pub mod html;
pub mod index;
pub mod locks;
pub mod models;
pub mod negotiate;
pub mod server;
