//! Directory submission engine
//!
//! Queues paid directory-listing jobs, fans each out into per-directory
//! submission units, drives them through HTTP form workers with retry and
//! CAPTCHA handling, and keeps an append-only audit of every attempt.

pub mod app_state;
pub mod bootstrap;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
