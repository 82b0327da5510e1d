//! Order Settlement & Ledger Engine
//!
//! Core services for a subscription grocery/delivery backend: fiscal-year
//! sequence allocation, order totals, the append-only stock ledger with its
//! cached on-hand view, and the prepaid wallet ledger, all under one
//! transactional contract per operation.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod logging;
pub mod migrator;
pub mod services;

use sea_orm::DatabaseConnection;
use std::sync::Arc;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
    pub services: handlers::AppServices,
}

impl AppState {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
        event_sender: events::EventSender,
    ) -> Self {
        let services = handlers::AppServices::new(db.clone(), Arc::new(event_sender.clone()), &config);
        Self {
            db,
            config,
            event_sender,
            services,
        }
    }
}
