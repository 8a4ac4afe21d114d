// src/services/mod.rs
pub mod assignment_service;
pub mod broker;
pub mod gateways;
pub mod ledger_service;
pub mod payment_service;
pub mod persistence;
pub mod profile_service;
pub mod ride_service;
pub mod store_service;
pub mod tracking_service;
