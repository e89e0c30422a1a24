//! CloudVault Core - Domain logic and business rules
//!
//! This crate contains the hexagonal architecture core with:
//! - **Domain entities** - `Container`, `CollectionState`, sharing `Metadata`,
//!   the `FaultBus` error accumulator
//! - **Port definitions** - Traits for adapters: `DeltaQuery`,
//!   `ContainerResolver`, `ItemHandler`, `StatusUpdater`, `PermissionEditor`
//! - **Configuration** - Typed config for parallelism, rate limiting and
//!   item materialization
//!
//! # Architecture
//!
//! This crate follows the hexagonal (ports & adapters) architecture pattern.
//! The domain module contains pure business logic with no provider
//! dependencies. Ports define trait interfaces that the collection and
//! restore crates consume and that provider adapters implement.

pub mod config;
pub mod domain;
pub mod ports;
