//! Core traits for the sync engine
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`AccountClient`]: Read account state from the forwarding panel
//! - [`DnsProvider`]: Read and update A records via provider APIs
//! - [`Notifier`]: Best-effort messages on DNS changes
//! - [`ConfigStore`]: Durable job definitions, settings and run results

pub mod account_client;
pub mod config_store;
pub mod dns_provider;
pub mod notifier;

pub use account_client::{
    AccountClient, AccountClientFactory, DeviceGroup, RemoteForwardRule, SessionToken,
    TrafficStatistic, UserInfo,
};
pub use config_store::{ConfigStore, Mutation};
pub use dns_provider::{DnsProvider, DnsProviderFactory, RecordMetadata};
pub use notifier::{NotificationMessage, Notifier, NotifierFactory};
