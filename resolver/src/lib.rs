//! The core of an iterative, cache-backed recursive DNS resolver: a
//! cooperative fiber scheduler driving nameserver lookups against a set of
//! per-worker caches, grounded on PowerDNS's `SyncRes`.
//!
//! This crate has no opinion on sockets or wire encoding — those are
//! external collaborators reached only through [`transport`]'s traits —
//! and no opinion on configuration loading — see [`config::Settings`].

pub mod clock;
pub mod config;
pub mod domain;
pub mod edns;
pub mod engine;
pub mod ewma;
pub mod model;
pub mod name;
pub mod negcache;
pub mod packet_id;
pub mod poscache;
pub mod scheduler;
pub mod stats;
pub mod throttle;
pub mod transport;
pub mod worker;

pub use config::Settings;
pub use domain::{AuthDomain, DomainMap, DomainMapHandle};
pub use engine::SyncRes;
pub use model::{Answer, LwResult, Name, Question, Rcode};
pub use worker::{Fleet, StaticStorage, WorkerHandle};
