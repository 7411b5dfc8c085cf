//! # netprobe - On-Demand Network Device Poller
//!
//! `netprobe` probes network devices on demand and normalizes what they
//! report into plain domain records. CLI devices (Cisco IOS style) are
//! polled over persistent SSH sessions and their screen-oriented command
//! output is parsed by a small template grammar engine; PAN-OS firewalls
//! are polled through their XML API with a single-use client per probe.
//!
//! ## Features
//!
//! - **Session Reuse**: One SSH session per device address, kept alive for
//!   the process lifetime with transparent one-shot reconnect
//! - **Template Grammar Engine**: Compiles TextFSM-style templates and
//!   turns raw command output into field records
//! - **Result Caching**: Idempotent command results are cached per session
//!   with a fixed time-to-live
//! - **Fail-Fast Normalization**: A probe either yields a fully validated
//!   report or a single error, never partial data
//! - **Async/Await**: Built on Tokio; probes against different devices run
//!   fully in parallel
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use netprobe::model::Credentials;
//! use netprobe::probe::{probe, ModuleKind};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let credentials = Credentials::new("admin", "secret");
//!     let report = probe("192.0.2.10".parse()?, credentials, ModuleKind::Cisco).await?;
//!     println!("{}", report.to_json()?);
//!     Ok(())
//! }
//! ```

pub mod cisco;
pub mod config;
pub mod error;
pub mod model;
pub mod panos;
pub mod probe;
pub mod session;
pub mod ssh;
pub mod templates;
pub mod textfsm;

pub use error::ProbeError;
