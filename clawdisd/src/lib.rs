//! Clawdis privileged action broker.
//!
//! Accepts serialized requests from a local client process over a Unix
//! socket, gates them on the persisted pause flag and per-capability
//! authorization, executes the action with bounded resources, and returns a
//! serialized result. Everything user-facing (menu bar, settings panels,
//! onboarding) lives in the companion app; this crate is the privileged
//! backend only.

pub mod authorizer;
pub mod broker;
pub mod capture;
pub mod exec;
pub mod notify;
pub mod settings;
pub mod watcher;
