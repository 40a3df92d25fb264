//! # Courseloom
//!
//! A multi-source course aggregation, caching, and learner-progress engine
//! for AI tutoring tools.
//!
//! Courseloom normalizes structurally similar course trees from heterogeneous
//! sources (local directories, remote git repositories) into one canonical
//! catalog, keeps that catalog fresh without re-fetching unchanged sources,
//! and maintains durable per-learner progress and assessment state.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │   Sources    │──▶│  Normalize   │──▶│    Merge     │
//! │ local / git  │   │ course trees │   │  + catalog   │
//! └──────────────┘   └──────────────┘   └──────┬───────┘
//!                                              │
//!                    ┌──────────────┐   ┌──────▼───────┐
//!                    │ ProgressStore│◀──│ CourseEngine │──▶ CLI / MCP tools
//!                    │   (SQLite)   │   │   (facade)   │
//!                    └──────────────┘   └──────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Catalog and progress data types |
//! | [`resolver`] | Source materialization (local dirs, git clones) |
//! | [`normalize`] | Directory convention → course structures |
//! | [`registry`] | Ordered merge with collision resolution |
//! | [`cache`] | Fingerprinting, persisted catalog, rebuild orchestration |
//! | [`progress`] | Durable per-learner progress store |
//! | [`recommend`] | Weak-area and completion analytics |
//! | [`search`] | Step-content search |
//! | [`engine`] | Operation facade for external callers |
//! | [`error`] | Error taxonomy |

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod normalize;
pub mod progress;
pub mod recommend;
pub mod registry;
pub mod resolver;
pub mod search;
