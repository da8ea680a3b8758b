//! Business logic and trait definitions for Worklens.
//!
//! This crate defines the "ports" (repository and collaborator traits) that
//! the infrastructure layer implements, plus the turn pipeline itself: the
//! routing graph, the execution engine, and the per-stage nodes. It depends
//! only on `worklens-types` -- never on `worklens-infra` or any database/IO
//! crate.

pub mod analytics;
pub mod chat;
pub mod event;
pub mod format;
pub mod llm;
pub mod nodes;
pub mod plot;
pub mod repository;
pub mod turn;
pub mod workflow;
