//! Agency operations service.
//!
//! CRM, proposals, invoicing, AI lead scoring and project tracking behind a
//! JSON API and server actions. The clients, projects, tasks and auth
//! domains can each be served by the relational store or by the document
//! store, selected by feature flags, with batch tools to migrate between
//! the two.

pub mod actions;
pub mod app;
pub mod auth;
pub mod cache;
pub mod config;
pub mod data;
pub mod db;
pub mod docstore;
pub mod error;
pub mod migration;
pub mod ops;
pub mod web;

#[cfg(test)]
mod testing;
