#![doc = "code-bucket-core: core logic library for code-bucket."]

//! This crate holds the repository ingestion pipeline: choosing files, describing
//! them, identifying them and loading them into a remote document store.
//! Credentials, CLI parsing and the concrete HTTP store client live in the
//! `code-bucket` crate.
//!
//! # Usage
//! Build an [`config::IngestConfig`], obtain a checkout through a
//! [`contract::RepositorySource`], then hand both with a
//! [`contract::DocumentStore`] to [`ingest::ingest_repository`].

pub mod config;
pub mod contract;
pub mod error;
pub mod exclusion;
pub mod identity;
pub mod ingest;
pub mod metadata;
pub mod select;
pub mod transport;
pub mod vcs;
