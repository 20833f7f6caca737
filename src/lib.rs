//! # caseguard
//!
//! Case reporting for missing and at-risk children, with AI-assisted
//! duplicate detection.
//!
//! A new report is compared against recent reports before it is stored.
//! Each comparison combines a text-model judgement of name and description,
//! a vision-model judgement of the two photos, and a contact-number
//! heuristic into one similarity score.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌────────────┐   ┌──────────────────────┐
//! │   CLI    │──▶│ submission │──▶│ DuplicateCaseMatcher │
//! │   HTTP   │   │  validate  │   │ text · image · phone │
//! └──────────┘   └─────┬──────┘   └──────────┬───────────┘
//!                      ▼                     ▼
//!                ┌──────────┐        ┌───────────────┐
//!                │  SQLite  │        │ ScoreProvider │
//!                │  cases   │        │ (OpenAI, ...) │
//!                └──────────┘        └───────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! caseguard init                           # create database
//! caseguard check --file draft.json        # score a draft, store nothing
//! caseguard submit --file draft.json       # store unless a likely duplicate
//! caseguard status <id> investigating
//! caseguard serve                          # start HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Case records, drafts, match results |
//! | [`matcher`] | Duplicate scoring pipeline |
//! | [`scoring`] | Similarity provider abstraction |
//! | [`submission`] | Validation, duplicate check, commit |
//! | [`cases`] | Case persistence |
//! | [`server`] | JSON HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod cases;
pub mod config;
pub mod db;
pub mod matcher;
pub mod migrate;
pub mod models;
pub mod scoring;
pub mod server;
pub mod submission;
