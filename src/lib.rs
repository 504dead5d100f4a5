//! Purpose: Library behind the `runsql` CLI and HTTP service.
//! Exports: `api` (sources, engine, results, errors), `notice`.
//! Role: Loads CSV, JSON, and spreadsheet files into an in-memory SQLite database.
//! Invariants: `api` is the only public path to core and source types.
//! Invariants: Core modules prefer explicit inputs/outputs over hidden state.
pub mod api;
mod core;
pub mod notice;
mod source;
