//! Anvilmark: World Anvil export to Obsidian Markdown conversion
//!
//! This crate turns a directory of exported world-building records (one JSON file
//! per article) into a tree of Markdown notes with YAML front-matter:
//!
//! 1. **Indexing Pass** -- Build the image metadata index, the map index and the
//!    corpus-wide `id -> title` index before any article is converted
//! 2. **Conversion Pass** -- Convert the selected articles one at a time, rewriting
//!    the bracket-tag markup, resolving cross-references and collecting the image
//!    downloads each note needs
//! 3. **Download Pass** -- De-duplicate the collected image jobs by file name and
//!    fetch them concurrently, skipping files already on disk
//!
//! # Architecture
//!
//! - **Immutable indices** -- Built once per run and passed by reference
//! - **Explicit job accumulation** -- Each article returns its image jobs instead of
//!   writing to shared state
//! - **Sequential conversion, concurrent downloads** -- Only the download stage runs
//!   on a tokio runtime, with a bounded number of transfers in flight
//! - **Template fallback** -- Themed rendering goes through [`template::TemplateRenderer`];
//!   a missing template falls back to the built-in renderer
//!
//! # Key Modules
//!
//! - [`markup`] -- Bracket-tag dialect to Markdown rewriting
//! - [`fields`] -- Field value rendering and per-article field collectors
//! - [`index`] -- Cross-reference title index
//! - [`images`] -- Image metadata index, resolver and per-article job list
//! - [`image_api`] -- Remote image metadata lookup
//! - [`download`] -- Concurrent image downloads
//! - [`maps`] -- Map index and Leaflet blocks
//! - [`template`] -- Front-matter, infobox facts and Tera templates
//! - [`convert`] -- Per-article transformer and run orchestration
//! - [`corpus`] -- JSON file discovery and selection
//! - [`stats`] -- Atomic run counters
//! - [`config`] -- Constants and TOML settings
//!
//! # Example Usage
//!
//! ```bash
//! # Convert the whole export into ./content
//! anvilmark --source-dir World-Anvil-Export --output-dir content
//!
//! # Convert a single article, flat layout, with extra logging
//! anvilmark Material-Mysticum --output-root -vv
//! ```

pub mod config;
pub mod convert;
pub mod corpus;
pub mod download;
pub mod fields;
pub mod image_api;
pub mod images;
pub mod index;
pub mod maps;
pub mod markup;
pub mod models;
pub mod stats;
pub mod template;

#[cfg(test)]
mod test_support;
