// SPDX-License-Identifier: MPL-2.0

//! Processing pipelines
//!
//! ```text
//! ┌──────────────┐     ┌────────────────────┐     ┌──────────────┐
//! │ Camera Frame │ ──▶ │  Hardware Encoder  │ ──▶ │ Resequencer  │
//! │   (NV12)     │     │  (async, in order) │     │              │
//! └──────────────┘     └────────────────────┘     └──────┬───────┘
//!                                                        │
//!                      ┌────────────────────┐     ┌──────▼───────┐
//!                      │  Sink (transport)  │ ◀── │  Extractor   │
//!                      │  release once      │     │  (zero-copy) │
//!                      └────────────────────┘     └──────────────┘
//! ```
//!
//! # Modules
//!
//! - [`video`]: Completion ordering, payload handoff and sinks

pub mod video;
