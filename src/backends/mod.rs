// SPDX-License-Identifier: MPL-2.0

//! Backend abstraction layer for camera access
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │               Capture Session                │
//! │  ┌───────────────────┐  ┌─────────────────┐  │
//! │  │   Authorization   │  │ Capture Backend │  │
//! │  │  (camera portal)  │  │   (GStreamer)   │  │
//! │  └───────────────────┘  └─────────────────┘  │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`authorization`]: One-shot camera permission check
//! - [`camera`]: Device discovery, session configuration and frame capture

pub mod authorization;
pub mod camera;
