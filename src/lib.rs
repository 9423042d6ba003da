//! Pet portrait to embroidery pipeline.
//!
//! This library provides the render engine (segmentation, palette
//! quantization, region classification, stitch directions, quality gate)
//! and the staged job orchestration that takes a paid customization through
//! render, digitize and production-pack.

pub mod app_state;
pub mod config;
pub mod db;
pub mod jobs;
pub mod models;
pub mod render;
pub mod routes;
pub mod services;
pub mod telemetry;
