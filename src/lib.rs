//! Attendance Export Library
//!
//! This library renders pre-aggregated school attendance (A/R/F marks per
//! school, group and month) into Excel workbook templates and serves the
//! result over HTTP.

pub mod error;
pub mod helpers;
pub mod models;
pub mod service;

pub use error::ExportError;
pub use service::{ExportConfig, ExportService};

// Re-export key types for convenience
pub use helpers::layout::TemplateVariant;
pub use models::attendance::{AttendanceRequest, MarkCounts, MonthlySummary, Student};
