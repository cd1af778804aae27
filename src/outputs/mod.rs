//! Artifact generation.
//!
//! Each category that kept at least one listing becomes one spreadsheet in
//! the artifact directory:
//!
//! ```text
//! temp_files/
//! ├── ساعات.xlsx
//! ├── عطور.xlsx
//! └── Bags_Shoes.xlsx      # "Bags/Shoes", separators replaced
//! ```
//!
//! Files stay there until the upload pipeline confirms them.

pub mod xlsx;
