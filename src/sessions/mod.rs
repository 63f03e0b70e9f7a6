//! Analysis session endpoints: listing, results, renaming, deletion,
//! image downloads and CSV reports.

pub mod archive;
pub mod handlers;
pub mod report;
