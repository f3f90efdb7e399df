// Diagnostics: frame delivery counters.

pub mod stats;
