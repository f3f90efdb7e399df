// Preview pipeline: capture lifecycle, latest-frame channel, and status reporting.

pub mod capture;
pub mod session;
pub mod status;
