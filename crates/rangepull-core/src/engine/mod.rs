//! Download engine
//!
//! - Bounded worker pool shared by downloads and fan-out work
//! - Fixed-size range planning
//! - Per-chunk ranged fetches into `.partNNN` files
//! - Ordered reassembly into the destination file

mod chunk_fetcher;
mod fan_out;
mod orchestrator;
mod range_planner;
mod reassembler;
mod worker_pool;

pub use chunk_fetcher::*;
pub use fan_out::*;
pub use orchestrator::*;
pub use range_planner::*;
pub use reassembler::*;
pub use worker_pool::*;
