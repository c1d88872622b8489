pub mod aggregate;
pub mod compose;
pub mod config;
pub mod delta;
pub mod error;
pub mod facts;
pub mod filter;
pub mod invariants;
pub mod metrics;
pub mod options;
pub mod period;
pub mod pipeline;
pub mod ratios;
pub mod rows;
pub mod selector;
pub mod share;
pub mod synth;
pub mod taxonomy;
pub mod types;
