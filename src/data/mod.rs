//! Demonstration data: a synthetic sample and its amputation.

pub mod sample;

pub use sample::{AmputeConfig, SampleConfig, ampute, generate_sample};
