//! Statistical Analysis Engine
//!
//! Frequentist two-sample testing of treatment variants against control:
//!
//! | Metric kind        | Test                        | Interval critical value |
//! |--------------------|-----------------------------|-------------------------|
//! | binary (0/1)       | pooled two-proportion z     | normal                  |
//! | numeric / count    | Welch unequal-variance t    | Student t (Welch df)    |
//!
//! Plus sample-size planning for two-proportion tests.
//!
//! References:
//! - Welch (1947): The generalization of "Student's" problem
//! - Kohavi et al. (2020): Trustworthy Online Controlled Experiments, ch. 17

pub mod distribution;

mod analysis;
mod sample_size;

pub use analysis::{
    two_proportion_z_test, welch_t_test, AnalysisResult, ConfidenceInterval, StatisticalAnalyzer,
    TestKind, TestOutcome,
};
pub use sample_size::{calculate_required_sample_size, SampleSizeParams};
