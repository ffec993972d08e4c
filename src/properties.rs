//! Property-based tests for the numeric and bounding invariants.
//!
//! - Improvement percentage follows the sign of the change and is zero for a zero baseline
//! - Correlation strengths outside [0, 1] are always rejected
//! - Pressure eviction removes 10% of entries rounded up
//! - The violation log and strength history never outgrow their caps
//! - Entry-table byte accounting survives arbitrary insert/remove sequences
