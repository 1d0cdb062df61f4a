//! Utilities for testing linearizability of lock-free data structures based on the strategy
//! defined by Lowe in [Testing for Linearizability](http://www.cs.ox.ac.uk/people/gavin.lowe/LinearizabiltyTesting/paper.pdf).
//! This should be done by using the LinearizabilityTester struct and the ThreadLog.
//!
//! The tester needs a sequential reference data structure along with operations defined on it
//! to match those on the concurrent object. See the queue tests for a complete example.

pub use self::linearizability_tester::{LinearizabilityResult, LinearizabilityTester, ThreadLog};

pub mod linearizability_tester;
mod automaton;
mod time_stamped;
