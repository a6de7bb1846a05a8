//! Time abstractions
//!
//! Every timing decision in the workspace (window pruning, recovery
//! cooldowns, wall-clock stats) reads time through the [`Clock`] trait so
//! state machines can be driven deterministically in tests:
//!
//! ```rust
//! use std::time::Duration;
//!
//! use bulwark_common::time::{Clock, MockClock};
//!
//! let clock = MockClock::new();
//! let start = clock.now();
//! clock.advance(Duration::from_secs(30));
//! assert_eq!(clock.now().duration_since(start), Duration::from_secs(30));
//! ```

pub mod clock;

pub use clock::{Clock, MockClock, SystemClock};
