// Copyright (c) The resilient-test-runner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The runner: supervisors (§4.3), the tier promotion monitor (§4.5), and
//! the top-level orchestration that ties them to the work queue, batch-size
//! controller, and outcome sink.

mod imp;
mod monitor;
pub mod supervisor;

pub use imp::{Runner, RunnerBuilder, RunOutput};
pub use supervisor::WorkerSpawnSpec;
