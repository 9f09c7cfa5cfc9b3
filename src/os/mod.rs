// Copyright (c) The resilient-test-runner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Platform-specific process-tree management.
//!
//! A worker is free to spawn its own child processes (e.g. a test host
//! spawning the actual test binary); when a supervisor kills a worker it
//! must kill that whole tree, not just the immediate child, or orphans keep
//! running and keep machines busy after the run reports done.

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod unix;
        pub use unix::{prepare_command, terminate_tree};
    } else if #[cfg(windows)] {
        mod windows;
        pub use windows::{assign_to_job, force_terminate_job_handle, prepare_command, terminate_tree};
    } else {
        compile_error!("resilient-test-runner supports only unix and windows targets");
    }
}
