// Distributed under the OSI-approved BSD 2-Clause License.
// See accompanying LICENSE file for details.

//! Facilities for running a BulletML file.

mod process;
mod runner;
mod table;

pub use self::runner::{
    FireContext, FiredHook, HostError, PositionHook, RunError, Runner, RunnerOptions,
};
