//! Supervision of the external code-generation tool.
//!
//! One [`Supervisor`] serves a whole batch. For every task attempt it spawns
//! the tool in a [`ProcessHandle`], which wires the output streams to the
//! activity tracker, the classifier and a capture buffer, and settles on the
//! first of: exit, fatal output, dead/timed-out heartbeat, cancellation.

pub mod classifier;
pub mod control;
pub mod degrade;
pub mod handle;
pub mod output;
pub mod probe;
pub mod registry;
pub mod supervisor;

pub use classifier::{classify, FatalKind, Verdict};
pub use control::{escalate_termination, ProcessControl, Termination};
pub use degrade::{placeholder_output, PLACEHOLDER_MARKER};
pub use handle::{CapturedOutput, ProcessHandle, Settlement};
pub use output::{parse_output, RawOutput};
pub use probe::{AuthProbe, AuthStatus, CommandProbe};
pub use registry::{ProcessInfo, ProcessRegistry, Registration};
pub use supervisor::{Supervisor, TaskExecutor};
