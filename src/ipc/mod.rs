//! Event types delivered to result sinks (host UIs, tests, CLI frontends).

pub mod events;
