/// Session state module
///
/// This module holds the edit-session core:
/// - Shared data structures (data.rs)
/// - The finite state machine and its transition guards (machine.rs)
/// - The async session facade and completion gate (session.rs)

pub mod data;
pub mod machine;
pub mod session;
