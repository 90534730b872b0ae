//! Stack-based bytecode machine that executes transaction payloads.
//!
//! # Architecture
//!
//! - **Stack**: bounded operand stack of typed [`vm::Value`]s (`Int`, `Byte`, `Bytes`)
//! - **Instruction format**: one opcode byte; push opcodes read the byte before them
//! - **State**: contract writes go through [`state::OverlayState`] and are kept
//!   only if the whole payload runs successfully
//!
//! # Modules
//!
//! - [`errors`]: execution error types
//! - [`isa`]: instruction set definition and opcode mappings
//! - [`state`]: state trait, in-memory state and overlay utilities
//! - [`vm`]: the executor capability and the stack machine implementing it

pub mod errors;
pub mod isa;
pub mod state;
pub mod vm;
