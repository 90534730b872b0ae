use thiserror::Error;

/// Errors raised while executing a contract payload.
///
/// Any of these excludes the transaction from its block; none of them fail
/// the block itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecError {
    /// Unknown opcode encountered in bytecode.
    #[error("invalid instruction 0x{opcode:02x} at offset {offset}")]
    InvalidInstruction { opcode: u8, offset: usize },
    /// A push opcode with no operand byte in front of it.
    #[error("{instruction} at offset {offset} has no operand")]
    MissingOperand {
        instruction: &'static str,
        offset: usize,
    },
    #[error("stack underflow in {0}")]
    StackUnderflow(&'static str),
    #[error("stack overflow: limit is {0}")]
    StackOverflow(usize),
    /// Operand type does not match what the instruction expects.
    #[error("{instruction} expected {expected}, got {actual}")]
    TypeMismatch {
        instruction: &'static str,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("integer overflow in {0}")]
    ArithmeticOverflow(&'static str),
    #[error("division by zero")]
    DivisionByZero,
    /// Pack count is negative or larger than the stack.
    #[error("invalid pack length {0}")]
    InvalidPackLength(i64),
    #[error("key not found in state: {0}")]
    KeyNotFound(String),
}
