//! Instruction set of the contract stack machine.
//!
//! Every instruction is a single opcode byte. The two push instructions take
//! their operand from the byte immediately *before* the opcode, so
//! `[0x02, 0x0a]` pushes the integer 2.

use crate::virtual_machine::errors::ExecError;

macro_rules! define_instructions {
    (
        $(
            $(#[$doc:meta])*
            $name:ident = $opcode:expr, $mnemonic:literal
        ),* $(,)?
    ) => {
        #[derive(Copy, Clone, Debug, Eq, PartialEq)]
        pub enum Instruction {
            $(
                $(#[$doc])*
                $name = $opcode,
            )*
        }

        impl TryFrom<u8> for Instruction {
            type Error = u8;

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                match value {
                    $( $opcode => Ok(Instruction::$name), )*
                    _ => Err(value),
                }
            }
        }

        impl Instruction {
            /// Returns the mnemonic used in logs and errors.
            pub const fn mnemonic(&self) -> &'static str {
                match self {
                    $( Instruction::$name => $mnemonic, )*
                }
            }
        }
    };
}

define_instructions! {
    /// operand PUSH_INT ; push operand as an integer
    PushInt = 0x0a, "PUSH_INT",
    /// ADD ; a b -> a + b
    Add = 0x0b, "ADD",
    /// operand PUSH_BYTE ; push operand as a byte
    PushByte = 0x0c, "PUSH_BYTE",
    /// PACK ; b1 .. bn n -> [b1 .. bn]
    Pack = 0x0d, "PACK",
    /// SUB ; a b -> a - b
    Sub = 0x0e, "SUB",
    /// STORE ; key value -> (state[key] = value)
    Store = 0x0f, "STORE",
    /// GET ; key -> state[key]
    Get = 0xae, "GET",
    /// MUL ; a b -> a * b
    Mul = 0xea, "MUL",
    /// DIV ; a b -> a / b (trap on division by zero)
    Div = 0xfd, "DIV",
}

impl Instruction {
    /// Whether the byte before this opcode is its operand.
    pub const fn takes_operand(&self) -> bool {
        matches!(self, Instruction::PushInt | Instruction::PushByte)
    }

    /// Decodes the opcode found at `offset`.
    pub fn decode(opcode: u8, offset: usize) -> Result<Self, ExecError> {
        Self::try_from(opcode).map_err(|opcode| ExecError::InvalidInstruction { opcode, offset })
    }
}
