//! Stack machine that runs transaction payloads as contract bytecode.

use crate::virtual_machine::errors::ExecError;
use crate::virtual_machine::isa::Instruction;
use crate::virtual_machine::state::{State, state_key};

/// Default bound on the operand stack depth.
pub const MAX_STACK_DEPTH: usize = 1024;

/// Capability the chain uses to run a transaction payload.
///
/// Writes go to `state`; the caller decides whether to keep them.
pub trait ContractExecutor: Send + Sync {
    fn execute(&self, payload: &[u8], state: &mut dyn State) -> Result<(), ExecError>;
}

/// A value on the operand stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Byte(u8),
    Bytes(Vec<u8>),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Byte(_) => "byte",
            Value::Bytes(_) => "bytes",
        }
    }

    /// Bytes written to state by `STORE`.
    fn into_state_bytes(self) -> Vec<u8> {
        match self {
            Value::Int(v) => v.to_le_bytes().to_vec(),
            Value::Byte(b) => vec![b],
            Value::Bytes(bytes) => bytes,
        }
    }
}

/// Executes payloads on a fresh bounded stack per call.
#[derive(Debug, Clone, Copy)]
pub struct StackVm {
    max_depth: usize,
}

impl StackVm {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    /// Runs `code` to completion and returns the final stack, bottom first.
    pub fn run(&self, code: &[u8], state: &mut dyn State) -> Result<Vec<Value>, ExecError> {
        let mut machine = Machine {
            stack: Vec::new(),
            max_depth: self.max_depth,
            state,
        };

        let mut ip = 0;
        while ip < code.len() {
            // A byte followed by a push opcode is that push's operand.
            if let Some(&next) = code.get(ip + 1) {
                if let Ok(instruction) = Instruction::try_from(next) {
                    if instruction.takes_operand() {
                        machine.push_operand(instruction, code[ip])?;
                        ip += 2;
                        continue;
                    }
                }
            }

            let instruction = Instruction::decode(code[ip], ip)?;
            if instruction.takes_operand() {
                return Err(ExecError::MissingOperand {
                    instruction: instruction.mnemonic(),
                    offset: ip,
                });
            }
            machine.exec(instruction)?;
            ip += 1;
        }

        Ok(machine.stack)
    }
}

impl Default for StackVm {
    fn default() -> Self {
        Self::new(MAX_STACK_DEPTH)
    }
}

impl ContractExecutor for StackVm {
    fn execute(&self, payload: &[u8], state: &mut dyn State) -> Result<(), ExecError> {
        self.run(payload, state).map(|_| ())
    }
}

struct Machine<'a> {
    stack: Vec<Value>,
    max_depth: usize,
    state: &'a mut dyn State,
}

impl Machine<'_> {
    fn push(&mut self, value: Value) -> Result<(), ExecError> {
        if self.stack.len() >= self.max_depth {
            return Err(ExecError::StackOverflow(self.max_depth));
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self, instruction: Instruction) -> Result<Value, ExecError> {
        self.stack
            .pop()
            .ok_or(ExecError::StackUnderflow(instruction.mnemonic()))
    }

    fn pop_int(&mut self, instruction: Instruction) -> Result<i64, ExecError> {
        match self.pop(instruction)? {
            Value::Int(v) => Ok(v),
            other => Err(mismatch(instruction, "int", &other)),
        }
    }

    fn pop_bytes(&mut self, instruction: Instruction) -> Result<Vec<u8>, ExecError> {
        match self.pop(instruction)? {
            Value::Bytes(bytes) => Ok(bytes),
            other => Err(mismatch(instruction, "bytes", &other)),
        }
    }

    fn push_operand(&mut self, instruction: Instruction, operand: u8) -> Result<(), ExecError> {
        match instruction {
            Instruction::PushByte => self.push(Value::Byte(operand)),
            _ => self.push(Value::Int(i64::from(operand))),
        }
    }

    fn exec(&mut self, instruction: Instruction) -> Result<(), ExecError> {
        match instruction {
            Instruction::Add | Instruction::Sub | Instruction::Mul | Instruction::Div => {
                let b = self.pop_int(instruction)?;
                let a = self.pop_int(instruction)?;
                let result = arithmetic(instruction, a, b)?;
                self.push(Value::Int(result))
            }
            Instruction::Pack => {
                let count = self.pop_int(instruction)?;
                let n = usize::try_from(count)
                    .ok()
                    .filter(|n| *n <= self.stack.len())
                    .ok_or(ExecError::InvalidPackLength(count))?;

                let items = self.stack.split_off(self.stack.len() - n);
                let bytes = items
                    .into_iter()
                    .map(|item| match item {
                        Value::Byte(b) => Ok(b),
                        other => Err(mismatch(instruction, "byte", &other)),
                    })
                    .collect::<Result<Vec<u8>, _>>()?;
                self.push(Value::Bytes(bytes))
            }
            Instruction::Store => {
                let value = self.pop(instruction)?;
                let key = self.pop_bytes(instruction)?;
                self.state.push(state_key(&key), value.into_state_bytes());
                Ok(())
            }
            Instruction::Get => {
                let key = self.pop_bytes(instruction)?;
                let value = self
                    .state
                    .get(state_key(&key))
                    .ok_or_else(|| ExecError::KeyNotFound(String::from_utf8_lossy(&key).into()))?;
                self.push(Value::Bytes(value))
            }
            Instruction::PushInt | Instruction::PushByte => Err(ExecError::MissingOperand {
                instruction: instruction.mnemonic(),
                offset: 0,
            }),
        }
    }
}

fn arithmetic(instruction: Instruction, a: i64, b: i64) -> Result<i64, ExecError> {
    let result = match instruction {
        Instruction::Add => a.checked_add(b),
        Instruction::Sub => a.checked_sub(b),
        Instruction::Mul => a.checked_mul(b),
        _ => {
            if b == 0 {
                return Err(ExecError::DivisionByZero);
            }
            a.checked_div(b)
        }
    };
    result.ok_or(ExecError::ArithmeticOverflow(instruction.mnemonic()))
}

fn mismatch(instruction: Instruction, expected: &'static str, actual: &Value) -> ExecError {
    ExecError::TypeMismatch {
        instruction: instruction.mnemonic(),
        expected,
        actual: actual.type_name(),
    }
}
