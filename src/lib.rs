extern crate num;
#[macro_use]
extern crate num_derive;

pub mod constants;
pub mod instructions;
pub mod program;

pub use crate::instructions::{Instruction, Opcode, Operand};
pub use crate::program::{
    Constant, Frame, Function, FunctionParam, JumpKind, PendingJump, Program, Type, Variable,
};
