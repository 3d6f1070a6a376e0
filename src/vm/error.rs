use thiserror::Error;

use crate::vm::instruction::Op;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("unexpected end of instruction stream")]
    EndOfStream,

    #[error("unrecognized opcode byte {0:#04x}")]
    UnrecognizedOpcode(u8),

    #[error("'{0}' does not support this operand combination")]
    UnsupportedOperandForOperation(Op),

    #[error("no cycle estimate for this operation and operand combination")]
    UnsupportedForCycleEstimation,
}
