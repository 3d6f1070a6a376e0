//! Clock-count estimation from the Intel 8086 timing chart.

use crate::vm::error::Error;
use crate::vm::instruction::{EffectiveAddress, Instruction, Op, Operand};
use crate::vm::registers::Reg;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleEstimate {
    pub base: i32,
    pub ea: i32,
}

// Operand variants collapsed to what the timing chart distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OperandKind {
    None,
    Accumulator,
    Register,
    Memory,
    Immediate,
}

fn operand_kind(operand: &Operand) -> OperandKind {
    match operand {
        Operand::None => OperandKind::None,
        Operand::Register(access) if access.index == Reg::Ax as usize => OperandKind::Accumulator,
        Operand::Register(_) => OperandKind::Register,
        Operand::DirectAddress(_) | Operand::Memory(_) => OperandKind::Memory,
        Operand::Immediate(_) => OperandKind::Immediate,
    }
}

// Per-addressing-mode cost, keyed on which of bx/bp/si/di/disp take
// part in the address computation.
fn effective_address_cost(expression: &EffectiveAddress) -> Result<i32, Error> {
    let mut bx = false;
    let mut bp = false;
    let mut si = false;
    let mut di = false;

    let mut note = |index: usize| {
        bx |= index == Reg::Bx as usize;
        bp |= index == Reg::Bp as usize;
        si |= index == Reg::Si as usize;
        di |= index == Reg::Di as usize;
    };
    note(expression.term1.index);
    if let Some(term2) = expression.term2 {
        note(term2.index);
    }
    let disp = expression.displacement != 0;

    let cost = match (bx, bp, si, di, disp) {
        // base or index only
        (true, false, false, false, false) => 5,  // bx
        (false, true, false, false, false) => 5,  // bp
        (false, false, true, false, false) => 5,  // si
        (false, false, false, true, false) => 5,  // di
        // displacement + base or index
        (true, false, false, false, true) => 9,   // bx + disp
        (false, true, false, false, true) => 9,   // bp + disp
        (false, false, true, false, true) => 9,   // si + disp
        (false, false, false, true, true) => 9,   // di + disp
        // base + index
        (true, false, true, false, false) => 7,   // bx + si
        (true, false, false, true, false) => 8,   // bx + di
        (false, true, true, false, false) => 8,   // bp + si
        (false, true, false, true, false) => 7,   // bp + di
        // displacement + base + index
        (true, false, true, false, true) => 11,   // bx + si + disp
        (true, false, false, true, true) => 12,   // bx + di + disp
        (false, true, true, false, true) => 12,   // bp + si + disp
        (false, true, false, true, true) => 11,   // bp + di + disp

        _ => return Err(Error::UnsupportedForCycleEstimation),
    };
    Ok(cost)
}

fn memory_operand_cost(operand: &Operand) -> Result<i32, Error> {
    match operand {
        // displacement only
        Operand::DirectAddress(_) => Ok(6),
        Operand::Memory(expression) => effective_address_cost(expression),
        _ => Ok(0),
    }
}

/// Base cycles plus effective-address cost for one instruction.
/// Combinations the table does not cover are an error, not zero.
pub fn estimate_cycles(inst: &Instruction) -> Result<CycleEstimate, Error> {
    use OperandKind::{Accumulator, Immediate, Memory, Register};

    let first = operand_kind(&inst.operands[0]);
    let second = operand_kind(&inst.operands[1]);

    let (base, ea_operand) = match (inst.op, first, second) {
        (Op::Mov, Memory, Accumulator) => (10, None),
        (Op::Mov, Accumulator, Memory) => (10, None),
        (Op::Mov, Register | Accumulator, Register | Accumulator) => (2, None),
        (Op::Mov, Register | Accumulator, Memory) => (8, Some(1)),
        (Op::Mov, Memory, Register) => (9, Some(0)),
        (Op::Mov, Register | Accumulator, Immediate) => (4, None),
        (Op::Mov, Memory, Immediate) => (10, Some(0)),

        (Op::Add | Op::Sub, Register | Accumulator, Register | Accumulator) => (3, None),
        (Op::Add | Op::Sub, Register | Accumulator, Memory) => (9, Some(1)),
        (Op::Add | Op::Sub, Memory, Register | Accumulator) => (16, Some(0)),
        (Op::Add | Op::Sub, Register | Accumulator, Immediate) => (4, None),
        (Op::Add | Op::Sub, Memory, Immediate) => (17, Some(0)),

        (Op::Cmp, Register | Accumulator, Register | Accumulator) => (3, None),
        (Op::Cmp, Register | Accumulator, Memory) => (9, Some(1)),
        (Op::Cmp, Memory, Register | Accumulator) => (9, Some(0)),
        (Op::Cmp, Register | Accumulator, Immediate) => (4, None),
        (Op::Cmp, Memory, Immediate) => (10, Some(0)),

        _ => return Err(Error::UnsupportedForCycleEstimation),
    };

    let ea = match ea_operand {
        Some(index) => memory_operand_cost(&inst.operands[index])?,
        None => 0,
    };

    Ok(CycleEstimate { base, ea })
}
