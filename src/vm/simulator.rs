//! Deterministic single-step execution of decoded instructions against
//! the register file and memory.

use crate::vm::error::Error;
use crate::vm::flags::{check_flag, compute_arithmetic_flags, CpuFlag};
use crate::vm::instruction::{EffectiveAddress, Instruction, Op, Operand};
use crate::vm::memory::Memory;
use crate::vm::registers::{Reg, RegisterAccess, RegisterFile};

/// What one simulated instruction changed, for diffing and printing.
#[derive(Debug, Clone, Copy)]
pub struct SimulationStep {
    pub destination: Option<RegisterAccess>,
    pub old_value: u16,
    pub new_value: u16,
    pub old_flags: u16,
    pub new_flags: u16,
    pub old_ip: u16,
    pub new_ip: u16,
}

fn effective_address(expression: &EffectiveAddress, registers: &RegisterFile) -> u32 {
    let mut address = registers.word(expression.term1.index) as i32;
    if let Some(term2) = expression.term2 {
        address += registers.word(term2.index) as i32;
    }
    address += expression.displacement as i32;
    address as u32
}

// The address an operand names in memory, if it names one.
fn operand_address(operand: &Operand, registers: &RegisterFile) -> Option<u32> {
    match operand {
        Operand::DirectAddress(address) => Some(*address),
        Operand::Memory(expression) => Some(effective_address(expression, registers)),
        _ => None,
    }
}

// Value an operand contributes as a source. Memory fetch width follows
// the instruction's wide flag.
fn source_value(
    inst: &Instruction,
    operand: &Operand,
    registers: &RegisterFile,
    memory: &Memory,
) -> Result<u16, Error> {
    match operand {
        Operand::Register(access) => Ok(registers.read(*access)),
        Operand::Immediate(immediate) => Ok(immediate.value as u16),
        Operand::DirectAddress(_) | Operand::Memory(_) => {
            let address = operand_address(operand, registers)
                .ok_or(Error::UnsupportedOperandForOperation(inst.op))?;
            Ok(if inst.is_wide() {
                memory.read_word(address)
            } else {
                memory.read_byte(address) as u16
            })
        }
        Operand::None => Err(Error::UnsupportedOperandForOperation(inst.op)),
    }
}

fn exec_mov(
    inst: &Instruction,
    registers: &mut RegisterFile,
    memory: &mut Memory,
    step: &mut SimulationStep,
) -> Result<(), Error> {
    let value = source_value(inst, &inst.operands[1], registers, memory)?;

    match &inst.operands[0] {
        Operand::Register(access) => {
            let old_value = registers.word(access.index);
            let new_value = match (access.count, access.offset) {
                (2, _) => value,
                (_, 0) => (old_value & 0xFF00) | (value & 0x00FF),
                _ => (old_value & 0x00FF) | (value << 8),
            };
            registers.set_word(access.index, new_value);

            step.destination = Some(*access);
            step.old_value = old_value;
            step.new_value = new_value;
        }
        destination @ (Operand::DirectAddress(_) | Operand::Memory(_)) => {
            let address = operand_address(destination, registers)
                .ok_or(Error::UnsupportedOperandForOperation(inst.op))?;
            if inst.is_wide() {
                memory.write_word(address, value);
            } else {
                memory.write_byte(address, value as u8);
            }
        }
        _ => return Err(Error::UnsupportedOperandForOperation(inst.op)),
    }

    Ok(())
}

// ADD/SUB/CMP. The arithmetic happens on the full 16-bit destination
// word; a source aimed at a high-byte register is positioned with << 8
// first, so the flag word reflects the positioned operand.
fn exec_arithmetic(
    inst: &Instruction,
    registers: &mut RegisterFile,
    memory: &mut Memory,
    step: &mut SimulationStep,
) -> Result<(), Error> {
    let source = source_value(inst, &inst.operands[1], registers, memory)? as i16 as i32;

    match &inst.operands[0] {
        Operand::Register(access) => {
            let old_value = registers.word(access.index);
            let a = old_value as i16 as i32;
            let b = if access.count == 1 && access.offset == 1 {
                source << 8
            } else {
                source
            };

            let (result, unsigned_result, nibble_result) = combine(inst.op, a, b);
            step.new_flags = compute_arithmetic_flags(
                result,
                unsigned_result,
                nibble_result,
                access.is_wide(),
                step.old_flags,
            );

            let new_value = if inst.op == Op::Cmp {
                old_value
            } else {
                let value = result as u16;
                registers.set_word(access.index, value);
                value
            };

            step.destination = Some(*access);
            step.old_value = old_value;
            step.new_value = new_value;
        }
        destination @ (Operand::DirectAddress(_) | Operand::Memory(_)) => {
            let address = operand_address(destination, registers)
                .ok_or(Error::UnsupportedOperandForOperation(inst.op))?;
            let old_value = if inst.is_wide() {
                memory.read_word(address)
            } else {
                memory.read_byte(address) as u16
            };

            let a = old_value as i16 as i32;
            let (result, unsigned_result, nibble_result) = combine(inst.op, a, source);
            step.new_flags = compute_arithmetic_flags(
                result,
                unsigned_result,
                nibble_result,
                inst.is_wide(),
                step.old_flags,
            );

            if inst.op != Op::Cmp {
                if inst.is_wide() {
                    memory.write_word(address, result as u16);
                } else {
                    memory.write_byte(address, result as u8);
                }
            }

            step.old_value = old_value;
            step.new_value = if inst.op == Op::Cmp { old_value } else { result as u16 };
        }
        _ => return Err(Error::UnsupportedOperandForOperation(inst.op)),
    }

    Ok(())
}

fn combine(op: Op, a: i32, b: i32) -> (i32, i32, i32) {
    if op == Op::Add {
        (a + b, (a & 0xFFFF) + (b & 0xFFFF), (a & 0xF) + (b & 0xF))
    } else {
        (a - b, (a & 0xFFFF) - (b & 0xFFFF), (a & 0xF) - (b & 0xF))
    }
}

// Signed byte offset of a relative jump, from the end of the instruction.
fn jump_displacement(inst: &Instruction) -> Result<i32, Error> {
    match &inst.operands[0] {
        Operand::Immediate(immediate) if immediate.relative_jump => Ok(immediate.value),
        _ => Err(Error::UnsupportedOperandForOperation(inst.op)),
    }
}

fn condition_met(op: Op, flags: u16) -> bool {
    let cf = check_flag(flags, CpuFlag::Carry);
    let pf = check_flag(flags, CpuFlag::Parity);
    let zf = check_flag(flags, CpuFlag::Zero);
    let sf = check_flag(flags, CpuFlag::Sign);
    let of = check_flag(flags, CpuFlag::Overflow);

    match op {
        Op::Je => zf,
        Op::Jne => !zf,
        Op::Jl => sf != of,
        Op::Jnl => sf == of,
        Op::Jle => (sf != of) || zf,
        Op::Jg => !((sf != of) || zf),
        Op::Jb => cf,
        Op::Jnb => !cf,
        Op::Jbe => cf || zf,
        Op::Ja => !(cf || zf),
        Op::Jp => pf,
        Op::Jnp => !pf,
        Op::Jo => of,
        Op::Jno => !of,
        Op::Js => sf,
        Op::Jns => !sf,
        _ => unreachable!(),
    }
}

/// Executes one decoded instruction. All state changes go through
/// `registers` and `memory`; the returned step reports the transition.
pub fn simulate(
    inst: &Instruction,
    registers: &mut RegisterFile,
    memory: &mut Memory,
) -> Result<SimulationStep, Error> {
    let old_ip = registers.word(Reg::Ip);
    let old_flags = registers.word(Reg::Flags);
    let mut new_ip = old_ip.wrapping_add(inst.size as u16);

    let mut step = SimulationStep {
        destination: None,
        old_value: 0,
        new_value: 0,
        old_flags,
        new_flags: old_flags,
        old_ip,
        new_ip,
    };

    match inst.op {
        Op::Mov => exec_mov(inst, registers, memory, &mut step)?,

        Op::Add | Op::Sub | Op::Cmp => exec_arithmetic(inst, registers, memory, &mut step)?,

        Op::Jmp => {
            let displacement = jump_displacement(inst)?;
            new_ip = (new_ip as i32 + displacement) as u16;
        }

        Op::Je
        | Op::Jne
        | Op::Jl
        | Op::Jnl
        | Op::Jle
        | Op::Jg
        | Op::Jb
        | Op::Jnb
        | Op::Jbe
        | Op::Ja
        | Op::Jp
        | Op::Jnp
        | Op::Jo
        | Op::Jno
        | Op::Js
        | Op::Jns => {
            let displacement = jump_displacement(inst)?;
            if condition_met(inst.op, old_flags) {
                new_ip = (new_ip as i32 + displacement) as u16;
            }
        }

        Op::Loop | Op::Loopz | Op::Loopnz => {
            let displacement = jump_displacement(inst)?;
            let old_cx = registers.word(Reg::Cx);
            let new_cx = old_cx.wrapping_sub(1);
            registers.set_word(Reg::Cx, new_cx);

            let zf = check_flag(old_flags, CpuFlag::Zero);
            let taken = match inst.op {
                Op::Loop => new_cx != 0,
                Op::Loopz => new_cx != 0 && zf,
                _ => new_cx != 0 && !zf,
            };
            if taken {
                new_ip = (new_ip as i32 + displacement) as u16;
            }

            step.destination = Some(RegisterAccess::word(Reg::Cx as usize));
            step.old_value = old_cx;
            step.new_value = new_cx;
        }

        Op::Jcxz => {
            let displacement = jump_displacement(inst)?;
            let cx = registers.word(Reg::Cx);
            if cx == 0 {
                new_ip = (new_ip as i32 + displacement) as u16;
            }

            step.destination = Some(RegisterAccess::word(Reg::Cx as usize));
            step.old_value = cx;
            step.new_value = cx;
        }

        Op::Nop => {}
    }

    registers.set_word(Reg::Flags, step.new_flags);
    registers.set_word(Reg::Ip, new_ip);
    step.new_ip = new_ip;

    Ok(step)
}
