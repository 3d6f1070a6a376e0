//! Structural decoding: raw wire fields to a semantic instruction.

use crate::utils::number::extend_sign;
use crate::vm::error::Error;
use crate::vm::fields::{read_fields, ByteCursor, InstructionFields};
use crate::vm::instruction::{
    EffectiveAddress, Immediate, Instruction, InstructionFlag, Op, Operand,
};
use crate::vm::opcode::Opcode;
use crate::vm::registers::{Reg, RegisterAccess};

// Word registers by their 3-bit encoding.
const WORD_REGISTERS: [Reg; 8] = [
    Reg::Ax,
    Reg::Cx,
    Reg::Dx,
    Reg::Bx,
    Reg::Sp,
    Reg::Bp,
    Reg::Si,
    Reg::Di,
];

// Byte-half registers by their 3-bit encoding: al cl dl bl ah ch dh bh.
const BYTE_REGISTERS: [(Reg, u8); 8] = [
    (Reg::Ax, 0),
    (Reg::Cx, 0),
    (Reg::Dx, 0),
    (Reg::Bx, 0),
    (Reg::Ax, 1),
    (Reg::Cx, 1),
    (Reg::Dx, 1),
    (Reg::Bx, 1),
];

// Segment registers by the 2-bit `sr` field.
const SEGMENT_REGISTERS: [Reg; 4] = [Reg::Es, Reg::Cs, Reg::Ss, Reg::Ds];

// Effective-address terms by the 3-bit `rm` field (mod != 11).
const EFFECTIVE_ADDRESSES: [(Reg, Option<Reg>); 8] = [
    (Reg::Bx, Some(Reg::Si)),
    (Reg::Bx, Some(Reg::Di)),
    (Reg::Bp, Some(Reg::Si)),
    (Reg::Bp, Some(Reg::Di)),
    (Reg::Si, None),
    (Reg::Di, None),
    (Reg::Bp, None),
    (Reg::Bx, None),
];

fn register_operand(encoding: u8, wide: bool) -> Operand {
    Operand::Register(if wide {
        RegisterAccess::word(WORD_REGISTERS[encoding as usize] as usize)
    } else {
        let (index, offset) = BYTE_REGISTERS[encoding as usize];
        RegisterAccess::byte(index as usize, offset)
    })
}

fn displacement(fields: &InstructionFields) -> i16 {
    match fields.mode {
        0b01 => extend_sign(fields.disp_lo) as i16,
        0b10 | 0b00 => ((fields.disp_hi as u16) << 8 | fields.disp_lo as u16) as i16,
        _ => 0,
    }
}

// The R/M operand in memory mode: a direct address for mod=00 rm=110,
// an effective-address expression otherwise.
fn memory_operand(fields: &InstructionFields) -> Operand {
    if fields.mode == 0b00 && fields.rm == 0b110 {
        let address = (fields.disp_hi as u32) << 8 | fields.disp_lo as u32;
        return Operand::DirectAddress(address);
    }

    let (term1, term2) = EFFECTIVE_ADDRESSES[fields.rm as usize];
    Operand::Memory(EffectiveAddress {
        term1: RegisterAccess::word(term1 as usize),
        term2: term2.map(|reg| RegisterAccess::word(reg as usize)),
        displacement: displacement(fields),
        segment_override: None,
    })
}

fn immediate_value(fields: &InstructionFields) -> i32 {
    if fields.w && !fields.s {
        ((fields.data_hi as u16) << 8 | fields.data_lo as u16) as i16 as i32
    } else {
        extend_sign(fields.data_lo) as i16 as i32
    }
}

fn immediate_operand(fields: &InstructionFields) -> Operand {
    Operand::Immediate(Immediate {
        value: immediate_value(fields),
        relative_jump: false,
    })
}

fn operation(opcode: Opcode) -> Op {
    match opcode {
        Opcode::MovNormal
        | Opcode::MovImmediateToRegisterOrMemory
        | Opcode::MovImmediateToRegister
        | Opcode::MovMemoryToAccumulator
        | Opcode::MovAccumulatorToMemory
        | Opcode::MovToSegmentRegister
        | Opcode::MovFromSegmentRegister => Op::Mov,

        Opcode::AddNormal
        | Opcode::AddImmediateToRegisterOrMemory
        | Opcode::AddImmediateToAccumulator => Op::Add,

        Opcode::SubNormal
        | Opcode::SubImmediateFromRegisterOrMemory
        | Opcode::SubImmediateFromAccumulator => Op::Sub,

        Opcode::CmpNormal
        | Opcode::CmpImmediateWithRegisterOrMemory
        | Opcode::CmpImmediateWithAccumulator => Op::Cmp,

        Opcode::Je => Op::Je,
        Opcode::Jl => Op::Jl,
        Opcode::Jle => Op::Jle,
        Opcode::Jb => Op::Jb,
        Opcode::Jbe => Op::Jbe,
        Opcode::Jp => Op::Jp,
        Opcode::Jo => Op::Jo,
        Opcode::Js => Op::Js,
        Opcode::Jne => Op::Jne,
        Opcode::Jnl => Op::Jnl,
        Opcode::Jg => Op::Jg,
        Opcode::Jnb => Op::Jnb,
        Opcode::Ja => Op::Ja,
        Opcode::Jnp => Op::Jnp,
        Opcode::Jno => Op::Jno,
        Opcode::Jns => Op::Jns,
        Opcode::Loop => Op::Loop,
        Opcode::Loopz => Op::Loopz,
        Opcode::Loopnz => Op::Loopnz,
        Opcode::Jcxz => Op::Jcxz,
        Opcode::Jmp => Op::Jmp,
        Opcode::Nop => Op::Nop,

        Opcode::ArithmeticImmediate => unreachable!(),
    }
}

/// Decodes exactly one instruction starting at the cursor. `address`
/// is the instruction's location within the code segment.
pub fn decode_instruction(cursor: &mut ByteCursor, address: u32) -> Result<Instruction, Error> {
    let fields = read_fields(cursor)?;

    let mut inst = Instruction {
        address,
        size: fields.size as u32,
        op: operation(fields.opcode),
        flags: 0,
        operands: [Operand::None, Operand::None],
        segment_override: None,
    };
    if fields.w {
        inst.set_flag(InstructionFlag::Wide);
    }

    match fields.opcode {
        Opcode::MovNormal | Opcode::AddNormal | Opcode::SubNormal | Opcode::CmpNormal => {
            let reg = register_operand(fields.reg, fields.w);
            let rm = if fields.mode == 0b11 {
                register_operand(fields.rm, fields.w)
            } else {
                memory_operand(&fields)
            };
            // The d bit says whether `reg` is the destination.
            inst.operands = if fields.d { [reg, rm] } else { [rm, reg] };
        }

        Opcode::MovImmediateToRegisterOrMemory
        | Opcode::AddImmediateToRegisterOrMemory
        | Opcode::SubImmediateFromRegisterOrMemory
        | Opcode::CmpImmediateWithRegisterOrMemory => {
            let destination = if fields.mode == 0b11 {
                register_operand(fields.rm, fields.w)
            } else {
                memory_operand(&fields)
            };
            inst.operands = [destination, immediate_operand(&fields)];
        }

        Opcode::MovImmediateToRegister => {
            inst.operands = [register_operand(fields.reg, fields.w), immediate_operand(&fields)];
        }

        Opcode::AddImmediateToAccumulator
        | Opcode::SubImmediateFromAccumulator
        | Opcode::CmpImmediateWithAccumulator => {
            inst.operands = [register_operand(0, fields.w), immediate_operand(&fields)];
        }

        Opcode::MovMemoryToAccumulator | Opcode::MovAccumulatorToMemory => {
            let address = (fields.data_hi as u32) << 8 | fields.data_lo as u32;
            let accumulator = register_operand(0, fields.w);
            let memory = Operand::DirectAddress(address);
            inst.operands = if fields.opcode == Opcode::MovMemoryToAccumulator {
                [accumulator, memory]
            } else {
                [memory, accumulator]
            };
        }

        Opcode::MovToSegmentRegister | Opcode::MovFromSegmentRegister => {
            // Always a 16-bit transfer, whichever direction.
            inst.set_flag(InstructionFlag::Wide);
            let segment = Operand::Register(RegisterAccess::word(
                SEGMENT_REGISTERS[fields.sr as usize] as usize,
            ));
            let rm = if fields.mode == 0b11 {
                register_operand(fields.rm, true)
            } else {
                memory_operand(&fields)
            };
            inst.operands = if fields.opcode == Opcode::MovToSegmentRegister {
                [segment, rm]
            } else {
                [rm, segment]
            };
        }

        Opcode::Je
        | Opcode::Jl
        | Opcode::Jle
        | Opcode::Jb
        | Opcode::Jbe
        | Opcode::Jp
        | Opcode::Jo
        | Opcode::Js
        | Opcode::Jne
        | Opcode::Jnl
        | Opcode::Jg
        | Opcode::Jnb
        | Opcode::Ja
        | Opcode::Jnp
        | Opcode::Jno
        | Opcode::Jns
        | Opcode::Loop
        | Opcode::Loopz
        | Opcode::Loopnz
        | Opcode::Jcxz
        | Opcode::Jmp => {
            inst.operands[0] = Operand::Immediate(Immediate {
                value: fields.data_lo as i8 as i32,
                relative_jump: true,
            });
        }

        Opcode::Nop => {}

        Opcode::ArithmeticImmediate => unreachable!(),
    }

    Ok(inst)
}
