//! Wire-level field extraction: consumes the bytes each opcode class
//! requires and records them before any semantic interpretation.

use std::io::Cursor;

use byteorder::ReadBytesExt;

use crate::vm::error::Error;
use crate::vm::opcode::{classify, Opcode};

pub type ByteCursor<'a> = Cursor<&'a [u8]>;

#[derive(Debug, Clone, Copy)]
pub struct InstructionFields {
    pub size: u16,
    pub opcode: Opcode,
    pub mode: u8,
    pub reg: u8,
    pub rm: u8,
    pub sr: u8,
    pub disp_lo: u8,
    pub disp_hi: u8,
    pub data_lo: u8,
    pub data_hi: u8,
    pub d: bool,
    pub w: bool,
    pub s: bool,
}

impl InstructionFields {
    fn new(opcode: Opcode) -> Self {
        Self {
            size: 0,
            opcode,
            mode: 0,
            reg: 0,
            rm: 0,
            sr: 0,
            disp_lo: 0,
            disp_hi: 0,
            data_lo: 0,
            data_hi: 0,
            d: false,
            w: false,
            s: false,
        }
    }
}

#[inline]
fn fetch_byte(cursor: &mut ByteCursor) -> Result<u8, Error> {
    cursor.read_u8().map_err(|_| Error::EndOfStream)
}

fn displacement_bytes(mode: u8, rm: u8) -> u8 {
    match mode {
        // memory mode, no displacement unless direct address
        0b00 => (rm == 0b110) as u8 * 2,
        // memory mode, 8-bit displacement
        0b01 => 1,
        // memory mode, 16-bit displacement
        0b10 => 2,
        // register mode, no displacement
        _ => 0,
    }
}

fn read_mod_rm(cursor: &mut ByteCursor, fields: &mut InstructionFields) -> Result<(), Error> {
    let byte = fetch_byte(cursor)?;
    fields.rm = byte & 0b111;
    fields.reg = (byte >> 3) & 0b111;
    fields.sr = (byte >> 3) & 0b11;
    fields.mode = byte >> 6;
    Ok(())
}

fn read_displacement(cursor: &mut ByteCursor, fields: &mut InstructionFields) -> Result<(), Error> {
    let bytes = displacement_bytes(fields.mode, fields.rm);
    if bytes > 0 {
        fields.disp_lo = fetch_byte(cursor)?;
        if bytes > 1 {
            fields.disp_hi = fetch_byte(cursor)?;
        }
    }
    Ok(())
}

// Immediate or direct-address data: two bytes only when `w` asks for a
// word and `s` does not shrink it to a sign-extended byte.
fn read_data(cursor: &mut ByteCursor, fields: &mut InstructionFields) -> Result<(), Error> {
    fields.data_lo = fetch_byte(cursor)?;
    if fields.w && !fields.s {
        fields.data_hi = fetch_byte(cursor)?;
    }
    Ok(())
}

/// Reads one instruction's raw fields from the cursor. On success the
/// cursor sits one past the last consumed byte and `size` records how
/// many were consumed.
pub fn read_fields(cursor: &mut ByteCursor) -> Result<InstructionFields, Error> {
    let start = cursor.position();
    let first = fetch_byte(cursor)?;

    let opcode = classify(first).ok_or(Error::UnrecognizedOpcode(first))?;
    let mut fields = InstructionFields::new(opcode);

    match opcode {
        Opcode::MovNormal | Opcode::AddNormal | Opcode::SubNormal | Opcode::CmpNormal => {
            fields.w = first & 1 != 0;
            fields.d = (first >> 1) & 1 != 0;
            read_mod_rm(cursor, &mut fields)?;
            read_displacement(cursor, &mut fields)?;
        }

        Opcode::ArithmeticImmediate | Opcode::MovImmediateToRegisterOrMemory => {
            if opcode == Opcode::ArithmeticImmediate {
                fields.s = (first >> 1) & 1 != 0;
            }
            fields.w = first & 1 != 0;
            read_mod_rm(cursor, &mut fields)?;

            if opcode == Opcode::ArithmeticImmediate {
                fields.opcode = match fields.reg {
                    0b000 => Opcode::AddImmediateToRegisterOrMemory,
                    0b101 => Opcode::SubImmediateFromRegisterOrMemory,
                    0b111 => Opcode::CmpImmediateWithRegisterOrMemory,
                    _ => return Err(Error::UnrecognizedOpcode(first)),
                };
            }

            read_displacement(cursor, &mut fields)?;
            read_data(cursor, &mut fields)?;
        }

        Opcode::MovImmediateToRegister => {
            fields.reg = first & 0b111;
            fields.w = (first >> 3) & 1 != 0;
            read_data(cursor, &mut fields)?;
        }

        Opcode::AddImmediateToAccumulator
        | Opcode::SubImmediateFromAccumulator
        | Opcode::CmpImmediateWithAccumulator
        | Opcode::MovMemoryToAccumulator
        | Opcode::MovAccumulatorToMemory => {
            fields.w = first & 1 != 0;
            read_data(cursor, &mut fields)?;
        }

        Opcode::MovToSegmentRegister | Opcode::MovFromSegmentRegister => {
            read_mod_rm(cursor, &mut fields)?;
            read_displacement(cursor, &mut fields)?;
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
            fields.data_lo = fetch_byte(cursor)?;
        }

        Opcode::Nop => {}

        Opcode::AddImmediateToRegisterOrMemory
        | Opcode::SubImmediateFromRegisterOrMemory
        | Opcode::CmpImmediateWithRegisterOrMemory => {
            // Only produced by ArithmeticImmediate resolution above.
            unreachable!()
        }
    }

    fields.size = (cursor.position() - start) as u16;
    Ok(fields)
}
