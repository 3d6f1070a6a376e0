//! Assembly-text rendering of decoded instructions.

use crate::vm::instruction::{EffectiveAddress, Instruction, Operand};

// `word `/`byte ` marker, needed when the other operand is an
// immediate and cannot carry the width itself.
fn width_prefix(inst: &Instruction, other: &Operand) -> &'static str {
    if matches!(other, Operand::Immediate(_)) {
        if inst.is_wide() {
            "word "
        } else {
            "byte "
        }
    } else {
        ""
    }
}

fn format_effective_address(expression: &EffectiveAddress) -> String {
    let mut text = format!("[{}", expression.term1.name());
    if let Some(term2) = expression.term2 {
        text += &format!(" + {}", term2.name());
    }
    if expression.displacement > 0 {
        text += &format!(" + {}", expression.displacement);
    } else if expression.displacement < 0 {
        text += &format!(" - {}", -(expression.displacement as i32));
    }
    text += "]";
    text
}

fn format_operand(inst: &Instruction, operand: &Operand, other: &Operand) -> String {
    match operand {
        Operand::None => String::new(),
        Operand::Register(access) => access.name().to_string(),
        Operand::DirectAddress(address) => {
            format!("{}[{}]", width_prefix(inst, other), address)
        }
        Operand::Memory(expression) => {
            format!("{}{}", width_prefix(inst, other), format_effective_address(expression))
        }
        Operand::Immediate(immediate) => {
            if immediate.relative_jump {
                // The printed offset is taken from the start of the
                // instruction, so fold the size back in.
                format!("${:+}", immediate.value + inst.size as i32)
            } else {
                immediate.value.to_string()
            }
        }
    }
}

/// Renders `mnemonic destination, source`.
pub fn format_instruction(inst: &Instruction) -> String {
    let mut line = inst.op.mnemonic().to_string();

    let first = format_operand(inst, &inst.operands[0], &inst.operands[1]);
    let second = format_operand(inst, &inst.operands[1], &inst.operands[0]);

    if !first.is_empty() {
        line += " ";
        line += &first;
    }
    if !second.is_empty() {
        line += ", ";
        line += &second;
    }

    line
}
