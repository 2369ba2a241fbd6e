//! Homomorphic operation catalogue
//!
//! Type rules and plaintext semantics for every operation the dispatcher
//! accepts. Backends that decrypt internally (the mock and sealed backends)
//! evaluate through [`evaluate`] so that overflow and division policies are
//! defined in exactly one place:
//!
//! - `Add`, `Sub`, `Mul`, `Neg` wrap around modulo 2^bits
//! - `Div` by zero yields the all-ones value of the type
//! - `Rem` by zero yields the dividend
//! - `Shl`, `Shr` take the shift amount modulo the bit width

use crate::types::TypeTag;
use revm::primitives::U256;
use std::fmt;

/// Operations understood by the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OpKind {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Min,
    Max,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Neg,
    Not,
    /// `select(cond, a, b)`: `a` when `cond` decrypts to true, else `b`
    Select,
}

impl OpKind {
    /// Number of operand handles
    pub const fn arity(self) -> usize {
        match self {
            OpKind::Neg | OpKind::Not => 1,
            OpKind::Select => 3,
            _ => 2,
        }
    }

    /// Stable byte used when deriving result identities
    pub const fn code(self) -> u8 {
        self as u8
    }

    fn is_arithmetic(self) -> bool {
        matches!(
            self,
            OpKind::Add
                | OpKind::Sub
                | OpKind::Mul
                | OpKind::Div
                | OpKind::Rem
                | OpKind::Shl
                | OpKind::Shr
                | OpKind::Min
                | OpKind::Max
        )
    }

    fn is_bitwise(self) -> bool {
        matches!(self, OpKind::BitAnd | OpKind::BitOr | OpKind::BitXor)
    }

    fn is_ordering(self) -> bool {
        matches!(self, OpKind::Lt | OpKind::Le | OpKind::Gt | OpKind::Ge)
    }

    /// Check operand tags and return the tag of the result
    ///
    /// The error string names the violated rule; the dispatcher wraps it into
    /// `EngineError::TypeMismatch`.
    pub fn result_tag(self, operands: &[TypeTag]) -> Result<TypeTag, String> {
        if operands.len() != self.arity() {
            return Err(format!(
                "expected {} operands, got {}",
                self.arity(),
                operands.len()
            ));
        }

        match self {
            OpKind::Select => {
                let (cond, a, b) = (operands[0], operands[1], operands[2]);
                if cond != TypeTag::Bool {
                    return Err(format!("condition must be ebool, got {cond}"));
                }
                if a != b {
                    return Err(format!("branches differ: {a} vs {b}"));
                }
                Ok(a)
            }
            OpKind::Neg => {
                let a = operands[0];
                if !a.is_integer() {
                    return Err(format!("negation needs an integer, got {a}"));
                }
                Ok(a)
            }
            OpKind::Not => {
                let a = operands[0];
                if !(a.is_integer() || a == TypeTag::Bool) {
                    return Err(format!("not needs an integer or ebool, got {a}"));
                }
                Ok(a)
            }
            _ => {
                let (a, b) = (operands[0], operands[1]);
                if a != b {
                    return Err(format!("operand widths differ: {a} vs {b}"));
                }
                if self.is_arithmetic() || self.is_ordering() {
                    if !a.is_integer() {
                        return Err(format!("operands must be integers, got {a}"));
                    }
                } else if self.is_bitwise() && !(a.is_integer() || a == TypeTag::Bool) {
                    return Err(format!("bitwise operands must be integers or ebool, got {a}"));
                }

                if matches!(self, OpKind::Eq | OpKind::Ne) || self.is_ordering() {
                    Ok(TypeTag::Bool)
                } else {
                    Ok(a)
                }
            }
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OpKind::Add => "add",
            OpKind::Sub => "sub",
            OpKind::Mul => "mul",
            OpKind::Div => "div",
            OpKind::Rem => "rem",
            OpKind::BitAnd => "and",
            OpKind::BitOr => "or",
            OpKind::BitXor => "xor",
            OpKind::Shl => "shl",
            OpKind::Shr => "shr",
            OpKind::Min => "min",
            OpKind::Max => "max",
            OpKind::Eq => "eq",
            OpKind::Ne => "ne",
            OpKind::Lt => "lt",
            OpKind::Le => "le",
            OpKind::Gt => "gt",
            OpKind::Ge => "ge",
            OpKind::Neg => "neg",
            OpKind::Not => "not",
            OpKind::Select => "select",
        };
        f.write_str(name)
    }
}

fn flag(value: bool) -> U256 {
    if value { U256::from(1u8) } else { U256::ZERO }
}

/// Plaintext semantics of `op`
///
/// `tags` and `values` must already satisfy [`OpKind::result_tag`].
pub fn evaluate(op: OpKind, tags: &[TypeTag], values: &[U256]) -> U256 {
    let tag = tags[0];
    let a = values[0];

    match op {
        OpKind::Neg => tag.wrap(U256::ZERO.wrapping_sub(a)),
        OpKind::Not if tag == TypeTag::Bool => flag(a.is_zero()),
        OpKind::Not => tag.wrap(!a),
        OpKind::Select => {
            if a.is_zero() {
                values[2]
            } else {
                values[1]
            }
        }
        _ => {
            let b = values[1];
            match op {
                OpKind::Add => tag.wrap(a.wrapping_add(b)),
                OpKind::Sub => tag.wrap(a.wrapping_sub(b)),
                OpKind::Mul => tag.wrap(a.wrapping_mul(b)),
                OpKind::Div if b.is_zero() => tag.max_value(),
                OpKind::Div => a / b,
                OpKind::Rem if b.is_zero() => a,
                OpKind::Rem => a % b,
                OpKind::BitAnd => a & b,
                OpKind::BitOr => a | b,
                OpKind::BitXor => a ^ b,
                OpKind::Shl => tag.wrap(a << shift_amount(tag, b)),
                OpKind::Shr => a >> shift_amount(tag, b),
                OpKind::Min => a.min(b),
                OpKind::Max => a.max(b),
                OpKind::Eq => flag(a == b),
                OpKind::Ne => flag(a != b),
                OpKind::Lt => flag(a < b),
                OpKind::Le => flag(a <= b),
                OpKind::Gt => flag(a > b),
                OpKind::Ge => flag(a >= b),
                OpKind::Neg | OpKind::Not | OpKind::Select => unreachable!("handled above"),
            }
        }
    }
}

fn shift_amount(tag: TypeTag, amount: U256) -> usize {
    (amount % U256::from(tag.bits())).to::<usize>()
}
