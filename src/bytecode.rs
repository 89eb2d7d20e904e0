use std::fmt::{Display, Write};

use crate::object::Object;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Constant,
    Pop,
    Add,
    Subtract,
    Multiply,
    Divide,
    Concat,
    True,
    False,
    Null,
    Equal,
    NotEqual,
    GreaterThan,
    Minus,
    Bang,
    JumpNotTruthy,
    Jump,
    GetGlobal,
    SetGlobal,
    GetLocal,
    SetLocal,
    GetBuiltin,
    GetFree,
    CurrentClosure,
    Array,
    Hash,
    Index,
    Call,
    ReturnValue,
    Return,
    Closure,
    Sentinel,
}

impl OpCode {
    pub fn name(self) -> &'static str {
        match self {
            OpCode::Constant => "OP_CONSTANT",
            OpCode::Pop => "OP_POP",
            OpCode::Add => "OP_ADD",
            OpCode::Subtract => "OP_SUBTRACT",
            OpCode::Multiply => "OP_MULTIPLY",
            OpCode::Divide => "OP_DIVIDE",
            OpCode::Concat => "OP_CONCAT",
            OpCode::True => "OP_TRUE",
            OpCode::False => "OP_FALSE",
            OpCode::Null => "OP_NULL",
            OpCode::Equal => "OP_EQUAL",
            OpCode::NotEqual => "OP_NOT_EQUAL",
            OpCode::GreaterThan => "OP_GREATER_THAN",
            OpCode::Minus => "OP_MINUS",
            OpCode::Bang => "OP_BANG",
            OpCode::JumpNotTruthy => "OP_JUMP_NOT_TRUTHY",
            OpCode::Jump => "OP_JUMP",
            OpCode::GetGlobal => "OP_GET_GLOBAL",
            OpCode::SetGlobal => "OP_SET_GLOBAL",
            OpCode::GetLocal => "OP_GET_LOCAL",
            OpCode::SetLocal => "OP_SET_LOCAL",
            OpCode::GetBuiltin => "OP_GET_BUILTIN",
            OpCode::GetFree => "OP_GET_FREE",
            OpCode::CurrentClosure => "OP_CURRENT_CLOSURE",
            OpCode::Array => "OP_ARRAY",
            OpCode::Hash => "OP_HASH",
            OpCode::Index => "OP_INDEX",
            OpCode::Call => "OP_CALL",
            OpCode::ReturnValue => "OP_RETURN_VALUE",
            OpCode::Return => "OP_RETURN",
            OpCode::Closure => "OP_CLOSURE",
            OpCode::Sentinel => "OP_SENTINEL",
        }
    }

    /// Width in bytes of each operand following the opcode byte.
    pub fn operand_widths(self) -> &'static [usize] {
        match self {
            OpCode::Constant
            | OpCode::JumpNotTruthy
            | OpCode::Jump
            | OpCode::GetGlobal
            | OpCode::SetGlobal
            | OpCode::Array
            | OpCode::Hash => &[2],
            OpCode::GetLocal
            | OpCode::SetLocal
            | OpCode::GetBuiltin
            | OpCode::GetFree
            | OpCode::Call => &[1],
            OpCode::Closure => &[2, 1],
            _ => &[],
        }
    }

    pub fn instruction_len(self) -> usize {
        1 + self.operand_widths().iter().sum::<usize>()
    }
}

impl From<OpCode> for u8 {
    fn from(value: OpCode) -> u8 {
        value as u8
    }
}

#[derive(Debug, thiserror::Error)]
#[error(
    "Invalid byte {0} found when expecting OpCode value between 0 and {}",
    OpCode::Sentinel as u8
)]
pub struct OpCodeFromU8Error(pub u8);

impl TryFrom<u8> for OpCode {
    type Error = OpCodeFromU8Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if value < OpCode::Sentinel as u8 {
            // SAFETY: OpCode is repr(u8) with contiguous discriminants below Sentinel.
            Ok(unsafe { std::mem::transmute::<u8, OpCode>(value) })
        } else {
            Err(OpCodeFromU8Error(value))
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Operand {operand} of {} does not fit in {width} byte(s)", .op.name())]
pub struct OperandOverflow {
    pub op: OpCode,
    pub operand: usize,
    pub width: usize,
}

/// Encodes one instruction. Multi-byte operands are big-endian.
pub fn make(op: OpCode, operands: &[usize]) -> Result<Vec<u8>, OperandOverflow> {
    let widths = op.operand_widths();
    debug_assert_eq!(
        widths.len(),
        operands.len(),
        "{} takes {} operands",
        op.name(),
        widths.len()
    );

    let mut instruction = Vec::with_capacity(op.instruction_len());
    instruction.push(op.into());
    for (&operand, &width) in operands.iter().zip(widths) {
        match width {
            2 => {
                let operand = u16::try_from(operand).map_err(|_| OperandOverflow {
                    op,
                    operand,
                    width,
                })?;
                instruction.extend_from_slice(&operand.to_be_bytes());
            }
            1 => {
                let operand = u8::try_from(operand).map_err(|_| OperandOverflow {
                    op,
                    operand,
                    width,
                })?;
                instruction.push(operand);
            }
            _ => unreachable!("operand widths are 1 or 2 bytes"),
        }
    }
    Ok(instruction)
}

/// Decodes the operands that follow an opcode, returning them with the number of bytes read.
pub fn read_operands(op: OpCode, bytes: &[u8]) -> (Vec<usize>, usize) {
    let mut offset = 0;
    let operands = op
        .operand_widths()
        .iter()
        .map(|&width| {
            let operand = match width {
                2 => read_u16(bytes, offset) as usize,
                1 => read_u8(bytes, offset) as usize,
                _ => unreachable!("operand widths are 1 or 2 bytes"),
            };
            offset += width;
            operand
        })
        .collect();
    (operands, offset)
}

pub fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([bytes[offset], bytes[offset + 1]])
}

pub fn read_u8(bytes: &[u8], offset: usize) -> u8 {
    bytes[offset]
}

/// An append-only instruction stream with in-place operand patching.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Instructions(Vec<u8>);

impl Instructions {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Appends an encoded instruction and returns the position it starts at.
    pub fn push(&mut self, instruction: &[u8]) -> usize {
        let position = self.0.len();
        self.0.extend_from_slice(instruction);
        position
    }

    pub fn truncate(&mut self, len: usize) {
        self.0.truncate(len);
    }

    /// Overwrites the instruction at `position` with one of the same length.
    pub fn replace(&mut self, position: usize, instruction: &[u8]) {
        self.0[position..position + instruction.len()].copy_from_slice(instruction);
    }

    pub fn opcode_at(&self, position: usize) -> Result<OpCode, OpCodeFromU8Error> {
        OpCode::try_from(self.0[position])
    }

    pub fn disassemble_instruction(
        &self,
        out: &mut impl Write,
        offset: usize,
    ) -> Result<usize, std::fmt::Error> {
        write!(out, "{:04} ", offset)?;
        let op = match self.opcode_at(offset) {
            Ok(op) => op,
            Err(e) => {
                writeln!(out, "ERROR: {}", e)?;
                return Ok(self.0.len());
            }
        };

        let (operands, read) = read_operands(op, &self.0[offset + 1..]);
        if operands.is_empty() {
            writeln!(out, "{}", op.name())?;
        } else {
            let operands = operands
                .iter()
                .map(usize::to_string)
                .collect::<Vec<_>>()
                .join(" ");
            writeln!(out, "{:<20} {}", op.name(), operands)?;
        }
        Ok(offset + 1 + read)
    }
}

impl From<Vec<u8>> for Instructions {
    fn from(value: Vec<u8>) -> Self {
        Self(value)
    }
}

impl FromIterator<Vec<u8>> for Instructions {
    fn from_iter<T: IntoIterator<Item = Vec<u8>>>(iter: T) -> Self {
        Self(iter.into_iter().flatten().collect())
    }
}

impl Display for Instructions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut offset = 0;
        while offset < self.0.len() {
            offset = self.disassemble_instruction(f, offset)?;
        }
        Ok(())
    }
}

/// The compiler's output: the top-level instruction stream plus its constant pool.
#[derive(Debug, Clone)]
pub struct Bytecode {
    pub instructions: Instructions,
    pub constants: Vec<Object>,
}

impl Bytecode {
    pub fn disassemble(&self) -> String {
        let mut out = format!("== main ==\n{}", self.instructions);
        for (index, constant) in self.constants.iter().enumerate() {
            match constant {
                Object::CompiledFunction(function) => {
                    out.push_str(&format!(
                        "== constant {} fn/{} locals={} ==\n{}",
                        index, function.num_parameters, function.num_locals, function.instructions
                    ));
                }
                other => out.push_str(&format!(
                    "== constant {} {} '{}' ==\n",
                    index,
                    other.type_name(),
                    other
                )),
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_opcodes() -> impl Iterator<Item = OpCode> {
        (0..OpCode::Sentinel as u8).map(|byte| OpCode::try_from(byte).unwrap())
    }

    #[test]
    fn test_make() {
        assert_eq!(
            make(OpCode::Constant, &[65534]).unwrap(),
            vec![OpCode::Constant as u8, 255, 254]
        );
        assert_eq!(make(OpCode::Add, &[]).unwrap(), vec![OpCode::Add as u8]);
        assert_eq!(
            make(OpCode::GetLocal, &[255]).unwrap(),
            vec![OpCode::GetLocal as u8, 255]
        );
        assert_eq!(
            make(OpCode::Closure, &[65534, 255]).unwrap(),
            vec![OpCode::Closure as u8, 255, 254, 255]
        );
    }

    #[test]
    fn test_make_rejects_oversized_operands() {
        assert!(make(OpCode::Constant, &[65536]).is_err());
        assert!(make(OpCode::Call, &[256]).is_err());
        assert!(make(OpCode::Closure, &[1, 256]).is_err());
    }

    #[test]
    fn test_read_operands_round_trips_every_opcode() {
        for op in all_opcodes() {
            let widths = op.operand_widths();
            let operands: Vec<usize> = widths
                .iter()
                .map(|&width| if width == 2 { 65535 } else { 255 })
                .collect();
            let instruction = make(op, &operands).unwrap();
            assert_eq!(instruction.len(), op.instruction_len());

            let (read, n) = read_operands(op, &instruction[1..]);
            assert_eq!(n, widths.iter().sum::<usize>(), "{}", op.name());
            assert_eq!(read, operands, "{}", op.name());
        }
    }

    #[test]
    fn test_opcode_from_invalid_byte() {
        assert!(OpCode::try_from(OpCode::Sentinel as u8).is_err());
        assert!(OpCode::try_from(255).is_err());
    }

    #[test]
    fn test_instructions_display() {
        let instructions: Instructions = [
            make(OpCode::Add, &[]).unwrap(),
            make(OpCode::GetLocal, &[1]).unwrap(),
            make(OpCode::Constant, &[2]).unwrap(),
            make(OpCode::Constant, &[65535]).unwrap(),
            make(OpCode::Closure, &[65535, 255]).unwrap(),
        ]
        .into_iter()
        .collect();

        let expected = "\
0000 OP_ADD
0001 OP_GET_LOCAL         1
0003 OP_CONSTANT          2
0006 OP_CONSTANT          65535
0009 OP_CLOSURE           65535 255
";
        assert_eq!(instructions.to_string(), expected);
    }

    #[test]
    fn test_replace_patches_in_place() {
        let mut instructions = Instructions::new();
        let position = instructions.push(&make(OpCode::Jump, &[9999]).unwrap());
        instructions.push(&make(OpCode::Pop, &[]).unwrap());
        instructions.replace(position, &make(OpCode::Jump, &[4]).unwrap());
        assert_eq!(
            instructions.as_bytes(),
            &[OpCode::Jump as u8, 0, 4, OpCode::Pop as u8]
        );
    }
}
