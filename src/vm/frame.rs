use std::rc::Rc;

use crate::{
    bytecode::{read_u16, read_u8, OpCode, OpCodeFromU8Error},
    object::{Closure, Object},
};

/// One activation of a closure.
pub struct Frame {
    pub closure: Rc<Closure>,
    pub ip: usize,
    /// Stack slot of the first argument; locals live from here upwards.
    pub base_pointer: usize,
}

impl Frame {
    pub fn new(closure: Rc<Closure>, base_pointer: usize) -> Self {
        Self {
            closure,
            ip: 0,
            base_pointer,
        }
    }

    pub fn instructions(&self) -> &[u8] {
        self.closure.function.instructions.as_bytes()
    }

    pub fn at_end(&self) -> bool {
        self.ip >= self.instructions().len()
    }

    pub fn read_opcode(&mut self) -> Result<OpCode, OpCodeFromU8Error> {
        let byte = self.instructions()[self.ip];
        self.ip += 1;
        OpCode::try_from(byte)
    }

    pub fn read_u8(&mut self) -> usize {
        let operand = read_u8(self.instructions(), self.ip);
        self.ip += 1;
        operand as usize
    }

    pub fn read_u16(&mut self) -> usize {
        let operand = read_u16(self.instructions(), self.ip);
        self.ip += 2;
        operand as usize
    }

    pub fn free(&self, index: usize) -> Object {
        self.closure.free[index].clone()
    }
}
