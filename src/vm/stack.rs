use std::fmt::Display;

use crate::object::Object;

use super::RuntimeError;

pub const STACK_SIZE: usize = 2048;

/// A fixed-capacity operand stack.
///
/// Popping only moves the stack pointer, so the most recently popped value stays
/// readable until something is pushed over it.
pub struct Stack {
    storage: Vec<Object>,
    sp: usize,
}

impl Stack {
    pub fn new() -> Self {
        Stack {
            storage: vec![Object::Null; STACK_SIZE],
            sp: 0,
        }
    }

    pub fn sp(&self) -> usize {
        self.sp
    }

    /// Moves the stack pointer, reserving or discarding slots in one step.
    pub fn set_sp(&mut self, sp: usize) -> Result<(), RuntimeError> {
        if sp > STACK_SIZE {
            return Err(RuntimeError::StackOverflow);
        }
        self.sp = sp;
        Ok(())
    }

    pub fn push(&mut self, value: Object) -> Result<(), RuntimeError> {
        if self.sp >= STACK_SIZE {
            return Err(RuntimeError::StackOverflow);
        }
        self.storage[self.sp] = value;
        self.sp += 1;
        Ok(())
    }

    pub fn pop(&mut self) -> Object {
        self.sp = self
            .sp
            .checked_sub(1)
            .expect("VM shouldn't underflow the Stack");
        self.storage[self.sp].clone()
    }

    pub fn get(&self, index: usize) -> &Object {
        &self.storage[index]
    }

    pub fn set(&mut self, index: usize, value: Object) {
        self.storage[index] = value;
    }

    /// The `count` values just below the stack pointer, bottom first.
    pub fn top(&self, count: usize) -> &[Object] {
        &self.storage[self.sp - count..self.sp]
    }

    /// The slot just above the stack pointer, or `Null` when the stack is full.
    pub fn last_popped(&self) -> Object {
        self.storage.get(self.sp).cloned().unwrap_or(Object::Null)
    }
}

impl Default for Stack {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for Stack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "          ")?;
        for value in &self.storage[..self.sp] {
            write!(f, "[ {} ]", value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pop_keeps_last_popped_value() {
        let mut stack = Stack::new();
        stack.push(Object::Integer(1)).unwrap();
        stack.push(Object::Integer(2)).unwrap();

        assert!(matches!(stack.pop(), Object::Integer(2)));
        assert!(matches!(stack.last_popped(), Object::Integer(2)));
        assert!(matches!(stack.top(1), [Object::Integer(1)]));
        assert_eq!(stack.sp(), 1);
    }

    #[test]
    fn test_last_popped_on_full_stack() {
        let mut stack = Stack::new();
        for i in 0..STACK_SIZE {
            stack.push(Object::Integer(i as i64)).unwrap();
        }
        assert!(matches!(stack.last_popped(), Object::Null));
    }

    #[test]
    fn test_overflow() {
        let mut stack = Stack::new();
        for i in 0..STACK_SIZE {
            stack.push(Object::Integer(i as i64)).unwrap();
        }
        assert!(matches!(
            stack.push(Object::Null),
            Err(RuntimeError::StackOverflow)
        ));
        assert!(matches!(
            stack.set_sp(STACK_SIZE + 1),
            Err(RuntimeError::StackOverflow)
        ));
    }
}
