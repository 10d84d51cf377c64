use jig_types::pointer::Pointer;

use crate::error::ExecError;

/// Default maximum nesting of jig method calls.
pub const MAX_CALL_DEPTH: u8 = 32;

/// Origins of the jigs whose methods are currently executing.
///
/// The stack records identity, not call count: the same origin may appear
/// several times when a call chain comes back to an object.
#[derive(Debug, Clone)]
pub struct CallerStack {
    frames: Vec<Pointer>,
    max_depth: u8,
}

impl CallerStack {
    pub fn new() -> Self {
        Self::with_max_depth(MAX_CALL_DEPTH)
    }

    pub fn with_max_depth(max_depth: u8) -> Self {
        Self {
            frames: Vec::new(),
            max_depth,
        }
    }

    /// Push the origin of a jig about to execute.
    pub fn push(&mut self, origin: Pointer) -> Result<(), ExecError> {
        let new_depth = self.frames.len().saturating_add(1);
        if new_depth > usize::from(self.max_depth) {
            return Err(ExecError::CallDepthExceeded {
                depth: u8::try_from(new_depth).unwrap_or(u8::MAX),
                max: self.max_depth,
            });
        }
        self.frames.push(origin);
        Ok(())
    }

    /// Pop the executing jig. An empty stack here is an engine bug.
    pub fn pop(&mut self) -> Result<Pointer, ExecError> {
        self.frames
            .pop()
            .ok_or_else(|| ExecError::invariant("pop from empty caller stack"))
    }

    /// The jig currently executing, if any.
    pub fn top(&self) -> Option<&Pointer> {
        self.frames.last()
    }

    /// The jig that called the one currently executing.
    pub fn caller(&self) -> Option<&Pointer> {
        self.from_top(1)
    }

    /// Entry `n` positions below the top (0 is the top).
    pub fn from_top(&self, n: usize) -> Option<&Pointer> {
        self.frames.iter().rev().nth(n)
    }

    /// Identity acting on `target`: the executing jig, or its caller when
    /// the target is the executing jig itself.
    pub fn acting_on(&self, target: &Pointer) -> Option<&Pointer> {
        match self.top() {
            Some(top) if top == target => self.caller(),
            other => other,
        }
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl Default for CallerStack {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ptr(n: u8) -> Pointer {
        Pointer::new([n; 32], 0)
    }

    #[test]
    fn test_push_and_pop() {
        let mut stack = CallerStack::new();
        assert!(stack.is_empty());
        stack.push(ptr(1)).unwrap();
        stack.push(ptr(2)).unwrap();
        assert_eq!(stack.depth(), 2);
        assert_eq!(stack.top(), Some(&ptr(2)));
        assert_eq!(stack.caller(), Some(&ptr(1)));
        assert_eq!(stack.pop().unwrap(), ptr(2));
        assert_eq!(stack.caller(), None);
    }

    #[test]
    fn test_depth_limit() {
        let mut stack = CallerStack::with_max_depth(4);
        for i in 0..4 {
            stack.push(ptr(i)).unwrap();
        }
        match stack.push(ptr(9)).unwrap_err() {
            ExecError::CallDepthExceeded { depth, max } => {
                assert_eq!(depth, 5);
                assert_eq!(max, 4);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_same_origin_may_reappear() {
        let mut stack = CallerStack::new();
        stack.push(ptr(1)).unwrap();
        stack.push(ptr(2)).unwrap();
        stack.push(ptr(1)).unwrap();
        assert_eq!(stack.depth(), 3);
    }

    #[test]
    fn test_pop_empty_is_invariant_violation() {
        let mut stack = CallerStack::new();
        let err = stack.pop().unwrap_err();
        assert!(err.is_internal());
        assert!(matches!(err, ExecError::InvariantBroken { .. }));
    }

    #[test]
    fn test_acting_on() {
        let mut stack = CallerStack::new();
        assert_eq!(stack.acting_on(&ptr(1)), None);
        stack.push(ptr(1)).unwrap();
        // Another jig is targeted: the executing jig acts.
        assert_eq!(stack.acting_on(&ptr(2)), Some(&ptr(1)));
        stack.push(ptr(2)).unwrap();
        // The executing jig targets itself: its caller acts.
        assert_eq!(stack.acting_on(&ptr(2)), Some(&ptr(1)));
        assert_eq!(stack.acting_on(&ptr(3)), Some(&ptr(2)));
    }
}
