//! The frame stack.
//!
//! Frames live contiguously in one vector of words:
//!
//! ```text
//! fp -> [saved_fp][return_ip][arg 0 .. arg n-1][local 0 .. local m-1]
//! ```
//!
//! The two header words are raw offsets, not tagged values, so any walk over
//! the stack (the collector's in particular) must skip them.

use super::value::Value;
use crate::error::RuntimeError;

#[derive(Debug, Default)]
pub struct FrameStack {
    words: Vec<Value>,
    fp: usize,
}

impl FrameStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a call header: the caller's frame pointer and the return address.
    /// The callee's `FRAME` instruction completes the frame.
    pub fn push_call(&mut self, return_ip: usize) {
        self.words.push(Value::from_raw(self.fp as u64));
        self.words.push(Value::from_raw(return_ip as u64));
    }

    /// Complete the frame whose header was just pushed: reserve argument and
    /// local slots and move `nargs` operands into the argument slots. The last
    /// value popped becomes argument 0.
    pub fn enter(
        &mut self,
        nargs: usize,
        nlocals: usize,
        stack: &mut Vec<Value>,
    ) -> Result<(), RuntimeError> {
        debug_assert!(self.words.len() >= 2, "FRAME without a call header");
        if stack.len() < nargs {
            return Err(RuntimeError::StackUnderflow);
        }
        self.fp = self.words.len() - 2;
        let base = self.fp + 2;
        self.words.resize(base + nargs + nlocals, Value::null());
        for (slot, value) in self.words[base..base + nargs]
            .iter_mut()
            .zip(stack.drain(stack.len() - nargs..))
        {
            *slot = value;
        }
        Ok(())
    }

    /// Pop the current frame. Returns the return address, or `None` when the
    /// root frame was popped and the program is done.
    pub fn ret(&mut self) -> Option<usize> {
        debug_assert!(self.fp + 1 < self.words.len(), "RETURN outside a frame");
        let saved_fp = self.words[self.fp].raw() as usize;
        let return_ip = self.words[self.fp + 1].raw() as usize;
        self.words.truncate(self.fp);
        if self.words.is_empty() {
            self.fp = 0;
            return None;
        }
        self.fp = saved_fp;
        Some(return_ip)
    }

    #[inline]
    pub fn local(&self, index: usize) -> Value {
        let at = self.fp + 2 + index;
        debug_assert!(at < self.words.len(), "local {index} outside frame");
        self.words[at]
    }

    #[inline]
    pub fn set_local(&mut self, index: usize, value: Value) {
        let at = self.fp + 2 + index;
        debug_assert!(at < self.words.len(), "local {index} outside frame");
        self.words[at] = value;
    }

    /// Visit every argument and local slot of every live frame, innermost
    /// frame first, following the saved-fp chain.
    pub fn for_each_root(&mut self, mut f: impl FnMut(&mut Value)) {
        if self.words.is_empty() {
            return;
        }
        let mut start = self.fp + 2;
        let mut end = self.words.len();
        loop {
            for slot in &mut self.words[start..end] {
                f(slot);
            }
            let header = start - 2;
            if header == 0 {
                break;
            }
            end = header;
            start = self.words[header].raw() as usize + 2;
        }
    }

    pub fn fp(&self) -> usize {
        self.fp
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn words(&self) -> &[Value] {
        &self.words
    }
}
