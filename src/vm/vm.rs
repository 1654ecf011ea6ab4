use std::io::{self, Write};

use log::{debug, info, trace};

use super::builtins::{ArrayOp, Builtins, IntOp, check_index};
use super::class::{ClassTable, SlotKind, Symbol};
use super::codebuf::CodeBuffer;
use super::frame::FrameStack;
use super::heap::{GcStats, Heap, Roots, Shape};
use super::link::{Image, link};
use super::ops::Opcode;
use super::value::{Value, ValueKind};
use crate::config::RuntimeConfig;
use crate::error::{ConfigError, RuntimeError, VmError};
use crate::program::Program;

/// The kiln virtual machine.
pub struct VM {
    stack: Vec<Value>,
    frames: FrameStack,
    globals: Vec<Value>,
    heap: Heap,
    trace: bool,
    report_gc: bool,
    /// Output stream for printf
    output: Box<dyn Write>,
}

// Operand decoding. Running off the end of the buffer is reported at the
// offset of the instruction being decoded.

#[inline]
fn fetch_u32(code: &CodeBuffer, ip: &mut usize, at: usize) -> Result<u32, RuntimeError> {
    code.read_u32(ip).ok_or(RuntimeError::CodeOverrun { offset: at })
}

#[inline]
fn fetch_i32(code: &CodeBuffer, ip: &mut usize, at: usize) -> Result<i32, RuntimeError> {
    code.read_i32(ip).ok_or(RuntimeError::CodeOverrun { offset: at })
}

#[inline]
fn fetch_u64(code: &CodeBuffer, ip: &mut usize, at: usize) -> Result<u64, RuntimeError> {
    code.read_u64(ip).ok_or(RuntimeError::CodeOverrun { offset: at })
}

impl VM {
    pub fn new(config: &RuntimeConfig) -> Result<Self, ConfigError> {
        Self::with_output(config, Box::new(io::stdout()))
    }

    /// Create a VM that writes printf output to `output`.
    pub fn with_output(
        config: &RuntimeConfig,
        output: Box<dyn Write>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            stack: Vec::with_capacity(1024),
            frames: FrameStack::new(),
            globals: Vec::new(),
            heap: Heap::new(config.heap_size)?,
            trace: config.trace,
            report_gc: config.gc_stats,
            output,
        })
    }

    /// Operand stack left behind by the last run. A finished program leaves
    /// its entry method's return value on top.
    pub fn stack(&self) -> &[Value] {
        &self.stack
    }

    pub fn globals(&self) -> &[Value] {
        &self.globals
    }

    pub fn gc_stats(&self) -> &GcStats {
        self.heap.stats()
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Link and run a program.
    pub fn run(&mut self, program: &Program) -> Result<(), VmError> {
        let image = link(program)?;
        self.execute(&image)?;
        Ok(())
    }

    /// Run a linked image from its entry method until the entry method
    /// returns.
    pub fn execute(&mut self, image: &Image) -> Result<(), RuntimeError> {
        self.stack.clear();
        self.frames = FrameStack::new();
        self.globals = vec![Value::null(); image.globals.len()];
        let builtins = Builtins::new(&image.symbols);

        // Root frame header; returning through it halts.
        self.frames.push_call(0);
        let result = self.dispatch(image, &builtins, image.entry);
        self.output.flush()?;

        if self.report_gc {
            let stats = self.heap.stats();
            info!(
                "gc: {} cycles, {} bytes copied, {:?} total pause, {:?} max pause",
                stats.cycles, stats.bytes_copied, stats.total_pause, stats.max_pause
            );
        }
        result
    }

    fn pop(&mut self) -> Result<Value, RuntimeError> {
        self.stack.pop().ok_or(RuntimeError::StackUnderflow)
    }

    fn peek(&self, depth: usize) -> Result<Value, RuntimeError> {
        self.stack
            .len()
            .checked_sub(depth + 1)
            .map(|i| self.stack[i])
            .ok_or(RuntimeError::StackUnderflow)
    }

    fn require(&self, count: usize) -> Result<(), RuntimeError> {
        if self.stack.len() < count {
            return Err(RuntimeError::StackUnderflow);
        }
        Ok(())
    }

    fn dispatch(
        &mut self,
        image: &Image,
        builtins: &Builtins,
        entry: usize,
    ) -> Result<(), RuntimeError> {
        let code = &image.code;
        let mut ip = entry;

        loop {
            let at = ip;
            let byte = code
                .read_u8(&mut ip)
                .ok_or(RuntimeError::CodeOverrun { offset: at })?;
            let op = Opcode::from_byte(byte).ok_or(RuntimeError::BadOpcode { byte, offset: at })?;

            if self.trace {
                trace!(
                    "{:>6}: {:<10} depth={} top={:?}",
                    at,
                    op.name(),
                    self.stack.len(),
                    self.stack.last()
                );
            }

            match op {
                Opcode::Int => {
                    let value = fetch_i32(code, &mut ip, at)?;
                    self.stack.push(Value::int(value as i64));
                }
                Opcode::Null => {
                    self.stack.push(Value::null());
                }
                Opcode::Printf => {
                    let arity = fetch_u32(code, &mut ip, at)? as usize;
                    let format = fetch_u64(code, &mut ip, at)? as usize;
                    self.printf(&image.strings[format], arity)?;
                }
                Opcode::Array => {
                    let array = self.alloc_array(&image.classes)?;
                    self.stack.truncate(self.stack.len() - 2);
                    self.stack.push(array);
                }
                Opcode::Object => {
                    let nvars = fetch_u32(code, &mut ip, at)? as usize;
                    let class = fetch_u32(code, &mut ip, at)? as usize;
                    let object = self.alloc_object(class, nvars, &image.classes)?;
                    self.stack.push(object);
                }
                Opcode::Slot => {
                    let name = Symbol(fetch_u64(code, &mut ip, at)? as u32);
                    let receiver = self.pop()?;
                    let (object, index) = self.find_var(image, receiver, name)?;
                    self.stack.push(self.heap.object_slot(object, index));
                }
                Opcode::SetSlot => {
                    let name = Symbol(fetch_u64(code, &mut ip, at)? as u32);
                    let value = self.pop()?;
                    let receiver = self.pop()?;
                    let (object, index) = self.find_var(image, receiver, name)?;
                    self.heap.set_object_slot(object, index, value);
                    self.stack.push(value);
                }
                Opcode::CallSlot => {
                    let arity = fetch_u32(code, &mut ip, at)? as usize;
                    let name = Symbol(fetch_u64(code, &mut ip, at)? as u32);
                    if let Some(target) = self.call_slot(image, builtins, arity, name)? {
                        self.frames.push_call(ip);
                        ip = target;
                    }
                }
                Opcode::Call => {
                    let _arity = fetch_u32(code, &mut ip, at)?;
                    let target = fetch_u64(code, &mut ip, at)? as usize;
                    self.frames.push_call(ip);
                    ip = target;
                }
                Opcode::Frame => {
                    let nargs = fetch_u32(code, &mut ip, at)? as usize;
                    let nlocals = fetch_u32(code, &mut ip, at)? as usize;
                    self.frames.enter(nargs, nlocals, &mut self.stack)?;
                }
                Opcode::Return => match self.frames.ret() {
                    Some(return_ip) => ip = return_ip,
                    None => {
                        debug!("halt at {}", at);
                        return Ok(());
                    }
                },
                Opcode::GetLocal => {
                    let index = fetch_u32(code, &mut ip, at)? as usize;
                    self.stack.push(self.frames.local(index));
                }
                Opcode::SetLocal => {
                    let index = fetch_u32(code, &mut ip, at)? as usize;
                    let value = self.peek(0)?;
                    self.frames.set_local(index, value);
                }
                Opcode::GetGlobal => {
                    let index = fetch_u32(code, &mut ip, at)? as usize;
                    self.stack.push(self.globals[index]);
                }
                Opcode::SetGlobal => {
                    let index = fetch_u32(code, &mut ip, at)? as usize;
                    self.globals[index] = self.peek(0)?;
                }
                Opcode::Branch => {
                    let target = fetch_u64(code, &mut ip, at)? as usize;
                    if self.pop()?.is_truthy() {
                        ip = target;
                    }
                }
                Opcode::Goto => {
                    ip = fetch_u64(code, &mut ip, at)? as usize;
                }
                Opcode::Drop => {
                    self.pop()?;
                }
            }
        }
    }

    // ========================================
    // Output
    // ========================================

    /// Print `format` with each `~` replaced by the next of the top `arity`
    /// operands, then replace the operands with null.
    fn printf(&mut self, format: &str, arity: usize) -> Result<(), RuntimeError> {
        self.require(arity)?;
        let base = self.stack.len() - arity;
        let mut args = self.stack[base..].iter();
        let mut out = String::with_capacity(format.len());
        for c in format.chars() {
            if c != '~' {
                out.push(c);
                continue;
            }
            let arg = args
                .next()
                .ok_or(RuntimeError::FormatArity { given: arity })?;
            let n = arg.as_int().ok_or(RuntimeError::TypeMismatch {
                context: "printf",
                expected: "int",
                got: arg.type_name(),
            })?;
            out.push_str(&n.to_string());
        }
        self.output.write_all(out.as_bytes())?;
        self.stack.truncate(base);
        self.stack.push(Value::null());
        Ok(())
    }

    // ========================================
    // Allocation
    // ========================================

    fn collect_garbage(&mut self, classes: &ClassTable) {
        self.heap.collect(
            Roots {
                stack: &mut self.stack,
                frames: &mut self.frames,
                globals: &mut self.globals,
            },
            classes,
        );
    }

    /// Allocate an array from `[.., length, init]` on the operand stack. The
    /// operands are left in place so they survive a collection.
    fn alloc_array(&mut self, classes: &ClassTable) -> Result<Value, RuntimeError> {
        let length = self.peek(1)?;
        let len = length
            .as_int()
            .and_then(|n| usize::try_from(n).ok())
            .ok_or(RuntimeError::TypeMismatch {
                context: "array length",
                expected: "non-negative int",
                got: length.type_name(),
            })?;

        let init = self.peek(0)?;
        if let Some(array) = self.heap.try_alloc_array(len, init) {
            return Ok(array);
        }
        self.collect_garbage(classes);
        // init may have moved
        let init = self.peek(0)?;
        self.heap
            .try_alloc_array(len, init)
            .ok_or(RuntimeError::OutOfMemory {
                requested: Heap::array_size(len).unwrap_or(usize::MAX),
            })
    }

    /// Allocate an instance from `[.., parent, v1 .. v_nvars]` and pop those
    /// operands.
    fn alloc_object(
        &mut self,
        class: usize,
        nvars: usize,
        classes: &ClassTable,
    ) -> Result<Value, RuntimeError> {
        self.require(nvars + 1)?;
        let object = match self.heap.try_alloc_object(class, nvars) {
            Some(object) => object,
            None => {
                self.collect_garbage(classes);
                self.heap
                    .try_alloc_object(class, nvars)
                    .ok_or(RuntimeError::OutOfMemory {
                        requested: Heap::object_size(nvars),
                    })?
            }
        };

        let base = self.stack.len() - nvars;
        for (index, value) in self.stack[base..].iter().enumerate() {
            self.heap.set_object_slot(object, index, *value);
        }
        self.heap.set_object_parent(object, self.stack[base - 1]);
        self.stack.truncate(base - 1);
        Ok(object)
    }

    // ========================================
    // Slots
    // ========================================

    fn describe(&self, value: Value) -> &'static str {
        match self.heap.shape(value) {
            Some(Shape::Array { .. }) => "array",
            Some(Shape::Object { .. }) => "object",
            None => value.type_name(),
        }
    }

    /// Find `name` on `receiver`'s class or, failing that, along its parent
    /// chain. Returns the object that declares the slot.
    fn lookup(
        &self,
        image: &Image,
        receiver: Value,
        name: Symbol,
    ) -> Result<(Value, SlotKind), RuntimeError> {
        if receiver.is_null() {
            return Err(RuntimeError::NullReceiver {
                name: image.symbols.name(name).to_string(),
            });
        }

        let mut object = receiver;
        loop {
            let class = match self.heap.shape(object) {
                Some(Shape::Object { class }) => class,
                Some(Shape::Array { .. }) | None => {
                    return Err(RuntimeError::TypeMismatch {
                        context: "slot lookup",
                        expected: "object",
                        got: self.describe(object),
                    });
                }
            };
            if let Some(slot) = image.classes.get(class).and_then(|c| c.find(name)) {
                return Ok((object, slot.kind));
            }
            object = self.heap.object_parent(object);
            if object.is_null() {
                return Err(RuntimeError::SlotNotFound {
                    name: image.symbols.name(name).to_string(),
                });
            }
        }
    }

    fn find_var(
        &self,
        image: &Image,
        receiver: Value,
        name: Symbol,
    ) -> Result<(Value, usize), RuntimeError> {
        match self.lookup(image, receiver, name)? {
            (object, SlotKind::Var(index)) => Ok((object, index)),
            (_, SlotKind::Code(_)) => Err(RuntimeError::NotAVariable {
                name: image.symbols.name(name).to_string(),
            }),
        }
    }

    /// Execute `CALL_SLOT`. Built-ins complete in place and return `None`;
    /// a method slot returns the code offset to jump to, with the receiver
    /// and arguments left on the stack for its `FRAME`.
    fn call_slot(
        &mut self,
        image: &Image,
        builtins: &Builtins,
        arity: usize,
        name: Symbol,
    ) -> Result<Option<usize>, RuntimeError> {
        if arity == 0 {
            return Err(RuntimeError::StackUnderflow);
        }
        let receiver = self.peek(arity - 1)?;
        let name_str = || image.symbols.name(name).to_string();

        match receiver.kind() {
            ValueKind::Null => Err(RuntimeError::NullReceiver { name: name_str() }),
            ValueKind::Int => {
                let op = builtins
                    .int_op(name)
                    .ok_or_else(|| RuntimeError::UnknownBuiltin {
                        name: name_str(),
                        receiver: "int",
                    })?;
                if arity != 2 {
                    return Err(RuntimeError::BuiltinArity {
                        name: name_str(),
                        expected: 2,
                        got: arity,
                    });
                }
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                let a = lhs.as_int().ok_or(RuntimeError::TypeMismatch {
                    context: "integer built-in",
                    expected: "int",
                    got: self.describe(lhs),
                })?;
                let result = match rhs.as_int() {
                    Some(b) => op.apply(a, b)?,
                    // Words of different kinds are never equal.
                    None if op == IntOp::Eq => Value::null(),
                    None => {
                        return Err(RuntimeError::TypeMismatch {
                            context: "integer built-in",
                            expected: "int",
                            got: self.describe(rhs),
                        });
                    }
                };
                self.stack.push(result);
                Ok(None)
            }
            ValueKind::Object => match self.heap.shape(receiver) {
                Some(Shape::Array { len }) => {
                    let op = builtins
                        .array_op(name)
                        .ok_or_else(|| RuntimeError::UnknownBuiltin {
                            name: name_str(),
                            receiver: "array",
                        })?;
                    if arity != op.arity() {
                        return Err(RuntimeError::BuiltinArity {
                            name: name_str(),
                            expected: op.arity(),
                            got: arity,
                        });
                    }
                    self.array_op(op, len)?;
                    Ok(None)
                }
                _ => match self.lookup(image, receiver, name)? {
                    (_, SlotKind::Code(offset)) => Ok(Some(offset)),
                    (_, SlotKind::Var(_)) => Err(RuntimeError::NotAMethod { name: name_str() }),
                },
            },
        }
    }

    fn index_operand(&self, value: Value, len: usize) -> Result<usize, RuntimeError> {
        let index = value.as_int().ok_or(RuntimeError::TypeMismatch {
            context: "array index",
            expected: "int",
            got: self.describe(value),
        })?;
        check_index(index, len)
    }

    fn array_op(&mut self, op: ArrayOp, len: usize) -> Result<(), RuntimeError> {
        match op {
            ArrayOp::Length => {
                self.pop()?;
                self.stack.push(Value::int(len as i64));
            }
            ArrayOp::Get => {
                let index = self.pop()?;
                let array = self.pop()?;
                let index = self.index_operand(index, len)?;
                self.stack.push(self.heap.array_get(array, index));
            }
            ArrayOp::Set => {
                let value = self.pop()?;
                let index = self.pop()?;
                let array = self.pop()?;
                let index = self.index_operand(index, len)?;
                self.heap.array_set(array, index, value);
                self.stack.push(Value::null());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::{Ins, ProgramBuilder};
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Output sink shared with the test.
    #[derive(Clone, Default)]
    struct Capture(Rc<RefCell<Vec<u8>>>);

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Capture {
        fn text(&self) -> String {
            String::from_utf8(self.0.borrow().clone()).unwrap()
        }
    }

    fn run_with(
        config: &RuntimeConfig,
        program: &Program,
    ) -> (Result<(), VmError>, VM, String) {
        let capture = Capture::default();
        let mut vm = VM::with_output(config, Box::new(capture.clone())).unwrap();
        let result = vm.run(program);
        (result, vm, capture.text())
    }

    fn run_main(build: impl FnOnce(&mut ProgramBuilder) -> Vec<Ins>) -> (VM, String) {
        let mut b = ProgramBuilder::new();
        let code = build(&mut b);
        let main = b.method("main", 0, 4, code);
        let (result, vm, out) = run_with(&RuntimeConfig::default(), &b.finish(main));
        result.unwrap();
        (vm, out)
    }

    fn run_main_err(build: impl FnOnce(&mut ProgramBuilder) -> Vec<Ins>) -> RuntimeError {
        let mut b = ProgramBuilder::new();
        let code = build(&mut b);
        let main = b.method("main", 0, 4, code);
        match run_with(&RuntimeConfig::default(), &b.finish(main)).0 {
            Err(VmError::Runtime(err)) => err,
            other => panic!("expected runtime error, got {:?}", other),
        }
    }

    fn call(b: &mut ProgramBuilder, name: &str, arity: u32) -> Ins {
        Ins::CallSlot {
            name: b.string(name),
            arity,
        }
    }

    fn lit(b: &mut ProgramBuilder, n: i32) -> Ins {
        Ins::Lit { idx: b.int(n) }
    }

    #[test]
    fn test_return_value_left_on_stack() {
        let (vm, _) = run_main(|b| vec![lit(b, 42), Ins::Return]);
        assert_eq!(vm.stack(), &[Value::int(42)]);
    }

    #[test]
    fn test_integer_builtins() {
        let (vm, _) = run_main(|b| {
            vec![
                lit(b, 6),
                lit(b, 7),
                call(b, "mul", 2),
                lit(b, 2),
                call(b, "sub", 2),
                Ins::Return,
            ]
        });
        assert_eq!(vm.stack(), &[Value::int(40)]);
    }

    #[test]
    fn test_comparison_false_is_null() {
        let (vm, _) = run_main(|b| vec![lit(b, 3), lit(b, 2), call(b, "lt", 2), Ins::Return]);
        assert_eq!(vm.stack(), &[Value::null()]);
    }

    #[test]
    fn test_eq_with_null_is_false() {
        let (vm, _) = run_main(|b| {
            let null = b.null();
            vec![
                lit(b, 3),
                Ins::Lit { idx: null },
                call(b, "eq", 2),
                Ins::Return,
            ]
        });
        assert_eq!(vm.stack(), &[Value::null()]);
    }

    #[test]
    fn test_ordering_with_null_is_type_error() {
        let err = run_main_err(|b| {
            let null = b.null();
            vec![
                lit(b, 3),
                Ins::Lit { idx: null },
                call(b, "lt", 2),
                Ins::Return,
            ]
        });
        assert!(matches!(
            err,
            RuntimeError::TypeMismatch {
                expected: "int",
                got: "null",
                ..
            }
        ));
    }

    #[test]
    fn test_printf_substitutes_in_order() {
        let (_, out) = run_main(|b| {
            let format = b.string("a=~ b=~\n");
            vec![
                lit(b, 1),
                lit(b, -2),
                Ins::Printf { format, arity: 2 },
                Ins::Return,
            ]
        });
        assert_eq!(out, "a=1 b=-2\n");
    }

    #[test]
    fn test_printf_too_few_args() {
        let err = run_main_err(|b| {
            let format = b.string("~ ~\n");
            vec![lit(b, 1), Ins::Printf { format, arity: 1 }, Ins::Return]
        });
        assert!(matches!(err, RuntimeError::FormatArity { given: 1 }));
    }

    #[test]
    fn test_locals_and_branch_loop() {
        // i = 0; while i < 5 { i = i + 1 }; return i
        let (vm, _) = run_main(|b| {
            let top = b.string("top");
            let body = b.string("body");
            vec![
                lit(b, 0),
                Ins::SetLocal { idx: 0 },
                Ins::Drop,
                Ins::Goto { name: top },
                Ins::Label { name: body },
                Ins::GetLocal { idx: 0 },
                lit(b, 1),
                call(b, "add", 2),
                Ins::SetLocal { idx: 0 },
                Ins::Drop,
                Ins::Label { name: top },
                Ins::GetLocal { idx: 0 },
                lit(b, 5),
                call(b, "lt", 2),
                Ins::Branch { name: body },
                Ins::GetLocal { idx: 0 },
                Ins::Return,
            ]
        });
        assert_eq!(vm.stack(), &[Value::int(5)]);
    }

    #[test]
    fn test_call_passes_args_in_order() {
        let mut b = ProgramBuilder::new();
        let sub_name = b.string("minus");
        let code = vec![
            Ins::GetLocal { idx: 0 },
            Ins::GetLocal { idx: 1 },
            call(&mut b, "sub", 2),
            Ins::Return,
        ];
        let sub = b.method("minus", 2, 0, code);
        b.global(sub);
        let code = vec![
            lit(&mut b, 10),
            lit(&mut b, 3),
            Ins::Call {
                name: sub_name,
                arity: 2,
            },
            Ins::Return,
        ];
        let main = b.method("main", 0, 0, code);
        let (result, vm, _) = run_with(&RuntimeConfig::default(), &b.finish(main));
        result.unwrap();
        assert_eq!(vm.stack(), &[Value::int(7)]);
    }

    #[test]
    fn test_globals_keep_value_after_set() {
        let mut b = ProgramBuilder::new();
        let g = b.slot("g");
        b.global(g);
        let g_name = b.string("g");
        let code = vec![
            lit(&mut b, 9),
            Ins::SetGlobal { name: g_name },
            Ins::Return,
        ];
        let main = b.method("main", 0, 0, code);
        let (result, vm, _) = run_with(&RuntimeConfig::default(), &b.finish(main));
        result.unwrap();
        assert_eq!(vm.globals(), &[Value::int(9)]);
        assert_eq!(vm.stack(), &[Value::int(9)]);
    }

    #[test]
    fn test_array_builtins() {
        let (vm, _) = run_main(|b| {
            vec![
                lit(b, 3),
                lit(b, 0),
                Ins::Array,
                Ins::SetLocal { idx: 0 },
                lit(b, 2),
                lit(b, 11),
                call(b, "set", 3),
                Ins::Drop,
                Ins::GetLocal { idx: 0 },
                lit(b, 2),
                call(b, "get", 2),
                Ins::GetLocal { idx: 0 },
                call(b, "length", 1),
                call(b, "add", 2),
                Ins::Return,
            ]
        });
        assert_eq!(vm.stack(), &[Value::int(14)]);
    }

    #[test]
    fn test_array_index_out_of_bounds() {
        let err = run_main_err(|b| {
            vec![
                lit(b, 2),
                lit(b, 0),
                Ins::Array,
                lit(b, 5),
                call(b, "get", 2),
                Ins::Return,
            ]
        });
        assert!(matches!(
            err,
            RuntimeError::IndexOutOfBounds {
                index: 5,
                length: 2
            }
        ));
    }

    #[test]
    fn test_null_receiver() {
        let err = run_main_err(|b| {
            let null = b.null();
            vec![Ins::Lit { idx: null }, lit(b, 1), call(b, "add", 2), Ins::Return]
        });
        assert!(matches!(err, RuntimeError::NullReceiver { ref name } if name == "add"));
    }

    #[test]
    fn test_unknown_int_builtin() {
        let err = run_main_err(|b| vec![lit(b, 1), lit(b, 1), call(b, "pow", 2), Ins::Return]);
        assert!(matches!(err, RuntimeError::UnknownBuiltin { receiver: "int", .. }));
    }

    #[test]
    fn test_builtin_arity() {
        let err = run_main_err(|b| vec![lit(b, 1), call(b, "add", 1), Ins::Return]);
        assert!(matches!(
            err,
            RuntimeError::BuiltinArity {
                expected: 2,
                got: 1,
                ..
            }
        ));
    }

    #[test]
    fn test_division_by_zero_is_fatal() {
        let err = run_main_err(|b| vec![lit(b, 1), lit(b, 0), call(b, "div", 2), Ins::Return]);
        assert!(matches!(err, RuntimeError::DivisionByZero));
    }

    #[test]
    fn test_object_slots_and_parent_lookup() {
        let mut b = ProgramBuilder::new();
        let x = b.slot("x");
        let base = b.class(vec![x]);
        let y = b.slot("y");
        let derived = b.class(vec![y]);
        let null = b.null();
        let x_name = b.string("x");
        let y_name = b.string("y");
        let code = vec![
            Ins::Lit { idx: null },
            lit(&mut b, 1),
            Ins::Object { class: base },
            lit(&mut b, 2),
            Ins::Object { class: derived },
            Ins::SetLocal { idx: 0 },
            lit(&mut b, 5),
            Ins::SetSlot { name: x_name },
            Ins::Drop,
            Ins::GetLocal { idx: 0 },
            Ins::Slot { name: x_name },
            Ins::GetLocal { idx: 0 },
            Ins::Slot { name: y_name },
            call(&mut b, "add", 2),
            Ins::Return,
        ];
        let main = b.method("main", 0, 2, code);
        let (result, vm, _) = run_with(&RuntimeConfig::default(), &b.finish(main));
        result.unwrap();
        assert_eq!(vm.stack(), &[Value::int(7)]);
    }

    #[test]
    fn test_missing_slot_with_null_parent() {
        let mut b = ProgramBuilder::new();
        let x = b.slot("x");
        let class = b.class(vec![x]);
        let null = b.null();
        let z = b.string("z");
        let code = vec![
            Ins::Lit { idx: null },
            Ins::Lit { idx: null },
            Ins::Object { class },
            Ins::Slot { name: z },
            Ins::Return,
        ];
        let main = b.method("main", 0, 0, code);
        match run_with(&RuntimeConfig::default(), &b.finish(main)).0 {
            Err(VmError::Runtime(RuntimeError::SlotNotFound { name })) => assert_eq!(name, "z"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_method_dispatch_receives_self() {
        let mut b = ProgramBuilder::new();
        let x = b.slot("x");
        let x_name = b.string("x");
        let get = b.method(
            "get_x",
            1,
            0,
            vec![Ins::GetLocal { idx: 0 }, Ins::Slot { name: x_name }, Ins::Return],
        );
        let class = b.class(vec![x, get]);
        let null = b.null();
        let code = vec![
            Ins::Lit { idx: null },
            lit(&mut b, 31),
            Ins::Object { class },
            call(&mut b, "get_x", 1),
            Ins::Return,
        ];
        let main = b.method("main", 0, 0, code);
        let (result, vm, _) = run_with(&RuntimeConfig::default(), &b.finish(main));
        result.unwrap();
        assert_eq!(vm.stack(), &[Value::int(31)]);
    }

    #[test]
    fn test_calling_a_variable_slot() {
        let mut b = ProgramBuilder::new();
        let x = b.slot("x");
        let class = b.class(vec![x]);
        let null = b.null();
        let code = vec![
            Ins::Lit { idx: null },
            Ins::Lit { idx: null },
            Ins::Object { class },
            call(&mut b, "x", 1),
            Ins::Return,
        ];
        let main = b.method("main", 0, 0, code);
        assert!(matches!(
            run_with(&RuntimeConfig::default(), &b.finish(main)).0,
            Err(VmError::Runtime(RuntimeError::NotAMethod { .. }))
        ));
    }

    #[test]
    fn test_gc_under_allocation_pressure() {
        // Allocate 200 arrays of 8 items while keeping only the latest one
        // in a local. A 1 KiB semispace forces many collections.
        let config = RuntimeConfig {
            heap_size: 1024,
            ..RuntimeConfig::default()
        };
        let mut b = ProgramBuilder::new();
        let top = b.string("top");
        let body = b.string("body");
        let code = vec![
            lit(&mut b, 0),
            Ins::SetLocal { idx: 0 },
            Ins::Drop,
            Ins::Goto { name: top },
            Ins::Label { name: body },
            lit(&mut b, 8),
            Ins::GetLocal { idx: 0 },
            Ins::Array,
            Ins::SetLocal { idx: 1 },
            Ins::Drop,
            Ins::GetLocal { idx: 0 },
            lit(&mut b, 1),
            call(&mut b, "add", 2),
            Ins::SetLocal { idx: 0 },
            Ins::Drop,
            Ins::Label { name: top },
            Ins::GetLocal { idx: 0 },
            lit(&mut b, 200),
            call(&mut b, "lt", 2),
            Ins::Branch { name: body },
            Ins::GetLocal { idx: 1 },
            lit(&mut b, 7),
            call(&mut b, "get", 2),
            Ins::Return,
        ];
        let main = b.method("main", 0, 2, code);
        let (result, vm, _) = run_with(&config, &b.finish(main));
        result.unwrap();
        assert_eq!(vm.stack(), &[Value::int(199)]);
        assert!(vm.gc_stats().cycles > 0);
        assert!(vm.heap().used() <= vm.heap().semispace_size());
    }

    #[test]
    fn test_out_of_memory() {
        let config = RuntimeConfig {
            heap_size: 64,
            ..RuntimeConfig::default()
        };
        let mut b = ProgramBuilder::new();
        let code = vec![lit(&mut b, 100), lit(&mut b, 0), Ins::Array, Ins::Return];
        let main = b.method("main", 0, 0, code);
        assert!(matches!(
            run_with(&config, &b.finish(main)).0,
            Err(VmError::Runtime(RuntimeError::OutOfMemory { requested: 816 }))
        ));
    }

    #[test]
    fn test_link_errors_surface() {
        let mut b = ProgramBuilder::new();
        let nowhere = b.string("nowhere");
        let main = b.method("main", 0, 0, vec![Ins::Goto { name: nowhere }]);
        assert!(matches!(
            run_with(&RuntimeConfig::default(), &b.finish(main)).0,
            Err(VmError::Link(_))
        ));
    }
}
