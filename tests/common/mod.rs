//! Shared helpers for the integration tests: a class file builder and a
//! tiny interpreter that runs rewritten methods against a recording
//! trampoline.

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use jvm_method_tracer::classfile::{
    Attribute, ClassUnit, CodeAttribute, ConstantPool, CpInfo, ExceptionTableEntry, MethodUnit, RawAttribute,
};

pub const TRAMPOLINE: &str = "com/google/idea/perf/tracer/TracerTrampoline";
pub const ARITHMETIC: &str = "java/lang/ArithmeticException";
pub const ILLEGAL_STATE: &str = "java/lang/IllegalStateException";

pub fn u1(buf: &mut Vec<u8>, v: u8) {
    buf.push(v);
}

pub fn u2(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_be_bytes());
}

pub fn u4(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_be_bytes());
}

/// Body of one method as it would come out of javac.
#[derive(Debug, Clone, Default)]
pub struct Code {
    pub max_stack: u16,
    pub max_locals: u16,
    pub bytes: Vec<u8>,
    pub handlers: Vec<ExceptionTableEntry>,
    /// Encoded `StackMapTable` info, without the attribute header.
    pub stack_map: Option<Vec<u8>>,
}

impl Code {
    pub fn new(max_stack: u16, max_locals: u16, bytes: Vec<u8>) -> Self {
        Self { max_stack, max_locals, bytes, ..Self::default() }
    }

    pub fn handler(mut self, start_pc: u16, end_pc: u16, handler_pc: u16, catch_type: u16) -> Self {
        self.handlers.push(ExceptionTableEntry { start_pc, end_pc, handler_pc, catch_type });
        self
    }

    pub fn stack_map(mut self, info: Vec<u8>) -> Self {
        self.stack_map = Some(info);
        self
    }
}

pub struct ClassBuilder {
    name: String,
    major_version: u16,
    pool: ConstantPool,
    methods: Vec<MethodUnit>,
}

impl ClassBuilder {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_string(), major_version: 52, pool: ConstantPool::new(), methods: Vec::new() }
    }

    pub fn major_version(mut self, major_version: u16) -> Self {
        self.major_version = major_version;
        self
    }

    pub fn pool(&mut self) -> &mut ConstantPool {
        &mut self.pool
    }

    pub fn method(&mut self, access_flags: u16, name: &str, descriptor: &str, code: Code) -> &mut Self {
        let code_name = self.pool.utf8("Code").unwrap();
        let mut attributes = Vec::new();
        if let Some(info) = code.stack_map {
            attributes.push(RawAttribute { name_index: self.pool.utf8("StackMapTable").unwrap(), info });
        }
        let code = CodeAttribute {
            name_index: code_name,
            max_stack: code.max_stack,
            max_locals: code.max_locals,
            code: code.bytes,
            exception_table: code.handlers,
            attributes,
        };
        self.push_method(access_flags, name, descriptor, vec![Attribute::Code(code)])
    }

    /// A method without a `Code` attribute.
    pub fn declare(&mut self, access_flags: u16, name: &str, descriptor: &str) -> &mut Self {
        self.push_method(access_flags, name, descriptor, Vec::new())
    }

    fn push_method(&mut self, access_flags: u16, name: &str, descriptor: &str, attributes: Vec<Attribute>) -> &mut Self {
        let name_index = self.pool.utf8(name).unwrap();
        let descriptor_index = self.pool.utf8(descriptor).unwrap();
        self.methods.push(MethodUnit { access_flags, name_index, descriptor_index, attributes });
        self
    }

    pub fn build(mut self) -> Vec<u8> {
        let this_class = self.pool.class(&self.name).unwrap();
        let super_class = self.pool.class("java/lang/Object").unwrap();
        ClassUnit {
            minor_version: 0,
            major_version: self.major_version,
            constant_pool: self.pool,
            access_flags: 0x0021,
            this_class,
            super_class,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: self.methods,
            attributes: Vec::new(),
        }
        .to_bytes()
        .unwrap()
    }
}

pub fn find_method<'a>(class: &'a ClassUnit, name: &str, descriptor: &str) -> &'a MethodUnit {
    let cp = &class.constant_pool;
    class
        .methods
        .iter()
        .find(|m| m.name(cp).unwrap() == name && m.descriptor(cp).unwrap() == descriptor)
        .unwrap_or_else(|| panic!("no method {name}{descriptor}"))
}

/// `StackMapTable` info of a method, if it has one.
pub fn stack_map<'a>(class: &'a ClassUnit, method: &'a MethodUnit) -> Option<&'a [u8]> {
    let code = method.code()?;
    code.attributes
        .iter()
        .find(|a| class.constant_pool.get_utf8(a.name_index).unwrap() == "StackMapTable")
        .map(|a| a.info.as_slice())
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Null,
    Str(String),
    /// Result of a `valueOf` call, e.g. `Integer(7)`.
    Boxed(String),
    Array(Rc<RefCell<Vec<Value>>>),
    /// Instance of the named class.
    Object(String),
    /// Second half of a long or double local.
    Top,
}

impl Value {
    fn words(&self) -> usize {
        match self {
            Value::Long(_) | Value::Double(_) => 2,
            _ => 1,
        }
    }

    fn int(&self) -> i32 {
        match self {
            Value::Int(v) => *v,
            other => panic!("expected int, found {other:?}"),
        }
    }

    pub fn render(&self) -> String {
        match self {
            Value::Int(v) => v.to_string(),
            Value::Long(v) => v.to_string(),
            Value::Float(v) => v.to_string(),
            Value::Double(v) => v.to_string(),
            Value::Null => "null".to_string(),
            Value::Str(s) | Value::Boxed(s) | Value::Object(s) => s.clone(),
            Value::Array(items) => format!("{:?}", items.borrow().iter().map(Value::render).collect::<Vec<_>>()),
            Value::Top => "top".to_string(),
        }
    }
}

/// What the trampoline and other external methods observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Enter(i32),
    /// `None` when the rewritten code passed a null array.
    EnterArgs(i32, Option<Vec<String>>),
    Leave,
    /// A call to a method outside the class, as `owner.name`.
    Call(String),
}

enum Flow {
    Next(usize),
    Return(Value),
    Throw(String),
}

/// Runs the methods of one class. Only the opcodes the tests use are
/// implemented; anything else panics.
pub struct Machine {
    class: ClassUnit,
    name: String,
    pub events: Vec<Event>,
}

impl Machine {
    pub fn load(bytes: &[u8]) -> Self {
        let class = ClassUnit::parse(bytes).unwrap();
        let name = class.name().unwrap().into_owned();
        Self { class, name, events: Vec::new() }
    }

    pub fn class(&self) -> &ClassUnit {
        &self.class
    }

    /// Invoke a method; for instance methods `args[0]` is the receiver.
    /// `Err` carries the class of an exception that escaped.
    pub fn invoke(&mut self, name: &str, descriptor: &str, args: Vec<Value>) -> Result<Value, String> {
        let code = find_method(&self.class, name, descriptor).code().expect("method has code").clone();
        let mut locals = vec![Value::Top; code.max_locals as usize];
        let mut slot = 0;
        for arg in args {
            let words = arg.words();
            locals[slot] = arg;
            slot += words;
        }
        assert!(slot <= code.max_locals as usize, "arguments exceed max_locals");
        self.run(&code, locals)
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    fn run(&mut self, code: &CodeAttribute, mut locals: Vec<Value>) -> Result<Value, String> {
        let mut stack = Vec::new();
        let mut pc = 0;
        loop {
            match self.step(code, pc, &mut stack, &mut locals) {
                Flow::Next(next) => pc = next,
                Flow::Return(value) => return Ok(value),
                Flow::Throw(exception) => {
                    let handler = code.exception_table.iter().find(|h| {
                        (h.start_pc as usize..h.end_pc as usize).contains(&pc) && self.catches(h.catch_type, &exception)
                    });
                    match handler {
                        Some(h) => {
                            stack.clear();
                            stack.push(Value::Object(exception));
                            pc = h.handler_pc as usize;
                        }
                        None => return Err(exception),
                    }
                }
            }
            let words: usize = stack.iter().map(Value::words).sum();
            assert!(words <= code.max_stack as usize, "stack of {words} words exceeds max_stack {}", code.max_stack);
        }
    }

    fn catches(&self, catch_type: u16, exception: &str) -> bool {
        if catch_type == 0 {
            return true;
        }
        let catch = self.class.constant_pool.class_name(catch_type).unwrap();
        catch == exception
            || catch == "java/lang/Throwable"
            || catch == "java/lang/Exception"
            || (catch == "java/lang/RuntimeException" && [ARITHMETIC, ILLEGAL_STATE].contains(&exception))
    }

    fn step(&mut self, code: &CodeAttribute, pc: usize, stack: &mut Vec<Value>, locals: &mut [Value]) -> Flow {
        let bytes = &code.code;
        let s1 = |at: usize| bytes[at] as i8 as i32;
        let u2 = |at: usize| u16::from_be_bytes([bytes[at], bytes[at + 1]]);
        let s2 = |at: usize| i16::from_be_bytes([bytes[at], bytes[at + 1]]) as i32;
        let s4 = |at: usize| i32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
        let jump = |offset: i32| Flow::Next((pc as i32 + offset) as usize);
        let mut pop = || stack.pop().expect("operand stack underflow");

        let op = bytes[pc];
        match op {
            0x00 => {}
            0x01 => stack.push(Value::Null),
            0x02..=0x08 => stack.push(Value::Int(op as i32 - 3)),
            0x09 | 0x0a => stack.push(Value::Long(op as i64 - 9)),
            0x10 => {
                stack.push(Value::Int(s1(pc + 1)));
                return Flow::Next(pc + 2);
            }
            0x11 => {
                stack.push(Value::Int(s2(pc + 1)));
                return Flow::Next(pc + 3);
            }
            0x12 | 0x13 => {
                let (index, len) = if op == 0x12 { (bytes[pc + 1] as u16, 2) } else { (u2(pc + 1), 3) };
                match self.class.constant_pool.get(index).unwrap() {
                    CpInfo::Integer(v) => stack.push(Value::Int(*v)),
                    other => panic!("unsupported ldc of {other:?}"),
                }
                return Flow::Next(pc + len);
            }
            0x15..=0x19 => {
                stack.push(locals[bytes[pc + 1] as usize].clone());
                return Flow::Next(pc + 2);
            }
            0x1a..=0x2d => stack.push(locals[((op - 0x1a) % 4) as usize].clone()),
            0x36..=0x3a => {
                let index = bytes[pc + 1] as usize;
                store(locals, index, pop());
                return Flow::Next(pc + 2);
            }
            0x3b..=0x4e => store(locals, ((op - 0x3b) % 4) as usize, pop()),
            0x53 => {
                let value = pop();
                let index = pop().int();
                match pop() {
                    Value::Array(items) => items.borrow_mut()[index as usize] = value,
                    other => panic!("aastore into {other:?}"),
                }
            }
            0x57 => {
                pop();
            }
            0x59 => {
                let top = pop();
                stack.push(top.clone());
                stack.push(top);
            }
            0x60 | 0x64 | 0x68 | 0x6c | 0x70 => {
                let b = pop().int();
                let a = pop().int();
                let result = match op {
                    0x60 => a.wrapping_add(b),
                    0x64 => a.wrapping_sub(b),
                    0x68 => a.wrapping_mul(b),
                    _ if b == 0 => return Flow::Throw(ARITHMETIC.to_string()),
                    0x6c => a.wrapping_div(b),
                    _ => a.wrapping_rem(b),
                };
                stack.push(Value::Int(result));
            }
            0x84 => {
                let index = bytes[pc + 1] as usize;
                locals[index] = Value::Int(locals[index].int() + s1(pc + 2));
                return Flow::Next(pc + 3);
            }
            0x99..=0x9e => {
                let v = pop().int();
                let taken = match op {
                    0x99 => v == 0,
                    0x9a => v != 0,
                    0x9b => v < 0,
                    0x9c => v >= 0,
                    0x9d => v > 0,
                    _ => v <= 0,
                };
                return if taken { jump(s2(pc + 1)) } else { Flow::Next(pc + 3) };
            }
            0x9f..=0xa4 => {
                let b = pop().int();
                let a = pop().int();
                let taken = match op {
                    0x9f => a == b,
                    0xa0 => a != b,
                    0xa1 => a < b,
                    0xa2 => a >= b,
                    0xa3 => a > b,
                    _ => a <= b,
                };
                return if taken { jump(s2(pc + 1)) } else { Flow::Next(pc + 3) };
            }
            0xa7 => return jump(s2(pc + 1)),
            0xaa => {
                let key = pop().int();
                let base = pc + 1 + (4 - (pc + 1) % 4) % 4;
                let default = s4(base);
                let low = s4(base + 4);
                let high = s4(base + 8);
                if key < low || key > high {
                    return jump(default);
                }
                return jump(s4(base + 12 + 4 * (key - low) as usize));
            }
            0xac..=0xb0 => return Flow::Return(pop()),
            0xb1 => return Flow::Return(Value::Top),
            0xb7 | 0xb8 => {
                let (owner, name, descriptor) = self.class.constant_pool.member_ref(u2(pc + 1)).unwrap();
                let (owner, name, descriptor) = (owner.into_owned(), name.into_owned(), descriptor.into_owned());
                let arity = parameter_count(&descriptor);
                let mut args: Vec<Value> = (0..arity).map(|_| pop()).collect();
                args.reverse();
                if op == 0xb7 {
                    pop();
                    self.events.push(Event::Call(format!("{owner}.{name}")));
                    return Flow::Next(pc + 3);
                }
                if owner == TRAMPOLINE {
                    let event = match (name.as_str(), args.as_slice()) {
                        ("enter", [id]) => Event::Enter(id.int()),
                        ("enter", [id, array]) => Event::EnterArgs(id.int(), rendered(array)),
                        ("leave", []) => Event::Leave,
                        _ => panic!("unexpected trampoline call {name}{descriptor}"),
                    };
                    self.events.push(event);
                } else if name == "valueOf" {
                    let simple = owner.rsplit('/').next().unwrap_or(&owner);
                    stack.push(Value::Boxed(format!("{simple}({})", args[0].render())));
                } else if owner == self.name {
                    let method_code = find_method(&self.class, &name, &descriptor).code().unwrap().clone();
                    let mut callee = vec![Value::Top; method_code.max_locals as usize];
                    let mut slot = 0;
                    for arg in args {
                        let words = arg.words();
                        callee[slot] = arg;
                        slot += words;
                    }
                    match self.run(&method_code, callee) {
                        Ok(Value::Top) => {}
                        Ok(value) => stack.push(value),
                        Err(exception) => return Flow::Throw(exception),
                    }
                } else {
                    panic!("unexpected static call {owner}.{name}{descriptor}");
                }
                return Flow::Next(pc + 3);
            }
            0xbb => {
                let class = self.class.constant_pool.class_name(u2(pc + 1)).unwrap().into_owned();
                stack.push(Value::Object(class));
                return Flow::Next(pc + 3);
            }
            0xbd => {
                let count = pop().int();
                stack.push(Value::Array(Rc::new(RefCell::new(vec![Value::Null; count as usize]))));
                return Flow::Next(pc + 3);
            }
            0xbf => {
                return match pop() {
                    Value::Object(class) => Flow::Throw(class),
                    other => panic!("athrow of {other:?}"),
                }
            }
            other => panic!("opcode {other:#04x} at {pc} is not supported"),
        }
        Flow::Next(pc + 1)
    }
}

fn store(locals: &mut [Value], index: usize, value: Value) {
    if value.words() == 2 {
        locals[index + 1] = Value::Top;
    }
    locals[index] = value;
}

fn rendered(array: &Value) -> Option<Vec<String>> {
    match array {
        Value::Null => None,
        Value::Array(items) => Some(items.borrow().iter().map(Value::render).collect()),
        other => panic!("enter called with {other:?}"),
    }
}

fn parameter_count(descriptor: &str) -> usize {
    let params = &descriptor[1..descriptor.find(')').unwrap()];
    let mut chars = params.chars();
    let mut count = 0;
    while let Some(c) = chars.next() {
        let mut c = c;
        while c == '[' {
            c = chars.next().unwrap();
        }
        if c == 'L' {
            for c in chars.by_ref() {
                if c == ';' {
                    break;
                }
            }
        }
        count += 1;
    }
    count
}
