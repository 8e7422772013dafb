// Shared helpers for the integration tests: tree builders, a compile
// shortcut, and small interpreters for each generated target.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};

use vsl_core::ast::*;
use vsl_core::codegen::Target;
use vsl_core::compiler::Compiler;
use vsl_core::config::CodegenOptions;
use vsl_core::error::VslError;

pub const STEP_LIMIT: usize = 1_000_000;

// ==================== Trees ====================

pub fn main_fn(vars: &[&str], statements: Vec<Stmt>) -> Function {
    Function::new("Main", &[], Block::with_vars(vars, statements))
}

pub fn single(vars: &[&str], statements: Vec<Stmt>) -> Program {
    Program::new(vec![main_fn(vars, statements)])
}

pub fn print_expr(expr: Expr) -> Stmt {
    Stmt::print(vec![expr.into()])
}

pub fn cmp(a: i32, op: Operator, b: i32) -> Expr {
    Expr::binary(Expr::int(a), op, Expr::int(b))
}

pub const COMPARISONS: [Operator; 6] = [
    Operator::Equal,
    Operator::NotEqual,
    Operator::Less,
    Operator::LessEqual,
    Operator::Greater,
    Operator::GreaterEqual,
];

pub const PAIRS: [(i32, i32); 6] = [(5, 5), (-3, 5), (5, -3), (0, 0), (7, 2), (-8, -8)];

pub fn holds(a: i32, op: Operator, b: i32) -> bool {
    match op {
        Operator::Equal => a == b,
        Operator::NotEqual => a != b,
        Operator::Less => a < b,
        Operator::LessEqual => a <= b,
        Operator::Greater => a > b,
        Operator::GreaterEqual => a >= b,
        _ => unreachable!("not a comparison"),
    }
}

/// Loop with a nested loop that uses continue and break:
///
/// ```text
/// i := 0; total := 0
/// WHILE i < 3 DO
///     i := i + 1; j := 0
///     WHILE j < 5 DO
///         j := j + 1
///         IF j = 2 THEN CONTINUE
///         IF j = 4 THEN BREAK
///         total := total + 10 * i + j
///     DONE
/// DONE
/// PRINT total
/// ```
pub fn nested_loops() -> Program {
    let inner = Stmt::while_loop(
        Expr::binary(Expr::var("j"), Operator::Less, Expr::int(5)),
        Stmt::block(Block::with_vars(
            &[],
            vec![
                Stmt::assign("j", Expr::binary(Expr::var("j"), Operator::Add, Expr::int(1))),
                Stmt::if_then(
                    Expr::binary(Expr::var("j"), Operator::Equal, Expr::int(2)),
                    Stmt::cont(),
                ),
                Stmt::if_then(
                    Expr::binary(Expr::var("j"), Operator::Equal, Expr::int(4)),
                    Stmt::brk(),
                ),
                Stmt::assign(
                    "total",
                    Expr::binary(
                        Expr::var("total"),
                        Operator::Add,
                        Expr::binary(
                            Expr::binary(Expr::int(10), Operator::Mul, Expr::var("i")),
                            Operator::Add,
                            Expr::var("j"),
                        ),
                    ),
                ),
            ],
        )),
    );
    let outer = Stmt::while_loop(
        Expr::binary(Expr::var("i"), Operator::Less, Expr::int(3)),
        Stmt::block(Block::with_vars(
            &[],
            vec![
                Stmt::assign("i", Expr::binary(Expr::var("i"), Operator::Add, Expr::int(1))),
                Stmt::assign("j", Expr::int(0)),
                inner,
            ],
        )),
    );
    single(
        &["i", "j", "total"],
        vec![
            Stmt::assign("i", Expr::int(0)),
            Stmt::assign("total", Expr::int(0)),
            outer,
            print_expr(Expr::var("total")),
        ],
    )
}

/// Expected output of `nested_loops`: each outer pass adds (10i+1) + (10i+3)
pub const NESTED_LOOPS_OUTPUT: &str = "132\n";

/// Recursive factorial, defined after its caller
pub fn factorial_program(n: i32) -> Program {
    Program::new(vec![
        main_fn(
            &[],
            vec![print_expr(Expr::call("fact", vec![Expr::int(n)]))],
        ),
        Function::new(
            "fact",
            &["n"],
            Block::with_vars(
                &[],
                vec![
                    Stmt::if_then(
                        Expr::binary(Expr::var("n"), Operator::LessEqual, Expr::int(1)),
                        Stmt::ret(Expr::int(1)),
                    ),
                    Stmt::ret(Expr::binary(
                        Expr::var("n"),
                        Operator::Mul,
                        Expr::call(
                            "fact",
                            vec![Expr::binary(Expr::var("n"), Operator::Sub, Expr::int(1))],
                        ),
                    )),
                ],
            ),
        ),
    ])
}

/// Parameter order matters: sub(a, b) = a - b
pub fn parameter_order_program() -> Program {
    Program::new(vec![
        Function::new(
            "sub",
            &["a", "b"],
            Block::with_vars(
                &[],
                vec![Stmt::ret(Expr::binary(
                    Expr::var("a"),
                    Operator::Sub,
                    Expr::var("b"),
                ))],
            ),
        ),
        main_fn(
            &[],
            vec![print_expr(Expr::call("sub", vec![Expr::int(10), Expr::int(3)]))],
        ),
    ])
}

// ==================== Compilation ====================

pub fn try_compile(program: &Program, target: Target) -> Result<String, VslError> {
    Compiler::new("test.json", CodegenOptions::default()).compile(program, target)
}

pub fn compile(program: &Program, target: Target) -> String {
    try_compile(program, target).expect("compilation should succeed")
}

/// Undo C-style escapes of a double-quoted literal
pub fn unquote(literal: &str) -> String {
    let inner = literal
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .expect("quoted literal");
    let mut out = String::new();
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => panic!("dangling escape in {}", literal),
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i32),
    Str(String),
    Ref,
}

impl Value {
    fn int(&self) -> i32 {
        match self {
            Value::Int(v) => *v,
            other => panic!("expected int on the stack, found {:?}", other),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Run {
    pub output: String,
    pub result: Option<i32>,
}

#[derive(Debug, Clone, Default)]
struct Method {
    params: usize,
    locals: usize,
    max_stack: usize,
    code: Vec<(String, String)>,
    labels: HashMap<String, usize>,
}

// ==================== Managed bytecode ====================

pub struct CilMachine {
    methods: HashMap<String, Method>,
    entry: String,
    input: VecDeque<i32>,
    output: String,
    steps: usize,
}

pub fn run_cil(text: &str, input: &[i32]) -> Run {
    let mut machine = CilMachine::parse(text);
    machine.input = input.iter().copied().collect();
    let entry = machine.entry.clone();
    let result = machine.call(&entry, Vec::new());
    Run {
        output: machine.output,
        result: Some(result),
    }
}

impl CilMachine {
    fn parse(text: &str) -> Self {
        let mut methods = HashMap::new();
        let mut entry = None;
        let mut current: Option<(String, Method)> = None;

        for line in text.lines() {
            let t = line.trim();
            if t.starts_with(".method") {
                let start = t.find("int32 ").expect("return type") + "int32 ".len();
                let open = t.find('(').expect("parameter list");
                let close = t.find(')').expect("parameter list");
                let name = t[start..open].trim_matches('\'').to_string();
                let params = t[open + 1..close].matches("int32").count();
                current = Some((
                    name,
                    Method {
                        params,
                        ..Method::default()
                    },
                ));
                continue;
            }
            let Some((name, method)) = current.as_mut() else {
                continue;
            };
            if t == "}" {
                let (name, method) = current.take().expect("open method");
                methods.insert(name, method);
            } else if t.is_empty() || t.starts_with("//") {
            } else if t == ".entrypoint" {
                entry = Some(name.clone());
            } else if let Some(n) = t.strip_prefix(".maxstack ") {
                method.max_stack = n.parse().expect("maxstack");
            } else if t.starts_with(".locals init") {
                method.locals = t.matches("int32").count();
            } else if let Some(label) = t.strip_suffix(':') {
                method.labels.insert(label.to_string(), method.code.len());
            } else {
                let (op, arg) = t.split_once('\t').unwrap_or((t, ""));
                method.code.push((op.to_string(), arg.to_string()));
            }
        }

        Self {
            methods,
            entry: entry.expect("an .entrypoint method"),
            input: VecDeque::new(),
            output: String::new(),
            steps: 0,
        }
    }

    fn call(&mut self, name: &str, mut args: Vec<i32>) -> i32 {
        let method = self.methods.get(name).cloned().expect("called method exists");
        assert_eq!(args.len(), method.params, "arity of {}", name);
        let mut locals = vec![0; method.locals];
        let mut stack: Vec<Value> = Vec::new();
        let mut pc = 0;

        loop {
            self.steps += 1;
            assert!(self.steps < STEP_LIMIT, "program does not terminate");
            let (op, arg) = method.code.get(pc).expect("control fell off the method end");
            pc += 1;
            let jump = |label: &str| *method.labels.get(label).expect("known label");
            match op.as_str() {
                "ldc.i4" => stack.push(Value::Int(arg.parse().expect("int literal"))),
                "ldstr" => stack.push(Value::Str(unquote(arg))),
                "ldloc" => stack.push(Value::Int(locals[arg.parse::<usize>().unwrap()])),
                "stloc" => {
                    let v = stack.pop().unwrap().int();
                    locals[arg.parse::<usize>().unwrap()] = v;
                }
                "ldarg" => stack.push(Value::Int(args[arg.parse::<usize>().unwrap()])),
                "starg" => {
                    let v = stack.pop().unwrap().int();
                    args[arg.parse::<usize>().unwrap()] = v;
                }
                "neg" => {
                    let v = stack.pop().unwrap().int();
                    stack.push(Value::Int(v.wrapping_neg()));
                }
                "add" | "sub" | "mul" | "div" | "ceq" | "clt" | "cgt" => {
                    let b = stack.pop().unwrap().int();
                    let a = stack.pop().unwrap().int();
                    stack.push(Value::Int(match op.as_str() {
                        "add" => a.wrapping_add(b),
                        "sub" => a.wrapping_sub(b),
                        "mul" => a.wrapping_mul(b),
                        "div" => a.wrapping_div(b),
                        "ceq" => (a == b) as i32,
                        "clt" => (a < b) as i32,
                        _ => (a > b) as i32,
                    }));
                }
                "br" => pc = jump(arg),
                "brfalse" => {
                    if stack.pop().unwrap().int() == 0 {
                        pc = jump(arg);
                    }
                }
                "ret" => return stack.pop().unwrap().int(),
                "call" => self.dispatch(arg, &mut stack),
                other => panic!("unknown CIL instruction {}", other),
            }
            assert!(
                stack.len() <= method.max_stack,
                "{} exceeds .maxstack {}",
                name,
                method.max_stack
            );
        }
    }

    fn dispatch(&mut self, signature: &str, stack: &mut Vec<Value>) {
        if signature.ends_with("Console::Write(int32)") {
            let v = stack.pop().unwrap().int();
            self.output.push_str(&v.to_string());
        } else if signature.ends_with("Console::Write(string)") {
            match stack.pop() {
                Some(Value::Str(s)) => self.output.push_str(&s),
                other => panic!("expected string, found {:?}", other),
            }
        } else if signature.ends_with("Console::WriteLine()") {
            self.output.push('\n');
        } else if signature.ends_with("Console::ReadLine()") {
            let v = self.input.pop_front().expect("input available");
            stack.push(Value::Str(v.to_string()));
        } else if signature.ends_with("Int32::Parse(string)") {
            match stack.pop() {
                Some(Value::Str(s)) => stack.push(Value::Int(s.parse().expect("integer"))),
                other => panic!("expected string, found {:?}", other),
            }
        } else {
            let start = signature.find("::").expect("qualified method") + 2;
            let open = signature.find('(').expect("signature");
            let name = signature[start..open].trim_matches('\'');
            let params = self.methods[name].params;
            let mut args: Vec<i32> = (0..params).map(|_| stack.pop().unwrap().int()).collect();
            args.reverse();
            let result = self.call(name, args);
            stack.push(Value::Int(result));
        }
    }
}

// ==================== JVM assembly ====================

pub struct JvmMachine {
    methods: HashMap<String, Method>,
    input: VecDeque<i32>,
    output: String,
    steps: usize,
}

pub fn run_jasmin(text: &str, input: &[i32]) -> Run {
    let mut machine = JvmMachine::parse(text);
    machine.input = input.iter().copied().collect();
    let result = machine.call("main", vec![Value::Ref]);
    Run {
        output: machine.output,
        result,
    }
}

impl JvmMachine {
    fn parse(text: &str) -> Self {
        let mut methods = HashMap::new();
        let mut current: Option<(String, Method)> = None;

        for line in text.lines() {
            let t = line.trim();
            if let Some(rest) = t.strip_prefix(".method public static ") {
                let open = rest.find('(').expect("descriptor");
                let close = rest.find(')').expect("descriptor");
                let name = rest[..open].to_string();
                let params = if name == "main" {
                    1
                } else {
                    rest[open + 1..close].matches('I').count()
                };
                current = Some((
                    name,
                    Method {
                        params,
                        ..Method::default()
                    },
                ));
                continue;
            }
            let Some((_, method)) = current.as_mut() else {
                continue;
            };
            if t == ".end method" {
                let (name, method) = current.take().expect("open method");
                methods.insert(name, method);
            } else if t.is_empty() || t.starts_with(';') {
            } else if let Some(n) = t.strip_prefix(".limit stack ") {
                method.max_stack = n.parse().expect("stack limit");
            } else if let Some(n) = t.strip_prefix(".limit locals ") {
                method.locals = n.parse().expect("locals limit");
            } else if let Some(label) = t.strip_suffix(':') {
                method.labels.insert(label.to_string(), method.code.len());
            } else {
                let (op, arg) = t.split_once(' ').unwrap_or((t, ""));
                method.code.push((op.to_string(), arg.trim().to_string()));
            }
        }

        Self {
            methods,
            input: VecDeque::new(),
            output: String::new(),
            steps: 0,
        }
    }

    fn call(&mut self, name: &str, args: Vec<Value>) -> Option<i32> {
        let method = self.methods.get(name).cloned().expect("called method exists");
        assert_eq!(args.len(), method.params, "arity of {}", name);
        assert!(args.len() <= method.locals, "{} parameters exceed .limit locals", name);
        let mut slots = vec![Value::Int(0); method.locals];
        for (i, arg) in args.into_iter().enumerate() {
            slots[i] = arg;
        }
        let mut stack: Vec<Value> = Vec::new();
        let mut pc = 0;

        loop {
            self.steps += 1;
            assert!(self.steps < STEP_LIMIT, "program does not terminate");
            let (op, arg) = method.code.get(pc).expect("control fell off the method end");
            pc += 1;
            let jump = |label: &str| *method.labels.get(label).expect("known label");
            match op.as_str() {
                "ldc" => {
                    if arg.starts_with('"') {
                        stack.push(Value::Str(unquote(arg)));
                    } else {
                        stack.push(Value::Int(arg.parse().expect("int literal")));
                    }
                }
                "iload" => {
                    let slot: usize = arg.parse().unwrap();
                    assert!(slot < method.locals, "slot {} beyond .limit locals", slot);
                    stack.push(Value::Int(slots[slot].int()));
                }
                "istore" => {
                    let slot: usize = arg.parse().unwrap();
                    assert!(slot < method.locals, "slot {} beyond .limit locals", slot);
                    slots[slot] = Value::Int(stack.pop().unwrap().int());
                }
                "ineg" => {
                    let v = stack.pop().unwrap().int();
                    stack.push(Value::Int(v.wrapping_neg()));
                }
                "iadd" | "isub" | "imul" | "idiv" => {
                    let b = stack.pop().unwrap().int();
                    let a = stack.pop().unwrap().int();
                    stack.push(Value::Int(match op.as_str() {
                        "iadd" => a.wrapping_add(b),
                        "isub" => a.wrapping_sub(b),
                        "imul" => a.wrapping_mul(b),
                        _ => a.wrapping_div(b),
                    }));
                }
                op if op.starts_with("if_icmp") => {
                    let b = stack.pop().unwrap().int();
                    let a = stack.pop().unwrap().int();
                    let taken = match &op["if_icmp".len()..] {
                        "eq" => a == b,
                        "ne" => a != b,
                        "lt" => a < b,
                        "le" => a <= b,
                        "gt" => a > b,
                        "ge" => a >= b,
                        other => panic!("unknown comparison {}", other),
                    };
                    if taken {
                        pc = jump(arg);
                    }
                }
                "ifeq" => {
                    if stack.pop().unwrap().int() == 0 {
                        pc = jump(arg);
                    }
                }
                "goto" => pc = jump(arg),
                "ireturn" => return Some(stack.pop().unwrap().int()),
                "return" => {
                    assert!(stack.is_empty(), "values left on the stack at return");
                    return None;
                }
                "pop" => {
                    stack.pop().expect("value to pop");
                }
                "dup" => {
                    let top = stack.last().cloned().expect("value to dup");
                    stack.push(top);
                }
                "new" | "getstatic" => stack.push(Value::Ref),
                "putstatic" => {
                    stack.pop().expect("value to store");
                }
                "invokespecial" => {
                    stack.pop().expect("constructor argument");
                    stack.pop().expect("receiver");
                }
                "invokevirtual" => self.virtual_call(arg, &mut stack),
                "invokestatic" => {
                    let slash = arg.find('/').expect("class/method");
                    let open = arg.find('(').expect("descriptor");
                    let close = arg.find(')').expect("descriptor");
                    let callee = &arg[slash + 1..open];
                    let count = arg[open + 1..close].matches('I').count();
                    let mut args: Vec<Value> =
                        (0..count).map(|_| stack.pop().expect("argument")).collect();
                    args.reverse();
                    let result = self.call(callee, args).expect("int result");
                    stack.push(Value::Int(result));
                }
                other => panic!("unknown JVM instruction {}", other),
            }
            assert!(
                stack.len() <= method.max_stack,
                "{} exceeds .limit stack {}",
                name,
                method.max_stack
            );
        }
    }

    fn virtual_call(&mut self, signature: &str, stack: &mut Vec<Value>) {
        if signature.ends_with("print(I)V") {
            let v = stack.pop().unwrap().int();
            self.output.push_str(&v.to_string());
        } else if signature.ends_with("print(Ljava/lang/String;)V") {
            match stack.pop() {
                Some(Value::Str(s)) => self.output.push_str(&s),
                other => panic!("expected string, found {:?}", other),
            }
        } else if signature.ends_with("println()V") {
            self.output.push('\n');
        } else if signature.ends_with("nextInt()I") {
            stack.pop().expect("scanner");
            let v = self.input.pop_front().expect("input available");
            stack.push(Value::Int(v));
            return;
        } else {
            panic!("unknown virtual call {}", signature);
        }
        assert_eq!(stack.pop(), Some(Value::Ref), "print receiver");
    }
}

// ==================== Scripting ====================

#[derive(Debug, Clone)]
enum Node {
    Line(String),
    If(Vec<Node>, Vec<Node>),
    Loop(Vec<Node>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Flow {
    Next,
    Break,
    Continue,
    Return,
}

#[derive(Debug, Clone)]
enum JsValue {
    Num(f64),
    Str(String),
}

impl JsValue {
    fn num(&self) -> f64 {
        match self {
            JsValue::Num(n) => *n,
            JsValue::Str(s) => panic!("expected number, found {:?}", s),
        }
    }

    fn text(&self) -> String {
        match self {
            JsValue::Num(n) if n.fract() == 0.0 => format!("{}", *n as i64),
            JsValue::Num(n) => n.to_string(),
            JsValue::Str(s) => s.clone(),
        }
    }
}

#[derive(Default)]
struct Frame {
    locals: HashMap<usize, JsValue>,
    params: HashMap<usize, JsValue>,
}

pub struct ScriptMachine {
    functions: HashMap<String, Vec<Node>>,
    stack: Vec<JsValue>,
    input: VecDeque<i32>,
    output: String,
    steps: usize,
}

pub fn run_javascript(text: &str, input: &[i32]) -> Run {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with("//"))
        .collect();
    let mut machine = ScriptMachine {
        functions: HashMap::new(),
        stack: Vec::new(),
        input: input.iter().copied().collect(),
        output: String::new(),
        steps: 0,
    };
    let mut entry = None;
    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        i += 1;
        if line == "var stack = [];" {
            continue;
        }
        if let Some(name) = line
            .strip_prefix("function ")
            .and_then(|l| l.strip_suffix("() {"))
        {
            let (body, end) = parse_script_block(&lines, &mut i);
            assert_eq!(end, "}");
            machine.functions.insert(name.to_string(), body);
        } else if let Some(name) = line.strip_suffix("();") {
            entry = Some(name.to_string());
        } else {
            panic!("unexpected top-level line {}", line);
        }
    }
    let entry = entry.expect("entry call");
    machine.call(&entry);
    let result = machine.stack.pop().map(|v| v.num() as i32);
    Run {
        output: machine.output,
        result,
    }
}

fn parse_script_block(lines: &[&str], i: &mut usize) -> (Vec<Node>, String) {
    let mut nodes = Vec::new();
    while *i < lines.len() {
        let line = lines[*i];
        *i += 1;
        match line {
            "}" | "} else {" | "} while (true);" => return (nodes, line.to_string()),
            "if (stack.pop()) {" => {
                let (then_nodes, end) = parse_script_block(lines, i);
                let else_nodes = if end == "} else {" {
                    let (else_nodes, end) = parse_script_block(lines, i);
                    assert_eq!(end, "}");
                    else_nodes
                } else {
                    assert_eq!(end, "}");
                    Vec::new()
                };
                nodes.push(Node::If(then_nodes, else_nodes));
            }
            "do {" => {
                let (body, end) = parse_script_block(lines, i);
                assert_eq!(end, "} while (true);");
                nodes.push(Node::Loop(body));
            }
            _ => nodes.push(Node::Line(line.to_string())),
        }
    }
    panic!("unterminated block");
}

fn slot_index(text: &str) -> usize {
    let open = text.find('[').expect("indexed slot");
    let close = text.find(']').expect("indexed slot");
    text[open + 1..close].parse().expect("slot index")
}

impl ScriptMachine {
    fn call(&mut self, name: &str) {
        let body = self.functions.get(name).cloned().expect("called function exists");
        let mut frame = Frame::default();
        self.exec_block(&body, &mut frame);
    }

    fn pop(&mut self) -> JsValue {
        self.stack.pop().expect("simulated stack underflow")
    }

    fn exec_block(&mut self, nodes: &[Node], frame: &mut Frame) -> Flow {
        for node in nodes {
            let flow = match node {
                Node::Line(line) => self.exec_line(line, frame),
                Node::If(then_nodes, else_nodes) => {
                    if self.pop().num() != 0.0 {
                        self.exec_block(then_nodes, frame)
                    } else {
                        self.exec_block(else_nodes, frame)
                    }
                }
                Node::Loop(body) => loop {
                    self.steps += 1;
                    assert!(self.steps < STEP_LIMIT, "program does not terminate");
                    match self.exec_block(body, frame) {
                        Flow::Break => break Flow::Next,
                        Flow::Return => break Flow::Return,
                        Flow::Next | Flow::Continue => {}
                    }
                },
            };
            if flow != Flow::Next {
                return flow;
            }
        }
        Flow::Next
    }

    fn slot<'f>(frame: &'f mut Frame, text: &str) -> &'f mut HashMap<usize, JsValue> {
        if text.starts_with("locals") {
            &mut frame.locals
        } else {
            &mut frame.params
        }
    }

    fn exec_line(&mut self, line: &str, frame: &mut Frame) -> Flow {
        match line {
            "var locals = [];" | "var params = [];" => return Flow::Next,
            "return;" => return Flow::Return,
            "break;" => return Flow::Break,
            "continue;" => return Flow::Continue,
            "if (!stack.pop()) break;" => {
                return if self.pop().num() == 0.0 {
                    Flow::Break
                } else {
                    Flow::Next
                };
            }
            "stack.push(-stack.pop());" => {
                let v = self.pop().num();
                self.stack.push(JsValue::Num(-v));
                return Flow::Next;
            }
            "stack.push(Math.floor(stack.pop() / stack.pop()));" => {
                let a = self.pop().num();
                let b = self.pop().num();
                self.stack.push(JsValue::Num((a / b).floor()));
                return Flow::Next;
            }
            _ => {}
        }

        if let Some(target) = line.strip_suffix(" = stack.pop();") {
            let v = self.pop();
            Self::slot(frame, target).insert(slot_index(target), v);
        } else if let Some((target, _)) = line.split_once(" = +prompt(") {
            let v = self.input.pop_front().expect("input available");
            Self::slot(frame, target).insert(slot_index(target), JsValue::Num(v as f64));
        } else if line.starts_with("console.log(") {
            let count = line.matches("stack.pop()").count();
            let mut text = String::new();
            for _ in 0..count {
                text.push_str(&self.pop().text());
            }
            self.output.push_str(&text);
            self.output.push('\n');
        } else if let Some(expr) = line
            .strip_prefix("stack.push(stack.pop() ")
            .and_then(|l| l.strip_suffix(");"))
        {
            let (op, rest) = expr.split_once(' ').expect("operator");
            let a = self.pop().num();
            let b = self.pop().num();
            let value = match op {
                "+" => a + b,
                "-" => a - b,
                "*" => a * b,
                "===" => (a == b) as i32 as f64,
                "!==" => (a != b) as i32 as f64,
                "<" => (a < b) as i32 as f64,
                "<=" => (a <= b) as i32 as f64,
                ">" => (a > b) as i32 as f64,
                ">=" => (a >= b) as i32 as f64,
                other => panic!("unknown operator {}", other),
            };
            assert!(rest.starts_with("stack.pop()"));
            self.stack.push(JsValue::Num(value));
        } else if let Some(arg) = line
            .strip_prefix("stack.push(")
            .and_then(|l| l.strip_suffix(");"))
        {
            let value = if arg.starts_with("locals[") || arg.starts_with("params[") {
                Self::slot(frame, arg)
                    .get(&slot_index(arg))
                    .cloned()
                    .unwrap_or(JsValue::Num(f64::NAN))
            } else if arg.starts_with('"') {
                JsValue::Str(serde_json::from_str(arg).expect("JSON string literal"))
            } else {
                JsValue::Num(arg.parse().expect("number literal"))
            };
            self.stack.push(value);
        } else if let Some(name) = line.strip_suffix("();") {
            self.call(name);
        } else {
            panic!("unknown script line {}", line);
        }
        Flow::Next
    }
}

// ==================== Native assembly ====================

#[derive(Debug, Clone, Default)]
pub struct NativeRun {
    pub output: String,
    /// Value of eax at each idiv
    pub dividends: Vec<i32>,
    /// Value of the divisor operand at each idiv
    pub divisors: Vec<i32>,
    /// esp at exit matches esp at entry minus the exit code argument
    pub stack_balanced: bool,
}

#[derive(Debug, Clone, Copy)]
enum Loc {
    Reg(usize),
    Mem(i64),
    Imm(i64),
}

const REGISTERS: [&str; 6] = ["eax", "ebx", "ecx", "edx", "esp", "ebp"];
const ESP: usize = 4;
const EBP: usize = 5;
const STACK_BASE: i64 = 0x0080_0000;

pub struct NativeMachine {
    code: Vec<(String, Vec<String>)>,
    labels: HashMap<String, usize>,
    symbols: HashMap<String, i64>,
    defines: HashMap<String, i64>,
    strings: HashMap<i64, Vec<u8>>,
    memory: HashMap<i64, i32>,
    regs: [i64; 6],
    flags: (i32, i32),
    input: VecDeque<i32>,
    run: NativeRun,
}

pub fn run_x86(text: &str, input: &[i32]) -> NativeRun {
    let mut machine = NativeMachine::parse(text);
    machine.input = input.iter().copied().collect();
    machine.execute();
    machine.run
}

/// Contents of a NASM backquoted string
fn unbackquote(literal: &str) -> Vec<u8> {
    let inner = literal
        .strip_prefix('`')
        .and_then(|s| s.strip_suffix('`'))
        .expect("backquoted string");
    let bytes = inner.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'\\' {
            out.push(bytes[i]);
            i += 1;
            continue;
        }
        match bytes[i + 1] {
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'x' => {
                let hex = std::str::from_utf8(&bytes[i + 2..i + 4]).unwrap();
                out.push(u8::from_str_radix(hex, 16).unwrap());
                i += 2;
            }
            other => out.push(other),
        }
        i += 2;
    }
    out
}

impl NativeMachine {
    fn parse(text: &str) -> Self {
        let mut machine = NativeMachine {
            code: Vec::new(),
            labels: HashMap::new(),
            symbols: HashMap::new(),
            defines: HashMap::new(),
            strings: HashMap::new(),
            memory: HashMap::new(),
            regs: [0; 6],
            flags: (0, 0),
            input: VecDeque::new(),
            run: NativeRun::default(),
        };
        let mut section = "";
        let mut next_symbol = 0x1000_0000i64;

        for line in text.lines() {
            let t = line.trim();
            if t.is_empty() || t.starts_with(';') || t.starts_with("global ") {
                continue;
            }
            if t.starts_with("extern ") {
                continue;
            }
            if let Some(define) = t.strip_prefix("%define ") {
                let (name, value) = define.split_once(' ').expect("define value");
                machine
                    .defines
                    .insert(name.to_string(), value.trim().parse().expect("numeric define"));
                continue;
            }
            if let Some(name) = t.strip_prefix("section ") {
                section = match name {
                    ".bss" => "bss",
                    ".data" => "data",
                    _ => "text",
                };
                continue;
            }
            match section {
                "bss" | "data" => {
                    let (label, directive) = t.split_once(':').expect("data label");
                    let address = next_symbol;
                    next_symbol += 0x1000;
                    machine.symbols.insert(label.to_string(), address);
                    let directive = directive.trim();
                    if let Some(literal) = directive.strip_prefix("db ") {
                        machine.strings.insert(address, unbackquote(literal.trim()));
                    } else if let Some(value) = directive.strip_prefix("dd ") {
                        machine
                            .memory
                            .insert(address, value.trim().parse().expect("dd value"));
                    }
                }
                _ => {
                    if let Some(label) = t.strip_suffix(':') {
                        if !label.contains(char::is_whitespace) {
                            machine.labels.insert(label.to_string(), machine.code.len());
                            continue;
                        }
                    }
                    let (op, rest) = t.split_once(char::is_whitespace).unwrap_or((t, ""));
                    let operands = rest
                        .trim()
                        .split(", ")
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect();
                    machine.code.push((op.to_string(), operands));
                }
            }
        }
        machine
    }

    fn register(name: &str) -> Option<usize> {
        REGISTERS.iter().position(|r| *r == name)
    }

    fn value_of(&self, name: &str) -> i64 {
        if let Ok(n) = name.parse::<i64>() {
            n
        } else if let Some(n) = self.defines.get(name) {
            *n
        } else if let Some(address) = self.symbols.get(name) {
            *address
        } else {
            panic!("unknown operand {}", name)
        }
    }

    fn operand(&self, text: &str) -> Loc {
        let t = text.trim();
        let t = t.strip_prefix("dword ").unwrap_or(t).trim();
        if let Some(inner) = t.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            let split = inner[1..]
                .find(|c: char| c == '+' || c == '-')
                .map(|i| i + 1);
            let (base, offset) = match split {
                Some(i) => (&inner[..i], inner[i..].parse::<i64>().expect("offset")),
                None => (inner, 0),
            };
            let base = match Self::register(base) {
                Some(r) => self.regs[r],
                None => self.value_of(base),
            };
            return Loc::Mem(base + offset);
        }
        match Self::register(t) {
            Some(r) => Loc::Reg(r),
            None => Loc::Imm(self.value_of(t)),
        }
    }

    fn read(&self, loc: Loc) -> i32 {
        match loc {
            Loc::Reg(r) => self.regs[r] as i32,
            Loc::Mem(address) => *self.memory.get(&address).unwrap_or(&0),
            Loc::Imm(n) => n as i32,
        }
    }

    fn write(&mut self, loc: Loc, value: i32) {
        match loc {
            Loc::Reg(r) => self.regs[r] = value as i64,
            Loc::Mem(address) => {
                self.memory.insert(address, value);
            }
            Loc::Imm(_) => panic!("cannot write to an immediate"),
        }
    }

    fn push(&mut self, value: i32) {
        self.regs[ESP] -= 4;
        let esp = self.regs[ESP];
        self.memory.insert(esp, value);
    }

    fn pop(&mut self) -> i32 {
        let esp = self.regs[ESP];
        let value = *self.memory.get(&esp).expect("pop from empty stack");
        self.regs[ESP] += 4;
        value
    }

    fn stack_arg(&self, index: i64) -> i32 {
        *self
            .memory
            .get(&(self.regs[ESP] + 4 * index))
            .expect("call argument")
    }

    fn execute(&mut self) {
        self.regs[ESP] = STACK_BASE;
        let mut pc = *self.labels.get("_main").expect("_main label");
        let mut steps = 0;

        loop {
            steps += 1;
            assert!(steps < STEP_LIMIT, "program does not terminate");
            let (op, args) = self.code.get(pc).cloned().expect("control fell off the code");
            pc += 1;
            let arg = |i: usize| args.get(i).map(String::as_str).expect("operand");
            match op.as_str() {
                "push" => {
                    let v = self.read(self.operand(arg(0)));
                    self.push(v);
                }
                "pop" => {
                    let v = self.pop();
                    let loc = self.operand(arg(0));
                    self.write(loc, v);
                }
                "mov" => {
                    let v = self.read(self.operand(arg(1)));
                    let loc = self.operand(arg(0));
                    self.write(loc, v);
                }
                "add" | "sub" => {
                    let dest = self.operand(arg(0));
                    let a = self.read(dest);
                    let b = self.read(self.operand(arg(1)));
                    let v = if op == "add" {
                        a.wrapping_add(b)
                    } else {
                        a.wrapping_sub(b)
                    };
                    self.write(dest, v);
                }
                "imul" => {
                    let m = self.read(self.operand(arg(0))) as i64;
                    let product = (self.regs[0] as i32 as i64) * m;
                    self.regs[0] = product as i32 as i64;
                    self.regs[3] = (product >> 32) as i32 as i64;
                }
                "cdq" => {
                    self.regs[3] = if (self.regs[0] as i32) < 0 { -1 } else { 0 };
                }
                "idiv" => {
                    let divisor = self.read(self.operand(arg(0)));
                    let dividend = self.regs[0] as i32;
                    self.run.dividends.push(dividend);
                    self.run.divisors.push(divisor);
                    self.regs[0] = dividend.wrapping_div(divisor) as i64;
                    self.regs[3] = dividend.wrapping_rem(divisor) as i64;
                }
                "neg" => {
                    let loc = self.operand(arg(0));
                    let v = self.read(loc);
                    self.write(loc, v.wrapping_neg());
                }
                "cmp" => {
                    let a = self.read(self.operand(arg(0)));
                    let b = self.read(self.operand(arg(1)));
                    self.flags = (a, b);
                }
                "jmp" | "je" | "jne" | "jl" | "jle" | "jg" | "jge" => {
                    let (a, b) = self.flags;
                    let taken = match op.as_str() {
                        "jmp" => true,
                        "je" => a == b,
                        "jne" => a != b,
                        "jl" => a < b,
                        "jle" => a <= b,
                        "jg" => a > b,
                        _ => a >= b,
                    };
                    if taken {
                        pc = *self.labels.get(arg(0)).expect("known label");
                    }
                }
                "call" => {
                    let target = arg(0);
                    if let Some(&address) = self.labels.get(target) {
                        self.push(pc as i32);
                        pc = address;
                    } else if self.extern_call(target) {
                        self.run.stack_balanced = self.regs[ESP] == STACK_BASE - 4;
                        return;
                    }
                }
                "leave" => {
                    self.regs[ESP] = self.regs[EBP];
                    self.regs[EBP] = self.pop() as i64;
                }
                "ret" => pc = self.pop() as usize,
                other => panic!("unknown x86 instruction {}", other),
            }
        }
    }

    /// Runs an external routine; true when the program exits
    fn extern_call(&mut self, name: &str) -> bool {
        match name {
            "_GetStdHandle@4" => {
                self.regs[0] = self.pop() as i64;
            }
            "_ExitProcess@4" => return true,
            "_WriteConsoleA@20" => {
                let address = self.stack_arg(1) as i64;
                let len = self.stack_arg(2) as usize;
                let bytes = self.strings.get(&address).expect("string data");
                assert_eq!(bytes.len(), len, "string length entry");
                self.run.output.push_str(&String::from_utf8_lossy(&bytes[..len]));
                self.regs[ESP] += 20;
                self.regs[0] = 1;
            }
            "_ReadConsoleA@20" => {
                let address = self.stack_arg(1) as i64;
                let v = self.input.pop_front().expect("input available");
                self.strings.insert(address, format!("{}\r\n", v).into_bytes());
                self.regs[ESP] += 20;
                self.regs[0] = 1;
            }
            "_vsl_print_integer" => {
                let v = self.stack_arg(0);
                self.run.output.push_str(&v.to_string());
            }
            "_vsl_parse_integer" => {
                let address = self.stack_arg(0) as i64;
                let text = String::from_utf8_lossy(&self.strings[&address]).to_string();
                self.regs[0] = text.trim().parse::<i32>().expect("integer input") as i64;
            }
            other => panic!("unknown external routine {}", other),
        }
        false
    }
}
