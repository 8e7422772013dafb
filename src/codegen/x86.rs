// VSL Native Backend
// Emits 32-bit x86 assembly (NASM syntax) for the Win32 console
//
// Frame layout of a function with N parameters and L locals:
//
//   [ebp + 4*(N+1-i)]   parameter i (first argument pushed first)
//   [ebp + 4]           return address
//   [ebp]               caller's ebp
//   [ebp - 4*(j+1)]     local j, j < L

use rustc_hash::FxHashMap;
use tracing::trace;

use super::emitter::{Emitter, NASM_STYLE};
use super::{
    check_entry_point, lower_if, lower_loop_exit, lower_while, storage, unary_error,
    CodeGenerator, FlowState, LabelLowering, Storage, Target,
};
use crate::ast::*;
use crate::compiler::Resolution;
use crate::config::CodegenOptions;
use crate::error::{VslError, VslResult};

const WORD: usize = 4;

/// Runtime entries linked in from the support library (cdecl)
const PRINT_INTEGER: &str = "_vsl_print_integer";
const PARSE_INTEGER: &str = "_vsl_parse_integer";

pub struct X86Generator {
    options: CodegenOptions,
}

impl X86Generator {
    pub fn new(options: CodegenOptions) -> Self {
        Self { options }
    }
}

impl CodeGenerator for X86Generator {
    fn target(&self) -> Target {
        Target::X86
    }

    fn generate(&self, program: &Program, resolution: &Resolution) -> VslResult<String> {
        check_entry_point(program, &self.options)?;
        let mut writer = NasmWriter {
            resolution,
            out: Emitter::new(NASM_STYLE, self.options.comments),
            flow: FlowState::new(),
            strings: StringTable::new(),
            param_count: 0,
        };
        writer.head(&self.options.entry_point);
        for function in &program.functions {
            writer.function(function)?;
        }
        writer.tail();
        Ok(writer.out.finish())
    }
}

/// Inverse conditional jump: taken when the comparison is false
fn jump_if_false(op: Operator) -> Option<&'static str> {
    match op {
        Operator::Equal => Some("jne"),
        Operator::NotEqual => Some("je"),
        Operator::Less => Some("jge"),
        Operator::LessEqual => Some("jg"),
        Operator::Greater => Some("jle"),
        Operator::GreaterEqual => Some("jl"),
        _ => None,
    }
}

/// Deduplicated string literals, numbered in first-use order
#[derive(Debug)]
pub(crate) struct StringTable {
    indices: FxHashMap<String, usize>,
    values: Vec<String>,
}

impl StringTable {
    /// A table holding the line terminator at index 0
    pub fn new() -> Self {
        let mut table = Self {
            indices: FxHashMap::default(),
            values: Vec::new(),
        };
        table.intern("\n");
        table
    }

    pub fn intern(&mut self, value: &str) -> usize {
        if let Some(&index) = self.indices.get(value) {
            return index;
        }
        let index = self.values.len();
        trace!(index, len = value.len(), "interned string");
        self.indices.insert(value.to_string(), index);
        self.values.push(value.to_string());
        index
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.values.iter().map(String::as_str).enumerate()
    }
}

/// Backquoted NASM string constant
fn backquote(value: &str) -> String {
    let mut quoted = String::from("`");
    for byte in value.bytes() {
        match byte {
            b'`' => quoted.push_str("\\`"),
            b'\\' => quoted.push_str("\\\\"),
            b'\n' => quoted.push_str("\\n"),
            b'\r' => quoted.push_str("\\r"),
            b'\t' => quoted.push_str("\\t"),
            0x20..=0x7e => quoted.push(byte as char),
            _ => quoted.push_str(&format!("\\x{:02x}", byte)),
        }
    }
    quoted.push('`');
    quoted
}

struct NasmWriter<'a> {
    resolution: &'a Resolution,
    out: Emitter,
    flow: FlowState,
    strings: StringTable,
    param_count: usize,
}

impl<'a> NasmWriter<'a> {
    // ==================== Program Structure ====================

    fn head(&mut self, entry_point: &str) {
        self.out.heading("Generated by vslc");
        self.out.raw("global _main");
        self.out.blank();
        for external in [
            "_GetStdHandle@4",
            "_ReadConsoleA@20",
            "_WriteConsoleA@20",
            "_ExitProcess@4",
            PRINT_INTEGER,
            PARSE_INTEGER,
        ] {
            self.out.raw(&format!("extern {}", external));
        }
        self.out.blank();
        self.out.raw("%define STDOUT_HANDLE_PARAM -11");
        self.out.raw("%define STDIN_HANDLE_PARAM -10");
        self.out.raw("%define BUFFER_SIZE 256");
        self.out.blank();
        self.out.raw("section .bss");
        self.out.raw("    numCharsRead:    resd 1");
        self.out.raw("    numCharsWritten: resd 1");
        self.out.raw("    stdInHandle:     resd 1");
        self.out.raw("    stdOutHandle:    resd 1");
        self.out.raw("    buffer:          resb BUFFER_SIZE");
        self.out.blank();
        self.out.raw("section .text");
        self.out.blank();
        self.out.label("_main");
        self.out.op("push", &[&"dword STDIN_HANDLE_PARAM"]);
        self.out.op("call", &[&"_GetStdHandle@4"]);
        self.out.op("mov", &[&"[stdInHandle]", &"eax"]);
        self.out.op("push", &[&"dword STDOUT_HANDLE_PARAM"]);
        self.out.op("call", &[&"_GetStdHandle@4"]);
        self.out.op("mov", &[&"[stdOutHandle]", &"eax"]);
        self.out.op("call", &[&format!("fun_{}", entry_point)]);
        self.out.op("push", &[&"dword 0"]);
        self.out.op("call", &[&"_ExitProcess@4"]);
    }

    fn tail(&mut self) {
        self.out.blank();
        self.out.raw("section .data");
        for (index, value) in self.strings.iter() {
            let data = format!("string_{}_data:", index);
            let len = format!("string_{}_len:", index);
            self.out
                .raw(&format!("{:<20}db {}", data, backquote(value)));
            self.out.raw(&format!("{:<20}dd {}", len, value.len()));
        }
    }

    fn function(&mut self, function: &Function) -> VslResult<()> {
        let name = &function.name.name;
        let locals = self.resolution.local_count(name);
        self.param_count = function.params.len();

        self.out.blank();
        self.out.heading(format!("Function: {}", name));
        self.out.label(&format!("fun_{}", name));
        self.out.op("push", &[&"ebp"]);
        self.out.op("mov", &[&"ebp", &"esp"]);
        if locals > 0 {
            self.out.op("sub", &[&"esp", &(WORD * locals)]);
        }

        self.block(&function.body)?;

        self.out.comment("Implicit return");
        self.out.op("mov", &[&"eax", &0]);
        self.out.op("leave", &[]);
        self.out.op("ret", &[]);
        Ok(())
    }

    fn block(&mut self, block: &Block) -> VslResult<()> {
        self.out.comment("Begin block");
        for stmt in &block.statements {
            self.stmt(stmt)?;
        }
        self.out.comment("End block");
        Ok(())
    }

    fn address(&self, ident: &Identifier) -> VslResult<String> {
        Ok(match storage(self.resolution, ident)? {
            Storage::Local(index) => format!("dword [ebp-{}]", WORD * (index + 1)),
            Storage::Param(index) => {
                format!("dword [ebp+{}]", WORD * (self.param_count + 1 - index))
            }
        })
    }

    // ==================== Statements ====================

    fn lower_stmt(&mut self, stmt: &Stmt) -> VslResult<()> {
        match stmt {
            Stmt::Block(block) => self.block(block),
            Stmt::Assign { target, value } => {
                self.expr(value)?;
                self.out.comment(format!("Assign to {}", target.name));
                let address = self.address(target)?;
                self.out.op("pop", &[&address]);
                Ok(())
            }
            Stmt::Return { value, .. } => {
                self.expr(value)?;
                self.out.comment("Return");
                self.out.op("pop", &[&"eax"]);
                self.out.op("leave", &[]);
                self.out.op("ret", &[]);
                Ok(())
            }
            Stmt::Null { null_kind, span } => lower_loop_exit(self, *null_kind, *span),
            Stmt::If {
                condition,
                then_branch,
                else_branch,
                ..
            } => lower_if(self, condition, then_branch, else_branch.as_deref()),
            Stmt::While {
                condition, body, ..
            } => lower_while(self, condition, body),
            Stmt::Print { items, .. } => {
                for item in items {
                    match item {
                        PrintItem::Expr(expr) => {
                            self.expr(expr)?;
                            self.out.comment("Print integer");
                            self.out.op("call", &[&PRINT_INTEGER]);
                            self.out.op("add", &[&"esp", &WORD]);
                        }
                        PrintItem::Text(text) => {
                            let index = self.strings.intern(text);
                            self.write_string(index, "Print string");
                        }
                    }
                }
                self.write_string(0, "Print newline");
                Ok(())
            }
            Stmt::Input { targets, .. } => {
                for target in targets {
                    self.out.comment(format!("Input to {}", target.name));
                    self.out.op("push", &[&"dword 0"]);
                    self.out.op("push", &[&"numCharsRead"]);
                    self.out.op("push", &[&"dword BUFFER_SIZE"]);
                    self.out.op("push", &[&"buffer"]);
                    self.out.op("push", &[&"dword [stdInHandle]"]);
                    self.out.op("call", &[&"_ReadConsoleA@20"]);
                    self.out.op("push", &[&"buffer"]);
                    self.out.op("call", &[&PARSE_INTEGER]);
                    self.out.op("add", &[&"esp", &WORD]);
                    let address = self.address(target)?;
                    self.out.op("mov", &[&address, &"eax"]);
                }
                Ok(())
            }
        }
    }

    fn write_string(&mut self, index: usize, comment: &str) {
        self.out.comment(comment);
        self.out.op("push", &[&"dword 0"]);
        self.out.op("push", &[&"numCharsWritten"]);
        self.out
            .op("push", &[&format!("dword [string_{}_len]", index)]);
        self.out.op("push", &[&format!("string_{}_data", index)]);
        self.out.op("push", &[&"dword [stdOutHandle]"]);
        self.out.op("call", &[&"_WriteConsoleA@20"]);
    }

    // ==================== Expressions ====================

    fn expr(&mut self, expr: &Expr) -> VslResult<()> {
        match expr {
            Expr::Binary {
                left,
                op,
                right,
                span,
            } => {
                if op.is_comparison() {
                    return Err(VslError::invalid_condition(
                        format!("comparison {} has no value on this target", op.symbol()),
                        *span,
                    )
                    .with_help("comparisons may only appear as if/while conditions"));
                }
                if *op == Operator::Div {
                    // idiv divides edx:eax by its operand; the dividend must end on top
                    self.expr(right)?;
                    self.expr(left)?;
                    self.out.comment("Binary operator Div");
                    self.out.op("pop", &[&"eax"]);
                    self.out.op("cdq", &[]);
                    self.out.op("idiv", &[&"dword [esp]"]);
                    self.out.op("mov", &[&"[esp]", &"eax"]);
                    return Ok(());
                }
                self.expr(left)?;
                self.expr(right)?;
                self.out.comment(format!("Binary operator {}", op));
                match op {
                    Operator::Add => {
                        self.out.op("pop", &[&"eax"]);
                        self.out.op("add", &[&"[esp]", &"eax"]);
                    }
                    Operator::Sub => {
                        self.out.op("pop", &[&"eax"]);
                        self.out.op("sub", &[&"[esp]", &"eax"]);
                    }
                    Operator::Mul => {
                        self.out.op("mov", &[&"edx", &0]);
                        self.out.op("pop", &[&"eax"]);
                        self.out.op("imul", &[&"dword [esp]"]);
                        self.out.op("mov", &[&"[esp]", &"eax"]);
                    }
                    _ => {
                        return Err(VslError::unsupported_operator(
                            format!("unsupported binary operator {}", op),
                            *span,
                        ))
                    }
                }
                Ok(())
            }
            Expr::Unary { op, operand, span } => {
                if *op != Operator::Sub {
                    return Err(unary_error(*op, *span));
                }
                self.expr(operand)?;
                self.out.comment(format!("Unary operator {}", op));
                self.out.op("neg", &[&"dword [esp]"]);
                Ok(())
            }
            Expr::Call { callee, args } => {
                self.resolution.entry(callee)?;
                for arg in args {
                    self.expr(arg)?;
                }
                self.out.comment(format!("Call function {}", callee.name));
                self.out.op("call", &[&format!("fun_{}", callee.name)]);
                if !args.is_empty() {
                    self.out.op("add", &[&"esp", &(WORD * args.len())]);
                }
                self.out.op("push", &[&"eax"]);
                Ok(())
            }
            Expr::Constant { value, .. } => {
                self.out.op("push", &[&format!("dword {}", value)]);
                Ok(())
            }
            Expr::Variable { name } => {
                self.out.comment(&name.name);
                let address = self.address(name)?;
                self.out.op("push", &[&address]);
                Ok(())
            }
        }
    }
}

impl<'a> LabelLowering for NasmWriter<'a> {
    fn flow(&mut self) -> &mut FlowState {
        &mut self.flow
    }

    fn out(&mut self) -> &mut Emitter {
        &mut self.out
    }

    fn stmt(&mut self, stmt: &Stmt) -> VslResult<()> {
        self.lower_stmt(stmt)
    }

    /// Conditions must be a single comparison; its inverse jump skips the guarded code.
    fn branch_if_false(&mut self, condition: &Expr, label: &str) -> VslResult<()> {
        let (left, op, right) = condition.as_comparison().ok_or_else(|| {
            VslError::invalid_condition(
                "condition must be a comparison on this target",
                condition.span(),
            )
        })?;
        let jump = jump_if_false(op).ok_or_else(|| {
            VslError::unsupported_operator(format!("{} is not a comparison", op), condition.span())
        })?;
        self.expr(left)?;
        self.expr(right)?;
        self.out.comment(format!("Compare {}", op));
        self.out.op("pop", &[&"eax"]);
        self.out.op("pop", &[&"ecx"]);
        self.out.op("cmp", &[&"ecx", &"eax"]);
        self.out.op(jump, &[&label]);
        Ok(())
    }

    fn jump(&mut self, label: &str) {
        self.out.op("jmp", &[&label]);
    }
}
