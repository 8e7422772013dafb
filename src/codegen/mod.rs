// VSL Code Generation
// Target selection, backend contract and shared control-flow lowering

pub mod cil;
pub mod emitter;
pub mod jasmin;
pub mod javascript;
pub mod x86;

use smallvec::SmallVec;
use std::fmt;
use std::io::Write;
use std::str::FromStr;
use tracing::debug;

use crate::ast::*;
use crate::compiler::{Resolution, SymbolEntry, SymbolKind};
use crate::config::CodegenOptions;
use crate::error::{ErrorKind, Span, VslError, VslResult};
use emitter::Emitter;

/// Selectable execution targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    Cil,
    Jasmin,
    JavaScript,
    X86,
}

impl Target {
    pub const ALL: [Target; 4] = [Target::Cil, Target::Jasmin, Target::JavaScript, Target::X86];

    pub fn name(self) -> &'static str {
        match self {
            Target::Cil => "cil",
            Target::Jasmin => "jasmin",
            Target::JavaScript => "js",
            Target::X86 => "x86",
        }
    }

    /// Conventional output file extension
    pub fn extension(self) -> &'static str {
        match self {
            Target::Cil => "il",
            Target::Jasmin => "j",
            Target::JavaScript => "js",
            Target::X86 => "asm",
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Target {
    type Err = VslError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cil" | "msil" | "stack-bytecode" => Ok(Target::Cil),
            "jasmin" | "jvm" | "jvm-style" => Ok(Target::Jasmin),
            "js" | "javascript" | "scripting" => Ok(Target::JavaScript),
            "x86" | "nasm" | "native" => Ok(Target::X86),
            _ => Err(VslError::new(
                ErrorKind::UnknownTarget,
                format!("unknown target '{}'", s),
                Span::default(),
            )
            .with_help("expected one of: cil, jasmin, js, x86")),
        }
    }
}

/// Code generation backend contract
pub trait CodeGenerator {
    fn target(&self) -> Target;

    /// Generate the whole target program for a resolved tree
    fn generate(&self, program: &Program, resolution: &Resolution) -> VslResult<String>;

    /// Generate and write to `sink`; nothing is written if generation fails
    fn generate_to(
        &self,
        program: &Program,
        resolution: &Resolution,
        sink: &mut dyn Write,
    ) -> VslResult<()> {
        let text = self.generate(program, resolution)?;
        sink.write_all(text.as_bytes())?;
        sink.flush()?;
        Ok(())
    }
}

/// Backend for `target`
pub fn generator(target: Target, options: &CodegenOptions) -> Box<dyn CodeGenerator> {
    let options = options.clone();
    match target {
        Target::Cil => Box::new(cil::CilGenerator::new(options)),
        Target::Jasmin => Box::new(jasmin::JasminGenerator::new(options)),
        Target::JavaScript => Box::new(javascript::JavaScriptGenerator::new(options)),
        Target::X86 => Box::new(x86::X86Generator::new(options)),
    }
}

/// Generate `program` for `target`
pub fn generate(
    program: &Program,
    resolution: &Resolution,
    target: Target,
    options: &CodegenOptions,
) -> VslResult<String> {
    let text = generator(target, options).generate(program, resolution)?;
    debug!(
        %target,
        functions = program.functions.len(),
        bytes = text.len(),
        "generated program"
    );
    Ok(text)
}

/// The configured entry function must exist before any text is produced
pub(crate) fn check_entry_point(program: &Program, options: &CodegenOptions) -> VslResult<()> {
    if program.function(&options.entry_point).is_some() {
        return Ok(());
    }
    Err(VslError::new(
        ErrorKind::MissingEntryPoint,
        format!("no function named '{}'", options.entry_point),
        Span::default(),
    ))
}

/// Where a resolved variable or parameter lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Storage {
    Local(usize),
    Param(usize),
}

pub(crate) fn storage(resolution: &Resolution, ident: &Identifier) -> VslResult<Storage> {
    let entry: &SymbolEntry = resolution.entry(ident)?;
    match entry.kind {
        SymbolKind::Variable => Ok(Storage::Local(entry.location)),
        SymbolKind::Parameter => Ok(Storage::Param(entry.location)),
        SymbolKind::Function => Err(VslError::undeclared(&ident.name, ident.span)
            .with_help("a function name cannot be used as a variable")),
    }
}

pub(crate) fn unary_error(op: Operator, span: Span) -> VslError {
    VslError::unsupported_operator(format!("unsupported unary operator {}", op), span)
}

/// Labels of one enclosing loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LoopLabels {
    pub condition: String,
    pub end: String,
}

impl LoopLabels {
    pub fn numbered(n: u32) -> Self {
        Self {
            condition: format!("while_condition_{}", n),
            end: format!("while_end_{}", n),
        }
    }

    pub fn target(&self, kind: NullKind) -> &str {
        match kind {
            NullKind::Continue => &self.condition,
            NullKind::Break => &self.end,
        }
    }
}

/// Label counter and enclosing-loop stack of one generation pass
#[derive(Debug, Default)]
pub(crate) struct FlowState {
    next_label: u32,
    loops: SmallVec<[LoopLabels; 4]>,
}

impl FlowState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fresh(&mut self) -> u32 {
        let n = self.next_label;
        self.next_label += 1;
        n
    }

    pub fn enter_loop(&mut self, labels: LoopLabels) {
        self.loops.push(labels);
    }

    pub fn exit_loop(&mut self) {
        self.loops.pop();
    }

    /// Innermost loop for a break/continue
    pub fn innermost(&self, kind: NullKind, span: Span) -> VslResult<&LoopLabels> {
        self.loops
            .last()
            .ok_or_else(|| VslError::no_enclosing_loop(null_keyword(kind), span))
    }
}

pub(crate) fn null_keyword(kind: NullKind) -> &'static str {
    match kind {
        NullKind::Continue => "continue",
        NullKind::Break => "break",
    }
}

/// Hooks a label-based backend supplies to the shared control-flow lowering
pub(crate) trait LabelLowering {
    fn flow(&mut self) -> &mut FlowState;
    fn out(&mut self) -> &mut Emitter;
    fn stmt(&mut self, stmt: &Stmt) -> VslResult<()>;
    /// Evaluate `condition` and jump to `label` when it is false
    fn branch_if_false(&mut self, condition: &Expr, label: &str) -> VslResult<()>;
    fn jump(&mut self, label: &str);
}

pub(crate) fn lower_if<L: LabelLowering>(
    l: &mut L,
    condition: &Expr,
    then_branch: &Stmt,
    else_branch: Option<&Stmt>,
) -> VslResult<()> {
    let n = l.flow().fresh();
    let false_label = format!("if_false_{}", n);
    let end_label = format!("if_end_{}", n);

    l.out().comment("If: condition");
    l.branch_if_false(condition, &false_label)?;
    l.out().comment("If: begin true part");
    l.stmt(then_branch)?;
    match else_branch {
        Some(else_branch) => {
            l.jump(&end_label);
            l.out().label(&false_label);
            l.out().comment("If: begin false part");
            l.stmt(else_branch)?;
            l.out().label(&end_label);
        }
        None => l.out().label(&false_label),
    }
    Ok(())
}

pub(crate) fn lower_while<L: LabelLowering>(
    l: &mut L,
    condition: &Expr,
    body: &Stmt,
) -> VslResult<()> {
    let labels = LoopLabels::numbered(l.flow().fresh());

    l.out().comment("While: condition");
    l.out().label(&labels.condition);
    l.branch_if_false(condition, &labels.end)?;
    l.out().comment("While: body");
    l.flow().enter_loop(labels.clone());
    let body_result = l.stmt(body);
    l.flow().exit_loop();
    body_result?;
    l.jump(&labels.condition);
    l.out().label(&labels.end);
    Ok(())
}

pub(crate) fn lower_loop_exit<L: LabelLowering>(
    l: &mut L,
    kind: NullKind,
    span: Span,
) -> VslResult<()> {
    let target = l.flow().innermost(kind, span)?.target(kind).to_string();
    l.out().comment(null_keyword(kind));
    l.jump(&target);
    Ok(())
}

/// Evaluation-stack slots needed by `expr`; `prepushed(op)` is how many
/// slots a backend pushes ahead of the operands of `op`.
pub(crate) fn expr_depth(expr: &Expr, prepushed: &dyn Fn(Operator) -> usize) -> usize {
    match expr {
        Expr::Binary {
            left, op, right, ..
        } => {
            let operands = expr_depth(left, prepushed).max(1 + expr_depth(right, prepushed));
            prepushed(*op) + operands
        }
        Expr::Unary { operand, .. } => expr_depth(operand, prepushed),
        Expr::Call { args, .. } => args
            .iter()
            .enumerate()
            .map(|(i, arg)| i + expr_depth(arg, prepushed))
            .max()
            .unwrap_or(0)
            .max(1),
        Expr::Constant { .. } | Expr::Variable { .. } => 1,
    }
}

/// Deepest evaluation stack of a function body. `receiver` is the number of
/// slots a print call needs below its argument.
pub(crate) fn block_depth(
    block: &Block,
    prepushed: &dyn Fn(Operator) -> usize,
    receiver: usize,
) -> usize {
    block
        .statements
        .iter()
        .map(|stmt| stmt_depth(stmt, prepushed, receiver))
        .max()
        .unwrap_or(0)
}

fn stmt_depth(stmt: &Stmt, prepushed: &dyn Fn(Operator) -> usize, receiver: usize) -> usize {
    match stmt {
        Stmt::Block(block) => block_depth(block, prepushed, receiver),
        Stmt::Assign { value, .. } => expr_depth(value, prepushed),
        Stmt::Return { value, .. } => expr_depth(value, prepushed),
        Stmt::Null { .. } => 0,
        Stmt::If {
            condition,
            then_branch,
            else_branch,
            ..
        } => {
            let branches = stmt_depth(then_branch, prepushed, receiver).max(
                else_branch
                    .as_deref()
                    .map_or(0, |e| stmt_depth(e, prepushed, receiver)),
            );
            expr_depth(condition, prepushed).max(branches)
        }
        Stmt::While {
            condition, body, ..
        } => expr_depth(condition, prepushed).max(stmt_depth(body, prepushed, receiver)),
        Stmt::Print { items, .. } => items
            .iter()
            .map(|item| match item {
                PrintItem::Expr(expr) => receiver + expr_depth(expr, prepushed),
                PrintItem::Text(_) => receiver + 1,
            })
            .max()
            .unwrap_or(0)
            .max(receiver),
        Stmt::Input { .. } => 2,
    }
}
