// VSL Scripting Backend
// Emits JavaScript that evaluates through an explicit `stack` array

use super::emitter::{Emitter, SCRIPT_STYLE};
use super::{
    check_entry_point, null_keyword, storage, unary_error, CodeGenerator, FlowState, LoopLabels,
    Storage, Target,
};
use crate::ast::*;
use crate::compiler::Resolution;
use crate::config::CodegenOptions;
use crate::error::{VslError, VslResult};

const INPUT_PROMPT: &str = "Please enter an integer:";

pub struct JavaScriptGenerator {
    options: CodegenOptions,
}

impl JavaScriptGenerator {
    pub fn new(options: CodegenOptions) -> Self {
        Self { options }
    }
}

impl CodeGenerator for JavaScriptGenerator {
    fn target(&self) -> Target {
        Target::JavaScript
    }

    fn generate(&self, program: &Program, resolution: &Resolution) -> VslResult<String> {
        check_entry_point(program, &self.options)?;
        let mut writer = ScriptWriter {
            resolution,
            out: Emitter::new(SCRIPT_STYLE, self.options.comments),
            flow: FlowState::new(),
        };
        writer.out.heading("Generated by vslc");
        writer.out.line("var stack = [];");
        for function in &program.functions {
            writer.function(function)?;
        }
        writer.out.blank();
        writer.out.line(format!("{}();", function_name(&self.options.entry_point)));
        Ok(writer.out.finish())
    }
}

/// Prefixed so that source names never shadow `stack`, `Math` or keywords
fn function_name(name: &str) -> String {
    format!("fun_{}", name)
}

fn js_string(text: &str) -> VslResult<String> {
    serde_json::to_string(text)
        .map_err(|e| VslError::malformed(format!("cannot encode string literal: {}", e)))
}

/// Infix spelling of a binary operator
fn infix(op: Operator) -> &'static str {
    match op {
        Operator::Equal => "===",
        Operator::NotEqual => "!==",
        Operator::Less => "<",
        Operator::LessEqual => "<=",
        Operator::Greater => ">",
        Operator::GreaterEqual => ">=",
        Operator::Add => "+",
        Operator::Sub => "-",
        Operator::Mul => "*",
        Operator::Div => "/",
    }
}

struct ScriptWriter<'a> {
    resolution: &'a Resolution,
    out: Emitter,
    flow: FlowState,
}

impl<'a> ScriptWriter<'a> {
    fn function(&mut self, function: &Function) -> VslResult<()> {
        self.out.blank();
        self.out.line(format!("function {}() {{", function_name(&function.name.name)));
        self.out.indent();
        self.out.line("var locals = [];");
        self.out.line("var params = [];");
        // arguments were pushed first to last
        for index in (0..function.params.len()).rev() {
            self.out.line(format!("params[{}] = stack.pop();", index));
        }

        self.block(&function.body)?;

        self.out.comment("Implicit return");
        self.out.line("stack.push(0);");
        self.out.line("return;");
        self.out.dedent();
        self.out.line("}");
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

    fn slot(&self, ident: &Identifier) -> VslResult<String> {
        Ok(match storage(self.resolution, ident)? {
            Storage::Local(index) => format!("locals[{}]", index),
            Storage::Param(index) => format!("params[{}]", index),
        })
    }

    fn stmt(&mut self, stmt: &Stmt) -> VslResult<()> {
        match stmt {
            Stmt::Block(block) => self.block(block)?,
            Stmt::Assign { target, value } => {
                self.expr(value)?;
                self.out.comment(format!("Assign to {}", target.name));
                let slot = self.slot(target)?;
                self.out.line(format!("{} = stack.pop();", slot));
            }
            Stmt::Return { value, .. } => {
                self.expr(value)?;
                self.out.comment("Return");
                self.out.line("return;");
            }
            Stmt::Null { null_kind, span } => {
                self.flow.innermost(*null_kind, *span)?;
                self.out.line(format!("{};", null_keyword(*null_kind)));
            }
            Stmt::If {
                condition,
                then_branch,
                else_branch,
                ..
            } => {
                self.out.comment("If: condition");
                self.expr(condition)?;
                self.out.line("if (stack.pop()) {");
                self.nested(then_branch)?;
                if let Some(else_branch) = else_branch {
                    self.out.line("} else {");
                    self.nested(else_branch)?;
                }
                self.out.line("}");
            }
            Stmt::While {
                condition, body, ..
            } => {
                // continue re-enters through the condition at the top of the body
                let labels = LoopLabels::numbered(self.flow.fresh());
                self.out.comment("While");
                self.out.line("do {");
                self.out.indent();
                self.expr(condition)?;
                self.out.line("if (!stack.pop()) break;");
                self.flow.enter_loop(labels);
                let body_result = self.stmt(body);
                self.flow.exit_loop();
                body_result?;
                self.out.dedent();
                self.out.line("} while (true);");
            }
            Stmt::Print { items, .. } => {
                for item in items.iter().rev() {
                    match item {
                        PrintItem::Expr(expr) => self.expr(expr)?,
                        PrintItem::Text(text) => {
                            self.out.line(format!("stack.push({});", js_string(text)?))
                        }
                    }
                }
                let mut line = String::from("console.log(\"\"");
                for _ in items {
                    line.push_str(" + stack.pop()");
                }
                line.push_str(");");
                self.out.line(line);
            }
            Stmt::Input { targets, .. } => {
                let prompt = js_string(INPUT_PROMPT)?;
                for target in targets {
                    let slot = self.slot(target)?;
                    self.out.line(format!("{} = +prompt({});", slot, prompt));
                }
            }
        }
        Ok(())
    }

    fn nested(&mut self, stmt: &Stmt) -> VslResult<()> {
        self.out.indent();
        let result = self.stmt(stmt);
        self.out.dedent();
        result
    }

    // Right operand first: the first pop yields the left operand.
    fn expr(&mut self, expr: &Expr) -> VslResult<()> {
        match expr {
            Expr::Binary {
                left, op, right, ..
            } => {
                self.expr(right)?;
                self.expr(left)?;
                self.out.comment(format!("Binary operator {}", op));
                let code = if op.is_comparison() {
                    format!("stack.push(stack.pop() {} stack.pop() ? 1 : 0);", infix(*op))
                } else if *op == Operator::Div {
                    "stack.push(Math.floor(stack.pop() / stack.pop()));".to_string()
                } else {
                    format!("stack.push(stack.pop() {} stack.pop());", infix(*op))
                };
                self.out.line(code);
            }
            Expr::Unary { op, operand, span } => {
                if *op != Operator::Sub {
                    return Err(unary_error(*op, *span));
                }
                self.expr(operand)?;
                self.out.line("stack.push(-stack.pop());");
            }
            Expr::Call { callee, args } => {
                self.resolution.entry(callee)?;
                for arg in args {
                    self.expr(arg)?;
                }
                self.out.comment(format!("Call function {}", callee.name));
                self.out.line(format!("{}();", function_name(&callee.name)));
            }
            Expr::Constant { value, .. } => self.out.line(format!("stack.push({});", value)),
            Expr::Variable { name } => {
                let slot = self.slot(name)?;
                self.out.line(format!("stack.push({});", slot));
            }
        }
        Ok(())
    }
}
