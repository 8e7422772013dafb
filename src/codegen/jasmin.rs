// VSL JVM Assembly Backend
// Emits Jasmin syntax; parameters and locals share one slot space

use super::emitter::{quote, Emitter, JASMIN_STYLE};
use super::{
    block_depth, check_entry_point, lower_if, lower_loop_exit, lower_while, storage, unary_error,
    CodeGenerator, FlowState, LabelLowering, Storage, Target,
};
use crate::ast::*;
use crate::compiler::Resolution;
use crate::config::CodegenOptions;
use crate::error::{VslError, VslResult};

const PRINT_STREAM: &str = "java/io/PrintStream";

pub struct JasminGenerator {
    options: CodegenOptions,
}

impl JasminGenerator {
    pub fn new(options: CodegenOptions) -> Self {
        Self { options }
    }
}

impl CodeGenerator for JasminGenerator {
    fn target(&self) -> Target {
        Target::Jasmin
    }

    fn generate(&self, program: &Program, resolution: &Resolution) -> VslResult<String> {
        check_entry_point(program, &self.options)?;
        let mut writer = JasminWriter {
            resolution,
            options: &self.options,
            out: Emitter::new(JASMIN_STYLE, self.options.comments),
            flow: FlowState::new(),
            param_count: 0,
            is_entry: false,
        };
        writer.program(program)?;
        Ok(writer.out.finish())
    }
}

/// Compare-and-branch suffix for a comparison operator
fn condition_suffix(op: Operator) -> Option<&'static str> {
    match op {
        Operator::Equal => Some("eq"),
        Operator::NotEqual => Some("ne"),
        Operator::Less => Some("lt"),
        Operator::LessEqual => Some("le"),
        Operator::Greater => Some("gt"),
        Operator::GreaterEqual => Some("ge"),
        _ => None,
    }
}

fn int_descriptor(count: usize) -> String {
    "I".repeat(count)
}

struct JasminWriter<'a> {
    resolution: &'a Resolution,
    options: &'a CodegenOptions,
    out: Emitter,
    flow: FlowState,
    /// Parameters of the current function; locals start at this slot
    param_count: usize,
    is_entry: bool,
}

impl<'a> JasminWriter<'a> {
    // ==================== Program Structure ====================

    fn program(&mut self, program: &Program) -> VslResult<()> {
        self.out.heading("Generated by vslc");
        self.out.raw(&format!(".class public {}", self.options.class_name));
        self.out.raw(".super java/lang/Object");
        self.out.blank();
        self.out.raw(".field public static scanner Ljava/util/Scanner;");

        for function in &program.functions {
            self.function(function)?;
        }
        Ok(())
    }

    fn function(&mut self, function: &Function) -> VslResult<()> {
        let name = &function.name.name;
        self.param_count = function.params.len();
        self.is_entry = *name == self.options.entry_point;

        let slots = self.param_count + self.resolution.local_count(name);
        let depth = block_depth(
            &function.body,
            &|op| op.is_comparison() as usize,
            1,
        );

        self.out.blank();
        if self.is_entry {
            self.out
                .raw(".method public static main([Ljava/lang/String;)V");
            self.out.line(format!(".limit stack {}", depth.max(3)));
            // slot 0 holds the argument array until the first local overwrites it
            self.out.line(format!(".limit locals {}", slots.max(1)));
            self.out.comment("Initialize input scanner");
            self.out.op("new", &[&"java/util/Scanner"]);
            self.out.op("dup", &[]);
            self.out
                .op("getstatic", &[&"java/lang/System/in", &"Ljava/io/InputStream;"]);
            self.out.op(
                "invokespecial",
                &[&"java/util/Scanner/<init>(Ljava/io/InputStream;)V"],
            );
            self.out.op(
                "putstatic",
                &[
                    &format!("{}/scanner", self.options.class_name),
                    &"Ljava/util/Scanner;",
                ],
            );
        } else {
            self.out.raw(&format!(
                ".method public static {}({})I",
                name,
                int_descriptor(self.param_count)
            ));
            self.out.line(format!(".limit stack {}", depth.max(1)));
            self.out.line(format!(".limit locals {}", slots));
        }

        self.block(&function.body)?;

        self.out.comment("Implicit return");
        if self.is_entry {
            self.out.op("return", &[]);
        } else {
            self.out.op("ldc", &[&0]);
            self.out.op("ireturn", &[]);
        }
        self.out.raw(".end method");
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

    fn slot(&self, ident: &Identifier) -> VslResult<usize> {
        Ok(match storage(self.resolution, ident)? {
            Storage::Param(index) => index,
            Storage::Local(index) => self.param_count + index,
        })
    }

    // ==================== Statements ====================

    fn lower_stmt(&mut self, stmt: &Stmt) -> VslResult<()> {
        match stmt {
            Stmt::Block(block) => self.block(block),
            Stmt::Assign { target, value } => {
                self.expr(value)?;
                self.out.comment(format!("Assign to {}", target.name));
                let slot = self.slot(target)?;
                self.out.op("istore", &[&slot]);
                Ok(())
            }
            Stmt::Return { value, .. } => {
                self.expr(value)?;
                self.out.comment("Return");
                if self.is_entry {
                    self.out.op("pop", &[]);
                    self.out.op("return", &[]);
                } else {
                    self.out.op("ireturn", &[]);
                }
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
                    self.out.comment("Print one item");
                    self.out
                        .op("getstatic", &[&"java/lang/System/out", &"Ljava/io/PrintStream;"]);
                    match item {
                        PrintItem::Expr(expr) => {
                            self.expr(expr)?;
                            self.out
                                .op("invokevirtual", &[&format!("{}/print(I)V", PRINT_STREAM)]);
                        }
                        PrintItem::Text(text) => {
                            self.out.op("ldc", &[&quote(text)]);
                            self.out.op(
                                "invokevirtual",
                                &[&format!("{}/print(Ljava/lang/String;)V", PRINT_STREAM)],
                            );
                        }
                    }
                }
                self.out.comment("Done printing");
                self.out
                    .op("getstatic", &[&"java/lang/System/out", &"Ljava/io/PrintStream;"]);
                self.out
                    .op("invokevirtual", &[&format!("{}/println()V", PRINT_STREAM)]);
                Ok(())
            }
            Stmt::Input { targets, .. } => {
                for target in targets {
                    self.out.comment(format!("Input to {}", target.name));
                    self.out.op(
                        "getstatic",
                        &[
                            &format!("{}/scanner", self.options.class_name),
                            &"Ljava/util/Scanner;",
                        ],
                    );
                    self.out
                        .op("invokevirtual", &[&"java/util/Scanner/nextInt()I"]);
                    let slot = self.slot(target)?;
                    self.out.op("istore", &[&slot]);
                }
                Ok(())
            }
        }
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
                let Some(negated) = op.negated() else {
                    self.expr(left)?;
                    self.expr(right)?;
                    self.out.comment(format!("Binary operator {}", op));
                    let mnemonic = match op {
                        Operator::Add => "iadd",
                        Operator::Sub => "isub",
                        Operator::Mul => "imul",
                        Operator::Div => "idiv",
                        _ => {
                            return Err(VslError::unsupported_operator(
                                format!("unsupported binary operator {}", op),
                                *span,
                            ))
                        }
                    };
                    self.out.op(mnemonic, &[]);
                    return Ok(());
                };

                // 0 stays on the stack when the comparison fails, 1 is added otherwise
                let false_label = format!("cmp_false_{}", self.flow.fresh());
                self.out.comment(format!("Prepare for binary operator {}", op));
                self.out.op("ldc", &[&0]);
                self.expr(left)?;
                self.expr(right)?;
                self.out.comment(format!("Binary operator {}", op));
                let suffix = condition_suffix(negated).ok_or_else(|| {
                    VslError::unsupported_operator(format!("{} is not a comparison", negated), *span)
                })?;
                self.out
                    .op(&format!("if_icmp{}", suffix), &[&false_label]);
                self.out.op("ldc", &[&1]);
                self.out.op("iadd", &[]);
                self.out.label(&false_label);
                Ok(())
            }
            Expr::Unary { op, operand, span } => {
                if *op != Operator::Sub {
                    return Err(unary_error(*op, *span));
                }
                self.expr(operand)?;
                self.out.comment(format!("Unary operator {}", op));
                self.out.op("ineg", &[]);
                Ok(())
            }
            Expr::Call { callee, args } => {
                self.resolution.entry(callee)?;
                for arg in args {
                    self.expr(arg)?;
                }
                let signature = format!(
                    "{}/{}({})I",
                    self.options.class_name,
                    callee.name,
                    int_descriptor(args.len())
                );
                self.out.comment(format!("Call function {}", callee.name));
                self.out.op("invokestatic", &[&signature]);
                Ok(())
            }
            Expr::Constant { value, .. } => {
                self.out.op("ldc", &[value]);
                Ok(())
            }
            Expr::Variable { name } => {
                self.out.comment(&name.name);
                let slot = self.slot(name)?;
                self.out.op("iload", &[&slot]);
                Ok(())
            }
        }
    }
}

impl<'a> LabelLowering for JasminWriter<'a> {
    fn flow(&mut self) -> &mut FlowState {
        &mut self.flow
    }

    fn out(&mut self) -> &mut Emitter {
        &mut self.out
    }

    fn stmt(&mut self, stmt: &Stmt) -> VslResult<()> {
        self.lower_stmt(stmt)
    }

    fn branch_if_false(&mut self, condition: &Expr, label: &str) -> VslResult<()> {
        self.expr(condition)?;
        self.out.op("ifeq", &[&label]);
        Ok(())
    }

    fn jump(&mut self, label: &str) {
        self.out.op("goto", &[&label]);
    }
}
