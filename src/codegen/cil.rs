// VSL Managed Bytecode Backend
// Emits ilasm-syntax CIL; every value is an int32 on the evaluation stack

use super::emitter::{quote, Emitter, CIL_STYLE};
use super::{
    block_depth, check_entry_point, lower_if, lower_loop_exit, lower_while, storage, unary_error,
    CodeGenerator, FlowState, LabelLowering, Storage, Target,
};
use crate::ast::*;
use crate::compiler::Resolution;
use crate::config::CodegenOptions;
use crate::error::VslResult;

pub struct CilGenerator {
    options: CodegenOptions,
}

impl CilGenerator {
    pub fn new(options: CodegenOptions) -> Self {
        Self { options }
    }
}

impl CodeGenerator for CilGenerator {
    fn target(&self) -> Target {
        Target::Cil
    }

    fn generate(&self, program: &Program, resolution: &Resolution) -> VslResult<String> {
        check_entry_point(program, &self.options)?;
        let mut writer = CilWriter {
            resolution,
            options: &self.options,
            out: Emitter::new(CIL_STYLE, self.options.comments),
            flow: FlowState::new(),
        };
        writer.program(program)?;
        Ok(writer.out.finish())
    }
}

/// `!=`, `<=` and `>=` are computed as 1 minus the opposite primitive comparison
fn is_inverted(op: Operator) -> bool {
    matches!(
        op,
        Operator::NotEqual | Operator::LessEqual | Operator::GreaterEqual
    )
}

/// Method names are quoted so that names like `add` or `ret` survive ilasm
fn method_name(name: &str) -> String {
    format!("'{}'", name)
}

fn int32_list(count: usize) -> String {
    vec!["int32"; count].join(", ")
}

struct CilWriter<'a> {
    resolution: &'a Resolution,
    options: &'a CodegenOptions,
    out: Emitter,
    flow: FlowState,
}

impl<'a> CilWriter<'a> {
    // ==================== Program Structure ====================

    fn program(&mut self, program: &Program) -> VslResult<()> {
        let ns = &self.options.namespace;
        self.out.heading("Generated by vslc");
        self.out.raw(".assembly extern mscorlib {}");
        self.out.raw(&format!(".assembly {} {{}}", ns));
        self.out.raw(&format!(".module {}.exe", ns));
        self.out.blank();
        self.out.raw(&format!(".namespace {} {{", ns));
        self.out.raw(&format!(
            "    .class public auto ansi {} extends [mscorlib]System.Object {{",
            self.options.class_name
        ));

        for function in &program.functions {
            self.function(function)?;
        }

        self.out.raw("    }");
        self.out.raw("}");
        Ok(())
    }

    fn function(&mut self, function: &Function) -> VslResult<()> {
        let name = &function.name.name;
        let locals = self.resolution.local_count(name);
        let max_stack = block_depth(&function.body, &|op| is_inverted(op) as usize, 0).max(1);

        self.out.blank();
        self.out.raw(&format!(
            "        .method public static int32 {}({}) cil managed {{",
            method_name(name),
            int32_list(function.params.len())
        ));
        if *name == self.options.entry_point {
            self.out.line(".entrypoint");
        }
        self.out.line(format!(".maxstack {}", max_stack));
        if locals > 0 {
            self.out.line(format!(".locals init ({})", int32_list(locals)));
        }

        self.block(&function.body)?;

        self.out.comment("Implicit return");
        self.out.op("ldc.i4", &[&0]);
        self.out.op("ret", &[]);
        self.out.raw("        }");
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

    // ==================== Statements ====================

    fn lower_stmt(&mut self, stmt: &Stmt) -> VslResult<()> {
        match stmt {
            Stmt::Block(block) => self.block(block),
            Stmt::Assign { target, value } => {
                self.expr(value)?;
                self.out.comment(format!("Assign to {}", target.name));
                self.store(target)
            }
            Stmt::Return { value, .. } => {
                self.expr(value)?;
                self.out.comment("Return");
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
                    self.out.comment("Print one item");
                    match item {
                        PrintItem::Expr(expr) => {
                            self.expr(expr)?;
                            self.out
                                .op("call", &[&"void [mscorlib]System.Console::Write(int32)"]);
                        }
                        PrintItem::Text(text) => {
                            self.out.op("ldstr", &[&quote(text)]);
                            self.out
                                .op("call", &[&"void [mscorlib]System.Console::Write(string)"]);
                        }
                    }
                }
                self.out.comment("Done printing");
                self.out
                    .op("call", &[&"void [mscorlib]System.Console::WriteLine()"]);
                Ok(())
            }
            Stmt::Input { targets, .. } => {
                for target in targets {
                    self.out.comment(format!("Input to {}", target.name));
                    self.out
                        .op("call", &[&"string [mscorlib]System.Console::ReadLine()"]);
                    self.out
                        .op("call", &[&"int32 [mscorlib]System.Int32::Parse(string)"]);
                    self.store(target)?;
                }
                Ok(())
            }
        }
    }

    fn store(&mut self, target: &Identifier) -> VslResult<()> {
        match storage(self.resolution, target)? {
            Storage::Local(index) => self.out.op("stloc", &[&index]),
            Storage::Param(index) => self.out.op("starg", &[&index]),
        }
        Ok(())
    }

    // ==================== Expressions ====================

    fn expr(&mut self, expr: &Expr) -> VslResult<()> {
        match expr {
            Expr::Binary {
                left, op, right, ..
            } => {
                if is_inverted(*op) {
                    self.out.comment(format!("Prepare for binary operator {}", op));
                    self.out.op("ldc.i4", &[&1]);
                }
                self.expr(left)?;
                self.expr(right)?;
                self.out.comment(format!("Binary operator {}", op));
                let ops: &[&str] = match op {
                    Operator::Equal => &["ceq"],
                    Operator::NotEqual => &["ceq", "sub"],
                    Operator::Less => &["clt"],
                    Operator::LessEqual => &["cgt", "sub"],
                    Operator::Greater => &["cgt"],
                    Operator::GreaterEqual => &["clt", "sub"],
                    Operator::Add => &["add"],
                    Operator::Sub => &["sub"],
                    Operator::Mul => &["mul"],
                    Operator::Div => &["div"],
                };
                for mnemonic in ops {
                    self.out.op(mnemonic, &[]);
                }
                Ok(())
            }
            Expr::Unary { op, operand, span } => {
                if *op != Operator::Sub {
                    return Err(unary_error(*op, *span));
                }
                self.expr(operand)?;
                self.out.comment(format!("Unary operator {}", op));
                self.out.op("neg", &[]);
                Ok(())
            }
            Expr::Call { callee, args } => {
                self.resolution.entry(callee)?;
                for arg in args {
                    self.expr(arg)?;
                }
                let signature = format!(
                    "int32 {}.{}::{}({})",
                    self.options.namespace,
                    self.options.class_name,
                    method_name(&callee.name),
                    int32_list(args.len())
                );
                self.out.comment(format!("Call function {}", callee.name));
                self.out.op("call", &[&signature]);
                Ok(())
            }
            Expr::Constant { value, .. } => {
                self.out.op("ldc.i4", &[value]);
                Ok(())
            }
            Expr::Variable { name } => {
                self.out.comment(&name.name);
                match storage(self.resolution, name)? {
                    Storage::Local(index) => self.out.op("ldloc", &[&index]),
                    Storage::Param(index) => self.out.op("ldarg", &[&index]),
                }
                Ok(())
            }
        }
    }
}

impl<'a> LabelLowering for CilWriter<'a> {
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
        self.out.op("brfalse", &[&label]);
        Ok(())
    }

    fn jump(&mut self, label: &str) {
        self.out.op("br", &[&label]);
    }
}
