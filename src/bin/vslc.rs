// VSL CLI - Command Line Interface
// Usage: vslc <TREE.json> [OPTIONS]

use clap::Parser;
use colored::*;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::Level;

use vsl_core::ast::Program;
use vsl_core::codegen::{self, Target};
use vsl_core::compiler::{symbol_listing, Compiler};
use vsl_core::config::Config;

/// vslc - VSL compiler back end
#[derive(Parser)]
#[command(name = "vslc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Compile a VSL syntax tree to CIL, Jasmin, JavaScript or x86", long_about = None)]
struct Cli {
    /// Syntax tree produced by the front end (JSON)
    file: PathBuf,

    /// Target: cil, jasmin, js, x86 (and aliases)
    #[arg(short = 't', long = "target")]
    target: Option<String>,

    /// Output path (stdout when omitted)
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Project configuration file (default: nearest vsl.json)
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Resolve names only, generate nothing
    #[arg(long = "check")]
    check: bool,

    /// Leave explanatory comments out of the generated code
    #[arg(long = "no-comments")]
    no_comments: bool,

    /// Print the resolved symbol bindings
    #[arg(long = "symbols")]
    symbols: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,

    /// Log as JSON lines
    #[arg(long = "log-json")]
    log_json: bool,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json);

    if let Err(e) = run(&cli) {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: u8, json: bool) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let builder = tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_target(false)
        .with_level(true)
        .with_max_level(level);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn run(cli: &Cli) -> Result<(), String> {
    let file_name = cli.file.to_string_lossy().to_string();
    let config = load_config(cli)?;

    // Target is validated before any other work
    let target = match &cli.target {
        Some(name) => Some(name.parse::<Target>()),
        None => config.target().transpose(),
    }
    .transpose()
    .map_err(|e| e.format(&file_name))?
    .unwrap_or(Target::Cil);

    let json = fs::read_to_string(&cli.file)
        .map_err(|e| format!("Error reading file '{}': {}", cli.file.display(), e))?;
    let program = Program::from_json(&json).map_err(|e| e.format(&file_name))?;

    let mut options = config.codegen.clone();
    if cli.no_comments {
        options.comments = false;
    }
    let compiler = Compiler::new(&file_name, options);

    let resolution = compiler.check(&program).map_err(|e| e.format(&file_name))?;
    if cli.symbols {
        print!("{}", symbol_listing(&program, &resolution));
    }
    if cli.check {
        eprintln!("{} No errors found in {}", "✓".green(), cli.file.display());
        return Ok(());
    }

    let text = codegen::generate(&program, &resolution, target, compiler.options())
        .map_err(|e| e.format(&file_name))?;

    match cli.output.as_ref().or(config.output.as_ref()) {
        Some(path) => {
            fs::write(path, &text)
                .map_err(|e| format!("Error writing file '{}': {}", path.display(), e))?;
            eprintln!(
                "{} Compiled {} -> {} ({})",
                "✓".green(),
                cli.file.display(),
                path.display(),
                target
            );
        }
        None => {
            let mut stdout = io::stdout().lock();
            stdout
                .write_all(text.as_bytes())
                .map_err(|e| format!("Error writing output: {}", e))?;
        }
    }
    Ok(())
}

fn load_config(cli: &Cli) -> Result<Config, String> {
    let path = match &cli.config {
        Some(path) => Some(path.clone()),
        None => {
            let dir = cli.file.parent().unwrap_or_else(|| Path::new("."));
            let dir = if dir.as_os_str().is_empty() {
                Path::new(".")
            } else {
                dir
            };
            Config::discover(dir)
        }
    };
    match path {
        Some(path) => Config::load(&path).map_err(|e| e.format(&path.to_string_lossy())),
        None => Ok(Config::default()),
    }
}
