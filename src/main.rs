use clap::Parser;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use wattle::features::Features;
use wattle::text::annotations::extract_custom_annotations;
use wattle::text::errors::{ErrorSink, TextErrors};
use wattle::text::token::TokenKind;
use wattle::text::tokenizer::Tokenizer;
use wattle::text::{desugar, read, resolve};
use wattle::{binary, valid};

#[derive(Parser)]
#[command(name = "wattle")]
#[command(about = "Compile WebAssembly text format to binary")]
struct Cli {
    /// Input .wat file
    input: PathBuf,

    /// Output path (defaults to the input with a .wasm extension)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Skip validation before writing
    #[arg(long)]
    no_validate: bool,

    /// Enable a feature (e.g. --enable simd). May be repeated.
    #[arg(long = "enable", value_name = "FEATURE")]
    enable: Vec<String>,

    /// Disable a feature. May be repeated.
    #[arg(long = "disable", value_name = "FEATURE")]
    disable: Vec<String>,

    /// Enable every recognised feature
    #[arg(long)]
    enable_all: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut features = if cli.enable_all {
        Features::all()
    } else {
        Features::default()
    };
    for (names, enabled) in [(&cli.enable, true), (&cli.disable, false)] {
        for name in names {
            if !features.set_by_name(name, enabled) {
                eprintln!("Unknown feature: {name}");
                return ExitCode::FAILURE;
            }
        }
    }

    let filename = cli.input.display().to_string();
    let source = match fs::read_to_string(&cli.input) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Error reading {filename}: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut errors = TextErrors::new();
    let mut tokenizer = Tokenizer::new(&source);
    let module = read::read_module(&mut tokenizer, features, &mut errors);
    let trailing = tokenizer.peek(0).clone();
    if trailing.kind != TokenKind::Eof {
        errors.on_error(trailing.span, format!("Expected Eof, got {}", trailing.kind));
    }

    let mut module = match module {
        Some(module) if !errors.has_error() => module,
        _ => {
            eprint!("{}", errors.render(&filename, &source));
            return ExitCode::FAILURE;
        }
    };

    resolve::resolve(&mut module, &mut errors);
    if !errors.has_error() {
        desugar::desugar(&mut module, &mut errors);
    }
    let customs = extract_custom_annotations(tokenizer.annotations(), &mut errors);
    if !cli.no_validate && !errors.has_error() {
        valid::validate(&module, features, &mut errors);
    }
    if errors.has_error() {
        eprint!("{}", errors.render(&filename, &source));
        return ExitCode::FAILURE;
    }

    let bytes = match binary::encode_with_customs(&module, &customs) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("Error encoding {filename}: {e}");
            return ExitCode::FAILURE;
        }
    };

    let output = cli
        .output
        .unwrap_or_else(|| cli.input.with_extension("wasm"));
    if let Err(e) = fs::write(&output, bytes) {
        eprintln!("Error writing {}: {e}", output.display());
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
