use camino::Utf8PathBuf;
use clap::Parser;
use color_eyre::eyre::eyre;
use owo_colors::OwoColorize;

use protein::emit::{self, Format};
use protein::node::Mapping;
use protein::overrides::{self, Override};
use protein::{node, Interpreter, ProteinError};

/// YAML-tree macro preprocessor
#[derive(Parser)]
#[command(name = "protein", version, about = "YAML-tree macro preprocessor")]
struct Cli {
    /// Input file
    input: Utf8PathBuf,

    /// Output file (stdout if omitted)
    #[arg(short, long)]
    output: Option<Utf8PathBuf>,

    /// Output format: yaml, json, toml, python (inferred from the output
    /// extension when omitted; yaml otherwise)
    #[arg(long)]
    format: Option<String>,

    /// Variable override applied to the top-level .define block; value may
    /// be YAML (repeatable)
    #[arg(long = "set", value_name = "KEY=VALUE")]
    set: Vec<String>,
}

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    if let Err(err) = color_eyre::install() {
        eprintln!("{err}");
        return 1;
    }
    protein::logging::init_standard_tracing();

    let cli = Cli::parse();
    match preprocess(&cli) {
        Ok(()) => 0,
        Err(RunError::Protein(ProteinError::Exit { code, message })) => {
            if !message.is_empty() {
                eprintln!("{message}");
            }
            code
        }
        Err(RunError::Protein(err)) => {
            let location = match err.line() {
                Some(line) => format!("{}:{}", cli.input, line),
                None => cli.input.to_string(),
            };
            eprintln!(
                "{} [{}] {}: {}",
                "error".red().bold(),
                err.label(),
                location.cyan(),
                err
            );
            2
        }
        Err(RunError::Other(err)) => {
            eprintln!("{} {:#}", "error".red().bold(), err);
            1
        }
    }
}

enum RunError {
    Protein(ProteinError),
    Other(color_eyre::Report),
}

impl From<ProteinError> for RunError {
    fn from(err: ProteinError) -> Self {
        Self::Protein(err)
    }
}

impl From<color_eyre::Report> for RunError {
    fn from(err: color_eyre::Report) -> Self {
        Self::Other(err)
    }
}

fn preprocess(cli: &Cli) -> std::result::Result<(), RunError> {
    let overrides = cli
        .set
        .iter()
        .map(|raw| Override::parse(raw))
        .collect::<protein::Result<Vec<_>>>()?;

    let source = std::fs::read_to_string(&cli.input)
        .map_err(|err| eyre!("cannot read {}: {err}", cli.input))?;
    let tree = node::parse_yaml(&source)?;
    let tree = overrides::apply(tree, &overrides)?;

    let mut interp = Interpreter::new();
    if let Some(parent) = cli.input.parent() {
        if !parent.as_str().is_empty() {
            interp.set_source_dir(parent);
        }
    }
    let rendered = interp.render(&tree)?;

    let format = resolve_format(cli)?;
    let serialized = emit::serialize(&rendered.normalized(), format, &Mapping::new())?;

    match &cli.output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_str().is_empty() {
                    std::fs::create_dir_all(parent)
                        .map_err(|err| eyre!("cannot create {parent}: {err}"))?;
                }
            }
            std::fs::write(path, &serialized)
                .map_err(|err| eyre!("cannot write {path}: {err}"))?;
            tracing::info!(path = %path, format = format.name(), "wrote output");
        }
        None => print!("{serialized}"),
    }
    Ok(())
}

fn resolve_format(cli: &Cli) -> protein::Result<Format> {
    if let Some(name) = &cli.format {
        return Format::from_name(name);
    }
    if let Some(path) = &cli.output {
        if let Some(format) = Format::from_extension(path) {
            return Ok(format);
        }
    }
    Ok(Format::Yaml)
}
