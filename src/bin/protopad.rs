//! protopad CLI
//!
//! Create, inspect and edit protobuf messages from the terminal.

use std::fs;
use std::io::{self, IsTerminal, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use protopad::compiler::ProtocCompiler;
use protopad::editor::Editor;
use protopad::{
    build_template, parse_any, parse_text, render_text, MessageDescriptor, ProtopadConfig,
    SchemaRegistry,
};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "protopad", version)]
#[command(about = "Create protobuf files from the terminal")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file to use instead of the default one
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct TypeArgs {
    /// The protobuf message type, optionally prefixed (`prefix.TypeName`)
    #[arg(short = 't', long = "type")]
    type_name: String,

    /// The message type held by `bytes` fields, if any
    #[arg(short = 'i', long = "internal-type")]
    internal_type: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Read a JSON or protobuf message and output JSON
    Json {
        /// The file to read, or stdin if not specified
        file: Option<PathBuf>,

        /// A file to write to, or stdout if not specified
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        types: TypeArgs,
    },

    /// Read a JSON or protobuf message and output protobuf
    Proto {
        /// The file to read, or stdin if not specified
        file: Option<PathBuf>,

        /// A file to write to, or stdout if not specified
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        types: TypeArgs,
    },

    /// Create or edit a protobuf message in an editor
    Edit {
        /// An input file to start from, or a template message if not specified
        #[arg(conflicts_with_all = ["empty", "recent"])]
        file: Option<PathBuf>,

        /// Start from a completely empty message instead of the template
        #[arg(short, long, conflicts_with = "recent")]
        empty: bool,

        /// Start from the most recent edit
        #[arg(long)]
        recent: bool,

        /// The file to write to
        #[arg(short, long)]
        output: PathBuf,

        #[command(flatten)]
        types: TypeArgs,

        /// The editor command to use
        #[arg(long)]
        editor: Option<String>,
    },

    /// Register a folder of protobuf definitions
    Register {
        /// Path to a folder (searched recursively) or file of definitions
        #[arg(required_unless_present_any = ["list", "recompile"])]
        path: Option<PathBuf>,

        /// Un-register this path
        #[arg(short, long, requires = "path")]
        remove: bool,

        /// List the paths that are currently registered
        #[arg(short, long, conflicts_with_all = ["path", "recompile"])]
        list: bool,

        /// Recompile registered definitions (this happens automatically when registering)
        #[arg(short = 'c', long, conflicts_with = "path")]
        recompile: bool,
    },

    /// List every message type that can be used with --type
    Types {
        /// Only show types containing this text
        filter: Option<String>,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "warn,protopad=debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(io::stderr)
        .init();

    if let Err(e) = run(cli) {
        eprintln!("protopad: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = ProtopadConfig::load_from(cli.config.as_deref())
        .context("Failed to load configuration")?;
    let config_path = cli.config.clone().or_else(ProtopadConfig::default_path);

    match cli.command {
        Commands::Json { file, output, types } => {
            let (desc, internal) = resolve_types(&config, &types)?;
            let raw = read_input(file.as_deref())?;
            let message = parse_any(&raw, &desc, internal.as_ref())?;
            let mut text = render_text(&message, internal.as_ref(), false)?;
            text.push('\n');
            write_output(output.as_deref(), text.as_bytes())?;
        }

        Commands::Proto { file, output, types } => {
            let (desc, internal) = resolve_types(&config, &types)?;
            let raw = read_input(file.as_deref())?;
            let message = parse_any(&raw, &desc, internal.as_ref())?;
            write_output(output.as_deref(), &protopad::encode_binary(&message))?;
        }

        Commands::Edit {
            file,
            empty,
            recent,
            output,
            types,
            editor,
        } => {
            if !(io::stdin().is_terminal() && io::stdout().is_terminal()) {
                bail!(
                    "Cannot use terminal pipes with the edit command.\n\
                     Use the `file` and `--output` parameters instead."
                );
            }

            let (desc, internal) = resolve_types(&config, &types)?;
            let editor = Editor::resolve(
                editor.as_deref(),
                config.editor.command.as_deref(),
                config.scratch_file(),
            )?;

            let seed = if recent { Some(editor.scratch().to_path_buf()) } else { file };
            let base = match seed {
                Some(path) => parse_any(&read_input(Some(&path))?, &desc, internal.as_ref())?,
                None => build_template(&desc, empty),
            };
            let text = render_text(&base, internal.as_ref(), true)?;

            info!("Launching editor... (quit editor when finished)");
            let edited = editor.edit(&text)?;
            debug!("Editor done");

            let message = parse_text(&edited, &desc, internal.as_ref()).with_context(|| {
                format!("Your edit is kept in {}", editor.scratch().display())
            })?;
            write_output(Some(&output), &protopad::encode_binary(&message))?;
        }

        Commands::Register {
            path,
            remove,
            list,
            recompile,
        } => {
            if list {
                for path in &config.registry.paths {
                    println!("{}", path.display());
                }
                return Ok(());
            }

            if let Some(path) = path {
                if remove {
                    config.unregister(&path)?;
                } else if !config.register(&path) {
                    info!("{} is already registered", path.display());
                }
                let config_path = config_path
                    .context("Could not determine where to store the configuration")?;
                config
                    .save(&config_path)
                    .with_context(|| format!("Failed to save {}", config_path.display()))?;
            } else if !recompile {
                bail!("Nothing to do: pass a path, --list or --recompile");
            }

            let compiler = ProtocCompiler::new(config.registry.protoc.clone(), config.compiled_dir());
            let manifest = compiler.compile_all(&config.registry.paths)?;
            info!("Compiled {} module(s)", manifest.modules.len());
        }

        Commands::Types { filter } => {
            let registry = SchemaRegistry::load(&config.compiled_dir());
            let mut names: Vec<String> = registry
                .message_types()
                .iter()
                .map(|desc| desc.qualified_name())
                .filter(|name| filter.as_deref().map_or(true, |f| name.contains(f)))
                .collect();
            names.sort();
            for name in names {
                println!("{}", name);
            }
        }
    }

    Ok(())
}

fn resolve_types(
    config: &ProtopadConfig,
    types: &TypeArgs,
) -> anyhow::Result<(MessageDescriptor, Option<MessageDescriptor>)> {
    let registry = SchemaRegistry::load(&config.compiled_dir());
    let desc = registry.resolve(&types.type_name)?;
    let internal = types
        .internal_type
        .as_deref()
        .map(|name| registry.resolve(name))
        .transpose()?;
    Ok((desc, internal))
}

fn read_input(file: Option<&Path>) -> anyhow::Result<Vec<u8>> {
    match file {
        Some(path) => fs::read(path).with_context(|| format!("Failed to read {}", path.display())),
        None => {
            let mut raw = Vec::new();
            io::stdin()
                .read_to_end(&mut raw)
                .context("Failed to read stdin")?;
            Ok(raw)
        }
    }
}

fn write_output(file: Option<&Path>, data: &[u8]) -> anyhow::Result<()> {
    match file {
        Some(path) => {
            fs::write(path, data).with_context(|| format!("Failed to write {}", path.display()))
        }
        None => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(data)?;
            stdout.flush()?;
            Ok(())
        }
    }
}
