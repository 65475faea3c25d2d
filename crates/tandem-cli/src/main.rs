use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use miette::{IntoDiagnostic, Result, WrapErr};
use tandem_editor_core::{
    Document, Element, KeyGenerator, Node, Operation, Text, Value,
};
use tandem_editor_crdt::{
    Coordinator, CrdtDocument, SEED_ACTOR, SnapshotEncoding, SyncConfig, codec,
};

mod config;

use config::ConfigFile;

#[derive(Parser)]
#[command(version, about = "Tandem - CRDT sync for rich-text editors", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to a .json or .toml sync config
    #[arg(long, env = "TANDEM_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Snapshot encoding, overriding the config file
    #[arg(long, value_enum, global = true)]
    encoding: Option<Encoding>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Encoding {
    Binary,
    Base64,
}

impl From<Encoding> for SnapshotEncoding {
    fn from(encoding: Encoding) -> Self {
        match encoding {
            Encoding::Binary => SnapshotEncoding::Binary,
            Encoding::Base64 => SnapshotEncoding::Base64,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Edit offline in two clients, reconnect, and show the merged result
    Demo {
        /// Number of clients
        #[arg(long, default_value_t = 2)]
        clients: usize,
    },
    /// Seed a snapshot from plain-object editor JSON
    Init {
        /// Editor value JSON
        input: PathBuf,
        /// Snapshot to write
        output: PathBuf,
        /// Actor id the seed change is attributed to
        #[arg(long, default_value_t = SEED_ACTOR.as_u64())]
        actor: u64,
    },
    /// Print a snapshot's editor JSON and clock
    Inspect {
        snapshot: PathBuf,
    },
    /// Merge saved snapshots into one
    Merge {
        #[arg(required = true, num_args = 2..)]
        inputs: Vec<PathBuf>,

        /// Snapshot to write
        #[arg(long, short)]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    init_miette();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => ConfigFile::new(path).load()?,
        None => SyncConfig::default(),
    };
    if let Some(encoding) = cli.encoding {
        config.snapshot_encoding = encoding.into();
    }

    match cli.command {
        Commands::Demo { clients } => run_demo(config, clients),
        Commands::Init {
            input,
            output,
            actor,
        } => init_snapshot(&config, input, output, actor),
        Commands::Inspect { snapshot } => inspect_snapshot(&config, snapshot),
        Commands::Merge { inputs, output } => merge_snapshots(&config, inputs, output),
    }
}

fn run_demo(config: SyncConfig, clients: usize) -> Result<()> {
    if clients < 2 {
        return Err(miette::miette!("the demo needs at least two clients"));
    }
    let value = Value::new(Document::new(vec![Node::Block(Element::new(
        "p",
        "paragraph",
        vec![Node::Text(Text::plain("t", "Hello"))],
    ))]));
    let mut coordinator: Coordinator = Coordinator::from_value(config, &value, clients).into_diagnostic()?;

    coordinator.set_online(false).into_diagnostic()?;
    println!("⚠ All clients offline");
    coordinator
        .local_edit(0, &[Operation::insert_text(vec![0, 0], 5, " world")])
        .into_diagnostic()?;
    coordinator
        .local_edit(1, &[Operation::add_mark(vec![0, 0], 0, 5, "bold")])
        .into_diagnostic()?;
    print_sessions(&coordinator)?;

    coordinator.set_online(true).into_diagnostic()?;
    println!("✓ Back online");
    print_sessions(&coordinator)?;

    if coordinator.is_converged() {
        println!("✓ Converged");
    } else {
        println!("⚠ Sessions still differ");
    }
    if let Some(session) = coordinator.session(0) {
        println!("{}", codec::value_to_json(session.value()).into_diagnostic()?);
    }
    Ok(())
}

fn print_sessions(coordinator: &Coordinator) -> Result<()> {
    for (i, session) in coordinator.sessions().iter().enumerate() {
        println!(
            "  client {i} (actor {}): {:?} clock {}",
            session.actor(),
            session.value().document.plain_text(),
            session.clock().into_diagnostic()?
        );
    }
    Ok(())
}

fn init_snapshot(config: &SyncConfig, input: PathBuf, output: PathBuf, actor: u64) -> Result<()> {
    let json = std::fs::read_to_string(&input)
        .into_diagnostic()
        .wrap_err_with(|| format!("reading {}", input.display()))?;
    let mut keys = KeyGenerator::new("init");
    let value = codec::value_from_json(&json, &mut keys).into_diagnostic()?;
    let doc = CrdtDocument::from_value(actor.into(), &value).into_diagnostic()?;
    let bytes = config.snapshot_encoding.encode(&doc).into_diagnostic()?;
    std::fs::write(&output, bytes)
        .into_diagnostic()
        .wrap_err_with(|| format!("writing {}", output.display()))?;
    println!("✓ Wrote {} (clock {})", output.display(), doc.clock());
    Ok(())
}

fn read_snapshot(config: &SyncConfig, path: &PathBuf) -> Result<CrdtDocument> {
    let bytes = std::fs::read(path)
        .into_diagnostic()
        .wrap_err_with(|| format!("reading {}", path.display()))?;
    config
        .snapshot_encoding
        .decode(&bytes, SEED_ACTOR)
        .into_diagnostic()
        .wrap_err_with(|| format!("loading {}", path.display()))
}

fn inspect_snapshot(config: &SyncConfig, snapshot: PathBuf) -> Result<()> {
    let doc = read_snapshot(config, &snapshot)?;
    let value = Value::new(doc.value().into_diagnostic()?);
    println!("{}", codec::value_to_json(&value).into_diagnostic()?);
    println!("clock {}", doc.clock());
    Ok(())
}

fn merge_snapshots(config: &SyncConfig, inputs: Vec<PathBuf>, output: PathBuf) -> Result<()> {
    let mut merged = CrdtDocument::empty(SEED_ACTOR).into_diagnostic()?;
    for input in &inputs {
        let doc = read_snapshot(config, input)?;
        merged = merged.merge(&doc).into_diagnostic()?;
    }
    let bytes = config.snapshot_encoding.encode(&merged).into_diagnostic()?;
    std::fs::write(&output, bytes)
        .into_diagnostic()
        .wrap_err_with(|| format!("writing {}", output.display()))?;
    println!(
        "✓ Merged {} snapshots into {} (clock {})",
        inputs.len(),
        output.display(),
        merged.clock()
    );
    Ok(())
}

fn init_miette() {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .with_cause_chain()
                .color(true)
                .context_lines(5)
                .tab_width(2)
                .break_words(true)
                .build(),
        )
    }))
    .expect("couldn't set the miette hook");
    miette::set_panic_hook();
}
