//! CLI for the rbug remote graphics debugger.

#![allow(
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::missing_docs_in_private_items
)]

use std::cell::RefCell;
use std::rc::Rc;

use anyhow::{Context as _, Result};
use clap::{Args, Parser, Subcommand};
use rbug::{Model, NodeId, ObjectKind, Session, ShaderState, TextureData, TextureInfo, context};
use rbug_proto::{DRAW_BLOCK_AFTER, DRAW_BLOCK_BEFORE, DRAW_BLOCK_RULE};
use serde::Serialize;

#[derive(Parser)]
#[command(
    name = "rbug",
    version,
    about = "Remote debugger for rbug-enabled graphics drivers"
)]
struct Cli {
    /// Host running the rbug-enabled driver.
    #[arg(default_value = "localhost")]
    host: String,

    /// First port probed; drivers bind the first free port at or above it.
    #[arg(long, default_value_t = rbug::DEFAULT_PORT)]
    port: u16,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Dump the driver's object tree.
    Dump {
        /// Output format.
        #[arg(long, default_value = "table")]
        format: OutputFormat,
    },

    /// Dump the tree, then print draw-blocked notifications until the
    /// driver goes away.
    Watch,

    /// Install a draw-call block on a context.
    Block(BlockArgs),

    /// Step a blocked context past the current draw call.
    Step(BlockArgs),

    /// Remove a draw-call block from a context.
    Unblock(BlockArgs),

    /// Flush a context's queued commands.
    Flush {
        /// Target context id.
        context: u64,
    },
}

/// Target selection shared by the draw-blocking commands.
#[derive(Args)]
struct BlockArgs {
    /// Target context id.
    context: u64,

    /// Act on the after-execution block instead of before.
    #[arg(long)]
    after: bool,

    /// Act on the rule-matching block.
    #[arg(long)]
    rule: bool,
}

impl BlockArgs {
    fn mask(&self) -> u32 {
        let mut mask = 0;
        if self.after {
            mask |= DRAW_BLOCK_AFTER;
        }
        if self.rule {
            mask |= DRAW_BLOCK_RULE;
        }
        if mask == 0 {
            mask = DRAW_BLOCK_BEFORE;
        }
        mask
    }
}

/// Output format for `dump`.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
enum OutputFormat {
    /// Human-readable indented tree.
    #[default]
    Table,
    /// Machine-readable JSON.
    Json,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("rbug: {e:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let tree = TreeModel::default();
    let mut session = Session::connect(&cli.host, cli.port, Box::new(tree.clone()))
        .with_context(|| format!("connecting to {}", cli.host))?;
    if let Some((host, port)) = session.peer() {
        tracing::info!(host, port, "connected");
    }

    match cli.command {
        Command::Dump { format } => dump(&mut session, &tree, format),
        Command::Watch => watch(&mut session, &tree),
        Command::Block(args) => Ok(context::draw_block(&mut session, args.context, args.mask())?),
        Command::Step(args) => Ok(context::draw_step(&mut session, args.context, args.mask())?),
        Command::Unblock(args) => {
            Ok(context::draw_unblock(&mut session, args.context, args.mask())?)
        }
        Command::Flush { context: ctx } => Ok(context::flush(&mut session, ctx)?),
    }
}

fn dump(session: &mut Session, tree: &TreeModel, format: OutputFormat) -> Result<()> {
    session.refresh()?;
    session.settle()?;
    match format {
        OutputFormat::Table => tree.print_table(),
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&*tree.tree.borrow())?);
        }
    }
    Ok(())
}

fn watch(session: &mut Session, tree: &TreeModel) -> Result<()> {
    session.refresh()?;
    session.settle()?;
    tree.print_table();

    #[cfg(unix)]
    session.run()?;
    #[cfg(not(unix))]
    while session.pump().is_ok() {}
    Ok(())
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Model that accumulates the object tree for printing.
#[derive(Clone, Default)]
struct TreeModel {
    tree: Rc<RefCell<Tree>>,
}

#[derive(Default, Serialize)]
struct Tree {
    nodes: Vec<Node>,
}

#[derive(Serialize)]
struct Node {
    kind: &'static str,
    object: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    texture: Option<TextureDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    shader: Option<ShaderDetail>,
}

#[derive(Serialize)]
struct TextureDetail {
    width: u32,
    height: u32,
    depth: u32,
    format: u32,
}

#[derive(Serialize)]
struct ShaderDetail {
    disabled: bool,
    original_tokens: usize,
    replaced_tokens: usize,
}

impl TreeModel {
    fn print_table(&self) {
        let tree = self.tree.borrow();
        print_children(&tree, None, 0);
    }
}

fn print_children(tree: &Tree, parent: Option<u64>, depth: usize) {
    for (i, node) in tree.nodes.iter().enumerate() {
        if node.parent != parent {
            continue;
        }
        let indent = "  ".repeat(depth);
        let mut line = format!("{indent}{} {}", node.kind, node.object);
        if let Some(t) = &node.texture {
            line.push_str(&format!(
                "  {}x{}x{} format {}",
                t.width, t.height, t.depth, t.format
            ));
        }
        if let Some(s) = &node.shader {
            line.push_str(&format!("  {} tokens", s.original_tokens));
            if s.replaced_tokens > 0 {
                line.push_str(&format!(", {} replaced", s.replaced_tokens));
            }
            if s.disabled {
                line.push_str(", disabled");
            }
        }
        println!("{line}");
        print_children(tree, Some(i as u64), depth + 1);
    }
}

fn kind_name(kind: ObjectKind) -> &'static str {
    match kind {
        ObjectKind::Screen => "screen",
        ObjectKind::Context => "context",
        ObjectKind::Texture => "texture",
        ObjectKind::Shader => "shader",
    }
}

impl Model for TreeModel {
    fn clear(&mut self) {
        self.tree.borrow_mut().nodes.clear();
    }

    fn add_node(&mut self, parent: Option<NodeId>, kind: ObjectKind, object: u64) -> NodeId {
        let mut tree = self.tree.borrow_mut();
        let id = NodeId(tree.nodes.len() as u64);
        tree.nodes.push(Node {
            kind: kind_name(kind),
            object,
            parent: parent.map(|p| p.0),
            texture: None,
            shader: None,
        });
        id
    }

    fn texture_info(&mut self, node: NodeId, info: &TextureInfo) {
        if let Some(n) = self.tree.borrow_mut().nodes.get_mut(node.0 as usize) {
            n.texture = Some(TextureDetail {
                width: info.width,
                height: info.height,
                depth: info.depth,
                format: info.format,
            });
        }
    }

    fn texture_data(&mut self, _node: NodeId, _data: &TextureData) {
        // The CLI never starts pixel downloads.
    }

    fn shader_info(&mut self, node: NodeId, state: &ShaderState) {
        if let Some(n) = self.tree.borrow_mut().nodes.get_mut(node.0 as usize) {
            n.shader = Some(ShaderDetail {
                disabled: state.disabled,
                original_tokens: state.original.len(),
                replaced_tokens: state.replaced.len(),
            });
        }
    }

    fn draw_blocked(&mut self, context: u64, mask: u32) {
        println!("context {context} blocked (mask {mask:#x})");
    }

    fn connection_lost(&mut self) {
        eprintln!("connection closed");
    }
}
