//! `clubak` — read `node: line` pairs from stdin and print them back as
//! folded blocks of nodes sharing identical output, the same gathering
//! [`clustershell::msgtree`] does for a running `Task`.

use std::io::{self, BufRead};

use clap::Parser;
use clustershell::msgtree::{Mode, MsgTree};
use clustershell::nodeset::NodeSet;

#[derive(Parser, Debug)]
#[command(about = "Gather and fold line-based output keyed by node name")]
struct Args {
    /// Separator between the node name and its output line.
    #[arg(short = 's', long = "separator", default_value = ":")]
    separator: String,

    /// Print the command tree hierarchy instead of folded output blocks.
    #[arg(short = 'T', long = "trace")]
    trace: bool,

    #[arg(long, help = "Disable ANSI color output")]
    no_color: bool,
    #[arg(long, value_parser = ["error", "warn", "info", "debug", "trace"])]
    log_level: Option<String>,
}

fn main() {
    let args = Args::parse();
    if let Err(e) = clustershell::logging::init_logger(args.no_color, args.log_level.as_deref()) {
        eprintln!("clubak: failed to initialize logging: {e}");
    }

    if let Err(e) = run(args) {
        eprintln!("clubak: {e}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> clustershell::Result<()> {
    let stdin = io::stdin();
    let mode = if args.trace { Mode::Trace } else { Mode::Defer };
    let mut tree: MsgTree<String> = MsgTree::new(mode);

    for line in stdin.lock().lines() {
        let line = line.map_err(clustershell::Error::Io)?;
        let Some((node, text)) = line.split_once(args.separator.as_str()) else {
            eprintln!("clubak: skipping malformed line: {line:?}");
            continue;
        };
        tree.add(node.trim().to_string(), text.trim_start());
    }

    if args.trace {
        print_trace(&tree)?;
    } else {
        print_folded(&tree)?;
    }
    Ok(())
}

fn print_folded(tree: &MsgTree<String>) -> clustershell::Result<()> {
    let mut blocks = tree.walk();
    blocks.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then_with(|| a.0.cmp(&b.0)));

    for (message, nodes) in blocks {
        let block = NodeSet::from_names(nodes.iter().map(String::as_str))?;
        println!("{}", block.fold());
        println!("{message}");
    }
    Ok(())
}

/// Indented hierarchical rendering: one line per trie node, in
/// depth-first order, prefixed with `depth * 2` spaces and the node's
/// own child count so a reader can see where the tree branches.
fn print_trace(tree: &MsgTree<String>) -> clustershell::Result<()> {
    let mut nodes = tree.walk_trace();
    nodes.sort_by(|a, b| a.2.cmp(&b.2).then_with(|| a.0.cmp(&b.0)));

    for (line, keys, depth, n_children) in nodes {
        let indent = "  ".repeat(depth);
        if keys.is_empty() {
            println!("{indent}{line} ({n_children} children)");
        } else {
            let block = NodeSet::from_names(keys.iter().map(String::as_str))?;
            println!("{indent}{line} [{}]", block.fold());
        }
    }
    Ok(())
}
