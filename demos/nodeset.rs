//! `nodeset` — fold, expand, count, and set-combine NodeSet literals
//! from the command line.

use clap::Parser;
use clustershell::error::Error;
use clustershell::nodeset::NodeSet;

#[derive(Parser, Debug)]
#[command(about = "Fold, expand, and combine ClusterShell-style node sets")]
struct Args {
    /// One or more NodeSet literals, unioned together.
    nodesets: Vec<String>,

    /// Remove these nodes from the result.
    #[arg(short = 'x', long = "exclude", value_name = "NODESET")]
    exclude: Vec<String>,

    /// Intersect the result with this NodeSet.
    #[arg(short = 'i', long = "intersection", value_name = "NODESET")]
    intersection: Vec<String>,

    /// Print one host per line instead of the folded form.
    #[arg(short = 'e', long = "expand")]
    expand: bool,

    /// Print only the cardinality.
    #[arg(short = 'c', long = "count")]
    count: bool,

    /// Collapse runs of at least N evenly-spaced values into `/step`
    /// ranges when folding.
    #[arg(short = 'a', long = "autostep", value_name = "N")]
    autostep: Option<usize>,

    /// Suppress the result; only the exit code indicates success.
    #[arg(short = 'q', long = "quiet")]
    quiet: bool,

    #[arg(long, help = "Disable ANSI color output")]
    no_color: bool,
    #[arg(long, value_parser = ["error", "warn", "info", "debug", "trace"])]
    log_level: Option<String>,
}

/// Parse errors (malformed NodeSet/group literals) exit 1; usage
/// errors (nothing to do, conflicting flags) exit 2.
enum Failure {
    Parse(Error),
    Usage(String),
}

fn main() {
    let args = Args::parse();
    if let Err(e) = clustershell::logging::init_logger(args.no_color, args.log_level.as_deref()) {
        eprintln!("nodeset: failed to initialize logging: {e}");
    }

    if let Err(failure) = run(args) {
        match failure {
            Failure::Parse(e) => {
                eprintln!("nodeset: {e}");
                std::process::exit(1);
            }
            Failure::Usage(msg) => {
                eprintln!("nodeset: {msg}");
                std::process::exit(2);
            }
        }
    }
}

fn run(args: Args) -> Result<(), Failure> {
    if args.nodesets.is_empty() {
        return Err(Failure::Usage("no NodeSet given".to_string()));
    }
    if args.count && args.expand {
        return Err(Failure::Usage("-c/--count and -e/--expand are mutually exclusive".to_string()));
    }

    let mut set = NodeSet::new();
    for literal in &args.nodesets {
        set = set.union(&NodeSet::parse(literal).map_err(Failure::Parse)?).map_err(Failure::Parse)?;
    }
    for literal in &args.exclude {
        set = set.difference(&NodeSet::parse(literal).map_err(Failure::Parse)?).map_err(Failure::Parse)?;
    }
    for literal in &args.intersection {
        set = set.intersection(&NodeSet::parse(literal).map_err(Failure::Parse)?).map_err(Failure::Parse)?;
    }
    if let Some(threshold) = args.autostep {
        set.set_autostep(threshold);
    }

    if args.quiet {
        return Ok(());
    }

    if args.count {
        println!("{}", set.len());
    } else if args.expand {
        for host in set.iter() {
            println!("{host}");
        }
    } else {
        println!("{}", set.fold());
    }
    Ok(())
}
