//! `rh`: print the paths whose entries satisfy a C-like expression.

use clap::Parser;
use rh::{
    Candidate, Engine, FollowMode, Limits, Order, RhError, Search, SearchError, SearchOptions, Source, SymbolKind,
};
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rh", version)]
#[command(about = "Find files using C-like expressions", long_about = None)]
struct Cli {
    /// Expression to evaluate for every entry
    #[arg(short = 'e', value_name = "EXPR")]
    expr: Option<String>,

    /// Read expressions from FILE (`-` for stdin), before -e
    #[arg(short = 'f', value_name = "FILE")]
    file: Option<PathBuf>,

    /// Do not recurse below the starting paths
    #[arg(short = 'r')]
    no_recurse: bool,

    /// Minimum depth of visited entries
    #[arg(short = 'm', value_name = "N")]
    min_depth: Option<usize>,

    /// Maximum depth of evaluated entries
    #[arg(short = 'M', value_name = "N")]
    max_depth: Option<usize>,

    /// Evaluate directories after their contents
    #[arg(short = 'D')]
    depth_first: bool,

    /// Follow all symbolic links
    #[arg(short = 'L')]
    follow: bool,

    /// Follow symbolic links named on the command line
    #[arg(short = 'H')]
    follow_args: bool,

    /// Stay on the filesystem of each starting path
    #[arg(short = 'X')]
    single_filesystem: bool,

    /// Report broken symbolic links
    #[arg(short = 'v')]
    verbose: bool,

    /// Dump the compiled program to stderr
    #[arg(short = 'd')]
    dump: bool,

    /// List the built-in symbols and exit
    #[arg(long)]
    symbols: bool,

    /// Starting paths
    #[arg(value_name = "PATH", default_value = ".")]
    paths: Vec<PathBuf>,
}

impl Cli {
    fn search_options(&self) -> SearchOptions {
        let follow = if self.follow {
            FollowMode::Always
        } else if self.follow_args {
            FollowMode::Args
        } else {
            FollowMode::Never
        };
        let max_depth = if self.no_recurse { Some(1) } else { self.max_depth };
        SearchOptions::builder()
            .min_depth(self.min_depth.unwrap_or(0))
            .max_depth(max_depth.unwrap_or(usize::MAX))
            .order(if self.depth_first { Order::PostOrder } else { Order::PreOrder })
            .follow(follow)
            .single_filesystem(self.single_filesystem)
            .report_broken_symlinks(self.verbose)
            .build()
    }
}

fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_env("RH_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).with_writer(io::stderr).init();

    match run(&cli) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(err) => {
            eprintln!("rh: {}", err);
            std::process::exit(1);
        }
    }
}

fn print_symbols(engine: &Engine) {
    let symbols = engine.symbols();
    for sym in symbols.builtins() {
        match sym.kind {
            SymbolKind::Number(value) => println!("{:<10} {:<10} {}", sym.name, sym.kind.describe(), value),
            _ => println!("{:<10} {}", sym.name, sym.kind.describe()),
        }
    }
    for sym in symbols.suffixes() {
        println!(".{:<9} {}", sym.name, sym.kind.describe());
    }
}

/// Returns whether the search succeeded.
fn run(cli: &Cli) -> Result<bool, RhError> {
    let mut engine = Engine::with_limits(Limits::from_env());
    if cli.symbols {
        print_symbols(&engine);
        return Ok(true);
    }

    if let Some(file) = &cli.file {
        let source = if file.as_os_str() == "-" {
            Source::from_reader("stdin", io::stdin().lock())
        } else {
            Source::from_path(file)
        };
        let source = source.map_err(|source| RhError::Io { name: file.display().to_string(), source })?;
        engine.compile(source)?;
    }
    if let Some(expr) = &cli.expr {
        engine.compile(Source::new("command line", expr.as_bytes()))?;
    }
    if engine.start_pc().is_none() {
        engine.compile(Source::new("default", "1"))?;
    }
    if cli.dump {
        eprint!("{}", engine.program());
    }
    let predicate = engine.finish()?;

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let mut print = |candidate: &Candidate| -> io::Result<()> {
        out.write_all(candidate.path())?;
        out.write_all(b"\n")
    };
    let summary = Search::new(&predicate, cli.search_options())
        .on_error(|err: &SearchError| eprintln!("rh: {}", err))
        .run(&cli.paths, &mut print)?;
    out.flush().map_err(|source| RhError::Io { name: "stdout".to_string(), source })?;

    Ok(summary.success())
}
