use tracing_subscriber::EnvFilter;

fn init_tracing(quiet: bool, verbose: bool) {
    let default = if verbose {
        "substack2kindle=debug"
    } else if quiet {
        "warn"
    } else {
        "substack2kindle=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    use clap::Parser;
    use std::error::Error;
    let _ = dotenvy::dotenv();
    let args = substack2kindle::cli::Args::parse();
    init_tracing(args.quiet, args.verbose);
    if let Err(e) = substack2kindle::cli::run(&args) {
        eprintln!("{}", e);
        if args.verbose {
            let mut source = e.source();
            while let Some(s) = source {
                eprintln!("  cause: {}", s);
                source = s.source();
            }
        }
        std::process::exit(e.exit_code());
    }
}
