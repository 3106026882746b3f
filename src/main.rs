fn main() {
    use cinescrape::cli::{self, CliRunError, Settings};
    use clap::Parser;
    use std::error::Error;
    let args = cli::Args::parse();
    let result = Settings::resolve(&args).and_then(|settings| {
        let _guard = cinescrape::logging::init_logging(&settings.output_dir, args.verbose)
            .map_err(CliRunError::Logging)?;
        cli::run(&args, &settings)
    });
    if let Err(e) = result {
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
