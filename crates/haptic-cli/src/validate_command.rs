//! `haptic validate` - offline execution of embedded validation tests

use std::path::PathBuf;

use clap::Args;
use tracing::debug;

use haptic_config::Config;
use haptic_validation::{HaproxyCheck, OutputFormat, TestRunner};

#[derive(Args)]
pub(crate) struct ValidateArgs {
    /// Config file to load
    #[arg(short = 'f', long = "file")]
    file: PathBuf,

    /// Run only the named test
    #[arg(long)]
    test: Option<String>,

    /// Verbosity: 0 warn, 1 info, 2 debug
    #[arg(long, env = "VERBOSE", default_value_t = 1)]
    verbose: u8,

    /// Write each test's rendered output below this directory
    #[arg(long)]
    dump_rendered: Option<PathBuf>,

    /// Print the template render trace after the run
    #[arg(long)]
    trace_templates: bool,

    /// List the registered custom filters and exit
    #[arg(long)]
    debug_filters: bool,

    /// Worker count; 1 forces sequential execution, 0 means one per CPU
    #[arg(long, default_value_t = 0)]
    workers: usize,

    /// HAProxy binary used for syntax checks
    #[arg(long, default_value = "haproxy")]
    haproxy_binary: PathBuf,

    /// Output format
    #[arg(short = 'o', long = "output", default_value = "summary")]
    output: String,
}

pub(crate) async fn execute(args: ValidateArgs) -> anyhow::Result<()> {
    let filter = match args.verbose {
        0 => "haptic=warn",
        1 => "haptic=info",
        _ => "haptic=debug",
    };
    crate::init_tracing(filter);

    let format = OutputFormat::parse(&args.output)?;
    let config = Config::from_file(&args.file)?;
    debug!(file = %args.file.display(), tests = config.validation_tests.len(), "config loaded");

    let mut runner = TestRunner::new(config)?
        .with_workers(args.workers)
        .with_haproxy(HaproxyCheck::new(args.haproxy_binary));
    if let Some(dir) = args.dump_rendered {
        runner = runner.with_dump_dir(dir);
    }

    if args.debug_filters {
        println!("registered filters:");
        for name in runner.filter_names() {
            println!("  {name}");
        }
        return Ok(());
    }

    if args.trace_templates {
        runner.enable_tracing();
    }

    let results = runner.run_tests(args.test.as_deref()).await?;

    if args.trace_templates {
        eprintln!("{}", runner.take_trace_output());
    }

    println!("{}", results.render(format)?);

    if !results.all_passed() {
        std::process::exit(1);
    }
    Ok(())
}
