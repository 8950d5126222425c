use clap::Parser;
use faceveil::cli::{Cli, Commands};
use faceveil::config::Config;
use faceveil::consent::filename;
use faceveil::pipeline::supervisor::Pipeline;
use log::{error, info};

fn init_logging(level: &str) {
    let filter = level.parse().unwrap_or(log::LevelFilter::Info);
    env_logger::Builder::new()
        .filter_level(filter)
        .format_timestamp_millis()
        .init();
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let path = cli.config.clone().unwrap_or_else(Config::default_path);
    let config = Config::load_or_default(&path)?.with_env_overrides();
    let config = cli.apply_overrides(config);
    config.validate()?;
    Ok(config)
}

fn list_captures(config: &Config) -> anyhow::Result<()> {
    let dir = &config.stream.capture_dir;
    if !dir.exists() {
        println!("capture directory {} does not exist", dir.display());
        return Ok(());
    }

    let mut entries: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let file_name = e.file_name().to_string_lossy().into_owned();
            filename::parse_capture_filename(&file_name).map(|parsed| (file_name, parsed))
        })
        .collect();
    entries.sort();

    for (file, parsed) in entries {
        println!("{}\t{}\t{}", parsed.name, parsed.timestamp, file);
    }
    Ok(())
}

fn run(config: Config) -> anyhow::Result<()> {
    info!("faceveil starting");
    info!("ingress: {}", config.stream.ingress_url);
    info!("egress: {}", config.stream.egress_url);
    info!("capture dir: {}", config.stream.capture_dir.display());

    let seams = faceveil::pipeline::supervisor::Seams::from_config(&config)?;
    let handle = Pipeline::new(config).start(seams)?;

    let stop = handle.stop_flag();
    ctrlc::set_handler(move || {
        info!("termination signal received, shutting down");
        stop.store(true, std::sync::atomic::Ordering::SeqCst);
    })?;

    handle.wait();
    info!("faceveil stopped");
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("faceveil: configuration error: {e:#}");
            std::process::exit(2);
        }
    };

    init_logging(&config.log.level);

    let result = match cli.command {
        Some(Commands::CheckConfig) => {
            println!("configuration OK");
            Ok(())
        }
        Some(Commands::ListCaptures) => list_captures(&config),
        Some(Commands::Run) | None => run(config),
    };

    if let Err(e) = result {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}
