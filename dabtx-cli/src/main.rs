mod config;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use color_eyre::eyre::{eyre, Result, WrapErr};

use dabtx_core::controllable::ControllableRegistry;
use dabtx_core::eti::timestamp::TistControl;
use dabtx_core::fir::FirFilter;
use dabtx_core::flowgraph::{Flowgraph, Stage};
use dabtx_core::format_converter::{FormatConverter, SampleFormat};
use dabtx_core::input::edi::EdiReader;
use dabtx_core::input::file::FileReader;
use dabtx_core::input::tcp::TcpReader;
use dabtx_core::input::{InputReader, InputStage};
use dabtx_core::log::{LogLevel, LogRouter, StderrBackend};
use dabtx_core::modulator::{Modulator, ModulatorConfig};
use dabtx_core::ofdm::tii::TiiConfig;
use dabtx_core::predistorter::Predistorter;
use dabtx_core::resampler::Resampler;
use dabtx_core::sdr::file::OutputFile;

use config::CliConfig;

#[derive(Parser, Debug)]
#[command(author, version, about = "DAB modulator: ETI in, baseband I/Q out", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// ETI input (file, tcp://host:port or udp://:port), overrides
    /// the config file
    #[arg(short, long)]
    input: Option<String>,

    /// Output file for the samples, overrides the config file
    #[arg(short, long)]
    output: Option<String>,

    /// Restart the input file at EOF
    #[arg(short, long)]
    loop_input: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Cli::parse();

    let mut config = match &args.config {
        Some(path) => CliConfig::from_file(path)
            .wrap_err_with(|| format!("failed to load config from {}", path))?,
        None => CliConfig::default(),
    };
    if let Some(input) = args.input {
        config.input.source = input;
    }
    if let Some(output) = args.output {
        config.output.target = output;
    }
    if args.loop_input {
        config.input.loop_file = true;
    }

    let level = if args.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    let (_router, logger) = LogRouter::spawn(level, vec![Box::new(StderrBackend)]);
    let registry = ControllableRegistry::new();

    // Modulator
    let mod_config = ModulatorConfig {
        mode: config.modulator.mode,
        gain_mode: config
            .modulator
            .gain_mode
            .parse()
            .map_err(|e: String| eyre!(e))?,
        digital_gain: config.modulator.digital_gain,
        normalise_variance: config.modulator.normalise_variance,
        tii: TiiConfig {
            enable: config.tii.enable,
            comb: config.tii.comb,
            pattern: config.tii.pattern,
            old_variant: config.tii.old_variant,
        },
        window_overlap: config.modulator.window_overlap,
        tist_offset: config.modulator.tist_offset,
    };
    let modulator = Modulator::new(mod_config, dabtx_core::eti::EtiFraming::Raw)?;
    let decoder = modulator.decoder();
    registry.register(Arc::new(TistControl::new(decoder.clone())));
    registry.register(modulator.gain_control().controllable());
    if let Some(tii) = modulator.tii_controllable() {
        registry.register(tii);
    }

    // Input transport
    let reader: Box<dyn InputReader> = if let Some(addr) = config.input.source.strip_prefix("tcp://")
    {
        Box::new(TcpReader::new(addr, logger.clone()))
    } else if let Some(spec) = config.input.source.strip_prefix("udp://") {
        let port: u16 = spec
            .trim_start_matches(':')
            .parse()
            .wrap_err("EDI input needs udp://:port")?;
        Box::new(EdiReader::bind(port, decoder, logger.clone())?)
    } else {
        Box::new(FileReader::open(
            &config.input.source,
            config.input.loop_file,
        )?)
    };

    logger.info("MAIN", format!("input: {}", config.input.source));
    logger.info("MAIN", format!("output: {}", config.output.target));

    // Flowgraph wiring: input -> modulator -> [fir] -> [dpd]
    //   -> [resampler] -> format converter -> output
    let mut flowgraph = Flowgraph::new();
    let input_node = flowgraph.add_node(Stage::Input(Box::new(InputStage::new(reader))));
    let mod_node = flowgraph.add_node(Stage::Codec(Box::new(modulator)));
    flowgraph.connect(input_node, mod_node);
    let mut tail = mod_node;

    if let Some(tapsfile) = &config.firfilter.tapsfile {
        let fir = FirFilter::new(tapsfile)
            .wrap_err_with(|| format!("failed to load FIR taps from {}", tapsfile))?;
        registry.register(fir.controllable());
        let node = flowgraph.add_node(Stage::Codec(Box::new(fir)));
        flowgraph.connect(tail, node);
        tail = node;
    }

    if let Some(coeffile) = &config.poly.coeffile {
        let dpd = Predistorter::new(coeffile, config.poly.num_threads)
            .wrap_err_with(|| format!("failed to load DPD coefficients from {}", coeffile))?;
        registry.register(dpd.controllable());
        let node = flowgraph.add_node(Stage::Codec(Box::new(dpd)));
        flowgraph.connect(tail, node);
        tail = node;
    }

    if config.output.rate != 2_048_000 {
        let resampler = Resampler::new(2_048_000, config.output.rate, 1024);
        let node = flowgraph.add_node(Stage::Codec(Box::new(resampler)));
        flowgraph.connect(tail, node);
        tail = node;
    }

    let format: SampleFormat = config
        .output
        .format
        .parse()
        .map_err(|e: String| eyre!(e))?;
    let converter_node =
        flowgraph.add_node(Stage::Codec(Box::new(FormatConverter::new(format))));
    flowgraph.connect(tail, converter_node);

    let output = OutputFile::create(&config.output.target)?;
    let output_node = flowgraph.add_node(Stage::Output(Box::new(output)));
    flowgraph.connect(converter_node, output_node);

    // Ctrl-C finishes the current frame, then stops.
    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || stop.store(true, Ordering::SeqCst))?;
    }

    let mut frames = 0u64;
    loop {
        if stop.load(Ordering::SeqCst) {
            flowgraph.cancel();
        }
        match flowgraph.run() {
            Ok(true) => frames += 1,
            Ok(false) => break,
            Err(e) => {
                logger.error("MAIN", format!("pipeline stopped: {}", e));
                flowgraph.log_statistics(&logger);
                return Err(eyre!("pipeline failed: {e}"));
            }
        }
    }

    logger.info(
        "MAIN",
        format!("{} ETI frames modulated ({:.3} s)", frames, frames as f64 * 0.024),
    );
    flowgraph.log_statistics(&logger);
    Ok(())
}
