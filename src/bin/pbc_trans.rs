use std::fs::File;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use portable_bitcode::ir::Module;
use portable_bitcode::verify::{ErrorReporter, FunctionVerifier, ModuleVerifier, VerifierConfig};
use portable_bitcode::{ByteSource, ModuleReader};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BitcodeFormat {
    /// Legacy full-IR bitcode (not supported by this build)
    Legacy,
    /// The frozen portable dialect
    Portable,
}

/// Decode and verify a portable bitcode module
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input file, or `-` for stdin
    #[arg(default_value = "-")]
    input: String,

    /// Format of the input file
    #[arg(long, value_enum, default_value_t = BitcodeFormat::Portable)]
    bitcode_format: BitcodeFormat,

    /// Output file for the module summary (defaults to stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Decode lazily, one function body at a time
    #[arg(long)]
    streaming_bitcode: bool,

    /// Drop each function body after it has been processed
    #[arg(long)]
    reduce_memory_footprint: bool,

    /// Run the ABI verifier over the module and every function
    #[arg(long)]
    verify: bool,

    /// Make any verifier diagnostic fatal
    #[arg(long)]
    verify_fatal_errors: bool,

    /// Optimization level (accepted for driver compatibility)
    #[arg(short = 'O', default_value_t = 2, value_parser = clap::value_parser!(u8).range(0..=3))]
    opt_level: u8,

    /// Target triple to record in the module
    #[arg(long, default_value = "le32-unknown-unknown")]
    mtriple: String,

    /// Skip verification entirely
    #[arg(long)]
    disable_verify: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("pbc-trans: {message}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), String> {
    if args.bitcode_format == BitcodeFormat::Legacy {
        return Err("legacy bitcode input is not supported by this build".into());
    }

    let verify = args.verify && !args.disable_verify;
    let config = VerifierConfig::default();
    let mut reporter = if args.verify_fatal_errors {
        ErrorReporter::new().with_fatal_errors()
    } else {
        ErrorReporter::new()
    };

    let mut reader = open_reader(args)?;

    if verify {
        ModuleVerifier::new(reader.module(), config).verify(&mut reporter);
    }
    for index in 0..reader.module().functions.len() as u32 {
        reader
            .materialize(index)
            .map_err(|err| err.to_string())?;
        if verify {
            FunctionVerifier::new(reader.module(), config).verify(index, &mut reporter);
        }
        if args.reduce_memory_footprint {
            reader.dematerialize(index);
        }
    }
    reader.finish_parse().map_err(|err| err.to_string())?;

    if verify {
        let mut stderr = io::stderr();
        reporter
            .print_errors(&mut stderr)
            .map_err(|err| err.to_string())?;
        reporter
            .check_for_fatal_errors()
            .map_err(|err| err.to_string())?;
    }

    let module = reader.into_module();
    let summary = summarize(&module, args);
    match &args.output {
        Some(path) => {
            let mut file = File::create(path).map_err(|err| err.to_string())?;
            file.write_all(summary.as_bytes())
                .map_err(|err| err.to_string())?;
        }
        None => print!("{summary}"),
    }
    Ok(())
}

fn open_reader(args: &Args) -> Result<ModuleReader<'static>, String> {
    let source = if args.input == "-" {
        if args.streaming_bitcode {
            ByteSource::from_reader(io::stdin())
        } else {
            let mut data = Vec::new();
            io::stdin()
                .read_to_end(&mut data)
                .map_err(|err| err.to_string())?;
            ByteSource::from_vec(data)
        }
    } else if args.streaming_bitcode {
        let file = File::open(&args.input).map_err(|err| err.to_string())?;
        ByteSource::from_reader(file)
    } else {
        let data = std::fs::read(&args.input).map_err(|err| err.to_string())?;
        ByteSource::from_vec(data)
    };
    ModuleReader::parse_bitcode_into(source, args.mtriple.clone()).map_err(|err| err.to_string())
}

fn summarize(module: &Module, args: &Args) -> String {
    let mut out = String::new();
    out.push_str(&format!("; target triple = {}\n", module.target_triple));
    out.push_str(&format!("; data layout = {}\n", module.data_layout));
    out.push_str(&format!("; opt level = {}\n", args.opt_level));
    for global in &module.globals {
        let kind = if global.is_constant { "constant" } else { "global" };
        out.push_str(&format!(
            "@{} = {kind} {}, align {}, {} fragment(s)\n",
            global.name,
            module.types.display(global.ty),
            global.alignment,
            global.initializers.len(),
        ));
    }
    for function in &module.functions {
        let kind = if function.is_proto { "declare" } else { "define" };
        match &function.body {
            Some(body) => out.push_str(&format!(
                "{kind} @{} : {} ({} blocks, {} instructions)\n",
                function.name,
                module.types.display(function.ty),
                body.blocks.len(),
                body.inst_count(),
            )),
            None => out.push_str(&format!(
                "{kind} @{} : {}\n",
                function.name,
                module.types.display(function.ty),
            )),
        }
    }
    out
}
