use std::path::PathBuf;
use std::process::ExitCode;

use modred_io::ModelDocument;
use modred_solver::{Diagnostics, ModalAssembly, ReductionConfig, Subassembly};
use tracing_subscriber::EnvFilter;

fn usage() {
    eprintln!("usage: modred-cli reduce <model.json> <config.json> [--dump <dir>]");
}

struct Args {
    model: PathBuf,
    config: PathBuf,
    dump: Option<PathBuf>,
}

fn parse_args(args: &[String]) -> Option<Args> {
    match args {
        [_, cmd, model, config] if cmd == "reduce" => Some(Args {
            model: model.into(),
            config: config.into(),
            dump: None,
        }),
        [_, cmd, model, config, flag, dir] if cmd == "reduce" && flag == "--dump" => Some(Args {
            model: model.into(),
            config: config.into(),
            dump: Some(dir.into()),
        }),
        _ => None,
    }
}

fn print_summary(asm: &ModalAssembly, diag: &Diagnostics) {
    let p = asm.partition();
    println!("subassembly: {}", asm.subassembly().name);
    println!("backend: {}", asm.backend_name());
    println!("boundary_items: {}", p.n_boundary_items());
    println!("internal_items: {}", p.n_internal_items());
    println!("full_coords_w: {}", p.n_full_w());
    println!("reduced_coords_w: {}", p.n_reduced_w());
    println!("modal_coords: {}", p.n_modes_coords_w);
    if let Some(freqs) = asm.retained_frequencies() {
        for (k, f) in freqs.iter().enumerate() {
            println!("mode {:>3}: {:.6e} Hz", k + 1, f);
        }
    }
    if let Some(record) = diag.last() {
        println!("constraint_norm: {:.3e}", record.constraint_norm);
        println!("kinetic_energy: {:.6e}", record.kinetic_energy);
    }
}

fn run(args: Args) -> Result<(), String> {
    let doc = ModelDocument::load(&args.model).map_err(|e| format!("model error: {e}"))?;
    let sub = Subassembly::from_document(&doc).map_err(|e| format!("model error: {e}"))?;
    let mut config = ReductionConfig::load(&args.config).map_err(|e| format!("config error: {e}"))?;
    if args.dump.is_some() {
        config.dump_dir = args.dump;
    }

    let mut diag = Diagnostics::new(config.verbose);
    let mut asm = ModalAssembly::new(sub, config).map_err(|e| format!("setup error: {e}"))?;
    asm.switch_modal_reduction_on(&mut diag)
        .map_err(|e| format!("reduction error: {e}"))?;
    print_summary(&asm, &diag);
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let Some(args) = parse_args(&args) else {
        usage();
        return ExitCode::from(2);
    };
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::from(1)
        }
    }
}
