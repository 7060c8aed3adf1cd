#![forbid(unsafe_code)]

use std::{
    fs,
    path::{Path, PathBuf},
};

use clap::{Parser, Subcommand};
use miette::{miette, IntoDiagnostic, NamedSource};

use nimbus_backend_cuda::emit_program;
use nimbus_core::{analyze_program, parallel_loop_count, Checker};

#[derive(Parser, Debug)]
#[command(name = "nimbus", version, about = "Nimbus parallelizing compiler")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Type-check, analyze for parallelism, and emit C++/CUDA sources
    Build {
        /// Input .nbs file
        path: PathBuf,

        /// Skip the parallelization analysis; every loop stays sequential
        #[arg(long)]
        sequential: bool,

        /// Directory for generated files (defaults to the input's directory)
        #[arg(long)]
        out_dir: Option<PathBuf>,

        /// Fail unless exactly this many loops were parallelized
        #[arg(long)]
        expect_parallel: Option<usize>,
    },
}

fn main() -> miette::Result<()> {
    let cli = Cli::parse();
    match cli.cmd {
        Cmd::Build {
            path,
            sequential,
            out_dir,
            expect_parallel,
        } => build(&path, sequential, out_dir.as_deref(), expect_parallel),
    }
}

fn build(
    path: &Path,
    sequential: bool,
    out_dir: Option<&Path>,
    expect_parallel: Option<usize>,
) -> miette::Result<()> {
    let src = fs::read_to_string(path)
        .map_err(|e| miette!("failed to read {}: {e}", path.display()))?;

    let source = NamedSource::new(path.display().to_string(), src.clone());

    let mut exprs =
        nimbus_parse::parse_source(&src).map_err(|e| e.with_source_code(source.clone()))?;
    Checker::new()
        .check_program(&mut exprs)
        .map_err(|e| miette::Report::new(e).with_source_code(source.clone()))?;

    let exprs = if sequential {
        exprs
    } else {
        analyze_program(exprs)
            .map_err(|e| miette::Report::new(e).with_source_code(source.clone()))?
    };

    let parallelized = parallel_loop_count(&exprs);
    if let Some(expected) = expect_parallel {
        if parallelized != expected {
            return Err(miette!(
                "expected {expected} parallelized loops but got {parallelized}"
            ));
        }
    }

    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| miette!("input path {} has no file stem", path.display()))?;

    let artifacts =
        emit_program(stem, &exprs).map_err(|e| miette::Report::new(e).with_source_code(source))?;

    let dir = match out_dir {
        Some(d) => d.to_path_buf(),
        None => path.parent().unwrap_or(Path::new(".")).to_path_buf(),
    };
    fs::create_dir_all(&dir).into_diagnostic()?;

    write_artifact(&dir, &format!("{stem}.cpp"), &artifacts.host_cpp)?;
    write_artifact(&dir, &format!("{stem}.hpp"), &artifacts.host_hpp)?;
    write_artifact(&dir, &format!("{stem}.cu"), &artifacts.device_cu)?;
    write_artifact(&dir, &format!("{stem}.cuh"), &artifacts.device_cuh)?;
    write_artifact(&dir, "Makefile", &artifacts.makefile)?;

    println!(
        "{}: {parallelized} loop(s) parallelized, output in {}",
        path.display(),
        dir.display()
    );
    Ok(())
}

fn write_artifact(dir: &Path, name: &str, contents: &str) -> miette::Result<()> {
    let target = dir.join(name);
    fs::write(&target, contents).map_err(|e| miette!("failed to write {}: {e}", target.display()))
}
