use clap::Parser;
use glob::glob;
use log::LevelFilter;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use vexel_jpeg::{log_error, log_info, log_warn, DecoderOptions, Logger, Vexel, Writer};

#[derive(Parser, Debug)]
#[clap(name = "vexel-jpeg")]
struct Cli {
    #[arg(required = true, help = "File or glob pattern of JPEG files")]
    path: String,

    #[arg(short, long, value_parser = ["ppm", "pam", "webp"], help = "Output format")]
    format: Option<String>,

    #[arg(short = 'o', long = "output-dir", help = "Output directory for converted files")]
    output_dir: Option<String>,

    #[arg(long, help = "Print the parsed headers instead of converting")]
    info: bool,

    #[arg(long, help = "Decode the image without writing to a file")]
    void: bool,

    #[arg(long, help = "Reconstruct every channel on the decoding thread")]
    single_threaded: bool,

    #[arg(long, help = "Use the scalar color conversion kernels")]
    scalar: bool,

    #[arg(short, long, help = "Enable debug logging")]
    verbose: bool,
}

fn get_files(path: &str) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let base_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let absolute_pattern = if Path::new(path).is_relative() {
        base_dir.join(path).to_string_lossy().into_owned()
    } else {
        path.to_string()
    };

    let entries = match glob(&absolute_pattern) {
        Ok(entries) => entries,
        Err(e) => {
            log_error!("Invalid glob pattern {}: {}", path, e);
            return files;
        }
    };

    for entry in entries {
        match entry {
            Ok(path) => {
                if path.is_file() {
                    files.push(path);
                }
            }
            Err(e) => log_warn!("{}", e),
        }
    }

    files
}

fn get_output_path(file: &Path, output_dir: Option<&str>, format: &str) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let file_stem = file
        .file_stem()
        .ok_or("Invalid file name")?
        .to_str()
        .ok_or("Invalid file stem")?;

    let output_path = if let Some(dir) = output_dir {
        let output_dir = Path::new(dir);

        if !output_dir.exists() {
            fs::create_dir_all(output_dir)?;
        }

        let output_dir = if output_dir.is_relative() {
            std::env::current_dir()?.join(output_dir)
        } else {
            output_dir.to_path_buf()
        };

        output_dir.join(format!("{}.{}", file_stem, format))
    } else {
        file.parent()
            .unwrap_or_else(|| Path::new("."))
            .join(format!("{}.{}", file_stem, format))
    };

    Ok(output_path)
}

fn process_file(file: &Path, cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    println!("File: {}", file.display());

    let options = DecoderOptions::default()
        .parallel_reconstruction(!cli.single_threaded)
        .simd(!cli.scalar);
    let decoder = Vexel::open(file)?.with_options(options);

    if cli.info {
        println!("{}", decoder.info()?);
        return Ok(());
    }

    let start = Instant::now();
    let image = decoder.decode()?;
    log_info!(
        "Decoded {}x{} in {:.2} ms",
        image.width(),
        image.height(),
        start.elapsed().as_secs_f64() * 1000.0
    );

    if cli.void {
        return Ok(());
    }

    let format = cli.format.as_deref().unwrap_or("webp");
    let output_path = get_output_path(file, cli.output_dir.as_deref(), format)?;

    if let Some(parent) = output_path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }

    println!("Writing to: {}", output_path.display());
    match format {
        "pam" => Writer::write_pam(&output_path, &image)?,
        "ppm" => Writer::write_ppm(&output_path, &image)?,
        _ => Writer::write_webp(&output_path, &image)?,
    }

    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    Logger::init(level)?;

    let files = get_files(&cli.path);

    if files.is_empty() {
        eprintln!("No files found matching pattern: {}", cli.path);
        return Ok(());
    }

    for file in files {
        if let Err(err) = process_file(&file, &cli) {
            eprintln!("Error processing file: {}", err);
            continue;
        }
    }

    Ok(())
}
