use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tempfile::NamedTempFile;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use dpimeta::formats::{jpeg, png};
use dpimeta::{Decoded, DecodeOptions, Dpi, Format, DISPLAY_FALLBACK_DPI};

const CM_PER_INCH: f64 = 2.54;

#[derive(Parser)]
#[command(
    name = "dpimeta",
    about = "Shows and changes the DPI metadata of JPEG and PNG images.",
    version
)]
struct Cli {
    /// Log what the codec does (overrides RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the resolution stored in an image
    Info {
        /// Input file name
        file: PathBuf,

        /// Reject density chunks with a bad checksum
        #[arg(long)]
        strict: bool,

        /// List the segments or chunks preceding the image data
        #[arg(long)]
        structure: bool,

        /// Pixel dimensions (e.g. 3000x2000) used to compute the print size
        #[arg(long, value_parser = parse_pixels)]
        pixels: Option<(u32, u32)>,
    },

    /// Write a copy of an image with a new resolution
    Set {
        /// Input file name
        file: PathBuf,

        /// Horizontal resolution, also used vertically unless --vertical is given
        #[arg(short, long)]
        dpi: u32,

        /// Vertical resolution
        #[arg(long)]
        vertical: Option<u32>,

        /// Output file name (defaults to <name>_<dpi>dpi.<ext> next to the input)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn parse_pixels(s: &str) -> std::result::Result<(u32, u32), String> {
    let (w, h) = s
        .split_once(|c| c == 'x' || c == 'X')
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{}'", s))?;
    let w = w.trim().parse().map_err(|e| format!("invalid width '{}': {}", w, e))?;
    let h = h.trim().parse().map_err(|e| format!("invalid height '{}': {}", h, e))?;
    Ok((w, h))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Info { file, strict, structure, pixels } => info(&file, strict, structure, pixels),
        Commands::Set { file, dpi, vertical, output } => set(&file, dpi, vertical, output),
    }
}

fn info(file: &Path, strict: bool, structure: bool, pixels: Option<(u32, u32)>) -> Result<()> {
    let data = fs::read(file).with_context(|| format!("cannot read {}", file.display()))?;
    let format = dpimeta::identify(&data);
    let options = if strict { DecodeOptions::strict() } else { DecodeOptions::default() };
    let decoded = dpimeta::decode_dpi_with(&data, &options);

    println!("{}:", file.display());
    println!("  Format: {}", format);
    if let Some(mime) = format.mime_type() {
        println!("  MIME type: {}", mime);
    }
    println!("  Size: {}", format_size(data.len() as u64));

    match decoded {
        Decoded::Found(ref density) => {
            println!("  Resolution: {}", density.dpi);
            println!(
                "  Stored as: {}x{} {} ({:?} at offset {})",
                density.source.raw_x,
                density.source.raw_y,
                density.source.unit,
                density.source.kind,
                density.source.offset
            );
        }
        Decoded::NotFound => {
            println!("  Resolution: not set (assuming {} DPI)", DISPLAY_FALLBACK_DPI)
        }
        Decoded::Unsupported => {
            println!("  Resolution: unsupported format (assuming {} DPI)", DISPLAY_FALLBACK_DPI)
        }
    }

    if let Some((width, height)) = pixels {
        let dpi = decoded.dpi_or_fallback();
        let w_in = width as f64 / dpi.horizontal as f64;
        let h_in = height as f64 / dpi.vertical as f64;
        println!(
            "  Print size: {:.2}\" x {:.2}\" ({:.2} cm x {:.2} cm)",
            w_in,
            h_in,
            w_in * CM_PER_INCH,
            h_in * CM_PER_INCH
        );
    }

    if structure {
        print_structure(format, &data);
    }

    Ok(())
}

fn print_structure(format: Format, data: &[u8]) {
    match format {
        Format::Jpeg => {
            println!("  Segments:");
            match jpeg::segments(data) {
                Ok(walk) => {
                    for segment in walk {
                        match segment {
                            Ok(s) => println!(
                                "    {:>8}  {:<6} 0xFF{:02X}  {} bytes",
                                s.offset,
                                s.name(),
                                s.marker,
                                s.length
                            ),
                            Err(e) => println!("    error: {}", e),
                        }
                    }
                }
                Err(e) => println!("    error: {}", e),
            }
        }
        Format::Png => {
            println!("  Chunks:");
            match png::chunks(data) {
                Ok(walk) => {
                    for chunk in walk {
                        match chunk {
                            Ok(c) => println!(
                                "    {:>8}  {}  {} bytes  crc {:08x}{}",
                                c.offset,
                                c.type_str().unwrap_or("????"),
                                c.length,
                                c.stored_crc,
                                if c.crc_ok(data) { "" } else { " (mismatch)" }
                            ),
                            Err(e) => println!("    error: {}", e),
                        }
                    }
                }
                Err(e) => println!("    error: {}", e),
            }
        }
        Format::Unknown => {}
    }
}

fn set(file: &Path, dpi: u32, vertical: Option<u32>, output: Option<PathBuf>) -> Result<()> {
    let target = match Dpi::new(dpi, vertical.unwrap_or(dpi)) {
        Some(t) => t,
        None => bail!("resolution must be at least 1 DPI"),
    };

    let data = fs::read(file).with_context(|| format!("cannot read {}", file.display()))?;
    let before = dpimeta::decode_dpi(&data);
    debug!(?before, "current resolution");

    // nothing is written unless encoding succeeded as a whole
    let rewritten = dpimeta::encode_dpi(&data, target)
        .with_context(|| format!("cannot change the resolution of {}", file.display()))?;

    let output = output.unwrap_or_else(|| default_output_path(file, target.horizontal));
    write_replacing(&output, &rewritten)
        .with_context(|| format!("cannot write {}", output.display()))?;

    info!(input = %file.display(), output = %output.display(), %target, "resolution updated");
    println!(
        "{} -> {} ({}, was {})",
        file.display(),
        output.display(),
        target,
        before.dpi_or_fallback()
    );
    Ok(())
}

/// Writes `data` next to `path` first and renames it into place, so `path` is either left
/// untouched or holds the complete output.
fn write_replacing(path: &Path, data: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)?;
    Ok(())
}

/// `photo.jpg` at 300 DPI becomes `photo_300dpi.jpg`.
fn default_output_path(input: &Path, dpi: u32) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_owned());
    let name = match input.extension() {
        Some(ext) => format!("{}_{}dpi.{}", stem, dpi, ext.to_string_lossy()),
        None => format!("{}_{}dpi", stem, dpi),
    };
    input.with_file_name(name)
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.2} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pixels() {
        assert_eq!(parse_pixels("3000x2000"), Ok((3000, 2000)));
        assert_eq!(parse_pixels("640X480"), Ok((640, 480)));
        assert!(parse_pixels("640").is_err());
        assert!(parse_pixels("ax480").is_err());
    }

    #[test]
    fn test_default_output_path() {
        assert_eq!(
            default_output_path(Path::new("dir/photo.jpg"), 300),
            PathBuf::from("dir/photo_300dpi.jpg")
        );
        assert_eq!(default_output_path(Path::new("scan"), 72), PathBuf::from("scan_72dpi"));
    }

    // SOI, SOS with one component, two bytes of scan data, EOI
    const MINIMAL_JPEG: &[u8] = &[
        0xFF, 0xD8, 0xFF, 0xDA, 0x00, 0x08, 0x01, 0x01, 0x00, 0x00, 0x3F, 0x00, 0x12, 0x34,
        0xFF, 0xD9,
    ];

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<_> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_set_writes_default_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("photo.jpg");
        fs::write(&input, MINIMAL_JPEG).unwrap();

        set(&input, 300, None, None).unwrap();

        let out = fs::read(dir.path().join("photo_300dpi.jpg")).unwrap();
        assert_eq!(dpimeta::decode_dpi(&out).dpi(), Dpi::uniform(300));
        assert_eq!(fs::read(&input).unwrap(), MINIMAL_JPEG);
        assert_eq!(entries(dir.path()), ["photo.jpg", "photo_300dpi.jpg"]);
    }

    #[test]
    fn test_set_leaves_no_output_for_malformed_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("photo.jpg");
        // DQT segment claims 64 bytes but the file ends after 3
        fs::write(&input, [0xFF, 0xD8, 0xFF, 0xDB, 0x00, 0x40, 0x00, 0x01, 0x02]).unwrap();

        assert!(set(&input, 300, None, None).is_err());
        assert!(!dir.path().join("photo_300dpi.jpg").exists());
        assert_eq!(entries(dir.path()), ["photo.jpg"]);
    }

    #[test]
    fn test_set_leaves_no_output_for_unsupported_format() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("anim.gif");
        fs::write(&input, b"GIF89a\x01\x00\x01\x00\x00\x00\x00;").unwrap();

        assert!(set(&input, 300, None, None).is_err());
        assert!(!dir.path().join("anim_300dpi.gif").exists());
        assert_eq!(entries(dir.path()), ["anim.gif"]);
    }

    #[test]
    fn test_set_keeps_existing_output_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("photo.jpg");
        let output = dir.path().join("out.jpg");
        fs::write(&input, [0xFF, 0xD8, 0xFF, 0xDB, 0x00, 0x40]).unwrap();
        fs::write(&output, b"previous").unwrap();

        assert!(set(&input, 300, None, Some(output.clone())).is_err());
        assert_eq!(fs::read(&output).unwrap(), b"previous");
    }

    #[test]
    fn test_write_replacing_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.png");
        fs::write(&output, b"old contents").unwrap();

        write_replacing(&output, b"new").unwrap();
        assert_eq!(fs::read(&output).unwrap(), b"new");
        assert_eq!(entries(dir.path()), ["out.png"]);
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.00 MB");
    }
}
