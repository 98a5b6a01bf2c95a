//! This is the main entry point for the volume browser.
//!
//! The program provides an interactive command-line interface for browsing FAT32
//! and NTFS disk images read-only. Users can open an image, print its layout,
//! walk its directories, print files and scan an NTFS Master File Table.

use fs_forensics::commands::Command;
use fs_forensics::ntfs::{CancelToken, ScanOptions};
use fs_forensics::traits::LayoutDisplay;
use fs_forensics::utils::{describe_attributes, hex_dump};
use fs_forensics::{
    Explorer, FileContent, FsEntry, NameMatch, Volume, VolumeEntry, VolumeError, VolumeOptions,
};
use log::{error, info, warn};
use std::{
    fs::File,
    io::{self, Write},
    path::Path,
};

/// Represents the runtime state of the program.
///
/// This struct keeps track of the currently opened volume and the options
/// applied to volumes opened afterwards.
struct RunState {
    /// The currently opened volume.
    volume: Option<Volume<File>>,
    /// Options for the next `open`
    options: VolumeOptions,
    /// Worker threads for MFT scans, `None` for automatic
    scan_threads: Option<usize>,
}

/// Suggests an application for content this tool does not print.
fn suggested_viewer(path: &str) -> &'static str {
    let extension = path.rsplit('.').next().unwrap_or_default().to_ascii_lowercase();
    match extension.as_str() {
        "pptx" => "PowerPoint",
        "docx" | "doc" => "Word Processor",
        "xlsx" | "csv" => "Spreadsheet Software",
        "json" => "Text Editor or JSON Viewer",
        "pdf" => "PDF Reader",
        "jpg" | "jpeg" | "png" => "Image Viewer",
        "mp3" => "Audio Player",
        "mp4" => "Video Player",
        _ => "Unknown app",
    }
}

fn main() {
    if let Err(err) = stderrlog::new()
        .module(module_path!())
        .module("fs_forensics")
        .verbosity(2)
        .init()
    {
        eprintln!("Cannot initialise logging: {err}");
    }

    let mut run_state = RunState {
        volume: None,
        options: VolumeOptions {
            validate: true,
            lookup: NameMatch::Exact,
        },
        scan_threads: None,
    };

    loop {
        print!("> ");
        if io::stdout().flush().is_err() {
            break;
        }

        let mut s = String::new();
        match io::stdin().read_line(&mut s) {
            Ok(0) => break,
            Ok(_) => {}
            Err(err) => {
                error!("Failed to read command: {err}");
                break;
            }
        }

        match Command::from_string(&s) {
            Command::Quit => break,
            Command::Open(path, offset) => {
                match Volume::open_with(Path::new(&path), offset, run_state.options) {
                    Ok(volume) => {
                        info!("Opened {} volume {path}", volume.kind());
                        run_state.volume = Some(volume);
                    }
                    Err(err) => error!("{err}"),
                }
            }
            Command::Case => {
                run_state.options.lookup = match run_state.options.lookup {
                    NameMatch::Exact => NameMatch::IgnoreAsciiCase,
                    NameMatch::IgnoreAsciiCase => NameMatch::Exact,
                };
                if let Some(volume) = run_state.volume.as_mut() {
                    volume.set_lookup(run_state.options.lookup);
                }
                println!("Path lookup: {:?}", run_state.options.lookup);
            }
            Command::Skip => {
                run_state.options.validate = !run_state.options.validate;
                println!("BPB validation: {}", run_state.options.validate);
            }
            Command::Threads(nb) => {
                run_state.scan_threads = (nb > 0).then_some(nb);
                println!("Scan threads: {}", if nb == 0 { "auto".to_string() } else { nb.to_string() });
            }
            Command::Unknown(s) => error!("Unknown command: {s:?}"),
            Command::Invalid(s) => error!("{s}"),
            Command::Empty => {}
            cmd => match run_state.volume.as_mut() {
                Some(volume) => {
                    if let Err(err) = run_volume_command(volume, cmd, run_state.scan_threads) {
                        error!("{err}");
                    }
                }
                None => warn!("Open a disk image first"),
            },
        }
    }
}

/// Runs a command that needs an open volume.
fn run_volume_command(
    volume: &mut Volume<File>,
    cmd: Command,
    scan_threads: Option<usize>,
) -> Result<(), VolumeError> {
    match cmd {
        Command::Info => match volume.display_layout(3) {
            Ok(layout) => print!("{layout}"),
            Err(err) => error!("Print layout error: {err}"),
        },
        Command::Scan => scan(volume, scan_threads)?,
        Command::Record(nb) => match volume {
            Volume::Ntfs(ntfs) => match ntfs.read_mft_record(nb)? {
                Some(record) => print!("{}", hex_dump(record.bytes())),
                None => println!("Record {nb} is not allocated"),
            },
            Volume::Fat32(_) => warn!("'record' only applies to NTFS volumes"),
        },
        Command::Find(needle) => {
            volume.prepare()?;
            match volume {
                Volume::Ntfs(ntfs) => {
                    for entry in ntfs.find_by_name(&needle) {
                        let path = ntfs.entry_path(entry.record_number()).unwrap_or_default();
                        println!("{entry}  {path}");
                    }
                }
                Volume::Fat32(_) => warn!("'find' only applies to NTFS volumes"),
            }
        }
        Command::Ls(path) => {
            volume.prepare()?;
            let Some(dir) = resolve(volume, &path)? else {
                return Ok(());
            };
            for entry in volume.list_directory(&dir)? {
                println!("{entry}");
            }
        }
        Command::Tree(path) => {
            volume.prepare()?;
            let Some(dir) = resolve(volume, &path)? else {
                return Ok(());
            };
            for node in volume.build_tree(dir) {
                match node {
                    Ok(node) => {
                        let marker = if node.entry.is_dir() { "/" } else { "" };
                        println!("{}{}{marker}", "  ".repeat(node.depth), display_name(&node.path));
                    }
                    Err(err) => warn!("{err}"),
                }
            }
        }
        Command::Cat(path) => {
            volume.prepare()?;
            if let Some(entry) = resolve(volume, &path)? {
                match volume.read_file_content(&entry)? {
                    FileContent::Data(data) => println!("{}", String::from_utf8_lossy(&data)),
                    FileContent::Unsupported(reason) => println!(
                        "{reason}. We currently do not support reading this file. You can use: {}",
                        suggested_viewer(&path)
                    ),
                }
            }
        }
        Command::Dump(path) => {
            volume.prepare()?;
            if let Some(entry) = resolve(volume, &path)? {
                match volume.read_file_content(&entry)? {
                    FileContent::Data(data) => print!("{}", hex_dump(&data)),
                    FileContent::Unsupported(reason) => println!("{reason}"),
                }
            }
        }
        Command::Stat(path) => {
            volume.prepare()?;
            if let Some(entry) = resolve(volume, &path)? {
                print_stat(volume, &entry);
            }
        }
        _ => {}
    }
    Ok(())
}

fn resolve(volume: &mut Volume<File>, path: &str) -> Result<Option<VolumeEntry>, VolumeError> {
    let entry = volume.resolve_path(path)?;
    if entry.is_none() {
        println!("{path} is invalid");
    }
    Ok(entry)
}

/// Last component of a tree path, or the path itself for the root.
fn display_name(path: &str) -> &str {
    match path.rsplit_once('/') {
        Some((_, "")) | None => path,
        Some((_, name)) => name,
    }
}

fn scan(volume: &mut Volume<File>, threads: Option<usize>) -> Result<(), VolumeError> {
    let Volume::Ntfs(ntfs) = volume else {
        warn!("'scan' only applies to NTFS volumes");
        return Ok(());
    };

    let options = ScanOptions {
        threads,
        ..ScanOptions::default()
    };
    let report = ntfs.scan(&options, &CancelToken::new())?;
    if !report.cancelled {
        ntfs.resolve_tree();
    }
    println!(
        "Examined {} records: {} files, {} skipped{}",
        report.examined,
        report.parsed,
        report.skipped,
        if report.truncated { " (image ended early)" } else { "" }
    );
    Ok(())
}

fn print_stat(volume: &Volume<File>, entry: &VolumeEntry) {
    println!("---");
    println!("NAME: {}", entry.name());
    println!("TYPE: {}", if entry.is_dir() { "Directory" } else { "File/Archive" });
    println!("SIZE: {}", entry.size());

    match entry {
        VolumeEntry::Fat32(e) => {
            println!("ATTRIBUTES: {}", describe_attributes(e.attr()));
            println!("SHORT NAME: {}", String::from_utf8_lossy(e.short_name()));
            println!("FIRST CLUSTER: {}", e.first_cluster());
            println!("CREATED: {}", optional(e.created()));
            println!("MODIFIED: {}", optional(e.modified()));
            println!("ACCESSED: {}", optional(e.accessed()));
        }
        VolumeEntry::Ntfs(e) => {
            println!("RECORD: {}", e.record_number());
            println!("PARENT RECORD: {}", e.parent_ref());
            println!("IN USE: {}", e.in_use());
            if let Volume::Ntfs(ntfs) = volume {
                println!("PATH: {}", ntfs.entry_path(e.record_number()).unwrap_or_default());
            }
            println!("CREATED: {}", optional(e.created()));
            println!("MODIFIED: {}", optional(e.modified()));
            println!("ACCESSED: {}", optional(e.accessed()));
            let tags: Vec<String> = e.attributes().iter().map(|a| a.to_string()).collect();
            println!("ATTRIBUTES: {}", tags.join(", "));
        }
    }
    println!("---");
}

fn optional<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| String::from("N/A"), |v| v.to_string())
}
