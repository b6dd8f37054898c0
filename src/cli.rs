use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::debug;

use crate::attributes::{Attributes, FileAttributes};
use crate::backend::Adapter;
use crate::config::{DiskConfig, WriteOptions};
use crate::visibility::Visibility;

pub const USAGE: &str = "\
Usage: fsbridge <disk.toml> <command> [args]

Commands:
  ls [-r] [path]              list a directory, recursively with -r
  cat <path>                  print a file
  put <local-file> <path>     upload a local file
  mkdir <path>                create a directory
  rm <path>                   delete a file
  rmdir <path>                delete a directory and its contents
  mv <from> <to>              move a file
  cp <from> <to>              copy a file
  stat <path>                 print file metadata
  chmod <public|private> <path>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    List { path: String, deep: bool },
    Cat { path: String },
    Put { local: PathBuf, path: String },
    Mkdir { path: String },
    Remove { path: String },
    RemoveDirectory { path: String },
    Move { from: String, to: String },
    Copy { from: String, to: String },
    Stat { path: String },
    Chmod { visibility: Visibility, path: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub config_path: PathBuf,
    pub command: Command,
}

/// Parses the arguments that follow the program name.
pub fn parse_args(args: &[String]) -> Result<Invocation> {
    let mut args = args.iter().map(String::as_str);
    let config_path = args
        .next()
        .ok_or_else(|| anyhow::anyhow!("missing disk configuration file"))?;
    let name = args
        .next()
        .ok_or_else(|| anyhow::anyhow!("missing command"))?;
    let rest: Vec<&str> = args.collect();

    let command = match (name, rest.as_slice()) {
        ("ls", ["-r"]) => Command::List {
            path: String::new(),
            deep: true,
        },
        ("ls", ["-r", path]) | ("ls", [path, "-r"]) => Command::List {
            path: path.to_string(),
            deep: true,
        },
        ("ls", []) => Command::List {
            path: String::new(),
            deep: false,
        },
        ("ls", [path]) => Command::List {
            path: path.to_string(),
            deep: false,
        },
        ("cat", [path]) => Command::Cat {
            path: path.to_string(),
        },
        ("put", [local, path]) => Command::Put {
            local: PathBuf::from(local),
            path: path.to_string(),
        },
        ("mkdir", [path]) => Command::Mkdir {
            path: path.to_string(),
        },
        ("rm", [path]) => Command::Remove {
            path: path.to_string(),
        },
        ("rmdir", [path]) => Command::RemoveDirectory {
            path: path.to_string(),
        },
        ("mv", [from, to]) => Command::Move {
            from: from.to_string(),
            to: to.to_string(),
        },
        ("cp", [from, to]) => Command::Copy {
            from: from.to_string(),
            to: to.to_string(),
        },
        ("stat", [path]) => Command::Stat {
            path: path.to_string(),
        },
        ("chmod", [visibility, path]) => Command::Chmod {
            visibility: visibility.parse()?,
            path: path.to_string(),
        },
        (
            "ls" | "cat" | "put" | "mkdir" | "rm" | "rmdir" | "mv" | "cp" | "stat" | "chmod",
            _,
        ) => bail!("wrong arguments for '{name}'"),
        _ => bail!("unknown command '{name}'"),
    };

    Ok(Invocation {
        config_path: PathBuf::from(config_path),
        command,
    })
}

pub fn load_config(path: &Path) -> Result<DiskConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let config: DiskConfig =
        toml::from_str(&raw).with_context(|| format!("invalid disk configuration {}", path.display()))?;
    debug!(path = %path.display(), read_only = config.read_only, "loaded disk configuration");
    Ok(config)
}

/// Runs one command. Listings and metadata are printed as one JSON object
/// per line.
pub fn run(
    adapter: &mut dyn Adapter,
    command: &Command,
    options: &WriteOptions,
    out: &mut dyn Write,
) -> Result<()> {
    match command {
        Command::List { path, deep } => {
            for entry in adapter.finder(path, *deep)? {
                writeln!(out, "{}", serde_json::to_string(&entry?)?)?;
            }
        }
        Command::Cat { path } => {
            let mut stream = adapter.read_stream(path)?;
            io::copy(&mut stream, out)?;
        }
        Command::Put { local, path } => {
            let mut file = File::open(local)
                .with_context(|| format!("failed to open {}", local.display()))?;
            adapter.write_stream(path, &mut file, options)?;
        }
        Command::Mkdir { path } => adapter.create_directory(path, options)?,
        Command::Remove { path } => adapter.delete(path)?,
        Command::RemoveDirectory { path } => adapter.delete_directory(path)?,
        Command::Move { from, to } => adapter.move_file(from, to, options)?,
        Command::Copy { from, to } => adapter.copy(from, to, options)?,
        Command::Stat { path } => {
            let attributes = Attributes::File(stat(adapter, path)?);
            writeln!(out, "{}", serde_json::to_string(&attributes)?)?;
        }
        Command::Chmod { visibility, path } => adapter.set_visibility(path, *visibility)?,
    }
    Ok(())
}

fn stat(adapter: &mut dyn Adapter, path: &str) -> Result<FileAttributes> {
    let size = adapter.file_size(path)?;
    let last_modified = adapter.last_modified(path)?.last_modified();
    let visibility = adapter.visibility(path)?.visibility();
    // Mime detection may legitimately come up empty.
    let mime_type = adapter
        .mime_type(path)
        .ok()
        .and_then(|attributes| attributes.mime_type().map(str::to_string));

    Ok(FileAttributes::new(size.path())
        .with_file_size(size.size())
        .with_last_modified(last_modified)
        .with_visibility(visibility)
        .with_mime_type(mime_type))
}
