// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn build_cli() -> Command {
    Command::new("gemvault")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Gemvault Contributors")
        .about("Private gem repository with atomic uploads and lazy documentation")
        .subcommand_required(true)
        .arg(
            Arg::new("data_dir")
                .long("data-dir")
                .value_name("DIR")
                .env("GEMVAULT_DATA_DIR")
                .default_value("/var/lib/gemvault/data")
                .help("Repository data directory (archives and index)"),
        )
        .arg(
            Arg::new("docs_dir")
                .long("docs-dir")
                .value_name("DIR")
                .env("GEMVAULT_DOCS_DIR")
                .default_value("/var/lib/gemvault/docs")
                .help("Directory for generated documentation"),
        )
        .arg(
            Arg::new("allow_replace")
                .long("allow-replace")
                .action(ArgAction::SetTrue)
                .help("Overwrite archives that already exist with different content"),
        )
        .arg(
            Arg::new("incremental")
                .long("incremental")
                .action(ArgAction::SetTrue)
                .help("Patch the index on upload instead of rebuilding it"),
        )
        .arg(
            Arg::new("build_legacy")
                .long("build-legacy")
                .action(ArgAction::SetTrue)
                .help("Also write uncompressed index fragments"),
        )
        .arg(
            Arg::new("max_upload_size")
                .long("max-upload-size")
                .value_name("BYTES")
                .help("Largest accepted upload in bytes"),
        )
        .arg(
            Arg::new("doc_timeout")
                .long("doc-timeout")
                .value_name("SECONDS")
                .help("Documentation build timeout in seconds"),
        )
        .subcommand(
            Command::new("upload")
                .about("Upload a .gem archive")
                .arg(Arg::new("file").required(true).help("Path to the archive")),
        )
        .subcommand(
            Command::new("delete")
                .about("Delete a stored archive")
                .arg(Arg::new("filename").required(true).help("Archive filename, e.g. foo-1.0.gem")),
        )
        .subcommand(
            Command::new("reindex")
                .about("Rebuild the index from the stored archives")
                .arg(
                    Arg::new("incremental")
                        .long("incremental")
                        .action(ArgAction::SetTrue)
                        .help("Patch the existing index instead of rescanning everything"),
                ),
        )
        .subcommand(
            Command::new("list")
                .about("List indexed gem versions")
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print JSON instead of text"),
                ),
        )
        .subcommand(Command::new("archives").about("List stored archive files"))
        .subcommand(
            Command::new("docs")
                .about("Generate documentation for a gem and print where it lives")
                .arg(Arg::new("name").required(true).help("Archive stem, e.g. foo-1.0")),
        )
        .subcommand(
            Command::new("completions")
                .about("Generate shell completion scripts")
                .arg(
                    Arg::new("shell")
                        .required(true)
                        .value_parser(["bash", "elvish", "fish", "powershell", "zsh"])
                        .help("Shell type"),
                ),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Create man directory
    let out_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir).expect("Failed to create man directory");

    let cmd = build_cli();
    let man = Man::new(cmd);
    let mut buffer = Vec::new();
    man.render(&mut buffer).expect("Failed to render man page");

    let man_path = man_dir.join("gemvault.1");
    fs::write(&man_path, buffer).expect("Failed to write man page");
}
