// build.rs

use clap::{Arg, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn target_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("root")
            .short('r')
            .long("root")
            .default_value("/")
            .help("Target root directory to install under"),
    )
    .arg(
        Arg::new("state")
            .long("state")
            .value_name("PATH")
            .help("Installed-state store file"),
    )
    .arg(
        Arg::new("cache")
            .long("cache")
            .value_name("DIR")
            .help("Archive cache directory"),
    )
    .arg(
        Arg::new("dry_run")
            .long("dry-run")
            .action(clap::ArgAction::SetTrue)
            .help("Resolve and print the plan without applying it"),
    )
}

fn build_cli() -> Command {
    Command::new("xcer")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Package manager with transactional, conflict-checked installs")
        .subcommand_required(true)
        .subcommand(target_args(
            Command::new("install")
                .about("Install packages, resolving and installing their dependencies")
                .arg(
                    Arg::new("specs")
                        .required(true)
                        .num_args(1..)
                        .help("Package specs such as 'nginx' or 'libssl>=3.0'"),
                )
                .arg(
                    Arg::new("index")
                        .short('i')
                        .long("index")
                        .required(true)
                        .help("Package index location (local path or http(s) URL)"),
                ),
        ))
        .subcommand(target_args(
            Command::new("remove")
                .about("Remove installed packages")
                .arg(
                    Arg::new("names")
                        .required(true)
                        .num_args(1..)
                        .help("Package names to remove"),
                )
                .arg(
                    Arg::new("index")
                        .short('i')
                        .long("index")
                        .help("Package index location (used to validate declared conflicts)"),
                ),
        ))
        .subcommand(target_args(
            Command::new("update")
                .about("Upgrade installed packages to the newest satisfiable versions")
                .arg(
                    Arg::new("names")
                        .num_args(0..)
                        .help("Package names (updates everything installed if omitted)"),
                )
                .arg(
                    Arg::new("index")
                        .short('i')
                        .long("index")
                        .required(true)
                        .help("Package index location (local path or http(s) URL)"),
                ),
        ))
        .subcommand(
            Command::new("list")
                .about("List installed packages")
                .arg(
                    Arg::new("root")
                        .short('r')
                        .long("root")
                        .default_value("/")
                        .help("Target root directory"),
                ),
        )
        .subcommand(
            Command::new("search")
                .about("Search the package index by name")
                .arg(Arg::new("term").required(true).help("Substring to look for"))
                .arg(
                    Arg::new("index")
                        .short('i')
                        .long("index")
                        .required(true)
                        .help("Package index location (local path or http(s) URL)"),
                ),
        )
        .subcommand(
            Command::new("completions")
                .about("Generate shell completion scripts")
                .arg(
                    Arg::new("shell")
                        .required(true)
                        .value_parser(["bash", "zsh", "fish", "powershell"])
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

    // Generate main man page
    let cmd = build_cli();
    let man = Man::new(cmd);
    let mut buffer = Vec::new();
    man.render(&mut buffer).expect("Failed to render man page");

    let man_path = man_dir.join("xcer.1");
    fs::write(&man_path, buffer).expect("Failed to write man page");
}
