// build.rs

use clap::{Arg, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Common argument: project directory
fn path_arg() -> Arg {
    Arg::new("path")
        .long("path")
        .value_name("DIR")
        .default_value(".")
        .help("Project directory")
}

/// Common argument: registry directory
fn registry_arg() -> Arg {
    Arg::new("registry")
        .long("registry")
        .value_name("DIR")
        .help("Registry directory to draw packages from")
}

fn build_cli() -> Command {
    Command::new("dub")
        .version(env!("CARGO_PKG_VERSION"))
        .author("dub contributors")
        .about("Package manager and build driver for the D programming language")
        .subcommand_required(false)
        .subcommand(
            Command::new("describe")
                .about("Show the root package and its resolved dependency graph")
                .arg(path_arg()),
        )
        .subcommand(
            Command::new("build-settings")
                .about("Print the aggregated build settings for a configuration")
                .arg(path_arg())
                .arg(Arg::new("config").short('c').long("config").help("Configuration to resolve"))
                .arg(
                    Arg::new("build_type")
                        .short('b')
                        .long("build-type")
                        .default_value("debug")
                        .help("Build type to mix in"),
                ),
        )
        .subcommand(
            Command::new("upgrade")
                .about("Resolve dependency versions and update the selections")
                .arg(path_arg())
                .arg(registry_arg())
                .arg(
                    Arg::new("pre_release")
                        .long("pre-release")
                        .action(clap::ArgAction::SetTrue)
                        .help("Let pre-release versions compete with releases"),
                )
                .arg(
                    Arg::new("dry_run")
                        .long("dry-run")
                        .action(clap::ArgAction::SetTrue)
                        .help("Show what would change without applying anything"),
                ),
        )
        .subcommand(
            Command::new("fetch")
                .about("Fetch a package into the local cache")
                .arg(Arg::new("name").required(true).help("Package name"))
                .arg(
                    Arg::new("version")
                        .short('v')
                        .long("version")
                        .default_value("*")
                        .help("Version spec to satisfy"),
                )
                .arg(registry_arg())
                .arg(path_arg()),
        )
        .subcommand(
            Command::new("remove")
                .about("Remove a package from the local cache")
                .arg(Arg::new("name").required(true).help("Package name"))
                .arg(
                    Arg::new("version")
                        .short('v')
                        .long("version")
                        .required(true)
                        .help("Exact version to remove"),
                )
                .arg(path_arg()),
        )
        .subcommand(
            Command::new("list")
                .about("List all packages the package manager knows about")
                .arg(path_arg()),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Create man directory - use CARGO_MANIFEST_DIR which is always set by cargo
    let manifest_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=CARGO_MANIFEST_DIR not set: {}", e);
            return;
        }
    };
    let man_dir = manifest_dir.join("man");

    if let Err(e) = fs::create_dir_all(&man_dir) {
        println!("cargo:warning=Failed to create man directory: {}", e);
        return;
    }

    // Generate main man page
    let cmd = build_cli();
    let man = Man::new(cmd);
    let mut buffer = Vec::new();

    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    let man_path = man_dir.join("dub.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
        return;
    }
}
