use clap::Command;
use clap_complete::{generate, Shell};
use std::io;

/// Write a completion script for `shell` to stdout
pub fn run(shell: Shell, mut cmd: Command) {
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut io::stdout());
}
