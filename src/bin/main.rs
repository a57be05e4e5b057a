use clap::Parser;

use gosuki::cli::{Cli, run};

fn main() {
    let cli = Cli::parse();
    std::process::exit(run(cli));
}
