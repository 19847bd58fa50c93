use anyhow::Result;
use clap::Parser;

use crate::cmd::{init_logger, Args};

mod cmd;

fn main() -> Result<()> {
    let args = Args::parse();
    init_logger(args.verbose, args.log_file.as_deref());
    cmd::run(args)
}
