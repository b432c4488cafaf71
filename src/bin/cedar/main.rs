//! # Cedar
//!
//! The cedar binary: a thin caller around the engine. It runs a source file
//! or evaluates a single expression; everything interesting lives in the
//! library.

mod cli;

use cli::*;

use std::error::Error;

use cedar::Machine;
use log::error;

fn main() -> Result<(), Box<dyn Error>> {
    let args = Cli::init();

    simple_logger::init_with_level(args.verbosity.into()).unwrap();

    let machine = Machine::new();

    if let Some(expr) = &args.eval {
        match machine.eval_string(expr) {
            Ok(value) => println!("{}", value.to_string(false)),
            Err(err) => {
                error!("{err}");
                std::process::exit(-1);
            }
        }
        return Ok(());
    }

    let Some(file) = &args.file else {
        eprintln!("nothing to run: pass a source file or use -e <expr>");
        std::process::exit(2);
    };

    if let Err(err) = machine.eval_file(file) {
        error!("{err}");
        std::process::exit(-1);
    }

    Ok(())
}
